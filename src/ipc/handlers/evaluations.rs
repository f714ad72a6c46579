use crate::auth::{ADMIN_ONLY, ANY_ROLE};
use crate::calc;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_unreferenced, optional_bool, optional_str, query_failed, require_role,
    require_row, required_percent, required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Id of the course's session-report evaluation other than `except`, if any.
fn other_session_report_evaluation(
    conn: &Connection,
    course_id: &str,
    except: Option<&str>,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM evaluations
         WHERE course_id = ? AND is_session_report = 1 AND id != COALESCE(?, '')
         LIMIT 1",
        (course_id, except),
        |r| r.get(0),
    )
    .optional()
}

fn handle_evaluations_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    let evaluations = calc::load_course_evaluations(conn, &course_id)
        .map_err(|e| calc_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "evaluations": evaluations })))
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    let name = required_str(req, "name")?;
    let weight = required_percent(req, "weight")?;
    let is_session_report = optional_bool(req, "isSessionReport")?.unwrap_or(false);
    require_row(conn, req, "courses", &course_id, "course")?;

    if is_session_report {
        if let Some(existing) =
            other_session_report_evaluation(conn, &course_id, None).map_err(query_failed(req))?
        {
            return Err(err(
                &req.id,
                "conflict",
                "course already has a session report evaluation",
                Some(json!({ "evaluationId": existing })),
            ));
        }
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM evaluations WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(query_failed(req))?;

    let evaluation_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO evaluations(id, course_id, name, weight, is_session_report, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &evaluation_id,
            &course_id,
            &name,
            weight,
            is_session_report as i64,
            next_sort,
        ),
    )
    .map_err(write_failed(req, "db_insert_failed", "evaluations"))?;

    tracing::info!(
        evaluation_id = %evaluation_id,
        course_id = %course_id,
        weight,
        is_session_report,
        "evaluation created"
    );
    Ok(ok(
        &req.id,
        json!({ "evaluationId": evaluation_id, "sortOrder": next_sort }),
    ))
}

fn handle_evaluations_update(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;

    let course_id: Option<String> = conn
        .query_row(
            "SELECT course_id FROM evaluations WHERE id = ?",
            [&evaluation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed(req))?;
    let Some(course_id) = course_id else {
        return Err(err(&req.id, "not_found", "evaluation not found", None));
    };

    let name = optional_str(req, "name");
    let weight = match req.params.get("weight") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(_) => Some(required_percent(req, "weight")?),
    };
    let is_session_report = optional_bool(req, "isSessionReport")?;

    if is_session_report == Some(true) {
        if let Some(existing) =
            other_session_report_evaluation(conn, &course_id, Some(&evaluation_id))
                .map_err(query_failed(req))?
        {
            return Err(err(
                &req.id,
                "conflict",
                "course already has a session report evaluation",
                Some(json!({ "evaluationId": existing })),
            ));
        }
        // Session-report evaluations are scored from session reports only.
        ensure_unreferenced(conn, req, &[("student_scores", "evaluation_id")], &evaluation_id)?;
    }

    conn.execute(
        "UPDATE evaluations
         SET name = COALESCE(?, name),
             weight = COALESCE(?, weight),
             is_session_report = COALESCE(?, is_session_report)
         WHERE id = ?",
        (
            &name,
            weight,
            is_session_report.map(|b| b as i64),
            &evaluation_id,
        ),
    )
    .map_err(write_failed(req, "db_update_failed", "evaluations"))?;

    Ok(ok(&req.id, json!({ "evaluationId": evaluation_id })))
}

fn handle_evaluations_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    require_row(conn, req, "evaluations", &evaluation_id, "evaluation")?;
    ensure_unreferenced(conn, req, &[("student_scores", "evaluation_id")], &evaluation_id)?;

    conn.execute("DELETE FROM evaluations WHERE id = ?", [&evaluation_id])
        .map_err(write_failed(req, "db_delete_failed", "evaluations"))?;
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_evaluations_validate_weights(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    require_row(conn, req, "courses", &course_id, "course")?;
    let evaluations = calc::load_course_evaluations(conn, &course_id)
        .map_err(|e| calc_err(&req.id, e))?;
    let check = calc::validate_weights(&evaluations);
    Ok(ok(&req.id, json!(check)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "evaluations.list" => handle_evaluations_list(state, req),
        "evaluations.create" => handle_evaluations_create(state, req),
        "evaluations.update" => handle_evaluations_update(state, req),
        "evaluations.delete" => handle_evaluations_delete(state, req),
        "evaluations.validateWeights" => handle_evaluations_validate_weights(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
