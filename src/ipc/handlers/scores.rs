use crate::auth::{self, ANY_ROLE, STAFF};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, forbidden, optional_str, query_failed, require_role, required_percent,
    required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_scores_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, STAFF)?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let class_id = required_str(req, "classId")?;
    let score = required_percent(req, "score")?;

    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM student_courses WHERE student_id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed(req))?;
    if enrolled.is_none() {
        return Err(err(
            &req.id,
            "not_found",
            "student is not enrolled in this class",
            None,
        ));
    }

    // The evaluation must belong to the class's course.
    let evaluation: Option<bool> = conn
        .query_row(
            "SELECT e.is_session_report
             FROM evaluations e
             JOIN classes k ON k.course_id = e.course_id
             WHERE e.id = ? AND k.id = ?",
            (&evaluation_id, &class_id),
            |r| Ok(r.get::<_, i64>(0)? != 0),
        )
        .optional()
        .map_err(query_failed(req))?;
    match evaluation {
        None => {
            return Err(err(
                &req.id,
                "not_found",
                "evaluation not found for this class",
                None,
            ))
        }
        Some(true) => {
            return Err(err(
                &req.id,
                "bad_params",
                "the session report evaluation is scored from session reports",
                Some(json!({ "evaluationId": evaluation_id })),
            ))
        }
        Some(false) => {}
    }

    conn.execute(
        "INSERT INTO student_scores(id, student_id, evaluation_id, class_id, score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, evaluation_id, class_id) DO UPDATE SET
           score = excluded.score,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &evaluation_id,
            &class_id,
            score,
            db::now_timestamp(),
        ),
    )
    .map_err(write_failed(req, "db_update_failed", "student_scores"))?;

    let score_id: String = conn
        .query_row(
            "SELECT id FROM student_scores
             WHERE student_id = ? AND evaluation_id = ? AND class_id = ?",
            (&student_id, &evaluation_id, &class_id),
            |r| r.get(0),
        )
        .map_err(query_failed(req))?;

    tracing::info!(
        class_id = %class_id,
        student_id = %student_id,
        evaluation_id = %evaluation_id,
        score,
        by = %principal.id,
        "student score recorded"
    );
    Ok(ok(&req.id, json!({ "scoreId": score_id, "score": score })))
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let student_id = optional_str(req, "studentId");

    if !principal.role.is_staff() {
        let Some(sid) = student_id.as_deref() else {
            return Err(forbidden(req, "studentId is required for non-staff callers"));
        };
        if !auth::can_view_student(conn, principal, sid).map_err(query_failed(req))? {
            return Err(forbidden(req, "cannot view this student's scores"));
        }
    }

    let mut sql = String::from(
        "SELECT ss.id, ss.student_id, ss.evaluation_id, e.name, ss.score, ss.updated_at
         FROM student_scores ss
         JOIN evaluations e ON e.id = ss.evaluation_id
         WHERE ss.class_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id)];
    if let Some(sid) = student_id {
        sql.push_str(" AND ss.student_id = ?");
        binds.push(Value::Text(sid));
    }
    sql.push_str(" ORDER BY ss.student_id, e.sort_order");

    let mut stmt = conn.prepare(&sql).map_err(query_failed(req))?;
    let scores = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let evaluation_id: String = r.get(2)?;
            let evaluation_name: String = r.get(3)?;
            let score: f64 = r.get(4)?;
            let updated_at: Option<String> = r.get(5)?;
            Ok(json!({
                "scoreId": id,
                "studentId": student_id,
                "evaluationId": evaluation_id,
                "evaluationName": evaluation_name,
                "score": score,
                "updatedAt": updated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "scores": scores })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "scores.upsert" => handle_scores_upsert(state, req),
        "scores.list" => handle_scores_list(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
