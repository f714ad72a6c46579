use crate::auth::{self, ANY_ROLE, STAFF};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_unreferenced, forbidden, optional_str, query_failed, require_role,
    require_row, required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

fn handle_schedules_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    if !auth::can_view_class(conn, principal, &class_id).map_err(query_failed(req))? {
        return Err(forbidden(req, "not enrolled in this class"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, session_no, date
             FROM schedules
             WHERE class_id = ?
             ORDER BY session_no",
        )
        .map_err(query_failed(req))?;
    let schedules = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let session_no: i64 = r.get(1)?;
            let date: Option<String> = r.get(2)?;
            Ok(json!({ "id": id, "sessionNo": session_no, "date": date }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "schedules": schedules })))
}

fn handle_schedules_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, STAFF)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    require_row(conn, req, "classes", &class_id, "class")?;

    let date = optional_str(req, "date");
    if let Some(d) = &date {
        if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return Err(err(
                &req.id,
                "bad_params",
                "date must be YYYY-MM-DD",
                Some(json!({ "date": d })),
            ));
        }
    }

    let session_no = match req.params.get("sessionNo") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_i64() {
            Some(n) if n > 0 => Some(n),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "sessionNo must be a positive integer",
                    None,
                ))
            }
        },
    };
    let session_no = match session_no {
        Some(n) => n,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(session_no), 0) + 1 FROM schedules WHERE class_id = ?",
                [&class_id],
                |r| r.get(0),
            )
            .map_err(query_failed(req))?,
    };

    let taken: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schedules WHERE class_id = ? AND session_no = ?",
            (&class_id, session_no),
            |r| r.get(0),
        )
        .map_err(query_failed(req))?;
    if taken > 0 {
        return Err(err(
            &req.id,
            "conflict",
            "session number already scheduled",
            Some(json!({ "sessionNo": session_no })),
        ));
    }

    let schedule_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedules(id, class_id, session_no, date) VALUES(?, ?, ?, ?)",
        (&schedule_id, &class_id, session_no, &date),
    )
    .map_err(write_failed(req, "db_insert_failed", "schedules"))?;

    tracing::debug!(class_id = %class_id, session_no, "session scheduled");
    Ok(ok(
        &req.id,
        json!({ "scheduleId": schedule_id, "sessionNo": session_no }),
    ))
}

fn handle_schedules_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, STAFF)?;
    let conn = db_conn(state, req)?;
    let schedule_id = required_str(req, "scheduleId")?;
    require_row(conn, req, "schedules", &schedule_id, "schedule")?;
    ensure_unreferenced(conn, req, &[("session_reports", "schedule_id")], &schedule_id)?;

    conn.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id])
        .map_err(write_failed(req, "db_delete_failed", "schedules"))?;
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "schedules.list" => handle_schedules_list(state, req),
        "schedules.create" => handle_schedules_create(state, req),
        "schedules.delete" => handle_schedules_delete(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
