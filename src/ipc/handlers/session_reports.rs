use crate::auth::{self, ANY_ROLE, STAFF};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, forbidden, optional_bool, optional_str, query_failed, require_role,
    required_percent, required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_session_reports_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, STAFF)?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let schedule_id = required_str(req, "scheduleId")?;
    let score = required_percent(req, "score")?;
    let Some(attended) = optional_bool(req, "attended")? else {
        return Err(err(&req.id, "bad_params", "missing attended", None));
    };

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM schedules WHERE id = ?",
            [&schedule_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed(req))?;
    let Some(class_id) = class_id else {
        return Err(err(&req.id, "not_found", "schedule not found", None));
    };

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

    conn.execute(
        "INSERT INTO session_reports(id, student_id, schedule_id, attended, score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, schedule_id) DO UPDATE SET
           attended = excluded.attended,
           score = excluded.score,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &schedule_id,
            attended as i64,
            score,
            db::now_timestamp(),
        ),
    )
    .map_err(write_failed(req, "db_update_failed", "session_reports"))?;

    let report_id: String = conn
        .query_row(
            "SELECT id FROM session_reports WHERE student_id = ? AND schedule_id = ?",
            (&student_id, &schedule_id),
            |r| r.get(0),
        )
        .map_err(query_failed(req))?;

    tracing::debug!(
        class_id = %class_id,
        student_id = %student_id,
        schedule_id = %schedule_id,
        attended,
        score,
        "session report recorded"
    );
    Ok(ok(
        &req.id,
        json!({ "sessionReportId": report_id, "classId": class_id }),
    ))
}

fn handle_session_reports_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let student_id = optional_str(req, "studentId");

    if !principal.role.is_staff() {
        let Some(sid) = student_id.as_deref() else {
            return Err(forbidden(req, "studentId is required for non-staff callers"));
        };
        if !auth::can_view_student(conn, principal, sid).map_err(query_failed(req))? {
            return Err(forbidden(req, "cannot view this student's session reports"));
        }
    }

    let mut sql = String::from(
        "SELECT sr.id, sr.student_id, sr.schedule_id, s.session_no, sr.attended, sr.score
         FROM session_reports sr
         JOIN schedules s ON s.id = sr.schedule_id
         WHERE s.class_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id)];
    if let Some(sid) = student_id {
        sql.push_str(" AND sr.student_id = ?");
        binds.push(Value::Text(sid));
    }
    sql.push_str(" ORDER BY s.session_no, sr.student_id");

    let mut stmt = conn.prepare(&sql).map_err(query_failed(req))?;
    let reports = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let schedule_id: String = r.get(2)?;
            let session_no: i64 = r.get(3)?;
            let attended: bool = r.get::<_, i64>(4)? != 0;
            let score: f64 = r.get(5)?;
            Ok(json!({
                "sessionReportId": id,
                "studentId": student_id,
                "scheduleId": schedule_id,
                "sessionNo": session_no,
                "attended": attended,
                "score": score
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "sessionReports": reports })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "sessionReports.upsert" => handle_session_reports_upsert(state, req),
        "sessionReports.list" => handle_session_reports_list(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
