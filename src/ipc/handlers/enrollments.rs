use crate::auth::{ADMIN_ONLY, STAFF};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, query_failed, require_role, require_row, required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let class_id = required_str(req, "classId")?;
    require_row(conn, req, "students", &student_id, "student")?;
    require_row(conn, req, "classes", &class_id, "class")?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM student_courses WHERE student_id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed(req))?;
    if let Some(enrollment_id) = existing {
        return Ok(ok(
            &req.id,
            json!({ "enrollmentId": enrollment_id, "created": false }),
        ));
    }

    let enrollment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO student_courses(id, student_id, class_id, created_at) VALUES(?, ?, ?, ?)",
        (&enrollment_id, &student_id, &class_id, db::now_timestamp()),
    )
    .map_err(write_failed(req, "db_insert_failed", "student_courses"))?;

    tracing::info!(student_id = %student_id, class_id = %class_id, "student enrolled");
    Ok(ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "created": true }),
    ))
}

fn handle_enrollments_remove(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let class_id = required_str(req, "classId")?;

    let removed = conn
        .execute(
            "DELETE FROM student_courses WHERE student_id = ? AND class_id = ?",
            (&student_id, &class_id),
        )
        .map_err(write_failed(req, "db_delete_failed", "student_courses"))?;
    if removed == 0 {
        return Err(err(&req.id, "not_found", "enrollment not found", None));
    }
    // Scores and session reports stay behind; re-enrolling brings them back.
    tracing::info!(student_id = %student_id, class_id = %class_id, "student unenrolled");
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, STAFF)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;

    let mut stmt = conn
        .prepare(
            "SELECT sc.id, sc.student_id, s.name, sc.created_at
             FROM student_courses sc
             JOIN students s ON s.id = sc.student_id
             WHERE sc.class_id = ?
             ORDER BY sc.created_at, sc.student_id",
        )
        .map_err(query_failed(req))?;
    let enrollments = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let name: String = r.get(2)?;
            let created_at: String = r.get(3)?;
            Ok(json!({
                "enrollmentId": id,
                "studentId": student_id,
                "name": name,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "enrollments": enrollments })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "enrollments.add" => handle_enrollments_add(state, req),
        "enrollments.remove" => handle_enrollments_remove(state, req),
        "enrollments.list" => handle_enrollments_list(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
