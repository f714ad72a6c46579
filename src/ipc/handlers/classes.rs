use crate::auth::{ADMIN_ONLY, ANY_ROLE};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_unreferenced, optional_str, query_failed, require_role, require_row,
    required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let Some(conn) = state.db.as_ref() else {
        return Ok(ok(&req.id, json!({ "classes": [] })));
    };

    let course_id = optional_str(req, "courseId");
    let mut sql = String::from(
        "SELECT
           k.id,
           k.course_id,
           k.name,
           (SELECT COUNT(*) FROM student_courses sc WHERE sc.class_id = k.id) AS student_count,
           (SELECT COUNT(*) FROM schedules s WHERE s.class_id = k.id) AS session_count
         FROM classes k",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = &course_id {
        sql.push_str(" WHERE k.course_id = ?");
        binds.push(Value::Text(cid.clone()));
    }
    sql.push_str(" ORDER BY k.name");

    let mut stmt = conn.prepare(&sql).map_err(query_failed(req))?;
    let classes = stmt
        .query_map(params_from_iter(binds), |row| {
            let id: String = row.get(0)?;
            let course_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let session_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "courseId": course_id,
                "name": name,
                "studentCount": student_count,
                "sessionCount": session_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "classes": classes })))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    let name = required_str(req, "name")?;
    require_row(conn, req, "courses", &course_id, "course")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, course_id, name) VALUES(?, ?, ?)",
        (&class_id, &course_id, &name),
    )
    .map_err(write_failed(req, "db_insert_failed", "classes"))?;

    tracing::info!(class_id = %class_id, course_id = %course_id, "class created");
    Ok(ok(
        &req.id,
        json!({ "classId": class_id, "courseId": course_id, "name": name }),
    ))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let name = required_str(req, "name")?;

    let changed = conn
        .execute("UPDATE classes SET name = ? WHERE id = ?", (&name, &class_id))
        .map_err(write_failed(req, "db_update_failed", "classes"))?;
    if changed == 0 {
        return Err(err(&req.id, "not_found", "class not found", None));
    }
    Ok(ok(&req.id, json!({ "classId": class_id, "name": name })))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;

    require_row(conn, req, "classes", &class_id, "class")?;
    // Scores and session reports hang off these; they are never deleted implicitly.
    ensure_unreferenced(
        conn,
        req,
        &[
            ("student_courses", "class_id"),
            ("schedules", "class_id"),
            ("student_scores", "class_id"),
        ],
        &class_id,
    )?;

    conn.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(write_failed(req, "db_delete_failed", "classes"))?;
    tracing::info!(class_id = %class_id, "class deleted");
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
