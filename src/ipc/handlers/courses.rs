use crate::auth::{ADMIN_ONLY, ANY_ROLE};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, ensure_unreferenced, query_failed, require_role, require_row, required_str,
    write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_courses_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let Some(conn) = state.db.as_ref() else {
        return Ok(ok(&req.id, json!({ "courses": [] })));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM classes k WHERE k.course_id = c.id) AS class_count,
               (SELECT COUNT(*) FROM evaluations e WHERE e.course_id = c.id) AS evaluation_count
             FROM courses c
             ORDER BY c.name",
        )
        .map_err(query_failed(req))?;
    let courses = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let class_count: i64 = row.get(2)?;
            let evaluation_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "classCount": class_count,
                "evaluationCount": evaluation_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "courses": courses })))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name) VALUES(?, ?)",
        (&course_id, &name),
    )
    .map_err(write_failed(req, "db_insert_failed", "courses"))?;

    tracing::info!(course_id = %course_id, "course created");
    Ok(ok(&req.id, json!({ "courseId": course_id, "name": name })))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    let name = required_str(req, "name")?;

    let changed = conn
        .execute(
            "UPDATE courses SET name = ? WHERE id = ?",
            (&name, &course_id),
        )
        .map_err(write_failed(req, "db_update_failed", "courses"))?;
    if changed == 0 {
        return Err(err(&req.id, "not_found", "course not found", None));
    }
    Ok(ok(&req.id, json!({ "courseId": course_id, "name": name })))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;

    require_row(conn, req, "courses", &course_id, "course")?;
    ensure_unreferenced(
        conn,
        req,
        &[("classes", "course_id"), ("evaluations", "course_id")],
        &course_id,
    )?;

    conn.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(write_failed(req, "db_delete_failed", "courses"))?;
    tracing::info!(course_id = %course_id, "course deleted");
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "courses.list" => handle_courses_list(state, req),
        "courses.create" => handle_courses_create(state, req),
        "courses.update" => handle_courses_update(state, req),
        "courses.delete" => handle_courses_delete(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
