use crate::auth::{self, Role, ADMIN_ONLY, ANY_ROLE};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, forbidden, optional_str, query_failed, require_role, require_row, required_str,
    write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let class_id = optional_str(req, "classId");

    // Only staff browse the full roster.
    if !principal.role.is_staff() {
        let Some(cid) = class_id.as_deref() else {
            return Err(forbidden(req, "classId is required for non-staff callers"));
        };
        if !auth::can_view_class(conn, principal, cid).map_err(query_failed(req))? {
            return Err(forbidden(req, "not enrolled in this class"));
        }
    }

    let mut binds: Vec<Value> = Vec::new();
    let sql = match &class_id {
        Some(cid) => {
            binds.push(Value::Text(cid.clone()));
            "SELECT s.id, s.name, s.image
             FROM student_courses sc
             JOIN students s ON s.id = sc.student_id
             WHERE sc.class_id = ?
             ORDER BY s.name, s.id"
        }
        None => "SELECT id, name, image FROM students ORDER BY name, id",
    };

    let mut stmt = conn.prepare(sql).map_err(query_failed(req))?;
    let students = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let image: Option<String> = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "image": image }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed(req))?;

    Ok(ok(&req.id, json!({ "students": students })))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let image = optional_str(req, "image");
    // Hosts pass their identity-provider id so student principals line up with rows.
    let student_id = optional_str(req, "studentId").unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO students(id, name, image, updated_at) VALUES(?, ?, ?, ?)",
        (&student_id, &name, &image, db::now_timestamp()),
    )
    .map_err(write_failed(req, "db_insert_failed", "students"))?;

    Ok(ok(
        &req.id,
        json!({ "studentId": student_id, "name": name, "image": image }),
    ))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;

    // Students may edit their own profile.
    let is_self = principal.role == Role::Student && principal.id == student_id;
    if principal.role != Role::Admin && !is_self {
        return Err(forbidden(req, "only admins or the student may edit a profile"));
    }

    let name = optional_str(req, "name");
    let image = optional_str(req, "image");
    if name.is_none() && image.is_none() {
        return Err(err(&req.id, "bad_params", "nothing to update", None));
    }
    require_row(conn, req, "students", &student_id, "student")?;

    conn.execute(
        "UPDATE students
         SET name = COALESCE(?, name), image = COALESCE(?, image), updated_at = ?
         WHERE id = ?",
        (&name, &image, db::now_timestamp(), &student_id),
    )
    .map_err(write_failed(req, "db_update_failed", "students"))?;

    Ok(ok(&req.id, json!({ "studentId": student_id })))
}

fn handle_students_link_parent(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let parent_id = required_str(req, "parentId")?;
    let student_id = required_str(req, "studentId")?;
    require_row(conn, req, "students", &student_id, "student")?;

    conn.execute(
        "INSERT OR IGNORE INTO parent_links(parent_id, student_id) VALUES(?, ?)",
        (&parent_id, &student_id),
    )
    .map_err(write_failed(req, "db_insert_failed", "parent_links"))?;

    Ok(ok(
        &req.id,
        json!({ "parentId": parent_id, "studentId": student_id }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.linkParent" => handle_students_link_parent(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
