use crate::auth::{self, ANY_ROLE};
use crate::calc::{self, CalcContext};
use crate::ipc::error::{calc_err, ok};
use crate::ipc::helpers::{
    db_conn, forbidden, query_failed, require_role, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_student_score(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let student_id = required_str(req, "studentId")?;

    if !auth::can_view_student(conn, principal, &student_id).map_err(query_failed(req))? {
        return Err(forbidden(req, "cannot view this student's score"));
    }

    let ctx = CalcContext {
        conn,
        class_id: &class_id,
    };
    let model = calc::compute_student_score(&ctx, &student_id).map_err(|e| {
        tracing::warn!(class_id = %class_id, student_id = %student_id, error = %e, "student score unavailable");
        calc_err(&req.id, e)
    })?;
    Ok(ok(&req.id, json!(model)))
}

fn handle_leaderboard(state: &mut AppState, req: &Request) -> HandlerResult {
    let principal = require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;

    if !auth::can_view_class(conn, principal, &class_id).map_err(query_failed(req))? {
        return Err(forbidden(req, "not enrolled in this class"));
    }

    let ctx = CalcContext {
        conn,
        class_id: &class_id,
    };
    let model = calc::compute_leaderboard(&ctx).map_err(|e| {
        tracing::warn!(class_id = %class_id, error = %e, "leaderboard unavailable");
        calc_err(&req.id, e)
    })?;
    Ok(ok(&req.id, json!(model)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "calc.studentScore" => handle_student_score(state, req),
        "calc.leaderboard" => handle_leaderboard(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
