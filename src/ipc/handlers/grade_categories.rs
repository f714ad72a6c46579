use crate::auth::{ADMIN_ONLY, ANY_ROLE};
use crate::grades;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_str, query_failed, require_role, required_f64,
    required_percent, required_str, write_failed, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_grade_categories_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let categories = grades::load_grade_categories(conn).map_err(|e| calc_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "gradeCategories": categories })))
}

fn handle_grade_categories_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let name = required_str(req, "name")?;
    let min_score = required_percent(req, "minScore")?;
    let max_score = required_percent(req, "maxScore")?;
    let color = optional_str(req, "color").unwrap_or_default();
    let active = optional_bool(req, "active")?.unwrap_or(true);
    if min_score > max_score {
        return Err(err(
            &req.id,
            "bad_params",
            "minScore must not exceed maxScore",
            Some(json!({ "minScore": min_score, "maxScore": max_score })),
        ));
    }

    // Overlap and coverage are reported by gradeCategories.checkCoverage, not enforced here.
    let category_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_categories(id, name, min_score, max_score, color, active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &category_id,
            &name,
            min_score,
            max_score,
            &color,
            active as i64,
        ),
    )
    .map_err(write_failed(req, "db_insert_failed", "grade_categories"))?;

    Ok(ok(&req.id, json!({ "gradeCategoryId": category_id })))
}

fn handle_grade_categories_update(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let category_id = required_str(req, "gradeCategoryId")?;

    let current: Option<(f64, f64)> = conn
        .query_row(
            "SELECT min_score, max_score FROM grade_categories WHERE id = ?",
            [&category_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_failed(req))?;
    let Some((cur_min, cur_max)) = current else {
        return Err(err(&req.id, "not_found", "grade category not found", None));
    };

    let min_score = match req.params.get("minScore") {
        Some(v) if !v.is_null() => required_percent(req, "minScore")?,
        _ => cur_min,
    };
    let max_score = match req.params.get("maxScore") {
        Some(v) if !v.is_null() => required_percent(req, "maxScore")?,
        _ => cur_max,
    };
    if min_score > max_score {
        return Err(err(
            &req.id,
            "bad_params",
            "minScore must not exceed maxScore",
            Some(json!({ "minScore": min_score, "maxScore": max_score })),
        ));
    }
    let name = optional_str(req, "name");
    let color = optional_str(req, "color");
    let active = optional_bool(req, "active")?;

    conn.execute(
        "UPDATE grade_categories
         SET name = COALESCE(?, name),
             min_score = ?,
             max_score = ?,
             color = COALESCE(?, color),
             active = COALESCE(?, active)
         WHERE id = ?",
        (
            &name,
            min_score,
            max_score,
            &color,
            active.map(|b| b as i64),
            &category_id,
        ),
    )
    .map_err(write_failed(req, "db_update_failed", "grade_categories"))?;

    Ok(ok(&req.id, json!({ "gradeCategoryId": category_id })))
}

fn handle_grade_categories_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ADMIN_ONLY)?;
    let conn = db_conn(state, req)?;
    let category_id = required_str(req, "gradeCategoryId")?;
    let removed = conn
        .execute("DELETE FROM grade_categories WHERE id = ?", [&category_id])
        .map_err(write_failed(req, "db_delete_failed", "grade_categories"))?;
    if removed == 0 {
        return Err(err(&req.id, "not_found", "grade category not found", None));
    }
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_grade_categories_resolve(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let score = required_f64(req, "score")?;
    let categories = grades::load_grade_categories(conn).map_err(|e| calc_err(&req.id, e))?;
    let category =
        grades::require_grade_category(&categories, score).map_err(|e| calc_err(&req.id, e))?;
    Ok(ok(&req.id, json!({ "score": score, "gradeCategory": category })))
}

fn handle_grade_categories_check_coverage(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(req, ANY_ROLE)?;
    let conn = db_conn(state, req)?;
    let categories = grades::load_grade_categories(conn).map_err(|e| calc_err(&req.id, e))?;
    let report = grades::check_coverage(&categories);
    if !report.covers_full_range || !report.overlaps.is_empty() {
        tracing::warn!(
            gaps = report.gaps.len(),
            overlaps = report.overlaps.len(),
            "active grade categories are not a clean partition of 0-100"
        );
    }
    Ok(ok(&req.id, json!(report)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "gradeCategories.list" => handle_grade_categories_list(state, req),
        "gradeCategories.create" => handle_grade_categories_create(state, req),
        "gradeCategories.update" => handle_grade_categories_update(state, req),
        "gradeCategories.delete" => handle_grade_categories_delete(state, req),
        "gradeCategories.resolve" => handle_grade_categories_resolve(state, req),
        "gradeCategories.checkCoverage" => handle_grade_categories_check_coverage(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e))
}
