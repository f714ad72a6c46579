use crate::auth::{Principal, Role};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub type HandlerResult = Result<serde_json::Value, serde_json::Value>;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn require_role<'a>(
    req: &'a Request,
    allowed: &[Role],
) -> Result<&'a Principal, serde_json::Value> {
    let Some(principal) = req.principal.as_ref() else {
        return Err(err(&req.id, "unauthorized", "missing principal", None));
    };
    if !allowed.contains(&principal.role) {
        tracing::info!(
            method = %req.method,
            principal = %principal.id,
            role = principal.role.as_str(),
            "request forbidden"
        );
        return Err(err(
            &req.id,
            "forbidden",
            format!("{} may not call {}", principal.role.as_str(), req.method),
            Some(json!({ "role": principal.role.as_str() })),
        ));
    }
    Ok(principal)
}

pub fn forbidden(req: &Request, message: &str) -> serde_json::Value {
    err(&req.id, "forbidden", message, None)
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let v = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if v.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(v)
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    let v = req
        .params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if !v.is_finite() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a finite number", key),
            None,
        ));
    }
    Ok(v)
}

/// Scores and weights share the 0-100 percentage scale.
pub fn required_percent(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    let v = required_f64(req, key)?;
    if !(0.0..=100.0).contains(&v) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be between 0 and 100", key),
            Some(json!({ key: v })),
        ));
    }
    Ok(v)
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a boolean", key),
                None,
            )
        }),
    }
}

/// `table` is always one of our own table names, never request input.
pub fn row_exists(
    conn: &Connection,
    req: &Request,
    table: &'static str,
    id: &str,
) -> Result<bool, serde_json::Value> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

pub fn require_row(
    conn: &Connection,
    req: &Request,
    table: &'static str,
    id: &str,
    what: &str,
) -> Result<(), serde_json::Value> {
    if row_exists(conn, req, table, id)? {
        Ok(())
    } else {
        Err(err(&req.id, "not_found", format!("{} not found", what), None))
    }
}

pub fn query_failed(req: &Request) -> impl Fn(rusqlite::Error) -> serde_json::Value + '_ {
    move |e| err(&req.id, "db_query_failed", e.to_string(), None)
}

pub fn write_failed<'a>(
    req: &'a Request,
    code: &'static str,
    table: &'static str,
) -> impl Fn(rusqlite::Error) -> serde_json::Value + 'a {
    move |e| {
        tracing::error!(method = %req.method, table, error = %e, "write failed");
        err(&req.id, code, e.to_string(), Some(json!({ "table": table })))
    }
}

/// Counts dependents before a master-data delete; there is no ON DELETE CASCADE.
pub fn ensure_unreferenced(
    conn: &Connection,
    req: &Request,
    checks: &[(&'static str, &'static str)],
    id: &str,
) -> Result<(), serde_json::Value> {
    for (table, column) in checks {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column);
        let n: i64 = conn
            .query_row(&sql, [id], |r| r.get(0))
            .map_err(query_failed(req))?;
        if n > 0 {
            return Err(err(
                &req.id,
                "conflict",
                format!("still referenced by {}", table),
                Some(json!({ "table": table, "count": n })),
            ));
        }
    }
    Ok(())
}
