use serde_json::json;

use crate::calc::CalcError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn calc_err(id: &str, e: CalcError) -> serde_json::Value {
    if let CalcError::Db(db) = &e {
        tracing::error!(error = %db, "calc query failed");
    }
    err(id, e.code(), e.to_string(), e.details())
}
