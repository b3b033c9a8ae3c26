use crate::ipc::error::HandlerErr;
use crate::ipc::types::Request;
use rusqlite::Connection;

pub fn require_db<'a>(conn: Option<&'a Connection>) -> Result<&'a Connection, HandlerErr> {
    conn.ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn req_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let s = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s.to_string())
}

/// `None` when absent or null; error when present with the wrong type.
pub fn opt_str(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

pub fn opt_f64(req: &Request, key: &str) -> Result<Option<f64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be number or null", key))),
    }
}

pub fn req_bool(req: &Request, key: &str) -> Result<bool, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key)))
}

pub fn opt_bool(req: &Request, key: &str) -> Result<Option<bool>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// Parses a required enum-like string param with `parse`.
pub fn req_enum<T>(
    req: &Request,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    allowed: &str,
) -> Result<T, HandlerErr> {
    let raw = req_str(req, key)?;
    parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("{} must be one of: {}", key, allowed))
            .with_details(serde_json::json!({ "param": key, "value": raw }))
    })
}
