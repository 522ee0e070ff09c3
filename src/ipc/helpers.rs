use super::error::{ok, HandlerErr};
use super::types::{AppState, Request};
use crate::db;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value;

pub const SELECTED_HEADQUARTER_KEY: &str = "session.selectedHeadquarterId";

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("date must be YYYY-MM-DD: {}", raw)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?)
}

pub fn selected_headquarter(conn: &Connection) -> Option<String> {
    match db::settings_get_json(conn, SELECTED_HEADQUARTER_KEY) {
        Ok(v) => v.and_then(|v| v.as_str().map(|s| s.to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read selected headquarter");
            None
        }
    }
}

/// Explicit `campusId`, else the selected headquarter, else the unscoped
/// campus `""`.
pub fn resolve_campus_id(conn: &Connection, params: &Value) -> String {
    get_optional_str(params, "campusId")
        .or_else(|| selected_headquarter(conn))
        .unwrap_or_default()
}

/// Runs `f` against the open workspace database and wraps the outcome in the
/// response envelope.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}
