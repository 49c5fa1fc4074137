use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let value = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if value.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(value)
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Resolve a school id to its owner and enforce ownership. Missing school is
/// `not_found`; an owner mismatch is `forbidden`.
pub fn require_school_owner(
    conn: &Connection,
    req: &Request,
    school_id: &str,
    owner: &str,
) -> Result<(), serde_json::Value> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT owner FROM schools WHERE id = ?",
            [school_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    match stored {
        None => Err(err(&req.id, "not_found", "school not found", None)),
        Some(o) if o != owner => Err(err(
            &req.id,
            "forbidden",
            "you do not own this school",
            None,
        )),
        Some(_) => Ok(()),
    }
}
