use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheet.config.get" => Some(handle_get(state, req)),
        "sheet.config.update" => Some(handle_update(state, req)),
        _ => None,
    }
}

pub fn load(conn: &rusqlite::Connection) -> rusqlite::Result<(i64, i64)> {
    conn.query_row(
        "SELECT blank_rows, template_rows FROM sheet_config WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match load(conn) {
        Ok((blank_rows, template_rows)) => ok(
            &req.id,
            json!({ "blankRows": blank_rows, "templateRows": template_rows }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let blank_rows = optional_i64(req, "blankRows");
    let template_rows = optional_i64(req, "templateRows");
    if blank_rows.is_none() && template_rows.is_none() {
        return err(
            &req.id,
            "bad_params",
            "provide blankRows and/or templateRows",
            None,
        );
    }
    for v in [blank_rows, template_rows].into_iter().flatten() {
        if v < 1 {
            return err(&req.id, "bad_params", "row counts must be at least 1", None);
        }
    }

    if let Some(v) = blank_rows {
        if let Err(e) = conn.execute("UPDATE sheet_config SET blank_rows = ? WHERE id = 1", [v]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = template_rows {
        if let Err(e) = conn.execute("UPDATE sheet_config SET template_rows = ? WHERE id = 1", [v])
        {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    handle_get(state, req)
}
