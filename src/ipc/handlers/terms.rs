use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_school_owner, required_str};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.create" => Some(handle_create(state, req)),
        "terms.list" => Some(handle_list(state, req)),
        _ => None,
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let owner = match required_str(req, "owner") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
        return resp;
    }

    let term_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO exam_terms(id, school_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&term_id, &school_id, &name, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "exam_terms" })),
        );
    }

    ok(&req.id, json!({ "termId": term_id, "name": name }))
}

/// With `schoolId`: that school's terms (ownership-checked). Without: every
/// term across the caller's schools.
fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let owner = match required_str(req, "owner") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let (sql, key) = match optional_str(req, "schoolId") {
        Some(school_id) => {
            if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
                return resp;
            }
            (
                "SELECT t.id, t.name, t.school_id FROM exam_terms t
                 WHERE t.school_id = ? ORDER BY t.created_at",
                school_id,
            )
        }
        None => (
            "SELECT t.id, t.name, t.school_id FROM exam_terms t
             JOIN schools s ON s.id = t.school_id
             WHERE s.owner = ? ORDER BY t.created_at",
            owner,
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&key], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let school_id: String = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "schoolId": school_id }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}
