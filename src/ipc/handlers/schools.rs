use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.create" => Some(handle_create(state, req)),
        "schools.list" => Some(handle_list(state, req)),
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
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let address = optional_str(req, "address");

    let school_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name, address, owner, created_at) VALUES(?, ?, ?, ?, ?)",
        (&school_id, &name, &address, &owner, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schools" })),
        );
    }

    ok(&req.id, json!({ "schoolId": school_id, "name": name }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let owner = match required_str(req, "owner") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.address,
           (SELECT COUNT(*) FROM classes c WHERE c.school_id = s.id) AS class_count,
           (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id) AS student_count
         FROM schools s
         WHERE s.owner = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&owner], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let address: Option<String> = row.get(2)?;
            let class_count: i64 = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "address": address,
                "classCount": class_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}
