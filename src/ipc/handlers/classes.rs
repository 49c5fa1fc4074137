use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_school_owner, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_class_create(state, req)),
        "classes.list" => Some(handle_class_list(state, req)),
        "sections.create" => Some(handle_section_create(state, req)),
        "sections.list" => Some(handle_section_list(state, req)),
        _ => None,
    }
}

/// School id and owner for a class, or a not_found/forbidden response.
pub fn class_school_checked(
    conn: &rusqlite::Connection,
    req: &Request,
    class_id: &str,
    owner: &str,
) -> Result<String, serde_json::Value> {
    let school_id: Option<String> = conn
        .query_row(
            "SELECT school_id FROM classes WHERE id = ?",
            [class_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let Some(school_id) = school_id else {
        return Err(err(&req.id, "not_found", "class not found", None));
    };
    require_school_owner(conn, req, &school_id, owner)?;
    Ok(school_id)
}

fn handle_class_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !(1..=10).contains(&grade) {
        return err(&req.id, "bad_params", "grade must be between 1 and 10", None);
    }
    if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
        return resp;
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, grade, created_at) VALUES(?, ?, ?, ?)",
        (&class_id, &school_id, grade, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "grade": grade }))
}

fn handle_class_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.grade,
           (SELECT COUNT(*) FROM sections sec WHERE sec.class_id = c.id) AS section_count,
           (SELECT COUNT(*) FROM students st WHERE st.class_id = c.id) AS student_count
         FROM classes c
         WHERE c.school_id = ?
         ORDER BY c.grade",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&school_id], |row| {
            let id: String = row.get(0)?;
            let grade: i64 = row.get(1)?;
            let section_count: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "grade": grade,
                "sectionCount": section_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_section_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let owner = match required_str(req, "owner") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = class_school_checked(conn, req, &class_id, &owner) {
        return resp;
    }

    let section_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sections(id, class_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&section_id, &class_id, &name, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sections" })),
        );
    }

    ok(&req.id, json!({ "sectionId": section_id, "name": name }))
}

fn handle_section_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let owner = match required_str(req, "owner") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = class_school_checked(conn, req, &class_id, &owner) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT id, name FROM sections WHERE class_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}
