use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_school_owner, required_str};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        _ => None,
    }
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
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
        return resp;
    }
    let class_id = optional_str(req, "classId");
    let section_id = optional_str(req, "sectionId");

    let mut sql = String::from(
        "SELECT st.id, st.name, st.roll_no, st.otp, st.class_id, st.section_id
         FROM students st
         WHERE st.school_id = ?",
    );
    let mut binds: Vec<String> = vec![school_id];
    if let Some(c) = class_id {
        sql.push_str(" AND st.class_id = ?");
        binds.push(c);
    }
    if let Some(s) = section_id {
        sql.push_str(" AND st.section_id = ?");
        binds.push(s);
    }
    sql.push_str(" ORDER BY st.roll_no");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let roll_no: i64 = row.get(2)?;
            let otp: Option<String> = row.get(3)?;
            let class_id: String = row.get(4)?;
            let section_id: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "rollNo": roll_no,
                "otp": otp,
                "classId": class_id,
                "sectionId": section_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}
