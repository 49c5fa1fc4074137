use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_school_owner, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.list" => Some(handle_list(state, req)),
        "marks.single" => Some(handle_single(state, req)),
        _ => None,
    }
}

fn rank_json(rank: usize) -> serde_json::Value {
    json!({ "position": rank, "ordinal": calc::ordinal(rank) })
}

/// Grade is only reported alongside a pass; failed rows show the sentinel.
fn reported_grade(grade: Option<String>, result: &Option<String>) -> String {
    match (grade, result.as_deref()) {
        (Some(g), Some("Pass")) => g,
        _ => calc::GRADE_NOT_ASSIGNED.to_string(),
    }
}

fn subject_breakdown(
    conn: &Connection,
    student_marks_id: &str,
) -> rusqlite::Result<serde_json::Map<String, serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT sub.name, ssm.marks_obtained
         FROM student_subject_marks ssm
         JOIN subjects sub ON sub.id = ssm.subject_id
         WHERE ssm.student_marks_id = ?
         ORDER BY sub.created_at",
    )?;
    let rows = stmt.query_map([student_marks_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut map = serde_json::Map::new();
    for entry in rows {
        let (name, marks) = entry?;
        map.insert(name, json!(marks));
    }
    Ok(map)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
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
    let section_name = match required_str(req, "sectionName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let school_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM schools WHERE id = ?",
            [&school_id],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(school_name) = school_name else {
        return err(&req.id, "not_found", "school not found", None);
    };
    if let Some(owner) = optional_str(req, "owner") {
        if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
            return resp;
        }
    }

    let class_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM classes WHERE school_id = ? AND grade = ?",
            rusqlite::params![school_id, grade],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_id) = class_id else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let section: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, name FROM sections WHERE class_id = ? AND LOWER(name) = LOWER(?)",
            [&class_id, &section_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((section_id, section_name)) = section else {
        return err(&req.id, "not_found", "section not found", None);
    };

    let term_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM exam_terms WHERE id = ? AND school_id = ?",
            [&term_id, &school_id],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(term_name) = term_name else {
        return err(&req.id, "not_found", "term not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT sm.id, sm.total_marks, sm.percentage, sm.grade, sm.result,
                st.name, st.roll_no
         FROM student_marks sm
         JOIN students st ON st.id = sm.student_id
         WHERE st.class_id = ? AND st.section_id = ? AND sm.term_id = ?
         ORDER BY sm.total_marks DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    struct MarksRow {
        id: String,
        total: Option<f64>,
        percentage: Option<f64>,
        grade: Option<String>,
        result: Option<String>,
        student: String,
        roll_no: i64,
    }

    let rows: Result<Vec<MarksRow>, _> = stmt
        .query_map(
            rusqlite::params![class_id, section_id, term_id],
            |row| {
                Ok(MarksRow {
                    id: row.get(0)?,
                    total: row.get(1)?,
                    percentage: row.get(2)?,
                    grade: row.get(3)?,
                    result: row.get(4)?,
                    student: row.get(5)?,
                    roll_no: row.get(6)?,
                })
            },
        )
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let totals: Vec<(String, i64)> = rows
        .iter()
        .map(|r| (r.id.clone(), r.total.unwrap_or(0.0).round() as i64))
        .collect();
    let ranks = calc::dense_rank(&totals);

    let mut data = Vec::with_capacity(rows.len());
    for r in rows {
        let subjects = match subject_breakdown(conn, &r.id) {
            Ok(m) => m,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rank = ranks.get(&r.id).copied().unwrap_or(0);
        data.push(json!({
            "student": r.student,
            "rollNo": r.roll_no,
            "school": school_name,
            "className": grade,
            "section": section_name,
            "term": term_name,
            "totalMarks": r.total,
            "percentage": r.percentage,
            "grade": reported_grade(r.grade, &r.result),
            "result": r.result,
            "rank": rank_json(rank),
            "subjects": subjects,
        }));
    }

    ok(&req.id, json!({ "count": data.len(), "data": data }))
}

fn handle_single(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let school_name = match required_str(req, "schoolName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let roll_no = match required_i64(req, "rollNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let section_name = match required_str(req, "sectionName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let otp = match required_str(req, "otp") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let school: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, name FROM schools WHERE LOWER(name) = LOWER(?) ORDER BY created_at LIMIT 1",
            [&school_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((school_id, school_name)) = school else {
        return err(&req.id, "not_found", "school not found", None);
    };

    let student: Option<(String, String, String, String, String)> = match conn
        .query_row(
            "SELECT st.id, st.name, st.class_id, st.section_id, sec.name
             FROM students st
             JOIN classes c ON c.id = st.class_id
             JOIN sections sec ON sec.id = st.section_id
             WHERE st.school_id = ? AND c.grade = ? AND LOWER(sec.name) = LOWER(?)
               AND st.roll_no = ? AND st.otp = ?",
            rusqlite::params![school_id, grade, section_name, roll_no, otp],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, student_name, class_id, section_id, section_name)) = student else {
        return err(
            &req.id,
            "not_found",
            "no student found with provided details",
            None,
        );
    };

    let marks: Option<(String, String, Option<f64>, Option<f64>, Option<String>, Option<String>)> =
        match conn
            .query_row(
                "SELECT id, term_id, total_marks, percentage, grade, result
                 FROM student_marks WHERE student_id = ?
                 ORDER BY created_at LIMIT 1",
                [&student_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let Some((marks_id, term_id, total, percentage, grade_value, result_value)) = marks else {
        return err(&req.id, "not_found", "marks not found for this student", None);
    };

    let term_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM exam_terms WHERE id = ?",
            [&term_id],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Rank among persisted peers of the same class, section and term.
    let mut stmt = match conn.prepare(
        "SELECT sm.student_id, sm.total_marks
         FROM student_marks sm
         JOIN students st ON st.id = sm.student_id
         WHERE st.class_id = ? AND st.section_id = ? AND sm.term_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let peers: Result<Vec<(String, i64)>, _> = stmt
        .query_map(
            rusqlite::params![class_id, section_id, term_id],
            |row| {
                let id: String = row.get(0)?;
                let total: Option<f64> = row.get(1)?;
                Ok((id, total.unwrap_or(0.0).round() as i64))
            },
        )
        .and_then(|it| it.collect());
    let peers = match peers {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rank = calc::dense_rank(&peers)
        .get(&student_id)
        .copied()
        .unwrap_or(0);

    let subjects = match subject_breakdown(conn, &marks_id) {
        Ok(m) => m,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "student": student_name,
            "rollNo": roll_no,
            "school": school_name,
            "className": grade,
            "section": section_name,
            "term": term_name,
            "totalMarks": total,
            "percentage": percentage,
            "grade": reported_grade(grade_value, &result_value),
            "result": result_value,
            "rank": rank_json(rank),
            "subjects": subjects,
        }),
    )
}
