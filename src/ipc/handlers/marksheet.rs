use std::path::PathBuf;

use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::config;
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, require_school_owner, required_str};
use crate::ipc::types::{AppState, Request};
use crate::result::{self, StudentResult};
use crate::sheet::{self, ParsedSheet};
use crate::template::{self, SheetContext};

const DEFAULT_FULL_MARK: i64 = 100;
const DEFAULT_PASS_MARK: i64 = 35;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marksheet.exportBlank" => Some(handle_export_blank(state, req)),
        "marksheet.template" => Some(handle_template(state, req)),
        "marksheet.import" => Some(handle_import(state, req)),
        "marksheet.results" => Some(handle_results(state, req)),
        "marksheet.all" => Some(handle_all(state, req)),
        "marksheet.single" => Some(handle_single(state, req)),
        _ => None,
    }
}

/// Subjects for a class, scoped to one section or to the section-less set.
pub fn subjects_for(
    conn: &Connection,
    class_id: &str,
    section_id: Option<&str>,
) -> rusqlite::Result<Vec<(String, String)>> {
    let (sql, bind): (&str, Vec<&str>) = match section_id {
        Some(s) => (
            "SELECT id, name FROM subjects WHERE class_id = ? AND section_id = ? ORDER BY created_at",
            vec![class_id, s],
        ),
        None => (
            "SELECT id, name FROM subjects WHERE class_id = ? AND section_id IS NULL ORDER BY created_at",
            vec![class_id],
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    rows.collect()
}

fn thresholds(req: &Request) -> Result<(i64, i64), serde_json::Value> {
    let full_mark = optional_i64(req, "fullMark").unwrap_or(DEFAULT_FULL_MARK);
    let pass_mark = optional_i64(req, "passMark").unwrap_or(DEFAULT_PASS_MARK);
    if full_mark <= 0 {
        return Err(err(&req.id, "bad_params", "fullMark must be positive", None));
    }
    if pass_mark < 0 || pass_mark > full_mark {
        return Err(err(
            &req.id,
            "bad_params",
            "passMark must be between 0 and fullMark",
            None,
        ));
    }
    Ok((full_mark, pass_mark))
}

fn load_parsed(req: &Request, path: &str) -> Result<ParsedSheet, serde_json::Value> {
    let range = sheet::read_sheet_range(&PathBuf::from(path))
        .map_err(|e| err(&req.id, "sheet_read_failed", e.to_string(), None))?;
    sheet::parse_marksheet(&range).map_err(|e| err(&req.id, e.code, e.message, None))
}

fn student_result_json(r: &StudentResult, subjects: &[String]) -> serde_json::Value {
    let marks: serde_json::Map<String, serde_json::Value> = subjects
        .iter()
        .zip(&r.marks)
        .map(|(name, &mark)| (name.clone(), json!(mark)))
        .collect();
    json!({
        "position": r.position,
        "name": r.name,
        "rollNo": r.roll_no,
        "otp": r.otp,
        "subjects": marks,
        "total": r.aggregate.total,
        "percentage": r.aggregate.percentage,
        "grade": r.aggregate.grade,
        "result": r.aggregate.result_label(),
        "rank": calc_rank_json(r.rank),
    })
}

fn calc_rank_json(rank: usize) -> serde_json::Value {
    json!({ "position": rank, "ordinal": crate::calc::ordinal(rank) })
}

fn meta_json(parsed: &ParsedSheet) -> serde_json::Value {
    json!({
        "school": parsed.meta.school,
        "class": parsed.meta.class_grade,
        "section": parsed.meta.section,
        "term": parsed.meta.term,
    })
}

fn handle_export_blank(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let section_id = optional_str(req, "sectionId");
    if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
        return resp;
    }

    let school_name: String = match conn.query_row(
        "SELECT name FROM schools WHERE id = ?",
        [&school_id],
        |row| row.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let grade: Option<i64> = match conn
        .query_row(
            "SELECT grade FROM classes WHERE id = ? AND school_id = ?",
            [&class_id, &school_id],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(grade) = grade else {
        return err(&req.id, "not_found", "class not found", None);
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

    let section_name = match &section_id {
        Some(sid) => {
            let name: Option<String> = match conn
                .query_row(
                    "SELECT name FROM sections WHERE id = ? AND class_id = ?",
                    [sid, &class_id],
                    |row| row.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            match name {
                Some(n) => Some(n),
                None => return err(&req.id, "not_found", "section not found", None),
            }
        }
        None => None,
    };

    let subjects = match subjects_for(conn, &class_id, section_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subjects.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no subjects found for the selected class/section",
            None,
        );
    }
    let subject_names: Vec<String> = subjects.into_iter().map(|(_, name)| name).collect();

    let blank_rows = match config::load(conn) {
        Ok((blank_rows, _)) => blank_rows as u32,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let ctx = SheetContext {
        school: school_name,
        class_grade: grade.to_string(),
        section: section_name,
        term: term_name.clone(),
    };
    let bytes = match template::blank_marksheet(&ctx, &subject_names, blank_rows) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "sheet_write_failed", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&out_path, bytes) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "fileName": template::blank_filename(&ctx.class_grade, &term_name),
            "sheetTitle": template::sheet_title(&format!("{}-{}", ctx.class_grade, term_name)),
            "subjects": subject_names,
            "rows": blank_rows,
            "path": out_path,
        }),
    )
}

fn handle_template(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let owner = match required_str(req, "owner") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let section_id = optional_str(req, "sectionId");

    let term: Option<(String, String)> = match conn
        .query_row(
            "SELECT name, school_id FROM exam_terms WHERE id = ?",
            [&term_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((term_name, school_id)) = term else {
        return err(&req.id, "not_found", "term not found", None);
    };
    if let Err(resp) = require_school_owner(conn, req, &school_id, &owner) {
        return resp;
    }

    let lookup: Option<(i64, String)> = match conn
        .query_row(
            "SELECT c.grade, s.name FROM classes c JOIN schools s ON s.id = c.school_id
             WHERE c.id = ? AND c.school_id = ?",
            [&class_id, &school_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((grade, school_name)) = lookup else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let section_name = match &section_id {
        Some(sid) => {
            let name: Option<String> = match conn
                .query_row(
                    "SELECT name FROM sections WHERE id = ? AND class_id = ?",
                    [sid, &class_id],
                    |row| row.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            match name {
                Some(n) => Some(n),
                None => return err(&req.id, "not_found", "section not found", None),
            }
        }
        None => None,
    };

    let subjects = match subjects_for(conn, &class_id, section_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subject_names: Vec<String> = subjects.into_iter().map(|(_, name)| name).collect();

    let rows = match config::load(conn) {
        Ok((_, template_rows)) => template_rows as u32,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let ctx = SheetContext {
        school: school_name,
        class_grade: grade.to_string(),
        section: section_name.clone(),
        term: term_name.clone(),
    };
    let bytes = match template::term_template(&ctx, &subject_names, rows) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "sheet_write_failed", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&out_path, bytes) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "fileName": template::term_template_filename(
                &term_name,
                &ctx.class_grade,
                section_name.as_deref()
            ),
            "rows": rows,
            "path": out_path,
        }),
    )
}

struct ImportTarget {
    school_id: String,
    school_name: String,
    class_id: String,
    grade: i64,
    section_id: String,
    section_name: String,
    term_id: String,
    term_name: String,
}

/// Resolve the entities named by the sheet's banner metadata. Names match
/// case-insensitively, the way admins actually re-type them.
fn resolve_import_target(
    conn: &Connection,
    req: &Request,
    parsed: &ParsedSheet,
) -> Result<ImportTarget, serde_json::Value> {
    let meta = &parsed.meta;
    if meta.school.is_empty()
        || meta.class_grade.is_empty()
        || meta.section.is_empty()
        || meta.term.is_empty()
    {
        return Err(err(
            &req.id,
            "bad_params",
            "school, class, section, or term not found in sheet",
            None,
        ));
    }

    let school: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM schools WHERE LOWER(name) = LOWER(?) ORDER BY created_at LIMIT 1",
            [&meta.school],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some((school_id, school_name)) = school else {
        return Err(err(&req.id, "not_found", "school not found", None));
    };

    if let Some(owner) = optional_str(req, "owner") {
        require_school_owner(conn, req, &school_id, &owner)?;
    }

    let grade: i64 = meta.class_grade.parse().map_err(|_| {
        err(
            &req.id,
            "bad_params",
            "class grade in sheet is not a number",
            None,
        )
    })?;

    let class_id: Option<String> = conn
        .query_row(
            "SELECT id FROM classes WHERE school_id = ? AND grade = ?",
            rusqlite::params![school_id, grade],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some(class_id) = class_id else {
        return Err(err(&req.id, "not_found", "class not found", None));
    };

    let section: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM sections WHERE class_id = ? AND LOWER(name) = LOWER(?)",
            [&class_id, &meta.section],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some((section_id, section_name)) = section else {
        return Err(err(&req.id, "not_found", "section not found", None));
    };

    let term: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM exam_terms WHERE school_id = ? AND LOWER(name) = LOWER(?)",
            [&school_id, &meta.term],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some((term_id, term_name)) = term else {
        return Err(err(&req.id, "not_found", "term not found", None));
    };

    Ok(ImportTarget {
        school_id,
        school_name,
        class_id,
        grade,
        section_id,
        section_name,
        term_id,
        term_name,
    })
}

/// All upserts for one imported sheet. Runs inside the caller's transaction
/// so a failure anywhere leaves nothing behind.
fn persist_import(
    tx: &Transaction,
    target: &ImportTarget,
    parsed: &ParsedSheet,
    results: &[StudentResult],
) -> rusqlite::Result<(usize, usize)> {
    let subjects = subjects_for(tx, &target.class_id, Some(&target.section_id))?;
    let subject_ids: std::collections::HashMap<String, String> = subjects
        .into_iter()
        .map(|(id, name)| (name.to_lowercase(), id))
        .collect();

    let now = db::now_iso();
    let mut imported = 0usize;
    let mut skipped = 0usize;

    for r in results {
        let Ok(roll_no) = r.roll_no.parse::<i64>() else {
            skipped += 1;
            continue;
        };

        let student_id: Option<String> = tx
            .query_row(
                "SELECT id FROM students
                 WHERE school_id = ? AND class_id = ? AND section_id = ? AND roll_no = ?",
                rusqlite::params![target.school_id, target.class_id, target.section_id, roll_no],
                |row| row.get(0),
            )
            .optional()?;
        let student_id = match student_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO students(id, school_id, class_id, section_id, name, roll_no, otp,
                                          created_at, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        id,
                        target.school_id,
                        target.class_id,
                        target.section_id,
                        r.name,
                        roll_no,
                        r.otp,
                        now,
                        now
                    ],
                )?;
                id
            }
        };

        let marks_id: Option<String> = tx
            .query_row(
                "SELECT id FROM student_marks WHERE student_id = ? AND term_id = ?",
                rusqlite::params![student_id, target.term_id],
                |row| row.get(0),
            )
            .optional()?;
        let marks_id = match marks_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO student_marks(id, student_id, term_id, created_at, updated_at)
                     VALUES(?, ?, ?, ?, ?)",
                    rusqlite::params![id, student_id, target.term_id, now, now],
                )?;
                id
            }
        };

        let agg = &r.aggregate;
        let db_result = if agg.passed { "Pass" } else { "Fail" };
        tx.execute(
            "UPDATE student_marks
             SET total_marks = ?, percentage = ?, grade = ?, result = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                agg.total as f64,
                agg.percentage,
                agg.grade,
                db_result,
                now,
                marks_id
            ],
        )?;

        for (subject, &mark) in parsed.subjects.iter().zip(&r.marks) {
            let Some(subject_id) = subject_ids.get(&subject.name.to_lowercase()) else {
                continue;
            };
            let updated = tx.execute(
                "UPDATE student_subject_marks SET marks_obtained = ?
                 WHERE student_marks_id = ? AND subject_id = ?",
                rusqlite::params![mark as f64, marks_id, subject_id],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO student_subject_marks(id, student_marks_id, subject_id, marks_obtained)
                     VALUES(?, ?, ?, ?)",
                    rusqlite::params![Uuid::new_v4().to_string(), marks_id, subject_id, mark as f64],
                )?;
            }
        }

        imported += 1;
    }

    Ok((imported, skipped))
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (full_mark, pass_mark) = match thresholds(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let parsed = match load_parsed(req, &path) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let target = match resolve_import_target(conn, req, &parsed) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let results = result::compute_results(&parsed, full_mark, pass_mark);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let (imported, skipped) = match persist_import(&tx, &target, &parsed, &results) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_tx_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let ctx = SheetContext {
        school: target.school_name.clone(),
        class_grade: target.grade.to_string(),
        section: Some(target.section_name.clone()),
        term: target.term_name.clone(),
    };
    let bytes = match result::result_sheet(&ctx, &parsed, &results, pass_mark) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "sheet_write_failed", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&out_path, bytes) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "fileName": result::RESULT_FILENAME,
            "path": out_path,
            "studentsImported": imported,
            "rowsSkipped": skipped,
            "termId": target.term_id,
        }),
    )
}

/// Result sheet straight from a filled file, metadata taken from the sheet
/// itself. No entities are resolved and nothing is persisted.
fn handle_results(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (full_mark, pass_mark) = match thresholds(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let parsed = match load_parsed(req, &path) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let results = result::compute_results(&parsed, full_mark, pass_mark);

    let meta = &parsed.meta;
    let ctx = SheetContext {
        school: if meta.school.is_empty() { "-".to_string() } else { meta.school.clone() },
        class_grade: if meta.class_grade.is_empty() { "-".to_string() } else { meta.class_grade.clone() },
        section: if meta.section.is_empty() { None } else { Some(meta.section.clone()) },
        term: if meta.term.is_empty() { "-".to_string() } else { meta.term.clone() },
    };
    let bytes = match result::result_sheet(&ctx, &parsed, &results, pass_mark) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "sheet_write_failed", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&out_path, bytes) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "fileName": result::RESULT_FILENAME,
            "path": out_path,
            "students": results.len(),
        }),
    )
}

fn handle_all(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (full_mark, pass_mark) = match thresholds(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let parsed = match load_parsed(req, &path) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let results = result::compute_results(&parsed, full_mark, pass_mark);
    let subjects = parsed.subject_names();
    let students: Vec<serde_json::Value> = results
        .iter()
        .map(|r| student_result_json(r, &subjects))
        .collect();

    ok(
        &req.id,
        json!({ "meta": meta_json(&parsed), "students": students }),
    )
}

fn handle_single(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let otp = match required_str(req, "otp") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (full_mark, pass_mark) = match thresholds(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let parsed = match load_parsed(req, &path) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    // Column presence and token match are checked before any aggregate work.
    let row = match parsed.find_by_otp(&otp) {
        Ok(r) => r,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    let position = row.position;

    let results = result::compute_results(&parsed, full_mark, pass_mark);
    let record = results
        .iter()
        .find(|r| r.position == position)
        .map(|r| student_result_json(r, &parsed.subject_names()));

    let Some(record) = record else {
        return err(&req.id, "internal", "located row missing from results", None);
    };

    ok(
        &req.id,
        json!({ "meta": meta_json(&parsed), "student": record }),
    )
}
