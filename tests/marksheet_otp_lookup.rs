use rust_xlsxwriter::Workbook;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_marksheetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Filled sheet with an OTP column and one deliberately unparsable mark.
fn write_sheet_with_otp(path: &Path) {
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.write_string(0, 0, "School: Hilltop Academy").unwrap();
    ws.write_string(1, 0, "Class: 8 | Section: B | Term: First Term")
        .unwrap();
    for (col, header) in ["S.N.", "Student Name", "Roll No.", "OTP", "Math", "Science"]
        .iter()
        .enumerate()
    {
        ws.write_string(3, col as u16, *header).unwrap();
    }

    ws.write_number(4, 0, 1).unwrap();
    ws.write_string(4, 1, "Asha Rai").unwrap();
    ws.write_number(4, 2, 1).unwrap();
    ws.write_string(4, 3, "482913").unwrap();
    ws.write_number(4, 4, 40).unwrap();
    ws.write_number(4, 5, 50).unwrap();

    ws.write_number(5, 0, 2).unwrap();
    ws.write_string(5, 1, "Bikram Thapa").unwrap();
    ws.write_number(5, 2, 2).unwrap();
    ws.write_string(5, 3, "771204").unwrap();
    ws.write_string(5, 4, "absent").unwrap();
    ws.write_number(5, 5, 30).unwrap();

    workbook.save(path).unwrap();
}

/// Same layout minus the OTP column.
fn write_sheet_without_otp(path: &Path) {
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.write_string(0, 0, "School: Hilltop Academy").unwrap();
    ws.write_string(1, 0, "Class: 8 | Section: B | Term: First Term")
        .unwrap();
    for (col, header) in ["S.N.", "Student Name", "Roll No.", "Math"].iter().enumerate() {
        ws.write_string(3, col as u16, *header).unwrap();
    }
    ws.write_number(4, 0, 1).unwrap();
    ws.write_string(4, 1, "Asha Rai").unwrap();
    ws.write_number(4, 2, 1).unwrap();
    ws.write_number(4, 3, 40).unwrap();
    workbook.save(path).unwrap();
}

#[test]
fn otp_lookup_returns_aggregate_and_rank() {
    let workspace = temp_dir("marksheet-otp");
    let path = workspace.join("filled.xlsx");
    write_sheet_with_otp(&path);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let single = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marksheet.single",
        json!({
            "path": path.to_string_lossy(),
            "otp": "482913",
            "fullMark": 100,
            "passMark": 33
        }),
    );

    assert_eq!(single["meta"]["school"].as_str(), Some("Hilltop Academy"));
    let student = &single["student"];
    assert_eq!(student["name"].as_str(), Some("Asha Rai"));
    assert_eq!(student["rollNo"].as_str(), Some("1"));
    assert_eq!(student["subjects"]["Math"].as_i64(), Some(40));
    assert_eq!(student["subjects"]["Science"].as_i64(), Some(50));
    assert_eq!(student["total"].as_i64(), Some(90));
    assert!((student["percentage"].as_f64().unwrap() - 45.0).abs() < 1e-9);
    assert_eq!(student["grade"].as_str(), Some("C"));
    assert_eq!(student["result"].as_str(), Some("PASS"));
    assert_eq!(student["rank"]["position"].as_i64(), Some(1));
    assert_eq!(student["rank"]["ordinal"].as_str(), Some("1st"));

    // Token comparison trims whitespace on both sides.
    let padded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marksheet.single",
        json!({ "path": path.to_string_lossy(), "otp": " 771204 " }),
    );
    assert_eq!(padded["student"]["name"].as_str(), Some("Bikram Thapa"));

    let _ = child.kill();
}

#[test]
fn unparsable_mark_counts_zero_and_fails_the_row() {
    let workspace = temp_dir("marksheet-otp-unparsable");
    let path = workspace.join("filled.xlsx");
    write_sheet_with_otp(&path);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let single = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marksheet.single",
        json!({
            "path": path.to_string_lossy(),
            "otp": "771204",
            "fullMark": 100,
            "passMark": 33
        }),
    );

    let student = &single["student"];
    assert_eq!(student["subjects"]["Math"].as_i64(), Some(0));
    assert_eq!(student["subjects"]["Science"].as_i64(), Some(30));
    assert_eq!(student["total"].as_i64(), Some(30));
    assert_eq!(student["grade"].as_str(), Some("-"));
    assert_eq!(student["result"].as_str(), Some("FAIL"));
    assert_eq!(student["rank"]["position"].as_i64(), Some(2));

    let _ = child.kill();
}

#[test]
fn missing_otp_column_fails_before_any_row_scan() {
    let workspace = temp_dir("marksheet-otp-missing-col");
    let path = workspace.join("filled.xlsx");
    write_sheet_without_otp(&path);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let value = request(
        &mut stdin,
        &mut reader,
        "1",
        "marksheet.single",
        json!({ "path": path.to_string_lossy(), "otp": "482913" }),
    );
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"].as_str(), Some("not_found"));
    assert!(value["error"]["message"]
        .as_str()
        .unwrap_or("")
        .contains("OTP column"));

    let _ = child.kill();
}

#[test]
fn unmatched_otp_token_is_not_found() {
    let workspace = temp_dir("marksheet-otp-unmatched");
    let path = workspace.join("filled.xlsx");
    write_sheet_with_otp(&path);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let value = request(
        &mut stdin,
        &mut reader,
        "1",
        "marksheet.single",
        json!({ "path": path.to_string_lossy(), "otp": "000000" }),
    );
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"].as_str(), Some("not_found"));

    let _ = child.kill();
}

#[test]
fn all_students_query_lists_every_parsed_row() {
    let workspace = temp_dir("marksheet-all");
    let path = workspace.join("filled.xlsx");
    write_sheet_with_otp(&path);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marksheet.all",
        json!({ "path": path.to_string_lossy(), "fullMark": 100, "passMark": 33 }),
    );

    let students = all["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["name"].as_str(), Some("Asha Rai"));
    assert_eq!(students[0]["rank"]["position"].as_i64(), Some(1));
    assert_eq!(students[1]["name"].as_str(), Some("Bikram Thapa"));
    assert_eq!(students[1]["total"].as_i64(), Some(30));
    assert_eq!(all["meta"]["section"].as_str(), Some("B"));

    let _ = child.kill();
}
