use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("marksheet-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").is_some());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schools.create",
        json!({ "owner": "teacher@example.com", "name": "Hilltop Academy" }),
    );
    let school_id = school["schoolId"].as_str().expect("schoolId").to_string();

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "owner": "teacher@example.com", "schoolId": school_id, "grade": 8 }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let section = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sections.create",
        json!({ "owner": "teacher@example.com", "classId": class_id, "name": "B" }),
    );
    let section_id = section["sectionId"].as_str().expect("sectionId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "subjects.create",
        json!({
            "owner": "teacher@example.com",
            "classId": class_id,
            "sectionId": section_id,
            "name": "Math"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "terms.create",
        json!({ "owner": "teacher@example.com", "schoolId": school_id, "name": "First Term" }),
    );

    let schools = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schools.list",
        json!({ "owner": "teacher@example.com" }),
    );
    assert_eq!(schools["schools"].as_array().map(|a| a.len()), Some(1));

    let classes = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.list",
        json!({ "owner": "teacher@example.com", "schoolId": school_id }),
    );
    assert_eq!(classes["classes"][0]["grade"].as_i64(), Some(8));
    assert_eq!(classes["classes"][0]["sectionCount"].as_i64(), Some(1));

    let sections = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "sections.list",
        json!({ "owner": "teacher@example.com", "classId": class_id }),
    );
    assert_eq!(sections["sections"][0]["name"].as_str(), Some("B"));

    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "subjects.list",
        json!({
            "owner": "teacher@example.com",
            "classId": class_id,
            "sectionId": section_id
        }),
    );
    assert_eq!(subjects["subjects"][0]["name"].as_str(), Some("Math"));

    let terms = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "terms.list",
        json!({ "owner": "teacher@example.com" }),
    );
    assert_eq!(terms["terms"][0]["name"].as_str(), Some("First Term"));

    let config = request_ok(&mut stdin, &mut reader, "13", "sheet.config.get", json!({}));
    assert_eq!(config["blankRows"].as_i64(), Some(5));
    assert_eq!(config["templateRows"].as_i64(), Some(50));

    let unknown = request(&mut stdin, &mut reader, "14", "nope.nothing", json!({}));
    assert_eq!(unknown["ok"].as_bool(), Some(false));
    assert_eq!(error_code(&unknown), "not_implemented");

    // DB-backed methods refuse politely before a workspace is selected.
    let (mut fresh_child, mut fresh_stdin, mut fresh_reader) = spawn_sidecar();
    let refused = request(
        &mut fresh_stdin,
        &mut fresh_reader,
        "15",
        "schools.list",
        json!({ "owner": "teacher@example.com" }),
    );
    assert_eq!(error_code(&refused), "no_workspace");
    let _ = fresh_child.kill();

    let _ = child.kill();
}

#[test]
fn missing_params_answer_bad_params() {
    let workspace = temp_dir("marksheet-bad-params");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "schools.create",
        json!({ "owner": "teacher@example.com" }),
    );
    assert_eq!(error_code(&missing), "bad_params");

    let empty = request(
        &mut stdin,
        &mut reader,
        "3",
        "schools.create",
        json!({ "owner": "teacher@example.com", "name": "   " }),
    );
    assert_eq!(error_code(&empty), "bad_params");

    let bad_rows = request(
        &mut stdin,
        &mut reader,
        "4",
        "sheet.config.update",
        json!({ "blankRows": 0 }),
    );
    assert_eq!(error_code(&bad_rows), "bad_params");

    let _ = child.kill();
}
