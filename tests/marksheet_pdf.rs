use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
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
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portald");
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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn marksheet_downloads_as_valid_pdf() {
    let workspace = temp_dir("portald-pdf");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "branch": "CSE", "usn": "21SECD001", "name": "Asha Rao", "semester": 3 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.saveAll",
        json!({
            "branch": "CSE",
            "term": 3,
            "students": [{
                "usn": "21SECD001",
                "subjects": [
                    { "subject": "Subject1", "ia1": "20", "ia2": "25", "ia3": "18", "attendance": "80" },
                    { "subject": "Subject2", "ia1": "15", "ia2": "10", "ia3": "12", "attendance": "60" }
                ]
            }]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.marksheetPdf",
        json!({ "usn": "21SECD001", "term": 3 }),
    );

    assert_eq!(result["fileName"], "Asha_Rao_Sem3_Marksheet.pdf");
    assert_eq!(result["contentType"], "application/pdf");

    let bytes = BASE64
        .decode(result["dataBase64"].as_str().expect("base64 payload"))
        .expect("decode pdf bytes");
    assert!(!bytes.is_empty());
    assert_eq!(result["byteLength"].as_u64(), Some(bytes.len() as u64));
    assert!(bytes.starts_with(b"%PDF-"));

    // Uncompressed content streams: the table and summary are visible in
    // the raw bytes, and the numbers match the tabular model's rounding.
    assert!(contains(&bytes, b"Asha Rao"));
    assert!(contains(&bytes, b"Eligible"));
    assert!(contains(&bytes, b"Shortage"));
    assert!(contains(
        &bytes,
        b"Average IA Score: 16.7   |   Average Attendance: 70.0%"
    ));
    assert!(contains(&bytes, b"INTERNAL ASSESSMENT REPORT"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_record_still_produces_a_document() {
    let workspace = temp_dir("portald-pdf-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "branch": "AIDS", "usn": "22SEAD042", "name": "Neha J", "semester": 2 }),
    );
    // A record with zero subjects is legal; the table body is just empty.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.saveAll",
        json!({
            "branch": "AIDS",
            "term": 2,
            "students": [{ "usn": "22SEAD042", "subjects": [] }]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.marksheetPdf",
        json!({ "usn": "22SEAD042" }),
    );
    let bytes = BASE64
        .decode(result["dataBase64"].as_str().expect("base64 payload"))
        .expect("decode pdf bytes");
    assert!(bytes.starts_with(b"%PDF-"));
    assert!(result["byteLength"].as_u64().unwrap_or(0) > 0);
    assert!(contains(
        &bytes,
        b"Average IA Score: 0.0   |   Average Attendance: 0.0%"
    ));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_marks_record_is_not_found_not_a_crash() {
    let workspace = temp_dir("portald-pdf-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "branch": "CSE", "usn": "21SECD055", "name": "Vikram T", "semester": 6 }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "reports.marksheetPdf",
        json!({ "usn": "21SECD055" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(
        resp["error"]["code"].as_str(),
        Some("not_found"),
        "missing record should be a user-visible empty state"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_logo_asset_is_omitted_silently() {
    let workspace = temp_dir("portald-pdf-logo");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "config.update",
        json!({ "logoPath": workspace.join("nonexistent-logo.jpg").to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.upsert",
        json!({ "branch": "CSE", "usn": "21SECD077", "name": "Sneha V", "semester": 3 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.saveAll",
        json!({
            "branch": "CSE",
            "term": 3,
            "students": [{
                "usn": "21SECD077",
                "subjects": [
                    { "subject": "Subject1", "ia1": "12", "ia2": "13", "ia3": "14", "attendance": "82" }
                ]
            }]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.marksheetPdf",
        json!({ "usn": "21SECD077" }),
    );
    let bytes = BASE64
        .decode(result["dataBase64"].as_str().expect("base64 payload"))
        .expect("decode pdf bytes");
    assert!(bytes.starts_with(b"%PDF-"));
    assert!(!contains(&bytes, b"DCTDecode"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
