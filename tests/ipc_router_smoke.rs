use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn fixture_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn spawn_sidecar(dataset: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_notasd");
    let mut child = Command::new(exe)
        .env("NOTASD_DATASET", dataset)
        .env_remove("NOTASD_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn notasd");
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let dataset = fixture_path("fixtures/df_escola_sample.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health.get("datasetState").and_then(|v| v.as_str()),
        Some("pending")
    );

    let info = request_ok(&mut stdin, &mut reader, "2", "dataset.info", json!({}));
    assert_eq!(info.get("loaded").and_then(|v| v.as_bool()), Some(false));

    let loaded = request_ok(&mut stdin, &mut reader, "3", "dataset.load", json!({}));
    assert_eq!(loaded.get("rowCount").and_then(|v| v.as_u64()), Some(46));
    assert_eq!(loaded.get("regionCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(loaded.get("schoolCount").and_then(|v| v.as_u64()), Some(23));
    assert_eq!(loaded.get("cached").and_then(|v| v.as_bool()), Some(false));
    let fingerprint = loaded
        .pointer("/source/fingerprint")
        .and_then(|v| v.as_str())
        .expect("fingerprint")
        .to_string();
    assert_eq!(fingerprint.len(), 64);

    let again = request_ok(&mut stdin, &mut reader, "4", "dataset.load", json!({}));
    assert_eq!(again.get("cached").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        again.pointer("/source/fingerprint").and_then(|v| v.as_str()),
        Some(fingerprint.as_str())
    );

    let opened = request_ok(&mut stdin, &mut reader, "5", "session.open", json!({}));
    let sid = opened
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();

    for (i, method) in [
        "filters.get",
        "filters.clear",
        "report.totals",
        "report.regions",
        "report.schools",
        "report.open",
    ]
    .iter()
    .enumerate()
    {
        let id = format!("m{}", i);
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &id,
            method,
            json!({ "sessionId": sid }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "filters.set",
        json!({ "sessionId": sid, "level": "region", "value": "3ª DIREC - CAICÓ" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.close",
        json!({ "sessionId": sid }),
    );

    let unknown = request(&mut stdin, &mut reader, "8", "classes.list", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let closed = request(
        &mut stdin,
        &mut reader,
        "9",
        "filters.get",
        json!({ "sessionId": sid }),
    );
    assert_eq!(error_code(&closed), Some("unknown_session"));

    let default_close = request(
        &mut stdin,
        &mut reader,
        "10",
        "session.close",
        json!({ "sessionId": "default" }),
    );
    assert_eq!(error_code(&default_close), Some("bad_params"));

    let health = request_ok(&mut stdin, &mut reader, "11", "health", json!({}));
    assert_eq!(
        health.get("datasetState").and_then(|v| v.as_str()),
        Some("loaded")
    );
    assert_eq!(health.get("sessionCount").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_line_does_not_end_the_session() {
    let dataset = fixture_path("fixtures/df_escola_sample.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("reply is json");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&value), Some("bad_json"));

    let _ = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}
