use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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

const HEADER: &str = "DIREC,MUNICÍPIO,ESCOLA,INEP ESCOLA,ETAPA_RESUMIDA,SÉRIE,\
1B_Notas Lancadas,1B_Notas Nao Lancadas,2B_Notas Lancadas,2B_Notas Nao Lancadas,\
3B_Notas Lancadas,3B_Notas Nao Lancadas,4B_Notas Lancadas,4B_Notas Nao Lancadas";

fn write_dataset(dir: &Path, lines: &[&str]) -> PathBuf {
    let path = dir.join("df_escola.csv");
    let mut body = String::from(HEADER);
    body.push('\n');
    for l in lines {
        body.push_str(l);
        body.push('\n');
    }
    std::fs::write(&path, body).expect("write dataset");
    path
}

fn f64_at(v: &serde_json::Value, ptr: &str) -> f64 {
    v.pointer(ptr)
        .and_then(|x| x.as_f64())
        .unwrap_or_else(|| panic!("missing number at {} in {}", ptr, v))
}

fn str_at<'a>(v: &'a serde_json::Value, ptr: &str) -> &'a str {
    v.pointer(ptr)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", ptr, v))
}

fn small_dataset(dir: &Path) -> PathBuf {
    write_dataset(
        dir,
        &[
            "A,Natal,Escola Um,1,EM,1ª SÉRIE,90,10,20,30,0,0,0,0",
            "A,Natal,Escola Dois,2,EM,1ª SÉRIE,5,5,0,0,0,0,0,0",
            "B,Caicó,Escola Três,3,EF,6º ANO,0,0,0,0,0,0,0,0",
        ],
    )
}

#[test]
fn totals_reuse_first_bimester_denominator() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dataset = small_dataset(dir.path());
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    let out = request_ok(&mut stdin, &mut reader, "1", "report.totals", json!({}));
    assert_eq!(f64_at(&out, "/totals/totalRegistros"), 110.0);
    assert_eq!(str_at(&out, "/totals/denominatorMode"), "bimester1");
    assert_eq!(f64_at(&out, "/totals/bimesters/0/submitted"), 95.0);
    assert_eq!(f64_at(&out, "/totals/bimesters/0/missing"), 15.0);
    assert_eq!(f64_at(&out, "/totals/bimesters/0/missingPct"), 13.6);
    assert_eq!(f64_at(&out, "/totals/bimesters/0/submittedPct"), 86.4);
    assert_eq!(f64_at(&out, "/totals/bimesters/1/missingPct"), 27.3);
    assert_eq!(f64_at(&out, "/totals/bimesters/1/submittedPct"), 18.2);

    assert_eq!(
        out.pointer("/missingSeries/points")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(3)
    );
    assert_eq!(str_at(&out, "/missingSeries/points/0/category"), "1º Bimestre");
    assert_eq!(f64_at(&out, "/missingSeries/maxValue"), 30.0);
    assert_eq!(f64_at(&out, "/submittedSeries/points/0/value"), 95.0);

    let corrected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "report.totals",
        json!({ "denominator": "perBimester" }),
    );
    assert_eq!(f64_at(&corrected, "/totals/bimesters/1/missingPct"), 60.0);
    assert_eq!(f64_at(&corrected, "/totals/bimesters/1/submittedPct"), 40.0);
    assert_eq!(f64_at(&corrected, "/totals/bimesters/2/missingPct"), 0.0);

    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "report.totals",
        json!({ "denominator": "bimester9" }),
    );
    assert_eq!(str_at(&bad, "/error/code"), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn regions_use_their_own_denominator() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dataset = small_dataset(dir.path());
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.regions",
        json!({ "bimester": 1 }),
    );
    let rows = out
        .pointer("/regions/rows")
        .and_then(|v| v.as_array())
        .expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(str_at(&out, "/regions/rows/0/region"), "A");
    assert_eq!(f64_at(&out, "/regions/rows/0/submitted"), 95.0);
    assert_eq!(f64_at(&out, "/regions/rows/0/missing"), 15.0);
    assert_eq!(f64_at(&out, "/regions/rows/0/missingPct"), 13.6);
    assert_eq!(str_at(&out, "/regions/rows/1/region"), "B");
    assert_eq!(f64_at(&out, "/regions/rows/1/total"), 0.0);
    assert_eq!(f64_at(&out, "/regions/rows/1/missingPct"), 0.0);

    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "report.regions",
        json!({ "bimester": 5 }),
    );
    assert_eq!(str_at(&bad, "/error/code"), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn school_ranking_sorts_by_requested_bimester() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dataset = small_dataset(dir.path());
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    let by_b2 = request_ok(&mut stdin, &mut reader, "1", "report.schools", json!({}));
    assert_eq!(str_at(&by_b2, "/schools/sortBy"), "missingPctB2");
    let ids: Vec<&str> = by_b2
        .pointer("/schools/rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .filter_map(|r| r.get("schoolId").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(f64_at(&by_b2, "/schools/rows/0/missingPctB2"), 60.0);
    assert_eq!(str_at(&by_b2, "/schools/rows/0/school"), "Escola Um (cód. Inep: 1)");

    let by_b1 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "report.schools",
        json!({ "sortBy": "missingPctB1" }),
    );
    let ids: Vec<&str> = by_b1
        .pointer("/schools/rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .filter_map(|r| r.get("schoolId").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(ids, vec!["2", "1", "3"]);

    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "report.schools",
        json!({ "sortBy": "schoolName" }),
    );
    assert_eq!(str_at(&bad, "/error/code"), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn nan_cells_are_skipped_and_negative_counts_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dataset = write_dataset(
        dir.path(),
        &[
            "A,Natal,Escola Um,1,EM,1ª SÉRIE,8,2,0,0,0,0,0,0",
            "A,Natal,Escola Dois,2,EM,1ª SÉRIE,NaN,2,0,0,0,0,0,0",
            "A,Natal,Escola Três,3,EM,1ª SÉRIE,1,1,0,0,0,0,0,0",
            "A,Natal,Escola Quatro,4,EM,1ª SÉRIE,0,0,0,0,0,-1,0,0",
        ],
    );
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.open",
        json!({ "sortBy": "missingPctB1" }),
    );
    // The NaN school stays ranked: its missing cell alone gives 100%.
    assert_eq!(f64_at(&out, "/schools/totalRows"), 3.0);
    let ids: Vec<&str> = out
        .pointer("/schools/rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .filter_map(|r| r.get("schoolId").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(ids, vec!["2", "3", "1"]);
    assert_eq!(f64_at(&out, "/schools/rows/0/missingPctB1"), 100.0);

    let failures = out
        .get("failures")
        .and_then(|v| v.as_array())
        .expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(str_at(&out, "/failures/0/schoolId"), "4");

    // Totals skip the NaN cell instead of failing.
    assert_eq!(f64_at(&out, "/totals/bimesters/0/submitted"), 9.0);
    assert_eq!(f64_at(&out, "/totals/bimesters/0/missing"), 5.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn empty_dataset_degrades_to_zeroes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dataset = write_dataset(dir.path(), &[]);
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&dataset);

    let out = request_ok(&mut stdin, &mut reader, "1", "report.open", json!({ "page": 4 }));
    assert_eq!(out.get("empty").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(f64_at(&out, "/totals/totalRegistros"), 0.0);
    assert_eq!(f64_at(&out, "/totals/bimesters/0/missingPct"), 0.0);
    assert_eq!(f64_at(&out, "/schools/page"), 1.0);
    assert_eq!(f64_at(&out, "/schools/totalPages"), 1.0);
    assert_eq!(f64_at(&out, "/schools/rangeStart"), 0.0);
    let regions = out
        .get("regions")
        .and_then(|v| v.as_array())
        .expect("regions");
    assert_eq!(regions.len(), 3);
    assert!(regions.iter().all(|t| t
        .get("rows")
        .and_then(|r| r.as_array())
        .map(|r| r.is_empty())
        .unwrap_or(false)));
    assert_eq!(
        out.pointer("/options/regions").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
}
