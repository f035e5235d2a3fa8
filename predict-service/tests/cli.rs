//! Runs the worker binary over stdio

use std::io::Write;
use std::process::{Command, Stdio};

use predict_core::decode_result;
use serde_json::json;

fn write_model(dir: &std::path::Path) {
    let meta = json!({
        "collections": {
            "inputs": json!({"image": "x:0", "key": "key_in:0"}).to_string(),
            "outputs": json!({"scores": "probs:0", "key": "key_out:0"}).to_string(),
        },
        "graph": {"nodes": [
            {"name": "x", "op": "placeholder", "dtype": "float", "width": 2},
            {"name": "key_in", "op": "placeholder", "dtype": "int"},
            {"name": "logits", "op": "dense", "input": "x", "weights": "w", "bias": "b"},
            {"name": "probs", "op": "softmax", "input": "logits"},
            {"name": "key_out", "op": "identity", "input": "key_in"}
        ]}
    });
    let params = json!({
        "w": {"shape": [2, 2], "data": [1.0, 0.0, 0.0, 1.0]},
        "b": {"shape": [2], "data": [0.0, 0.0]},
    });
    std::fs::write(dir.join("export.meta"), meta.to_string()).unwrap();
    std::fs::write(dir.join("export.params"), params.to_string()).unwrap();
}

#[test]
fn test_stdout_carries_only_results() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_predict-service"))
        .args(["--input", "-", "--output", "-", "--model"])
        .arg(dir.path())
        .env("RUST_LOG", "debug")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    {
        let mut stdin = child.stdin.take().unwrap();
        writeln!(stdin, r#"{{"ID": 1, "Image": "0.0,2.0"}}"#).unwrap();
        writeln!(stdin, r#"{{"ID": "2", "Image": "2.0,0.0"}}"#).unwrap();
    }

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut ids: Vec<i64> = stdout
        .lines()
        .map(|line| decode_result(line.as_bytes()).unwrap().identifier)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Prediction service starting"));
}

#[test]
fn test_missing_model_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_predict-service"))
        .args(["--input", "-", "--output", "-", "--model"])
        .arg(dir.path().join("absent"))
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
