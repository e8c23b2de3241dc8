//! Integration tests for the CLI binary.
//!
//! Drives the `dtm-state` binary against a temporary root.
//!
//! This test is registered as a [[test]] in the dtm-state-cli crate
//! so that CARGO_BIN_EXE_dtm-state is available.

use std::path::Path;
use std::io::Write;
use std::process::{Command, Output, Stdio};

const PASSPHRASE: &str = "cli test passphrase";

/// Get a Command pointing to the `dtm-state` binary.
fn dtm_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dtm-state"))
}

/// Run the binary against `root` with the operator passphrase set.
fn run(root: &Path, args: &[&str]) -> Output {
    dtm_binary()
        .arg("--root")
        .arg(root)
        .args(args)
        .env("DTM_PASSPHRASE", PASSPHRASE)
        .env_remove("DTM_STATE_DIR")
        .output()
        .expect("failed to execute dtm-state")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_responds_to_help() {
    let output = dtm_binary()
        .arg("--help")
        .output()
        .expect("failed to execute dtm-state --help");

    assert_success(&output, "dtm-state --help");
    let stdout = stdout(&output);
    assert!(
        stdout.contains("dtm-state") || stdout.contains("Usage"),
        "dtm-state --help output should contain usage information, got: {stdout}"
    );
}

#[test]
fn cli_responds_to_version() {
    let output = dtm_binary()
        .arg("--version")
        .output()
        .expect("failed to execute dtm-state --version");

    assert_success(&output, "dtm-state --version");
    assert!(stdout(&output).contains("0.3"));
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = dtm_binary()
        .arg("--nonexistent-flag")
        .output()
        .expect("failed to execute dtm-state");

    assert!(
        !output.status.success(),
        "dtm-state with unknown flag should exit with error"
    );
}

#[test]
fn cli_document_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let output = run(root, &["init"]);
    assert_success(&output, "init");
    assert!(root.join("custodian.key").exists());

    let output = run(root, &["save", "session", "--json", r#"{"a": 1}"#]);
    assert_success(&output, "save");

    let output = run(root, &["load", "session"]);
    assert_success(&output, "load");
    let loaded: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(loaded, serde_json::json!({"a": 1}));

    let output = run(root, &["list"]);
    assert_success(&output, "list");
    assert_eq!(stdout(&output).trim(), "session");

    let output = run(root, &["delete", "session"]);
    assert_success(&output, "delete");
    let output = run(root, &["load", "session"]);
    assert!(!output.status.success(), "load after delete should fail");
}

#[test]
fn cli_certificate_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("store");
    let v1 = tmp.path().join("v1.pem");
    let v2 = tmp.path().join("v2.pem");
    let out = tmp.path().join("out.pem");
    std::fs::write(&v1, b"certificate one").unwrap();
    std::fs::write(&v2, b"certificate two").unwrap();

    let output = run(
        &root,
        &["cert", "store", "edge", v1.to_str().unwrap(), "--meta", "cn=edge"],
    );
    assert_success(&output, "cert store");

    let output = run(&root, &["cert", "rotate", "edge", v2.to_str().unwrap()]);
    assert_success(&output, "cert rotate");

    let output = run(&root, &["cert", "load", "edge", "--out", out.to_str().unwrap()]);
    assert_success(&output, "cert load");
    assert_eq!(std::fs::read(&out).unwrap(), b"certificate two");

    let output = run(&root, &["cert", "list"]);
    assert_success(&output, "cert list");
    assert_eq!(stdout(&output).trim(), "edge");
}

#[test]
fn cli_wrong_passphrase_fails() {
    let tmp = tempfile::tempdir().unwrap();
    assert_success(&run(tmp.path(), &["init"]), "init");

    let output = dtm_binary()
        .arg("--root")
        .arg(tmp.path())
        .arg("status")
        .env("DTM_PASSPHRASE", "wrong")
        .output()
        .expect("failed to execute dtm-state");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("passphrase"));
}

#[test]
fn cli_rejects_invalid_json() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run(tmp.path(), &["save", "session", "--json", "{not json"]);
    assert!(!output.status.success());
}

/// Run the binary with no passphrase in the environment, feeding `input`
/// on stdin.
fn run_prompted(root: &Path, args: &[&str], input: &str) -> Output {
    let mut child = dtm_binary()
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("DTM_PASSPHRASE")
        .env_remove("DTM_STATE_DIR")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to execute dtm-state");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().expect("failed to wait for dtm-state")
}

#[test]
fn cli_rejects_empty_passphrase_from_env() {
    let tmp = tempfile::tempdir().unwrap();
    let output = dtm_binary()
        .arg("--root")
        .arg(tmp.path())
        .arg("init")
        .env("DTM_PASSPHRASE", "")
        .output()
        .expect("failed to execute dtm-state");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("empty"));
    assert!(!tmp.path().join("custodian.key").exists());
}

#[test]
fn cli_new_store_requires_matching_confirmation() {
    let tmp = tempfile::tempdir().unwrap();

    let output = run_prompted(tmp.path(), &["init"], "first try\nfirst tyr\n");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("do not match"));
    assert!(!tmp.path().join("custodian.key").exists());

    let output = run_prompted(tmp.path(), &["init"], "\n\n");
    assert!(!output.status.success());
    assert!(!tmp.path().join("custodian.key").exists());

    let output = run_prompted(tmp.path(), &["init"], "typed twice\ntyped twice\n");
    assert_success(&output, "init with confirmed passphrase");
    assert!(tmp.path().join("custodian.key").exists());

    // An existing key file is opened with a single entry.
    let output = run_prompted(tmp.path(), &["status"], "typed twice\n");
    assert_success(&output, "status with existing key file");
}
