//! Integration tests for the CLI binary.
//!
//! This test is registered as a [[test]] in the healthvault-cli crate
//! so that CARGO_BIN_EXE_hvault is available.

use std::path::Path;
use std::process::{Command, Output};

/// Get a Command pointing to the `hvault` binary.
fn hvault_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_hvault"))
}

/// Run `hvault --root <root> <args>` with the given password in the environment.
fn hvault(root: &Path, password: Option<&str>, args: &[&str]) -> Output {
    let mut cmd = hvault_binary();
    cmd.arg("--root").arg(root).args(args);
    cmd.env_remove("HEALTHVAULT_PASSWORD");
    if let Some(password) = password {
        cmd.env("HEALTHVAULT_PASSWORD", password);
    }
    cmd.output().expect("failed to execute hvault")
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
    let output = hvault_binary()
        .arg("--help")
        .output()
        .expect("failed to execute hvault --help");
    assert_success(&output, "hvault --help");
    let out = stdout(&output);
    assert!(
        out.contains("hvault") || out.contains("Usage"),
        "help output should contain usage information, got: {out}"
    );
}

#[test]
fn cli_responds_to_version() {
    let output = hvault_binary()
        .arg("--version")
        .output()
        .expect("failed to execute hvault --version");
    assert_success(&output, "hvault --version");
    assert!(stdout(&output).contains("0.1"));
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = hvault_binary()
        .arg("--nonexistent-flag")
        .output()
        .expect("failed to execute hvault");
    assert!(!output.status.success());
}

#[test]
fn cli_store_query_delete_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");

    assert_success(&hvault(&root, None, &["init"]), "init");
    assert!(root.join("healthvault.json").is_file());

    assert_success(
        &hvault(&root, Some("s3cret"), &["register", "--user", "alice"]),
        "register",
    );

    let put = hvault(
        &root,
        Some("s3cret"),
        &[
            "put", "--user", "alice", "--category", "vitals", "--id", "1", "--data", "hr=72",
            "--meta", "entry_type=vital",
        ],
    );
    assert_success(&put, "put");
    assert_eq!(stdout(&put).trim(), "alice/vitals/1");

    let get = hvault(&root, Some("s3cret"), &["get", "--user", "alice", "alice/vitals/1"]);
    assert_success(&get, "get");
    assert_eq!(stdout(&get), "hr=72");

    let query = hvault(
        &root,
        Some("s3cret"),
        &["query", "--user", "alice", "--category", "vitals", "--json"],
    );
    assert_success(&query, "query");
    let line: serde_json::Value = serde_json::from_str(stdout(&query).trim()).unwrap();
    assert_eq!(line["key"], "alice/vitals/1");
    assert_eq!(line["data"], "hr=72");
    assert_eq!(line["metadata"]["entry_type"], "vital");

    let wrong = hvault(&root, Some("nope"), &["get", "--user", "alice", "alice/vitals/1"]);
    assert!(!wrong.status.success(), "wrong password must fail");

    assert_success(
        &hvault(&root, Some("s3cret"), &["delete", "--user", "alice", "alice/vitals/1"]),
        "delete",
    );
    let gone = hvault(&root, Some("s3cret"), &["get", "--user", "alice", "alice/vitals/1"]);
    assert!(!gone.status.success());

    let verify = hvault(&root, None, &["audit", "--verify"]);
    assert_success(&verify, "audit --verify");
    assert!(stdout(&verify).contains("intact"));

    let audit = hvault(&root, None, &["audit", "--user", "alice"]);
    assert_success(&audit, "audit");
    let out = stdout(&audit);
    assert!(out.contains("store_vitals"));
    assert!(out.contains("delete_vitals"));
    assert!(out.contains("FAILED"));
}

#[test]
fn cli_rebuild_index() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    assert_success(&hvault(root, Some("pw"), &["register", "--user", "bob"]), "register");
    for _ in 0..3 {
        assert_success(
            &hvault(
                root,
                Some("pw"),
                &["put", "--user", "bob", "--category", "sleep", "--data", "8h"],
            ),
            "put",
        );
    }
    std::fs::remove_file(root.join("_index.json")).unwrap();

    let rebuilt = hvault(root, None, &["rebuild-index"]);
    assert_success(&rebuilt, "rebuild-index");
    assert!(stdout(&rebuilt).contains("Indexed 3 records"));
}
