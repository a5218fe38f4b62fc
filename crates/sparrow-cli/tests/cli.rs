//! CLI-level integration tests (§10), grounded in `faxt`'s `assert_cmd` +
//! `predicates` integration style.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn script(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn run_prints_the_returned_value() {
    let file = script(".narg 0\nLoadN1\nRet\n");
    Command::cargo_bin("sparrow")
        .unwrap()
        .arg("run")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));
}

#[test]
fn run_reports_a_nonzero_exit_on_unknown_opcode() {
    let file = script("NotARealOpcode\n");
    Command::cargo_bin("sparrow").unwrap().arg("run").arg(file.path()).assert().failure();
}

#[test]
fn dump_ir_reports_node_count_and_anchors() {
    let file = script(".narg 0\nLoadN1\nRet\n");
    Command::cargo_bin("sparrow")
        .unwrap()
        .arg("dump-ir")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("start:"))
        .stdout(predicate::str::contains("end:"));
}

#[test]
fn verbose_flag_is_accepted_globally() {
    let file = script(".narg 0\nRetNull\n");
    Command::cargo_bin("sparrow").unwrap().arg("--verbose").arg("run").arg(file.path()).assert().success();
}
