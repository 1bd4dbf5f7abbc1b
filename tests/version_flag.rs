use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("forum-tui")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("forum-tui")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("forum-tui").and(predicate::str::contains("--version")));
}

#[test]
fn rejects_unknown_flag() {
    Command::cargo_bin("forum-tui")
        .unwrap()
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown argument"));
}

#[test]
fn rejects_malformed_route() {
    Command::cargo_bin("forum-tui")
        .unwrap()
        .args(["--open", "/users/3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a post route"));
}
