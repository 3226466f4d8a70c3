//! The merge driver as git runs it: through the binary, judged by exit status.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn settings(staging: &str, production: &str) -> String {
    format!(
        "{{\n  \"current\": \"Default\",\n  /* @env staging */\n  \"color\": \"{staging}\",\n  /* @endenv */\n  /* @env production */\n  \"color\": \"{production}\",\n  /* @endenv */\n}}\n"
    )
}

fn write(dir: &Path, base: &str, current: &str, incoming: &str) {
    fs::write(dir.join("base.json"), base).unwrap();
    fs::write(dir.join("current.json"), current).unwrap();
    fs::write(dir.join("incoming.json"), incoming).unwrap();
}

fn driver(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("themesync").unwrap();
    cmd.current_dir(dir)
        .arg("merge-driver")
        .args(["base.json", "current.json", "incoming.json"]);
    cmd
}

#[test]
fn test_clean_merge_exits_zero() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        &settings("red", "blue"),
        &settings("green", "blue"),
        &settings("red", "black"),
    );

    driver(dir.path()).assert().code(0);
    assert_eq!(
        fs::read_to_string(dir.path().join("current.json")).unwrap(),
        settings("green", "black")
    );
}

#[test]
fn test_conflict_exits_one_with_markers() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        &settings("red", "blue"),
        &settings("green", "blue"),
        &settings("pink", "blue"),
    );

    driver(dir.path())
        .arg("9")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("staging"));

    let merged = fs::read_to_string(dir.path().join("current.json")).unwrap();
    assert!(merged.contains("<<<<<<<<< current"));
    assert!(merged.contains(">>>>>>>>> incoming"));
    assert!(merged.contains("/* @env production */\n  \"color\": \"blue\""));
}

#[test]
fn test_nested_blocks_exit_two() {
    let dir = TempDir::new().unwrap();
    let nested = "/* @env a */\n/* @env b */\n/* @endenv */\n/* @endenv */\n";
    write(dir.path(), nested, nested, nested);

    driver(dir.path()).assert().code(2);
}

#[test]
fn test_missing_input_exits_two() {
    let dir = TempDir::new().unwrap();
    driver(dir.path()).assert().code(2);
}
