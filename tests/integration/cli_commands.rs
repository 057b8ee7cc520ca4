#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const K1: &str = "T1JJRU5UREJfSVNfQ09PTA==";
const K2: &str = "AAECAwQFBgcICQoLDA0ODw==";

struct Env {
    dir: TempDir,
    url: String,
}

fn setup(name: &str) -> Env {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("plocal:{}", dir.path().join(name).display());
    Env { dir, url }
}

fn umbra(env: &Env) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("umbra");
    // Keep the user's real config file out of the picture.
    cmd.env("XDG_CONFIG_HOME", env.dir.path().join("xdg"))
        .env_remove("UMBRA_URL")
        .env_remove("UMBRA_KEY")
        .arg("--url")
        .arg(&env.url);
    cmd
}

fn seed(env: &Env) {
    umbra(env)
        .args(["--method", "des", "--key", K1, "command"])
        .arg("create class TestEncryption")
        .arg("insert into TestEncryption set name = 'Jay', age = 41")
        .assert()
        .success();
}

#[test]
fn command_then_query_prints_json_lines() {
    let env = setup("json");
    seed(&env);
    let output = umbra(&env)
        .args(["--method", "des", "--key", K1, "query"])
        .arg("select from TestEncryption where name = 'Jay'")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let rows: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json"))
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Jay");
    assert_eq!(rows[0]["age"], 41);
    assert_eq!(rows[0]["@class"], "TestEncryption");
}

#[test]
fn command_reports_affected_records() {
    let env = setup("affected");
    let output = umbra(&env)
        .args(["--key", K1, "command"])
        .arg("create class P")
        .arg("insert into P set n = 1")
        .arg("insert into P set n = 2")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("2 record(s) affected"));
}

#[test]
fn check_key_accepts_right_key_and_rejects_wrong_one() {
    let env = setup("check");
    seed(&env);

    let output = umbra(&env)
        .args(["--method", "des", "--key", K1, "check-key"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.starts_with("ok:"), "{text}");
    assert!(text.contains("1 records"), "{text}");

    let output = umbra(&env)
        .args(["--method", "des", "--key", K2, "check-key"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("error: security"));

    umbra(&env)
        .args(["--method", "des", "--key", "invalidPassword", "check-key"])
        .assert()
        .failure();
}

#[test]
fn config_file_supplies_url_and_key() {
    let env = setup("configured");
    seed(&env);
    let config_path = env.dir.path().join("umbra.toml");
    fs::write(
        &config_path,
        format!(
            "url = \"{}\"\n\n[encryption]\nmethod = \"des\"\nkey = \"{K1}\"\n",
            env.url
        ),
    )
    .expect("write config");

    cargo_bin_cmd!("umbra")
        .env("XDG_CONFIG_HOME", env.dir.path().join("xdg"))
        .env_remove("UMBRA_URL")
        .env_remove("UMBRA_KEY")
        .arg("--config")
        .arg(&config_path)
        .arg("check-key")
        .assert()
        .success();
}

#[test]
fn missing_url_and_bad_syntax_fail() {
    let env = setup("errors");
    cargo_bin_cmd!("umbra")
        .env("XDG_CONFIG_HOME", env.dir.path().join("xdg"))
        .env_remove("UMBRA_URL")
        .arg("check-key")
        .assert()
        .failure();

    let output = umbra(&env)
        .args(["command", "create clas P"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("syntax"));
}
