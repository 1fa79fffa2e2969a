//! Integration tests for the `hmip` CLI binary.
//!
//! These tests validate argument parsing, help output, config handling and
//! error exit codes without contacting the HomematicIP cloud.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `hmip` binary with env isolation.
///
/// Clears all `HMIP_*` env vars and points config directories at `home` so
/// tests never touch the user's real configuration.
fn hmip_cmd(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hmip");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env_remove("HMIP_PROFILE")
        .env_remove("HMIP_ACCESS_POINT")
        .env_remove("HMIP_AUTH_TOKEN")
        .env_remove("HMIP_OUTPUT")
        .env_remove("HMIP_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(home: &std::path::Path, text: &str) {
    let dir = home.join("hmip");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), text).unwrap();
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = hmip_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    hmip_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("pair")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("state"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn version_flag() {
    let home = tempfile::tempdir().unwrap();
    hmip_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hmip"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_points_into_config_dir() {
    let home = tempfile::tempdir().unwrap();
    hmip_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn config_show_redacts_secrets() {
    let home = tempfile::tempdir().unwrap();
    write_config(
        home.path(),
        "[profiles.default]\naccess_point = \"3014F711A000000000000001\"\nauth_token = \"super-secret\"\n",
    );

    let output = hmip_cmd(home.path()).args(["config", "show"]).output().unwrap();
    assert!(output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("3014F711A000000000000001"), "{text}");
    assert!(text.contains("<set>"), "{text}");
    assert!(!text.contains("super-secret"), "{text}");
}

#[test]
fn config_profiles_marks_default() {
    let home = tempfile::tempdir().unwrap();
    write_config(
        home.path(),
        "default_profile = \"home\"\n\n[profiles.home]\naccess_point = \"3014F711A000000000000001\"\n\n[profiles.cabin]\naccess_point = \"3014F711A000000000000002\"\n",
    );

    hmip_cmd(home.path())
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* home").and(predicate::str::contains("  cabin")));
}

// ── Error exit codes ────────────────────────────────────────────────

#[test]
fn state_without_profile_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let output = hmip_cmd(home.path()).arg("state").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("not found"));
}

#[test]
fn state_without_token_asks_for_pairing() {
    let home = tempfile::tempdir().unwrap();
    let output = hmip_cmd(home.path())
        .args(["state", "--access-point", "3014-F711-A000-0000-0000-0001"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("hmip pair"));
}

#[test]
fn short_access_point_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let output = hmip_cmd(home.path())
        .args(["pair", "--access-point", "3014"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("access_point"));
}
