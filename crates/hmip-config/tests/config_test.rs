// Config loading and write-back against real files in a temp dir.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};

use hmip_config::{
    ConfigError, load_config_from, profile_to_connector_config, save_auth_token,
};
use hmip_core::TlsMode;

const CONFIG: &str = r#"
default_profile = "home"

[defaults]
timeout = 12
resync_on_reconnect = true

[profiles.home]
access_point = "3014-F711-A000-0000-0000-0001"
auth_token = "tok"
pin = "1234"
lookup_url = "http://127.0.0.1:9999/getHost"
max_pairing_polls = 20

[profiles.home.rate_limit]
min_spacing_ms = 250
reservoir = 5

[profiles.cabin]
access_point = "3014F711A000000000000002"
timeout = 5
resync_on_reconnect = false
ca_cert = "/etc/hmip/ca.pem"
"#;

fn write_config(dir: &tempfile::TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn default_profile_translates_to_connector_config() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&write_config(&dir, CONFIG)).unwrap();

    let (name, profile) = cfg.profile(None).unwrap();
    assert_eq!(name, "home");

    let connector = profile_to_connector_config(profile, &cfg.defaults).unwrap();
    assert_eq!(connector.access_point, "3014F711A000000000000001");
    assert_eq!(connector.auth_token.unwrap().expose_secret(), "tok");
    assert_eq!(connector.pin.unwrap().expose_secret(), "1234");
    assert_eq!(
        connector.lookup_url.unwrap().as_str(),
        "http://127.0.0.1:9999/getHost"
    );
    assert_eq!(connector.timeout, Duration::from_secs(12));
    assert!(connector.resync_on_reconnect);
    assert_eq!(connector.pairing.max_polls, Some(20));
    assert_eq!(connector.dispatcher.min_spacing, Duration::from_millis(250));
    assert_eq!(connector.dispatcher.reservoir, 5);
    assert_eq!(connector.dispatcher.reservoir_max, 5);
    assert_eq!(connector.dispatcher.high_water, 120);
}

#[test]
fn profile_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&write_config(&dir, CONFIG)).unwrap();

    let (_, profile) = cfg.profile(Some("cabin")).unwrap();
    let connector = profile_to_connector_config(profile, &cfg.defaults).unwrap();
    assert!(connector.auth_token.is_none());
    assert_eq!(connector.timeout, Duration::from_secs(5));
    assert!(!connector.resync_on_reconnect);
    assert!(matches!(connector.tls, TlsMode::CustomCa(ref p) if p.ends_with("ca.pem")));
}

#[test]
fn missing_profile_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&write_config(&dir, CONFIG)).unwrap();
    let err = cfg.profile(Some("garage")).unwrap_err();
    assert!(matches!(err, ConfigError::NoProfile { ref profile } if profile == "garage"));
}

#[test]
fn short_access_point_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&write_config(
        &dir,
        "[profiles.default]\naccess_point = \"3014-F711\"\n",
    ))
    .unwrap();
    let (_, profile) = cfg.profile(None).unwrap();
    let err = profile_to_connector_config(profile, &cfg.defaults).unwrap_err();
    assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "access_point"));
}

#[test]
fn zero_reservoir_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&write_config(
        &dir,
        "[profiles.default]\naccess_point = \"3014F711A000000000000001\"\n\n\
         [profiles.default.rate_limit]\nreservoir = 0\nrefill_interval_ms = 0\n",
    ))
    .unwrap();
    let (_, profile) = cfg.profile(None).unwrap();
    let err = profile_to_connector_config(profile, &cfg.defaults).unwrap_err();
    assert!(
        matches!(err, ConfigError::Validation { ref field, .. } if field == "rate_limit.reservoir_max")
    );
}

#[test]
fn missing_file_loads_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.default_profile.as_deref(), Some("default"));
    assert_eq!(cfg.defaults.timeout, 30);
    assert!(cfg.profiles.is_empty());
}

#[test]
fn save_auth_token_creates_and_preserves_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, CONFIG);

    save_auth_token(
        &path,
        "garage",
        "3014F711A000000000000003",
        &SecretString::from("new-token".to_owned()),
    )
    .unwrap();

    let cfg = load_config_from(&path).unwrap();
    assert_eq!(cfg.profiles.len(), 3);
    let (_, garage) = cfg.profile(Some("garage")).unwrap();
    assert_eq!(garage.auth_token.as_deref(), Some("new-token"));
    assert_eq!(garage.access_point, "3014F711A000000000000003");

    let (_, home) = cfg.profile(Some("home")).unwrap();
    assert_eq!(home.auth_token.as_deref(), Some("tok"));
    assert_eq!(cfg.defaults.timeout, 12);
}

#[test]
fn save_auth_token_writes_fresh_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    save_auth_token(
        &path,
        "default",
        "3014F711A000000000000001",
        &SecretString::from("t".to_owned()),
    )
    .unwrap();

    let cfg = load_config_from(&path).unwrap();
    let (name, profile) = cfg.profile(None).unwrap();
    assert_eq!(name, "default");
    assert_eq!(profile.auth_token.as_deref(), Some("t"));
}
