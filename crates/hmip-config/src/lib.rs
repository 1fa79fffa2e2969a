//! Shared configuration for HomematicIP tools.
//!
//! TOML profiles layered with `HMIP_*` environment variables, credential
//! resolution, and translation to `hmip_core::ConnectorConfig`. This is the
//! only crate that touches the config file; the core never persists
//! anything itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hmip_api::identity::normalize_serial;
use hmip_core::{ConnectorConfig, TlsMode};

/// Hex digits in a normalized access point id (SGTIN).
pub const ACCESS_POINT_DIGITS: usize = 24;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    NoProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named access point profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Resolve the active profile: explicit name, then `default_profile`,
    /// then `"default"`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::NoProfile { profile: name }),
        }
    }
}

/// Values shared by every profile unless the profile overrides them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Re-fetch full state after every event stream reconnect.
    #[serde(default)]
    pub resync_on_reconnect: bool,

    /// Name shown for this client in the HomematicIP app after pairing.
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            resync_on_reconnect: false,
            device_name: default_device_name(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_device_name() -> String {
    "hmip-bridge".into()
}

/// One access point.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Access point id (SGTIN), dashes allowed.
    pub access_point: String,

    /// Token from `hmip pair` (plaintext; prefer `auth_token_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Environment variable holding the auth token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,

    /// PIN for locks and alarm commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,

    /// Override for the lookup service URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_url: Option<String>,

    /// Extra CA certificate (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync_on_reconnect: Option<bool>,

    /// Give up pairing after this many acknowledgement polls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pairing_polls: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

/// Dispatcher overrides. Unset fields keep the tuned defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RateLimit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_spacing_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservoir: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water: Option<usize>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "hmip", "hmip").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hmip");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing file is fine) layered with `HMIP_*` variables.
///
/// Nested keys use a double underscore:
/// `HMIP_PROFILES__HOME__AUTH_TOKEN=...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HMIP_").split("__"))
        .extract()?;
    Ok(config)
}

/// Only what is on disk, without environment layering. Used for
/// read-modify-write so env values never get persisted.
fn read_file(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e.into()),
    }
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Persist a pairing result into `profile`, creating it if needed.
///
/// Other profiles and settings in the file are left as they are.
pub fn save_auth_token(
    path: &Path,
    profile_name: &str,
    access_point: &str,
    token: &SecretString,
) -> Result<(), ConfigError> {
    use secrecy::ExposeSecret;

    let mut cfg = read_file(path)?;
    let profile = cfg.profiles.entry(profile_name.to_owned()).or_default();
    profile.access_point = access_point.to_owned();
    profile.auth_token = Some(token.expose_secret().to_owned());
    save_config_to(&cfg, path)
}

// ── Translation ─────────────────────────────────────────────────────

/// Access point id normalized to its hex digits, or a validation error.
pub fn validate_access_point(raw: &str) -> Result<String, ConfigError> {
    let serial = normalize_serial(raw);
    if serial.len() == ACCESS_POINT_DIGITS {
        Ok(serial)
    } else {
        Err(ConfigError::Validation {
            field: "access_point".into(),
            reason: format!(
                "expected {ACCESS_POINT_DIGITS} hex digits, found {} in '{raw}'",
                serial.len()
            ),
        })
    }
}

/// Auth token from the chain: `auth_token_env` variable, then plaintext.
///
/// `None` means "not paired yet", which is valid for `hmip pair`.
pub fn resolve_auth_token(profile: &Profile) -> Option<SecretString> {
    profile
        .auth_token_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| profile.auth_token.clone())
        .filter(|token| !token.is_empty())
        .map(SecretString::from)
}

/// Build a `ConnectorConfig` from a profile plus global defaults.
pub fn profile_to_connector_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ConnectorConfig, ConfigError> {
    let access_point = validate_access_point(&profile.access_point)?;

    let lookup_url = profile
        .lookup_url
        .as_deref()
        .map(|raw| {
            raw.parse::<url::Url>().map_err(|e| ConfigError::Validation {
                field: "lookup_url".into(),
                reason: format!("{e}: {raw}"),
            })
        })
        .transpose()?;

    let mut config = ConnectorConfig::new(access_point);
    config.auth_token = resolve_auth_token(profile);
    config.pin = profile.pin.clone().map(SecretString::from);
    config.lookup_url = lookup_url;
    config.tls = profile
        .ca_cert
        .clone()
        .map_or(TlsMode::System, TlsMode::CustomCa);
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.resync_on_reconnect = profile
        .resync_on_reconnect
        .unwrap_or(defaults.resync_on_reconnect);
    config.pairing.device_name.clone_from(&defaults.device_name);
    config.pairing.max_polls = profile.max_pairing_polls;

    if let Some(rate) = &profile.rate_limit {
        let dispatcher = &mut config.dispatcher;
        if let Some(ms) = rate.min_spacing_ms {
            dispatcher.min_spacing = Duration::from_millis(ms);
        }
        if let Some(reservoir) = rate.reservoir {
            dispatcher.reservoir = reservoir;
            dispatcher.reservoir_max = reservoir;
        }
        if let Some(ms) = rate.refill_interval_ms {
            dispatcher.refill_interval = Duration::from_millis(ms);
        }
        if let Some(high_water) = rate.high_water {
            dispatcher.high_water = high_water;
        }
        dispatcher.validate().map_err(|e| ConfigError::Validation {
            field: format!("rate_limit.{}", e.field),
            reason: e.reason.into(),
        })?;
    }

    Ok(config)
}
