//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, `PairingError` and `ConfigError` into user-facing
//! errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hmip_api::PairingError;
use hmip_config::ConfigError;
use hmip_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the HomematicIP cloud")]
    #[diagnostic(
        code(hmip::connection_failed),
        help("Check network access to lookup.homematic.com and retry.\nReason: {reason}")
    )]
    ConnectionFailed { reason: String },

    #[error("Access point lookup failed (HTTP {status})")]
    #[diagnostic(
        code(hmip::lookup_failed),
        help(
            "Check the access point id (SGTIN on the device label).\n\
             Response: {body}"
        )
    )]
    LookupFailed { status: u16, body: String },

    #[error("Request dropped by the rate limiter")]
    #[diagnostic(code(hmip::throttled), help("Too many queued requests; retry shortly."))]
    Throttled,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Profile '{profile}' has no auth token")]
    #[diagnostic(
        code(hmip::not_paired),
        help("Pair first with: hmip pair --profile {profile}\nOr set HMIP_AUTH_TOKEN.")
    )]
    NotPaired { profile: String },

    #[error("Access point rejected {path} (HTTP {status})")]
    #[diagnostic(
        code(hmip::rejected),
        help("A 403 usually means the auth token was revoked; pair again.\nResponse: {body}")
    )]
    Rejected {
        path: String,
        status: u16,
        body: String,
    },

    // ── Pairing ──────────────────────────────────────────────────────
    #[error("Pairing failed: {reason}")]
    #[diagnostic(code(hmip::pairing_failed))]
    PairingFailed { reason: String },

    #[error("Access point did not acknowledge after {polls} polls")]
    #[diagnostic(
        code(hmip::pairing_timeout),
        help("Press the blue button on the access point, then run hmip pair again.")
    )]
    PairingTimeout { polls: u32 },

    // ── State ────────────────────────────────────────────────────────
    #[error("Access point state is unusable: {reason}")]
    #[diagnostic(code(hmip::state))]
    State { reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hmip::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hmip pair --access-point <SGTIN> --profile {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hmip::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(hmip::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(hmip::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::LookupFailed { .. } | Self::Throttled => {
                exit_code::CONNECTION
            }
            Self::NotPaired { .. } | Self::Rejected { .. } | Self::PairingFailed { .. } => {
                exit_code::AUTH
            }
            Self::PairingTimeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::LookupFailed { status, body } => Self::LookupFailed { status, body },
            CoreError::NotReady { required } => Self::NotPaired {
                profile: format!("(missing {required})"),
            },
            CoreError::Throttled { .. } => Self::Throttled,
            CoreError::RequestFailed { path, status, body } => {
                Self::Rejected { path, status, body }
            }
            CoreError::IncompleteState { missing } => Self::State {
                reason: format!("full state has no {missing}"),
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other => Self::State {
                reason: other.to_string(),
            },
        }
    }
}

impl From<PairingError> for CliError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::Timeout { polls } => Self::PairingTimeout { polls },
            PairingError::Lookup(e) => CoreError::from(e).into(),
            PairingError::Api(e) => CoreError::from(e).into(),
            other => Self::PairingFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoProfile { profile } => Self::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            other => Self::Config(other),
        }
    }
}
