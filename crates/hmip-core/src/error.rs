// ── Core error types ──
//
// Errors surfaced by the synchronizer. Transport-layer failures from
// `hmip-api` are translated into domain-appropriate variants so consumers
// can branch without matching on reqwest details.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach access point service: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Access point lookup failed (HTTP {status}): {body}")]
    LookupFailed { status: u16, body: String },

    #[error("Not ready: {required} missing")]
    NotReady { required: &'static str },

    #[error("Request dropped by rate limiter (priority {priority})")]
    Throttled { priority: u8 },

    #[error("Connector shut down")]
    Shutdown,

    // ── State errors ─────────────────────────────────────────────────
    #[error("Access point rejected {path} (HTTP {status}): {body}")]
    RequestFailed {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Full state is incomplete: missing {missing}")]
    IncompleteState { missing: &'static str },

    #[error("Not bootstrapped -- run bootstrap() first")]
    NotBootstrapped,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Wrapped API errors ───────────────────────────────────────────
    #[error("API error: {0}")]
    Api(hmip_api::Error),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hmip_api::Error> for CoreError {
    fn from(err: hmip_api::Error) -> Self {
        use hmip_api::{DispatchError, Error};

        match err {
            Error::LookupFailed { status, body } => Self::LookupFailed { status, body },
            Error::NotReady { required } => Self::NotReady { required },
            Error::EndpointsUnknown => Self::NotReady {
                required: "endpoints",
            },
            Error::Dispatch(DispatchError::Dropped { priority }) => Self::Throttled { priority },
            Error::Dispatch(DispatchError::Shutdown) => Self::Shutdown,
            Error::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                Self::ConnectionFailed {
                    reason: e.to_string(),
                }
            }
            Error::Tls(reason) | Error::WebSocketConnect(reason) => {
                Self::ConnectionFailed { reason }
            }
            Error::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            other => Self::Api(other),
        }
    }
}

impl CoreError {
    /// Worth retrying later without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Throttled { .. }
        )
    }
}
