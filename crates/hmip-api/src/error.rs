use thiserror::Error;

use crate::dispatcher::DispatchError;

/// Top-level error type for the `hmip-api` crate.
///
/// Only hard failures live here: transport breakage, missing preconditions,
/// and structurally unusable responses. A hub answering with HTTP >= 400 is
/// not an error -- see [`CallResponse`](crate::CallResponse).
#[derive(Debug, Error)]
pub enum Error {
    // ── Discovery ───────────────────────────────────────────────────
    /// The lookup service did not hand out usable endpoints.
    #[error("Access point lookup failed (HTTP {status}): {body}")]
    LookupFailed { status: u16, body: String },

    /// A command was issued before `lookup()` resolved the endpoints.
    #[error("Access point endpoints unknown -- run lookup first")]
    EndpointsUnknown,

    /// A readiness precondition is not met (identity or auth token).
    #[error("Client not ready: {required} missing")]
    NotReady { required: &'static str },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, TLS, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A header value (auth token, PIN) contains bytes HTTP cannot carry.
    #[error("Invalid value for header {name}")]
    InvalidHeader { name: &'static str },

    // ── Dispatcher ──────────────────────────────────────────────────
    /// The dispatcher refused or dropped the job.
    #[error("Dispatcher: {0}")]
    Dispatch(#[from] DispatchError),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => true,
            Self::Dispatch(DispatchError::Dropped { .. }) => true,
            _ => false,
        }
    }

    /// Returns `true` if the failure came from the lookup service.
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::LookupFailed { .. } | Self::EndpointsUnknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_failure_display_carries_status_and_body() {
        let err = Error::LookupFailed {
            status: 403,
            body: "{\"errorCode\":\"INVALID_ID\"}".into(),
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("INVALID_ID"));
        assert!(err.is_lookup());
    }

    #[test]
    fn dropped_jobs_are_transient() {
        let err = Error::from(DispatchError::Dropped { priority: 9 });
        assert!(err.is_transient());
        assert!(!Error::NotReady { required: "auth token" }.is_transient());
    }
}
