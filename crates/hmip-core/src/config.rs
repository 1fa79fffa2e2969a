// ── Runtime connection configuration ──
//
// These types describe *how* to connect to an access point. They carry
// credential data and timing knobs, but never touch disk. The binary
// (or any embedding application) builds a `ConnectorConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use hmip_api::{
    AccessPointClient, AccessPointIdentity, ClientCharacteristics, Credentials, DispatcherConfig,
    PairingConfig, StreamConfig, TlsMode, TransportConfig,
};

use crate::error::CoreError;

/// Configuration for one access point connection.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Access point id (SGTIN), any formatting; normalized on use.
    pub access_point: String,
    /// Long-lived token from pairing. `None` until paired.
    pub auth_token: Option<SecretString>,
    /// PIN for security-sensitive commands.
    pub pin: Option<SecretString>,
    /// How this client presents itself to the cloud.
    pub client: ClientCharacteristics,
    /// Override for the discovery host.
    pub lookup_url: Option<Url>,
    pub tls: TlsMode,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub dispatcher: DispatcherConfig,
    pub stream: StreamConfig,
    pub pairing: PairingConfig,
    /// Re-fetch full state after every event stream reconnect.
    pub resync_on_reconnect: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            access_point: String::new(),
            auth_token: None,
            pin: None,
            client: ClientCharacteristics::default(),
            lookup_url: None,
            tls: TlsMode::default(),
            timeout: Duration::from_secs(30),
            dispatcher: DispatcherConfig::default(),
            stream: StreamConfig::default(),
            pairing: PairingConfig::default(),
            resync_on_reconnect: false,
        }
    }
}

impl ConnectorConfig {
    pub fn new(access_point: impl Into<String>) -> Self {
        Self {
            access_point: access_point.into(),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> AccessPointIdentity {
        AccessPointIdentity::new(&self.access_point, self.client.clone())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.auth_token.clone(), self.pin.clone())
    }

    /// Build the access point client (and its dispatcher).
    ///
    /// Must be called inside a tokio runtime.
    pub fn build_client(&self) -> Result<AccessPointClient, CoreError> {
        let identity = self.identity();
        if !identity.is_present() {
            return Err(CoreError::Config {
                message: format!("access point id {:?} contains no hex digits", self.access_point),
            });
        }

        self.dispatcher.validate().map_err(|e| CoreError::Config {
            message: format!("rate limit: {e}"),
        })?;

        let transport = TransportConfig {
            tls: self.tls.clone(),
            ..TransportConfig::default()
        }
        .with_timeout(self.timeout);

        let client = AccessPointClient::new(
            identity,
            self.credentials(),
            &transport,
            self.dispatcher.clone(),
        )?;
        Ok(match &self.lookup_url {
            Some(url) => client.with_lookup_url(url.clone()),
            None => client,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_client_rejects_empty_access_point() {
        let err = ConnectorConfig::new("---").build_client().err().unwrap();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[tokio::test]
    async fn build_client_rejects_empty_reservoir() {
        let mut config = ConnectorConfig::new("3014F711A000000000000001");
        config.dispatcher.reservoir = 0;
        config.dispatcher.reservoir_max = 0;
        let err = config.build_client().err().unwrap();
        assert!(matches!(err, CoreError::Config { ref message } if message.contains("reservoir_max")));
    }

    #[tokio::test]
    async fn build_client_carries_credentials() {
        let mut config = ConnectorConfig::new("3014-F711-A000-0000-0000-0001");
        config.auth_token = Some(SecretString::from("tok".to_owned()));
        let client = config.build_client().unwrap();
        assert_eq!(client.identity().serial(), "3014F711A000000000000001");
        assert!(client.ready_for_use());
    }

    #[test]
    fn defaults_keep_tuned_rate_limits() {
        let config = ConnectorConfig::default();
        assert_eq!(config.dispatcher.min_spacing, Duration::from_millis(100));
        assert_eq!(config.dispatcher.reservoir, 10);
        assert_eq!(config.dispatcher.high_water, 120);
        assert_eq!(config.stream.reconnect_interval, Duration::from_secs(10));
        assert!(!config.resync_on_reconnect);
    }
}
