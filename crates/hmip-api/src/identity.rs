// Access point identity, credentials and resolved endpoints.
//
// The identity is fixed for the lifetime of a client. Credentials change
// only through pairing or external configuration. Endpoints are handed out
// by the lookup service and cached until the process exits.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use url::Url;

/// Value of the `VERSION` header sent with every request.
pub const PROTOCOL_VERSION: &str = "12";

/// Salt appended to the access point serial before hashing it into the
/// `CLIENTAUTH` header value.
const CLIENT_AUTH_SALT: &str = "jiLpVitHvWnIGD1yo7MA";

/// Caller-identity descriptor sent to the lookup service and with
/// full-state fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCharacteristics {
    pub api_version: String,
    pub application_identifier: String,
    pub application_version: String,
    pub device_manufacturer: String,
    pub device_type: String,
    pub language: String,
    pub os_type: String,
    pub os_version: String,
}

impl Default for ClientCharacteristics {
    fn default() -> Self {
        Self {
            api_version: "10".into(),
            application_identifier: "hmip-bridge".into(),
            application_version: env!("CARGO_PKG_VERSION").into(),
            device_manufacturer: "none".into(),
            device_type: "Computer".into(),
            language: "en_US".into(),
            os_type: std::env::consts::OS.into(),
            os_version: std::env::consts::ARCH.into(),
        }
    }
}

/// Who we are talking to, and how we present ourselves.
///
/// The serial is normalized to uppercase hex digits, so `3014-F711-A000`
/// and `3014f711a000` name the same access point.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessPointIdentity {
    serial: String,
    client_auth: String,
    client: ClientCharacteristics,
}

impl AccessPointIdentity {
    pub fn new(access_point: &str, client: ClientCharacteristics) -> Self {
        let serial = normalize_serial(access_point);
        let client_auth = derive_client_auth(&serial);
        Self {
            serial,
            client_auth,
            client,
        }
    }

    /// Normalized access point serial (SGTIN).
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Value of the `CLIENTAUTH` header.
    pub fn client_auth(&self) -> &str {
        &self.client_auth
    }

    pub fn characteristics(&self) -> &ClientCharacteristics {
        &self.client
    }

    /// `false` when the configured access point id had no hex digits at all.
    pub fn is_present(&self) -> bool {
        !self.serial.is_empty()
    }

    /// Request body for the lookup service.
    pub(crate) fn lookup_body(&self) -> LookupRequest<'_> {
        LookupRequest {
            client_characteristics: &self.client,
            id: &self.serial,
        }
    }
}

impl fmt::Debug for AccessPointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPointIdentity")
            .field("serial", &self.serial)
            .field("client", &self.client.application_identifier)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LookupRequest<'a> {
    client_characteristics: &'a ClientCharacteristics,
    id: &'a str,
}

/// Keep only hex digits, uppercased.
pub fn normalize_serial(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn derive_client_auth(serial: &str) -> String {
    let digest = Sha512::digest(format!("{serial}{CLIENT_AUTH_SALT}").as_bytes());
    hex::encode_upper(digest)
}

/// Long-lived credentials for an access point.
///
/// The auth token stays empty until pairing completes. The PIN, when set,
/// authorizes security-sensitive commands.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub auth_token: Option<SecretString>,
    pub pin: Option<SecretString>,
}

impl Credentials {
    pub fn new(auth_token: Option<SecretString>, pin: Option<SecretString>) -> Self {
        Self { auth_token, pin }
    }

    pub fn has_auth_token(&self) -> bool {
        use secrecy::ExposeSecret;
        self.auth_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }
}

/// REST and WebSocket endpoints resolved by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub rest: Url,
    pub websocket: Url,
}

impl Endpoints {
    /// Build `{urlREST}/hmip/{path}`.
    pub fn command_url(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.rest.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/hmip/{path}"))
    }
}
