// Access point pairing
//
// One-time registration handshake that trades a button press on the
// access point for a long-lived auth token:
//
//   lookup -> auth/connectionRequest -> poll auth/isRequestAcknowledged
//          -> auth/requestAuthToken -> auth/confirmAuthToken
//
// The flow surfaces the token; persisting it is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{AccessPointClient, CallOptions, CallResponse};
use crate::dispatcher::PRIORITY_CRITICAL;
use crate::error::Error;

const STEP_CONNECTION_REQUEST: &str = "auth/connectionRequest";
const STEP_ACKNOWLEDGE: &str = "auth/isRequestAcknowledged";
const STEP_REQUEST_TOKEN: &str = "auth/requestAuthToken";
const STEP_CONFIRM_TOKEN: &str = "auth/confirmAuthToken";

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PairingState {
    Init,
    LookupDone,
    ConnectionRequested,
    WaitingForAck,
    TokenRequested,
    TokenConfirmed,
    Failed,
}

impl PairingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TokenConfirmed | Self::Failed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("access point id missing or invalid")]
    NotReady,

    #[error("lookup failed: {0}")]
    Lookup(#[source] Error),

    #[error("{step} rejected by access point (HTTP {status})")]
    Rejected { step: &'static str, status: u16 },

    #[error("{step} response has no {field}")]
    MissingField {
        step: &'static str,
        field: &'static str,
    },

    #[error("access point not acknowledged after {polls} polls")]
    Timeout { polls: u32 },

    #[error(transparent)]
    Api(#[from] Error),
}

/// Pairing behaviour knobs.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// Delay before each acknowledgement poll. Default: 5 s.
    pub poll_interval: Duration,
    /// Give up after this many polls. `None` polls until acknowledged.
    pub max_polls: Option<u32>,
    /// Name shown for this client in the HomematicIP app.
    pub device_name: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_polls: None,
            device_name: "hmip-bridge".into(),
        }
    }
}

/// Result of a completed handshake, for the operator to persist.
#[derive(Debug, Clone)]
pub struct PairingOutcome {
    pub access_point: String,
    pub auth_token: SecretString,
    pub client_id: String,
    pub device_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRequest<'a> {
    device_id: &'a str,
    device_name: &'a str,
    sgtin: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRef<'a> {
    device_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest<'a> {
    device_id: &'a str,
    auth_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthTokenReply {
    auth_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmReply {
    client_id: Option<String>,
}

/// Drives the pairing handshake against one access point.
pub struct PairingFlow {
    client: Arc<AccessPointClient>,
    config: PairingConfig,
    device_id: String,
    state: watch::Sender<PairingState>,
}

impl PairingFlow {
    pub fn new(client: Arc<AccessPointClient>, config: PairingConfig) -> Self {
        let device_id = pairing_device_id(&client.identity().characteristics().application_identifier);
        let (state, _) = watch::channel(PairingState::Init);
        Self {
            client,
            config,
            device_id,
            state,
        }
    }

    /// Use an explicit pairing device id instead of the derived one.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> PairingState {
        *self.state.borrow()
    }

    /// Observe state transitions (e.g. to prompt for the button press).
    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state.subscribe()
    }

    /// Run the handshake to completion.
    ///
    /// Any failure moves the flow to [`PairingState::Failed`]; no partial
    /// credential is applied to the client.
    pub async fn run(&self) -> Result<PairingOutcome, PairingError> {
        match self.drive().await {
            Ok(outcome) => {
                self.transition(PairingState::TokenConfirmed);
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, state = %self.state(), "pairing failed");
                self.transition(PairingState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&self) -> Result<PairingOutcome, PairingError> {
        if !self.client.ready_for_pairing() {
            return Err(PairingError::NotReady);
        }

        self.client.lookup().await.map_err(PairingError::Lookup)?;
        self.transition(PairingState::LookupDone);

        let sgtin = self.client.identity().serial();
        let request = ConnectionRequest {
            device_id: &self.device_id,
            device_name: &self.config.device_name,
            sgtin,
        };
        self.step::<serde_json::Value>(STEP_CONNECTION_REQUEST, &request, handshake())
            .await?;
        self.transition(PairingState::ConnectionRequested);

        info!(access_point = sgtin, "press the blue button on the access point");
        self.transition(PairingState::WaitingForAck);
        self.await_acknowledgement().await?;

        self.transition(PairingState::TokenRequested);
        let reply: Option<AuthTokenReply> = self
            .step(
                STEP_REQUEST_TOKEN,
                &DeviceRef {
                    device_id: &self.device_id,
                },
                handshake(),
            )
            .await?;
        let auth_token = reply
            .and_then(|r| r.auth_token)
            .filter(|t| !t.is_empty())
            .ok_or(PairingError::MissingField {
                step: STEP_REQUEST_TOKEN,
                field: "authToken",
            })?;

        let confirm = ConfirmRequest {
            device_id: &self.device_id,
            auth_token: &auth_token,
        };
        let reply: Option<ConfirmReply> = self
            .step(STEP_CONFIRM_TOKEN, &confirm, handshake())
            .await?;
        let client_id = reply
            .and_then(|r| r.client_id)
            .filter(|id| !id.is_empty())
            .ok_or(PairingError::MissingField {
                step: STEP_CONFIRM_TOKEN,
                field: "clientId",
            })?;

        info!(access_point = sgtin, client_id = %client_id, "pairing complete");
        Ok(PairingOutcome {
            access_point: sgtin.to_owned(),
            auth_token: SecretString::from(auth_token),
            client_id,
            device_id: self.device_id.clone(),
        })
    }

    /// Poll until the button press is acknowledged. A rejected poll is the
    /// normal "not yet" answer.
    async fn await_acknowledgement(&self) -> Result<(), PairingError> {
        let body = DeviceRef {
            device_id: &self.device_id,
        };
        let mut polls = 0u32;
        loop {
            if self.config.max_polls.is_some_and(|max| polls >= max) {
                return Err(PairingError::Timeout { polls });
            }
            tokio::time::sleep(self.config.poll_interval).await;
            polls += 1;

            match self
                .client
                .call::<serde_json::Value>(STEP_ACKNOWLEDGE, &body, handshake().quiet())
                .await
            {
                Ok(response) if response.is_success() => {
                    debug!(polls, "pairing request acknowledged");
                    return Ok(());
                }
                Ok(_) => debug!(polls, "pairing request not yet acknowledged"),
                Err(e) if e.is_transient() => {
                    warn!(polls, error = %e, "acknowledgement poll failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One handshake call; HTTP failures abort the flow.
    async fn step<T: serde::de::DeserializeOwned>(
        &self,
        step: &'static str,
        body: &(impl Serialize + Sync),
        options: CallOptions,
    ) -> Result<Option<T>, PairingError> {
        match self.client.call::<T>(step, body, options).await? {
            CallResponse::Data(data) => Ok(Some(data)),
            CallResponse::Accepted => Ok(None),
            CallResponse::Failed { status, .. } => Err(PairingError::Rejected { step, status }),
        }
    }

    fn transition(&self, next: PairingState) {
        debug!(state = %next, "pairing state");
        self.state.send_replace(next);
    }
}

fn handshake() -> CallOptions {
    CallOptions::default()
        .unauthenticated()
        .with_priority(PRIORITY_CRITICAL)
}

/// Stable pairing id for this host: a UUID built from
/// `SHA-256("{app}-{hostname}-pairing")`.
pub fn pairing_device_id(app: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".into());
    device_id_for(app, &host)
}

fn device_id_for(app: &str, host: &str) -> String {
    let digest = Sha256::digest(format!("{app}-{host}-pairing").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}
