// Access point HTTP client
//
// Wraps `reqwest::Client` with HomematicIP header construction, endpoint
// discovery, and response interpretation. Every request, including the
// lookup call, is submitted through the shared `Dispatcher` so the
// access point never sees more than the configured request rate.

use std::sync::{Arc, PoisonError, RwLock};

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::dispatcher::{Dispatcher, DispatcherConfig, PRIORITY_CRITICAL, PRIORITY_DEFAULT};
use crate::error::Error;
use crate::identity::{AccessPointIdentity, Credentials, Endpoints, PROTOCOL_VERSION};
use crate::transport::TransportConfig;
use crate::websocket::TungsteniteDialer;

/// Well-known discovery host handing out per-account endpoints.
pub const DEFAULT_LOOKUP_URL: &str = "https://lookup.homematic.com:48335/getHost";

// Header names are case-insensitive; `http` requires them lowercase.
const HEADER_VERSION: &str = "version";
const HEADER_CLIENT_AUTH: &str = "clientauth";
const HEADER_AUTH_TOKEN: &str = "authtoken";
const HEADER_PIN: &str = "pin";

/// Per-call knobs for [`AccessPointClient::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Dispatcher priority; lower runs sooner.
    pub priority: u8,
    /// Fail with [`Error::NotReady`] when no auth token is configured.
    pub require_auth: bool,
    /// Log soft failures at `warn` instead of `debug`.
    pub log_errors: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            priority: PRIORITY_DEFAULT,
            require_auth: true,
            log_errors: true,
        }
    }
}

impl CallOptions {
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Skip the auth token precondition (pairing handshake calls).
    pub fn unauthenticated(mut self) -> Self {
        self.require_auth = false;
        self
    }

    /// Demote soft failures to `debug` (observer-style polling).
    pub fn quiet(mut self) -> Self {
        self.log_errors = false;
        self
    }
}

/// Outcome of a command call that reached the access point.
///
/// HTTP >= 400 is a soft failure reported as [`CallResponse::Failed`];
/// callers must check it rather than assume success.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResponse<T> {
    /// JSON body parsed into `T`.
    Data(T),
    /// Success without a JSON body.
    Accepted,
    /// The access point rejected the call, or answered with unusable JSON.
    Failed { status: u16, body: String },
}

impl<T> CallResponse<T> {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct LookupResponse {
    #[serde(rename = "urlREST")]
    url_rest: Option<String>,
    #[serde(rename = "urlWebSocket")]
    url_websocket: Option<String>,
}

/// What came back over the wire, before interpretation.
struct RawReply {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl RawReply {
    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json"))
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Client for one HomematicIP access point.
///
/// Holds the immutable identity, the mutable credentials, and the endpoints
/// cached by [`lookup`](Self::lookup). Cheap to share behind an `Arc`.
pub struct AccessPointClient {
    http: reqwest::Client,
    identity: AccessPointIdentity,
    credentials: RwLock<Credentials>,
    endpoints: RwLock<Option<Endpoints>>,
    lookup_url: String,
    dispatcher: Arc<Dispatcher>,
}

impl AccessPointClient {
    /// Build a client with its own HTTP client and dispatcher.
    ///
    /// Must be called inside a tokio runtime (the dispatcher spawns its
    /// worker immediately).
    pub fn new(
        identity: AccessPointIdentity,
        credentials: Credentials,
        transport: &TransportConfig,
        dispatcher: DispatcherConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let dispatcher = Arc::new(Dispatcher::new(dispatcher));
        Ok(Self::with_client(http, identity, credentials, dispatcher))
    }

    /// Build a client around a pre-built HTTP client and shared dispatcher.
    pub fn with_client(
        http: reqwest::Client,
        identity: AccessPointIdentity,
        credentials: Credentials,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            http,
            identity,
            credentials: RwLock::new(credentials),
            endpoints: RwLock::new(None),
            lookup_url: DEFAULT_LOOKUP_URL.to_owned(),
            dispatcher,
        }
    }

    /// Point discovery at a different host.
    pub fn with_lookup_url(mut self, url: Url) -> Self {
        self.lookup_url = url.into();
        self
    }

    pub fn identity(&self) -> &AccessPointIdentity {
        &self.identity
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Endpoints resolved by the last successful lookup.
    pub fn endpoints(&self) -> Option<Endpoints> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Credentials & readiness ──────────────────────────────────────

    /// Install the auth token obtained from pairing or configuration.
    pub fn set_auth_token(&self, token: SecretString) {
        debug!("auth token updated");
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .auth_token = Some(token);
    }

    pub fn set_pin(&self, pin: Option<SecretString>) {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pin = pin;
    }

    /// Identity and auth token both present.
    pub fn ready_for_use(&self) -> bool {
        self.identity.is_present() && self.credentials().has_auth_token()
    }

    /// Identity present; pairing does not need a token.
    pub fn ready_for_pairing(&self) -> bool {
        self.identity.is_present()
    }

    fn credentials(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Resolve the REST and WebSocket endpoints for this access point.
    ///
    /// Succeeds only on HTTP 200 with both URLs present and non-empty; the
    /// result is cached for the lifetime of the client.
    pub async fn lookup(&self) -> Result<Endpoints, Error> {
        if !self.ready_for_pairing() {
            return Err(Error::NotReady {
                required: "access point id",
            });
        }

        debug!(url = %self.lookup_url, serial = self.identity.serial(), "looking up access point");
        let request = self
            .http
            .post(self.lookup_url.as_str())
            .header(HEADER_VERSION, PROTOCOL_VERSION)
            .json(&self.identity.lookup_body())
            .build()?;
        let reply = self.exchange(request, PRIORITY_CRITICAL).await?;

        let body = reply.text();
        if reply.status != 200 {
            return Err(Error::LookupFailed {
                status: reply.status,
                body,
            });
        }

        let parsed: LookupResponse =
            serde_json::from_slice(&reply.body).map_err(|_| Error::LookupFailed {
                status: reply.status,
                body: body.clone(),
            })?;

        let (Some(rest), Some(websocket)) = (
            parsed.url_rest.filter(|u| !u.is_empty()),
            parsed.url_websocket.filter(|u| !u.is_empty()),
        ) else {
            return Err(Error::LookupFailed {
                status: reply.status,
                body,
            });
        };

        let endpoints = Endpoints {
            rest: Url::parse(&rest)?,
            websocket: Url::parse(&websocket)?,
        };
        info!(rest = %endpoints.rest, websocket = %endpoints.websocket, "access point endpoints resolved");

        *self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoints.clone());
        Ok(endpoints)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// POST `body` to `{urlREST}/hmip/{path}`.
    ///
    /// Transport and precondition failures are `Err`. Anything the access
    /// point answered, including HTTP >= 400, is a [`CallResponse`].
    pub async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
        options: CallOptions,
    ) -> Result<CallResponse<T>, Error> {
        let endpoints = self.endpoints().ok_or(Error::EndpointsUnknown)?;
        let credentials = self.credentials();
        if options.require_auth && !credentials.has_auth_token() {
            return Err(Error::NotReady {
                required: "auth token",
            });
        }

        let url = endpoints.command_url(path)?;
        let headers = self.command_headers(&credentials)?;
        debug!(path, priority = options.priority, "POST {}", url);

        let request = self.http.post(url).headers(headers).json(body).build()?;
        let reply = self.exchange(request, options.priority).await?;

        Ok(interpret(path, &reply, options.log_errors))
    }

    fn command_headers(&self, credentials: &Credentials) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_VERSION, HeaderValue::from_static(PROTOCOL_VERSION));
        headers.insert(
            HEADER_CLIENT_AUTH,
            header_value(HEADER_CLIENT_AUTH, self.identity.client_auth())?,
        );
        if let Some(token) = credentials
            .auth_token
            .as_ref()
            .filter(|t| !t.expose_secret().is_empty())
        {
            let mut value = header_value(HEADER_AUTH_TOKEN, token.expose_secret())?;
            value.set_sensitive(true);
            headers.insert(HEADER_AUTH_TOKEN, value);
        }
        if let Some(pin) = credentials.pin.as_ref() {
            let mut value = header_value(HEADER_PIN, pin.expose_secret())?;
            value.set_sensitive(true);
            headers.insert(HEADER_PIN, value);
        }
        Ok(headers)
    }

    /// Run one request through the dispatcher and collect the reply.
    async fn exchange(&self, request: reqwest::Request, priority: u8) -> Result<RawReply, Error> {
        let http = self.http.clone();
        let job = async move {
            let resp = http.execute(request).await?;
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>(RawReply {
                status,
                content_type,
                body,
            })
        };

        let reply = self.dispatcher.submit(priority, job).await??;
        trace!(status = reply.status, bytes = reply.body.len(), "reply received");
        Ok(reply)
    }

    // ── Event stream ─────────────────────────────────────────────────

    /// A dialer for the push channel, carrying the current credentials.
    pub fn stream_dialer(&self) -> Result<TungsteniteDialer, Error> {
        let endpoints = self.endpoints().ok_or(Error::EndpointsUnknown)?;
        let token = self
            .credentials()
            .auth_token
            .filter(|t| !t.expose_secret().is_empty())
            .ok_or(Error::NotReady {
                required: "auth token",
            })?;
        Ok(TungsteniteDialer::new(
            endpoints.websocket,
            token,
            self.identity.client_auth().to_owned(),
        ))
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader { name })
}

fn interpret<T: DeserializeOwned>(path: &str, reply: &RawReply, log_errors: bool) -> CallResponse<T> {
    if reply.status >= 400 {
        let body = reply.text();
        if log_errors {
            warn!(path, status = reply.status, body = %body, "access point rejected call");
        } else {
            debug!(path, status = reply.status, body = %body, "access point rejected call");
        }
        return CallResponse::Failed {
            status: reply.status,
            body,
        };
    }

    if !reply.is_json() || reply.body.iter().all(u8::is_ascii_whitespace) {
        return CallResponse::Accepted;
    }

    match serde_json::from_slice(&reply.body) {
        Ok(data) => CallResponse::Data(data),
        Err(e) => {
            let body = reply.text();
            warn!(path, status = reply.status, error = %e, body = %body, "unparseable JSON reply");
            CallResponse::Failed {
                status: reply.status,
                body,
            }
        }
    }
}
