//! Push event stream with fixed-interval reconnect.
//!
//! Opens the access point's WebSocket with `AUTHTOKEN`/`CLIENTAUTH`
//! headers and forwards every text or binary frame, as a UTF-8 string,
//! through an [`mpsc`] channel in arrival order. While open, a ping is
//! sent every heartbeat interval. Any closure not requested through
//! [`EventStream::disconnect`] schedules a reconnect after a fixed delay.
//!
//! Heartbeat and reconnect timers live in one task, so they never run
//! concurrently for the same stream.
//!
//! # Example
//!
//! ```rust,ignore
//! let dialer = client.stream_dialer()?;
//! let (stream, mut frames) = EventStream::connect(dialer, StreamConfig::default());
//!
//! while let Some(payload) = frames.recv().await {
//!     println!("{payload}");
//! }
//!
//! stream.disconnect();
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ── StreamConfig ─────────────────────────────────────────────────────

/// Timing for the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Ping interval while connected. Default: 5s.
    pub heartbeat_interval: Duration,
    /// Fixed delay before each reconnect attempt. Default: 10s.
    pub reconnect_interval: Duration,
    /// Buffered payloads before the reader applies backpressure. Default: 256.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(10),
            channel_capacity: 256,
        }
    }
}

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to redial after a non-deliberate closure.
    Reconnecting { attempt: u32 },
    Closing,
}

// ── Dialer seam ──────────────────────────────────────────────────────

pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Opens one WebSocket connection. Called again for every reconnect.
pub trait Dial: Send + Sync + 'static {
    fn dial(&self) -> impl Future<Output = Result<(FrameSink, FrameStream), Error>> + Send;
}

/// Production dialer backed by `tokio-tungstenite`.
pub struct TungsteniteDialer {
    url: Url,
    auth_token: SecretString,
    client_auth: String,
}

impl TungsteniteDialer {
    pub fn new(url: Url, auth_token: SecretString, client_auth: String) -> Self {
        Self {
            url,
            auth_token,
            client_auth,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Debug for TungsteniteDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteDialer")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl Dial for TungsteniteDialer {
    async fn dial(&self) -> Result<(FrameSink, FrameStream), Error> {
        tracing::info!(url = %self.url, "connecting event stream");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri)
            .with_header("AUTHTOKEN", self.auth_token.expose_secret())
            .with_header("CLIENTAUTH", self.client_auth.as_str());

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (sink, stream) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// ── EventStream ──────────────────────────────────────────────────────

/// Handle to a running push connection.
///
/// Dropping the handle disconnects.
pub struct EventStream {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Spawn the connection task and return the payload receiver.
    ///
    /// Returns immediately; the first dial happens in the background.
    pub fn connect<D: Dial>(dialer: D, config: StreamConfig) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);
        let closing = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = StreamTask {
            config,
            tx,
            state: Arc::clone(&state_tx),
            closing: Arc::clone(&closing),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run(dialer));

        (
            Self {
                state_tx,
                closing,
                cancel,
            },
            rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Deliberately close the stream. Idempotent.
    ///
    /// No dial, heartbeat or reconnect happens after this returns.
    pub fn disconnect(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("event stream disconnect requested");
        self.state_tx.send_replace(ConnectionState::Closing);
        self.cancel.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Background connection task ───────────────────────────────────────

enum PumpExit {
    Cancelled,
    ConsumerGone,
    Closed(String),
}

struct StreamTask {
    config: StreamConfig,
    tx: mpsc::Sender<String>,
    state: Arc<watch::Sender<ConnectionState>>,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamTask {
    /// dial → pump → on closure, wait the fixed interval → dial again.
    async fn run<D: Dial>(self, dialer: D) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            let dialed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                dialed = dialer.dial() => dialed,
            };

            match dialed {
                Ok((sink, stream)) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("event stream connected");

                    match self.pump(sink, stream).await {
                        PumpExit::Cancelled => break,
                        PumpExit::ConsumerGone => {
                            tracing::debug!("event stream consumer dropped");
                            break;
                        }
                        PumpExit::Closed(reason) => {
                            tracing::warn!(reason = %reason, "event stream closed unexpectedly");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, attempt, "event stream connect failed"),
            }

            attempt = attempt.saturating_add(1);
            self.set_state(ConnectionState::Reconnecting { attempt });
            tracing::info!(
                delay_ms = u64::try_from(self.config.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!("event stream task exiting");
    }

    /// Forward frames and send heartbeats until the connection ends.
    async fn pump(&self, mut sink: FrameSink, mut stream: FrameStream) -> PumpExit {
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
                    return PumpExit::Cancelled;
                }
                _ = heartbeat.tick() => {
                    tracing::trace!("event stream heartbeat");
                    if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                        return PumpExit::Closed(format!("heartbeat failed: {e}"));
                    }
                }
                frame = stream.next() => {
                    let payload = match frame {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                tracing::debug!(len = bytes.len(), "dropping non-UTF-8 frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(
                                || "close frame".to_owned(),
                                |cf| format!("close frame {}: {}", cf.code, cf.reason.as_str()),
                            );
                            return PumpExit::Closed(reason);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return PumpExit::Closed(e.to_string()),
                        None => return PumpExit::Closed("stream ended".to_owned()),
                    };

                    tracing::trace!(len = payload.len(), "event frame");
                    // A stalled consumer must not hold off a disconnect.
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
                            return PumpExit::Cancelled;
                        }
                        sent = self.tx.send(payload) => {
                            if sent.is_err() {
                                return PumpExit::ConsumerGone;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Publish a state unless a deliberate shutdown already began.
    fn set_state(&self, next: ConnectionState) {
        if !self.closing.load(Ordering::SeqCst) {
            self.state.send_replace(next);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
