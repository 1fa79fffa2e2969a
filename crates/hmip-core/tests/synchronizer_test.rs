// End-to-end synchronizer tests: wiremock stands in for the cloud REST
// endpoints, a scripted dialer for the push channel.
#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt, sink, stream};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tokio_tungstenite::tungstenite::{self, Message};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hmip_api::websocket::{FrameSink, FrameStream};
use hmip_api::{Dial, DispatcherConfig};
use hmip_core::{
    ConnectionState, ConnectorConfig, CoreError, Device, DeviceContext, DeviceHandler, GroupMap,
    HandlerRegistry, Home, RegistryChange, StateSynchronizer, StreamConfig,
};

const SERIAL: &str = "3014F711A000000000000001";

// ── Helpers ─────────────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<String>>>;

struct Recorder {
    id: String,
    log: Log,
}

impl DeviceHandler for Recorder {
    fn register(&self) {
        self.log.lock().unwrap().push(format!("register {}", self.id));
    }

    fn update_device(&self, _home: &Home, device: Option<&Device>, _groups: &GroupMap) {
        let label = device.and_then(|d| d.label.clone()).unwrap_or_default();
        self.log.lock().unwrap().push(format!("update {} {label}", self.id));
    }

    fn unregister(&self) {
        self.log.lock().unwrap().push(format!("unregister {}", self.id));
    }
}

fn handlers(log: &Log) -> HandlerRegistry {
    let log = Arc::clone(log);
    HandlerRegistry::new().with("PLUGABLE_SWITCH", move |ctx: &DeviceContext, _: &Device| {
        Arc::new(Recorder {
            id: ctx.device_id.clone(),
            log: Arc::clone(&log),
        }) as Arc<dyn DeviceHandler>
    })
}

fn config(server: &MockServer, token: Option<&str>) -> ConnectorConfig {
    let mut config = ConnectorConfig::new(SERIAL);
    config.auth_token = token.map(|t| SecretString::from(t.to_owned()));
    config.lookup_url = Some(format!("{}/getHost", server.uri()).parse().unwrap());
    config.dispatcher = DispatcherConfig {
        min_spacing: Duration::ZERO,
        reservoir: 1000,
        reservoir_max: 1000,
        ..DispatcherConfig::default()
    };
    config.stream = StreamConfig {
        reconnect_interval: Duration::from_millis(50),
        ..StreamConfig::default()
    };
    config
}

async fn mount_lookup(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/getHost"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "urlREST": server.uri(),
            "urlWebSocket": "wss://ws.example.invalid:8888",
        })))
        .mount(server)
        .await;
}

fn current_state() -> serde_json::Value {
    json!({
        "devices": {
            "d1": { "id": "d1", "type": "PLUGABLE_SWITCH", "label": "Lamp" },
            "d2": { "id": "d2", "type": "TEMPERATURE_HUMIDITY_SENSOR", "label": "Hall" }
        },
        "groups": {
            "g1": { "id": "g1", "type": "HEATING", "label": "Living room" }
        },
        "home": { "id": "h1", "connected": true }
    })
}

async fn mount_state(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/hmip/home/getCurrentState"))
        .and(header("authtoken", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn state_fetches(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/hmip/home/getCurrentState")
        .count()
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn drain(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

/// Dialer that replays scripted sessions; each session either stays open or
/// ends after its frames.
#[derive(Clone, Default)]
struct ScriptedDialer {
    sessions: Arc<Mutex<VecDeque<(Vec<String>, bool)>>>,
}

impl ScriptedDialer {
    fn new(sessions: Vec<(Vec<String>, bool)>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
        }
    }
}

impl Dial for ScriptedDialer {
    fn dial(
        &self,
    ) -> impl Future<Output = Result<(FrameSink, FrameStream), hmip_api::Error>> + Send {
        let next = self.sessions.lock().unwrap().pop_front();
        async move {
            let Some((frames, stay_open)) = next else {
                return Err(hmip_api::Error::WebSocketConnect("refused".into()));
            };
            let sink: FrameSink = Box::pin(sink::drain::<Message>().sink_map_err(
                |never: Infallible| -> tungstenite::Error { match never {} },
            ));
            let frames = stream::iter(
                frames
                    .into_iter()
                    .map(|f| Ok::<_, tungstenite::Error>(Message::Text(f.into()))),
            );
            let stream: FrameStream = if stay_open {
                Box::pin(frames.chain(stream::pending()))
            } else {
                Box::pin(frames)
            };
            Ok((sink, stream))
        }
    }
}

fn frame(events: serde_json::Value) -> String {
    json!({ "events": events }).to_string()
}

// ── Bootstrap ───────────────────────────────────────────────────────

#[tokio::test]
async fn bootstrap_binds_supported_devices() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, current_state()).await;

    let log = Log::default();
    let sync = StateSynchronizer::from_config(&config(&server, Some("tok")), handlers(&log)).unwrap();
    let report = sync.bootstrap().await.unwrap();

    assert_eq!(report.devices, 2);
    assert_eq!(report.groups, 1);
    assert_eq!(report.bound, 1);
    assert_eq!(report.unsupported, ["d2"]);
    assert_eq!(drain(&log), ["register d1", "update d1 Lamp"]);

    let registry = sync.registry();
    assert_eq!(registry.device_count(), 2);
    assert_eq!(registry.group("g1").unwrap().label.as_deref(), Some("Living room"));
    assert_eq!(registry.home().connected, Some(true));
    assert!(sync.last_refresh().is_some());
}

#[tokio::test]
async fn bootstrap_sends_client_characteristics() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    Mock::given(method("POST"))
        .and(path("/hmip/home/getCurrentState"))
        .and(body_partial_json(json!({ "clientCharacteristics": { "apiVersion": "10" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_state()))
        .expect(1)
        .mount(&server)
        .await;

    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), HandlerRegistry::new()).unwrap();
    let report = sync.bootstrap().await.unwrap();
    assert_eq!(report.bound, 0);
    assert_eq!(report.unsupported.len(), 2);
}

#[tokio::test]
async fn bootstrap_without_token_is_not_ready() {
    let server = MockServer::start().await;
    let sync = StateSynchronizer::from_config(&config(&server, None), HandlerRegistry::new()).unwrap();
    let err = sync.bootstrap().await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady { .. }));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn bootstrap_rejected_state_is_request_failed() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    Mock::given(method("POST"))
        .and(path("/hmip/home/getCurrentState"))
        .respond_with(ResponseTemplate::new(403).set_body_string("INVALID_AUTH_TOKEN"))
        .mount(&server)
        .await;

    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), HandlerRegistry::new()).unwrap();
    match sync.bootstrap().await.unwrap_err() {
        CoreError::RequestFailed { status, body, .. } => {
            assert_eq!(status, 403);
            assert_eq!(body, "INVALID_AUTH_TOKEN");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn bootstrap_without_devices_is_incomplete() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, json!({ "home": { "id": "h1" } })).await;

    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), HandlerRegistry::new()).unwrap();
    let err = sync.bootstrap().await.unwrap_err();
    assert!(matches!(err, CoreError::IncompleteState { missing: "devices" }));
}

#[tokio::test]
async fn bootstrap_lookup_failure_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/getHost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), HandlerRegistry::new()).unwrap();
    let err = sync.bootstrap().await.unwrap_err();
    assert!(matches!(err, CoreError::LookupFailed { status: 404, .. }));
}

// ── Event stream ────────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_requires_bootstrap() {
    let server = MockServer::start().await;
    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), HandlerRegistry::new()).unwrap();
    let err = sync.subscribe_with(ScriptedDialer::default()).unwrap_err();
    assert!(matches!(err, CoreError::NotBootstrapped));
}

#[tokio::test]
async fn pushed_events_reach_registry_and_handlers() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, current_state()).await;

    let log = Log::default();
    let sync = StateSynchronizer::from_config(&config(&server, Some("tok")), handlers(&log)).unwrap();
    sync.bootstrap().await.unwrap();
    drain(&log);

    let events = frame(json!({
        "0": { "pushEventType": "DEVICE_CHANGED", "device": { "id": "d1", "label": "Desk lamp" } },
        "1": { "pushEventType": "DEVICE_CHANGED", "device": { "id": "d9", "type": "PLUGABLE_SWITCH" } },
        "2": { "pushEventType": "GROUP_REMOVED", "group": { "id": "g1" } },
        "3": { "pushEventType": "DEVICE_REMOVED", "device": { "id": "d1" } },
        "4": { "pushEventType": "DEVICE_REMOVED", "device": { "id": "d1" } }
    }));
    sync.subscribe_with(ScriptedDialer::new(vec![(vec![events], true)])).unwrap();

    assert!(eventually(|| !sync.registry().has_device("d1")).await);
    assert_eq!(drain(&log), ["update d1 Desk lamp", "unregister d1"]);
    assert!(!sync.registry().has_device("d9"));
    assert!(sync.registry().group("g1").is_none());
    assert!(sync.bound_ids().is_empty());

    let mut states = sync.connection_state();
    assert!(eventually(|| *states.borrow_and_update() == ConnectionState::Connected).await);

    sync.shutdown().await;
    assert_eq!(*sync.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn resubscribing_keeps_the_new_stream_state() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, current_state()).await;

    let log = Log::default();
    let sync = StateSynchronizer::from_config(&config(&server, Some("tok")), handlers(&log)).unwrap();
    sync.bootstrap().await.unwrap();
    drain(&log);

    sync.subscribe_with(ScriptedDialer::new(vec![(vec![], true)])).unwrap();
    let mut states = sync.connection_state();
    assert!(eventually(|| *states.borrow_and_update() == ConnectionState::Connected).await);

    let rename = frame(json!({
        "0": { "pushEventType": "DEVICE_CHANGED", "device": { "id": "d1", "label": "Porch" } }
    }));
    sync.subscribe_with(ScriptedDialer::new(vec![(vec![rename], true)])).unwrap();

    assert!(eventually(|| drain(&log) == ["update d1 Porch"]).await);
    // The replaced stream's shutdown must not leak into the reported state.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*sync.connection_state().borrow(), ConnectionState::Connected);

    sync.shutdown().await;
    assert_eq!(*sync.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn registry_watch_follows_pushed_events() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, current_state()).await;

    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), handlers(&Log::default())).unwrap();
    sync.bootstrap().await.unwrap();
    let mut devices = sync.registry().devices();
    let mut groups = sync.registry().groups().into_stream();
    assert_eq!(devices.current().len(), 2);

    let events = frame(json!({
        "0": { "pushEventType": "DEVICE_CHANGED", "device": { "id": "d1", "label": "Desk lamp" } },
        "1": { "pushEventType": "GROUP_REMOVED", "group": { "id": "g1" } }
    }));
    sync.subscribe_with(ScriptedDialer::new(vec![(vec![events], true)])).unwrap();

    let changes = tokio::time::timeout(Duration::from_secs(2), devices.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert!(matches!(&changes[0], RegistryChange::Updated(d) if d.label.as_deref() == Some("Desk lamp")));

    let removed = tokio::time::timeout(Duration::from_secs(2), groups.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed, [RegistryChange::Removed("g1".into())]);

    sync.shutdown().await;
}

#[tokio::test]
async fn reconnect_triggers_resync_when_enabled() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, current_state()).await;

    let mut config = config(&server, Some("tok"));
    config.resync_on_reconnect = true;
    let sync = StateSynchronizer::from_config(&config, HandlerRegistry::new()).unwrap();
    sync.bootstrap().await.unwrap();
    assert_eq!(state_fetches(&server).await, 1);

    // First session drops immediately; the second stays up.
    sync.subscribe_with(ScriptedDialer::new(vec![(vec![], false), (vec![], true)]))
        .unwrap();

    let mut fetched = 1;
    for _ in 0..200 {
        fetched = state_fetches(&server).await;
        if fetched >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fetched, 2);
    sync.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_blocks_resubscribe() {
    let server = MockServer::start().await;
    mount_lookup(&server).await;
    mount_state(&server, current_state()).await;

    let sync =
        StateSynchronizer::from_config(&config(&server, Some("tok")), HandlerRegistry::new()).unwrap();
    sync.bootstrap().await.unwrap();
    sync.subscribe_with(ScriptedDialer::new(vec![(vec![], true)])).unwrap();

    sync.shutdown().await;
    sync.shutdown().await;
    let err = sync.subscribe_with(ScriptedDialer::default()).unwrap_err();
    assert!(matches!(err, CoreError::Shutdown));
}
