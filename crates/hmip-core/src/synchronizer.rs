// ── State synchronizer ──
//
// Owns the in-memory mirror of one home and keeps device handlers in step
// with it: a full fetch seeds the registry and bindings, then push events
// patch both. Event application is synchronous and one event at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hmip_api::{AccessPointClient, CallResponse, ConnectionState, Dial, EventStream, StreamConfig};

use crate::binding::{Binding, DeviceContext, DeviceHandler, HandlerRegistry};
use crate::config::ConnectorConfig;
use crate::error::CoreError;
use crate::model::{CurrentState, Device, Group, Home, HomeState, PushEvent, parse_event_batch};
use crate::store::DeviceRegistry;

const CURRENT_STATE_PATH: &str = "home/getCurrentState";

/// Synchronizer behaviour knobs.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub stream: StreamConfig,
    /// Re-fetch full state after the event stream reconnects.
    pub resync_on_reconnect: bool,
}

impl From<&ConnectorConfig> for SyncOptions {
    fn from(config: &ConnectorConfig) -> Self {
        Self {
            stream: config.stream.clone(),
            resync_on_reconnect: config.resync_on_reconnect,
        }
    }
}

/// Totals from one full-state fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub devices: usize,
    pub groups: usize,
    /// Devices bound to a handler after this fetch.
    pub bound: usize,
    /// Device ids skipped because no handler exists for their type.
    pub unsupported: Vec<String>,
    /// Ids dropped because their record could not be parsed.
    pub malformed: Vec<String>,
}

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    GroupUpserted { id: String },
    GroupRemoved { id: String, existed: bool },
    DeviceUpdated { id: String },
    DeviceRemoved { id: String },
    /// Device event for an id without a binding; registry untouched.
    DeviceIgnored { id: String },
    HomeUpdated { bindings: usize },
    Ignored { kind: String },
}

// ── StateSynchronizer ────────────────────────────────────────────────

/// Top-level orchestrator for one access point.
///
/// Cheaply cloneable via `Arc<SyncInner>`.
#[derive(Clone)]
pub struct StateSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    client: Arc<AccessPointClient>,
    handlers: HandlerRegistry,
    options: SyncOptions,
    registry: DeviceRegistry,
    bindings: DashMap<String, Binding>,
    connection: watch::Sender<ConnectionState>,
    subscription: Mutex<Option<Subscription>>,
    bootstrapped: AtomicBool,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl StateSynchronizer {
    pub fn new(client: Arc<AccessPointClient>, handlers: HandlerRegistry, options: SyncOptions) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(SyncInner {
                client,
                handlers,
                options,
                registry: DeviceRegistry::new(),
                bindings: DashMap::new(),
                connection,
                subscription: Mutex::new(None),
                bootstrapped: AtomicBool::new(false),
                last_refresh: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Build client and synchronizer from one config. Needs a tokio runtime.
    pub fn from_config(config: &ConnectorConfig, handlers: HandlerRegistry) -> Result<Self, CoreError> {
        let client = Arc::new(config.build_client()?);
        Ok(Self::new(client, handlers, SyncOptions::from(config)))
    }

    pub fn client(&self) -> &Arc<AccessPointClient> {
        &self.inner.client
    }

    /// Read access to the mirrored state.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn is_bound(&self, device_id: &str) -> bool {
        self.inner.bindings.contains_key(device_id)
    }

    /// Ids with a live binding, sorted.
    pub fn bound_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.bindings.iter().map(|b| b.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_refresh)
    }

    // ── Full state ───────────────────────────────────────────────────

    /// Resolve endpoints, fetch full state, and bind every recognized device.
    pub async fn bootstrap(&self) -> Result<BootstrapReport, CoreError> {
        if !self.inner.client.ready_for_use() {
            return Err(CoreError::NotReady {
                required: "auth token",
            });
        }
        self.inner.client.lookup().await?;
        let report = self.refresh().await?;
        self.inner.bootstrapped.store(true, Ordering::SeqCst);
        Ok(report)
    }

    /// Re-fetch full state and reconcile bindings (endpoints must be known).
    pub async fn refresh(&self) -> Result<BootstrapReport, CoreError> {
        let state = self.fetch_state().await?;
        let report = self.inner.reconcile(&state);
        *lock(&self.inner.last_refresh) = Some(Utc::now());
        info!(
            devices = report.devices,
            groups = report.groups,
            bound = report.bound,
            unsupported = report.unsupported.len(),
            "full state applied"
        );
        Ok(report)
    }

    async fn fetch_state(&self) -> Result<HomeState, CoreError> {
        match self.inner.client.get_current_state::<CurrentState>().await? {
            CallResponse::Data(raw) => into_home_state(raw),
            CallResponse::Accepted => Err(CoreError::IncompleteState { missing: "devices" }),
            CallResponse::Failed { status, body } => Err(CoreError::RequestFailed {
                path: CURRENT_STATE_PATH.into(),
                status,
                body,
            }),
        }
    }

    // ── Event stream ─────────────────────────────────────────────────

    /// Open the push channel using the client's endpoints and credentials.
    pub fn subscribe(&self) -> Result<(), CoreError> {
        let dialer = self.inner.client.stream_dialer()?;
        self.subscribe_with(dialer)
    }

    /// Open the push channel through a caller-supplied dialer.
    ///
    /// Replaces any stream opened earlier. The previous stream and its tasks
    /// are stopped first and no longer affect [`connection_state`](Self::connection_state).
    pub fn subscribe_with<D: Dial>(&self, dialer: D) -> Result<(), CoreError> {
        if !self.inner.bootstrapped.load(Ordering::SeqCst) {
            return Err(CoreError::NotBootstrapped);
        }

        let mut slot = lock(&self.inner.subscription);
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Shutdown);
        }
        if let Some(previous) = slot.take() {
            debug!("replacing event stream subscription");
            previous.abort();
        }

        let cancel = self.inner.cancel.child_token();
        let (stream, frames) = EventStream::connect(dialer, self.inner.options.stream.clone());
        let states = stream.subscribe_state();
        let tasks = vec![
            tokio::spawn(event_task(self.clone(), frames, cancel.clone())),
            tokio::spawn(connection_task(self.clone(), states, cancel.clone())),
        ];
        *slot = Some(Subscription {
            stream,
            cancel,
            tasks,
        });
        Ok(())
    }

    /// Stop the event stream and background tasks. Idempotent.
    pub async fn shutdown(&self) {
        let current = {
            let mut slot = lock(&self.inner.subscription);
            self.inner.cancel.cancel();
            slot.take()
        };
        if let Some(subscription) = current {
            subscription.stream.disconnect();
            for task in subscription.tasks {
                let _ = task.await;
            }
        }
        self.inner.connection.send_replace(ConnectionState::Disconnected);
        debug!("synchronizer shut down");
    }

    // ── Event application ────────────────────────────────────────────

    /// Parse one inbound frame and apply its events in batch order.
    pub fn apply_message(&self, text: &str) -> Vec<EventOutcome> {
        match parse_event_batch(text) {
            Ok(events) => events.into_iter().map(|e| self.apply_event(e)).collect(),
            Err(e) => {
                warn!(error = %e, len = text.len(), "discarding unparseable event frame");
                Vec::new()
            }
        }
    }

    /// Apply one event. Applying the same event twice leaves the same state
    /// as applying it once.
    pub fn apply_event(&self, event: PushEvent) -> EventOutcome {
        self.inner.apply_event(event)
    }
}

impl SyncInner {
    /// Publish a stream state on behalf of the subscription owning `cancel`.
    ///
    /// Serialized with subscription replacement, so a replaced stream can
    /// never overwrite the state of its successor.
    fn mirror_state(&self, cancel: &CancellationToken, state: ConnectionState) -> bool {
        let _slot = lock(&self.subscription);
        if cancel.is_cancelled() {
            return false;
        }
        self.connection.send_replace(state);
        true
    }

    fn apply_event(&self, event: PushEvent) -> EventOutcome {
        match event {
            PushEvent::GroupAdded(group) | PushEvent::GroupChanged(group) => {
                let id = group.id.clone();
                let is_new = self.registry.upsert_group(group);
                debug!(group_id = %id, is_new, "group upserted");
                EventOutcome::GroupUpserted { id }
            }
            PushEvent::GroupRemoved { id } => {
                let existed = self.registry.remove_group(&id).is_some();
                debug!(group_id = %id, existed, "group removed");
                EventOutcome::GroupRemoved { id, existed }
            }
            PushEvent::DeviceAdded(device) | PushEvent::DeviceChanged(device) => {
                self.apply_device_change(device)
            }
            PushEvent::DeviceRemoved { id } => self.apply_device_removal(id),
            PushEvent::HomeChanged(home) => {
                let home = self.registry.merge_home(home);
                let groups = self.registry.groups_map();
                let handlers = self.handlers_snapshot();
                for handler in &handlers {
                    handler.update_device(&home, None, &groups);
                }
                debug!(bindings = handlers.len(), "home updated");
                EventOutcome::HomeUpdated {
                    bindings: handlers.len(),
                }
            }
            PushEvent::Unknown { kind } => {
                debug!(kind = %kind, "ignoring unhandled event kind");
                EventOutcome::Ignored { kind }
            }
            PushEvent::Malformed { kind, reason } => {
                warn!(kind = %kind, reason = %reason, "ignoring malformed event");
                EventOutcome::Ignored { kind }
            }
        }
    }

    fn apply_device_change(&self, device: Device) -> EventOutcome {
        let id = device.id.clone();
        // New devices need a full refresh; the binding set never grows here.
        let Some(handler) = self.handler(&id) else {
            info!(device_id = %id, "event for unbound device ignored");
            return EventOutcome::DeviceIgnored { id };
        };

        let merged = self.registry.merge_device(device);
        let home = self.registry.home();
        let groups = self.registry.groups_map();
        handler.update_device(&home, Some(&merged), &groups);
        debug!(device_id = %id, "device updated");
        EventOutcome::DeviceUpdated { id }
    }

    fn apply_device_removal(&self, id: String) -> EventOutcome {
        let Some((_, binding)) = self.bindings.remove(&id) else {
            info!(device_id = %id, "removal for unbound device ignored");
            return EventOutcome::DeviceIgnored { id };
        };

        binding.handler.unregister();
        self.registry.remove_device(&id);
        info!(device_id = %id, device_type = %binding.device_type, "device removed");
        EventOutcome::DeviceRemoved { id }
    }

    /// Replace the registry with `state` and bring bindings in line with it.
    fn reconcile(&self, state: &HomeState) -> BootstrapReport {
        self.registry.replace_all(state);
        let home = self.registry.home();
        let groups = self.registry.groups_map();

        let mut report = BootstrapReport {
            devices: state.devices.len(),
            groups: state.groups.len(),
            malformed: state.skipped.iter().map(|(id, _)| id.clone()).collect(),
            ..BootstrapReport::default()
        };

        for (id, device) in &state.devices {
            let device_type = device.device_type().unwrap_or_default();
            let existing = self
                .bindings
                .get(id)
                .map(|b| (b.device_type.clone(), Arc::clone(&b.handler)));

            let handler = match existing {
                Some((bound_type, handler)) if bound_type == device_type => handler,
                stale => {
                    if let Some((bound_type, old)) = stale {
                        debug!(device_id = %id, from = %bound_type, to = %device_type, "device type changed, rebinding");
                        self.bindings.remove(id);
                        old.unregister();
                    }
                    let Some(factory) = self.handlers.factory(device_type) else {
                        warn!(device_id = %id, device_type = %device_type, "no handler for device type, skipping");
                        report.unsupported.push(id.clone());
                        continue;
                    };
                    let ctx = DeviceContext {
                        device_id: id.clone(),
                        device_type: device_type.to_owned(),
                        client: Arc::clone(&self.client),
                    };
                    let handler = factory(&ctx, device);
                    handler.register();
                    self.bindings.insert(
                        id.clone(),
                        Binding {
                            device_type: device_type.to_owned(),
                            handler: Arc::clone(&handler),
                        },
                    );
                    debug!(device_id = %id, device_type = %device_type, "device bound");
                    handler
                }
            };
            handler.update_device(&home, Some(device), &groups);
        }

        let present: HashSet<&str> = state.devices.keys().map(String::as_str).collect();
        let stale: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| !present.contains(b.key().as_str()))
            .map(|b| b.key().clone())
            .collect();
        for id in stale {
            if let Some((_, binding)) = self.bindings.remove(&id) {
                info!(device_id = %id, "device no longer reported, unbinding");
                binding.handler.unregister();
            }
        }

        report.bound = self.bindings.len();
        report
    }

    fn handler(&self, id: &str) -> Option<Arc<dyn DeviceHandler>> {
        self.bindings.get(id).map(|b| Arc::clone(&b.handler))
    }

    /// Handlers cloned out so callbacks run without holding map guards.
    fn handlers_snapshot(&self) -> Vec<Arc<dyn DeviceHandler>> {
        self.bindings
            .iter()
            .map(|b| Arc::clone(&b.handler))
            .collect()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// One open push channel and the tasks consuming it.
struct Subscription {
    stream: EventStream,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    fn abort(self) {
        self.cancel.cancel();
        self.stream.disconnect();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn event_task(
    sync: StateSynchronizer,
    mut frames: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else { break };
        sync.apply_message(&frame);
    }
    debug!("event task exiting");
}

/// Mirror stream state and handle the gap left by a reconnect.
async fn connection_task(
    sync: StateSynchronizer,
    mut states: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut gap = false;
    loop {
        let state = *states.borrow_and_update();
        if !sync.inner.mirror_state(&cancel, state) {
            break;
        }

        match state {
            ConnectionState::Reconnecting { .. } => gap = true,
            ConnectionState::Connected if gap => {
                gap = false;
                if sync.inner.options.resync_on_reconnect {
                    info!("event stream reconnected, re-fetching full state");
                    if let Err(e) = sync.refresh().await {
                        error!(error = %e, "resync after reconnect failed");
                    }
                } else {
                    warn!("event stream reconnected; events during the gap are lost until the next refresh");
                }
            }
            _ => {}
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("connection task exiting");
}

// ── Helpers ──────────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Type the raw full-state body. A missing `devices` map is fatal; single
/// unusable records are skipped.
fn into_home_state(raw: CurrentState) -> Result<HomeState, CoreError> {
    let devices = raw
        .devices
        .ok_or(CoreError::IncompleteState { missing: "devices" })?;

    let mut state = HomeState::default();
    for (id, value) in devices {
        match serde_json::from_value::<Device>(value) {
            Ok(mut device) => {
                if device.id.is_empty() {
                    device.id.clone_from(&id);
                }
                state.devices.insert(id, device);
            }
            Err(e) => {
                warn!(device_id = %id, error = %e, "skipping unparseable device");
                state.skipped.push((id, e.to_string()));
            }
        }
    }
    for (id, value) in raw.groups.unwrap_or_default() {
        match serde_json::from_value::<Group>(value) {
            Ok(mut group) => {
                if group.id.is_empty() {
                    group.id.clone_from(&id);
                }
                state.groups.insert(id, group);
            }
            Err(e) => {
                warn!(group_id = %id, error = %e, "skipping unparseable group");
                state.skipped.push((id, e.to_string()));
            }
        }
    }
    if let Some(home) = raw.home {
        match serde_json::from_value::<Home>(home) {
            Ok(home) => state.home = home,
            Err(e) => warn!(error = %e, "unparseable home record, using empty home"),
        }
    }
    Ok(state)
}
