//! Rate-limited, prioritized admission for outbound calls.
//!
//! The access point enforces undocumented rate limits, so every request
//! goes through a single [`Dispatcher`]. A background worker pops jobs in
//! ascending priority order (ties by submission order) and admits them
//! subject to:
//!
//! - a concurrency cap (`max_concurrent`, 1 by default),
//! - a minimum spacing between dispatches,
//! - a token reservoir refilled on a fixed interval up to a cap.
//!
//! When the queue grows past the high-water mark, the oldest job with the
//! worst priority is dropped and its caller receives
//! [`DispatchError::Dropped`]. Jobs are never retried here.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{Notify, Semaphore, broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Runs before anything else (lookup, pairing handshake).
pub const PRIORITY_CRITICAL: u8 = 0;
/// User-initiated device commands.
pub const PRIORITY_INTERACTIVE: u8 = 1;
/// Default for ordinary calls, including full-state fetches.
pub const PRIORITY_DEFAULT: u8 = 5;
/// Work nobody is waiting on; first to go when the queue overflows.
pub const PRIORITY_BACKGROUND: u8 = 9;

const EVENT_CHANNEL_CAPACITY: usize = 32;

// ── Configuration ────────────────────────────────────────────────────

/// Admission limits. Defaults are tuned against the HomematicIP cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Requests allowed in flight at once. Default: 1.
    pub max_concurrent: usize,
    /// Minimum time between two dispatches. Default: 100 ms.
    pub min_spacing: Duration,
    /// Tokens available at start. Default: 10.
    pub reservoir: u32,
    /// Tokens added per refill. Default: 1.
    pub refill_amount: u32,
    /// Time between refills. Default: 1 s.
    pub refill_interval: Duration,
    /// Reservoir cap. Default: 10.
    pub reservoir_max: u32,
    /// Queue length beyond which jobs are dropped. Default: 120.
    pub high_water: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            min_spacing: Duration::from_millis(100),
            reservoir: 10,
            refill_amount: 1,
            refill_interval: Duration::from_millis(1000),
            reservoir_max: 10,
            high_water: 120,
        }
    }
}

/// A limit that would stall or break the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {reason}")]
pub struct InvalidLimit {
    pub field: &'static str,
    pub reason: &'static str,
}

impl DispatcherConfig {
    /// Reject limits under which queued jobs could never be admitted.
    pub fn validate(&self) -> Result<(), InvalidLimit> {
        let checks = [
            ("max_concurrent", self.max_concurrent == 0),
            ("reservoir_max", self.reservoir_max == 0),
            ("refill_amount", self.refill_amount == 0),
            ("high_water", self.high_water == 0),
        ];
        match checks.into_iter().find(|(_, bad)| *bad) {
            Some((field, _)) => Err(InvalidLimit {
                field,
                reason: "must be at least 1",
            }),
            None => Ok(()),
        }
    }

    /// Raise zero limits to the smallest workable value.
    fn normalized(mut self) -> Self {
        if let Err(e) = self.validate() {
            warn!(error = %e, "raising zero dispatcher limits to 1");
        }
        self.max_concurrent = self.max_concurrent.max(1);
        self.reservoir_max = self.reservoir_max.max(1);
        self.refill_amount = self.refill_amount.max(1);
        self.high_water = self.high_water.max(1);
        self
    }
}

// ── Errors & events ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Evicted from the queue by the high-water policy.
    #[error("job with priority {priority} dropped: queue above high-water mark")]
    Dropped { priority: u8 },

    /// The dispatcher shut down before the job ran.
    #[error("dispatcher shut down")]
    Shutdown,
}

/// Level-triggered notifications about dispatcher pressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// The reservoir ran dry; later jobs wait for refills.
    ThrottlingStarted,
    /// The queue drained completely after a throttled period.
    ThrottlingEnded,
    /// A queued job was evicted by the high-water policy.
    JobDropped { priority: u8 },
}

// ── Type-erased jobs ─────────────────────────────────────────────────

trait PendingJob: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
    fn reject(self: Box<Self>, err: DispatchError);
}

struct Job<F: Future> {
    fut: F,
    reply: oneshot::Sender<Result<F::Output, DispatchError>>,
}

impl<F> PendingJob for Job<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Job { fut, reply } = *self;
        Box::pin(async move {
            let out = fut.await;
            let _ = reply.send(Ok(out));
        })
    }

    fn reject(self: Box<Self>, err: DispatchError) {
        let _ = self.reply.send(Err(err));
    }
}

// ── Shared queue state ───────────────────────────────────────────────

/// Queue key: ascending priority, then submission order.
type QueueKey = (u8, u64);

struct QueueState {
    queue: BTreeMap<QueueKey, Box<dyn PendingJob>>,
    next_seq: u64,
    reservoir: u32,
    next_refill: Instant,
    last_dispatch: Option<Instant>,
    throttled: bool,
    closed: bool,
}

impl QueueState {
    /// Apply every refill that came due before `now`.
    fn refill(&mut self, now: Instant, config: &DispatcherConfig) {
        if config.refill_interval.is_zero() {
            self.reservoir = config.reservoir_max;
            return;
        }
        while now >= self.next_refill {
            self.reservoir = self
                .reservoir
                .saturating_add(config.refill_amount)
                .min(config.reservoir_max);
            self.next_refill += config.refill_interval;
        }
    }

    /// The oldest job among those with the worst (highest) priority value.
    fn eviction_candidate(&self) -> Option<QueueKey> {
        let (&(worst, _), _) = self.queue.last_key_value()?;
        self.queue
            .range((worst, 0)..=(worst, u64::MAX))
            .next()
            .map(|(key, _)| *key)
    }
}

struct Shared {
    config: DispatcherConfig,
    state: Mutex<QueueState>,
    wake: Notify,
    events: broadcast::Sender<DispatcherEvent>,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DispatcherEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Admission control for calls to one remote endpoint.
///
/// Must be created inside a tokio runtime; the worker task is spawned
/// immediately and stops when the dispatcher is dropped or shut down.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    ///
    /// Zero limits are raised to 1 so that every job is eventually admitted;
    /// call [`DispatcherConfig::validate`] first to reject them instead.
    pub fn new(config: DispatcherConfig) -> Self {
        let config = config.normalized();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let now = Instant::now();
        let state = QueueState {
            queue: BTreeMap::new(),
            next_seq: 0,
            reservoir: config.reservoir.min(config.reservoir_max),
            next_refill: now + config.refill_interval,
            last_dispatch: None,
            throttled: false,
            closed: false,
        };
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(state),
            wake: Notify::new(),
            events,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(worker(Arc::clone(&shared), slots));

        Self { shared }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Queue a job and return a future resolving to its output.
    ///
    /// The job is enqueued synchronously, before this returns, so a burst of
    /// `submit` calls is ordered by priority even if none is awaited yet.
    pub fn submit<F>(
        &self,
        priority: u8,
        job: F,
    ) -> impl Future<Output = Result<F::Output, DispatchError>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.enqueue(priority, Box::new(Job { fut: job, reply }));
        async move { rx.await.unwrap_or(Err(DispatchError::Shutdown)) }
    }

    /// Number of jobs waiting for admission.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Subscribe to throttling and drop notifications.
    pub fn events(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.shared.events.subscribe()
    }

    /// Stop the worker and reject everything still queued.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
        let drained = {
            let mut state = self.shared.lock();
            state.closed = true;
            std::mem::take(&mut state.queue)
        };
        for job in drained.into_values() {
            job.reject(DispatchError::Shutdown);
        }
    }

    fn enqueue(&self, priority: u8, job: Box<dyn PendingJob>) {
        let mut evicted = Vec::new();
        {
            let mut state = self.shared.lock();
            if state.closed {
                drop(state);
                job.reject(DispatchError::Shutdown);
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.insert((priority, seq), job);

            while state.queue.len() > self.shared.config.high_water {
                let Some(key) = state.eviction_candidate() else {
                    break;
                };
                if let Some(job) = state.queue.remove(&key) {
                    evicted.push((key.0, job));
                }
            }
            trace!(priority, seq, queued = state.queue.len(), "job queued");
        }

        for (priority, job) in evicted {
            warn!(
                priority,
                high_water = self.shared.config.high_water,
                "dispatcher queue above high-water mark, dropping job"
            );
            job.reject(DispatchError::Dropped { priority });
            self.shared.emit(DispatcherEvent::JobDropped { priority });
        }

        self.shared.wake.notify_one();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Worker ───────────────────────────────────────────────────────────

enum Admission {
    Ready(Box<dyn PendingJob>),
    Wait(Duration),
    Empty,
}

/// Decide whether the head of the queue may run now.
fn admit(shared: &Shared, now: Instant) -> Admission {
    let config = &shared.config;
    let mut state = shared.lock();
    if state.queue.is_empty() {
        return Admission::Empty;
    }

    state.refill(now, config);

    let spacing_wait = state
        .last_dispatch
        .map(|last| (last + config.min_spacing).saturating_duration_since(now))
        .unwrap_or_default();
    let token_wait = if state.reservoir == 0 {
        state.next_refill.saturating_duration_since(now)
    } else {
        Duration::ZERO
    };
    let wait = spacing_wait.max(token_wait);
    if !wait.is_zero() {
        return Admission::Wait(wait);
    }

    let Some(remaining) = state.reservoir.checked_sub(1) else {
        return Admission::Wait(config.refill_interval.max(Duration::from_millis(1)));
    };
    let Some((_, job)) = state.queue.pop_first() else {
        return Admission::Empty;
    };
    state.reservoir = remaining;
    state.last_dispatch = Some(now);

    if state.reservoir == 0 && !state.throttled {
        state.throttled = true;
        debug!("dispatcher reservoir empty, throttling");
        shared.emit(DispatcherEvent::ThrottlingStarted);
    }
    if state.queue.is_empty() && state.throttled {
        state.throttled = false;
        debug!("dispatcher queue drained, throttling ended");
        shared.emit(DispatcherEvent::ThrottlingEnded);
    }

    Admission::Ready(job)
}

async fn worker(shared: Arc<Shared>, slots: Arc<Semaphore>) {
    loop {
        // One slot per in-flight job; with the default of 1 this serializes.
        let permit = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = loop {
            match admit(&shared, Instant::now()) {
                Admission::Ready(job) => break Some(job),
                Admission::Wait(delay) => {
                    tokio::select! {
                        biased;
                        () = shared.cancel.cancelled() => break None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Admission::Empty => {
                    tokio::select! {
                        biased;
                        () = shared.cancel.cancelled() => break None,
                        () = shared.wake.notified() => {}
                    }
                }
            }
        };
        let Some(job) = job else { break };

        tokio::spawn(async move {
            job.run().await;
            drop(permit);
        });
    }

    debug!("dispatcher worker exiting");
}

// ── Tests ────────────────────────────────────────────────────────────
