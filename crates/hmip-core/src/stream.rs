// ── Registry subscriptions ──
//
// Watch the device or group collection of a `DeviceRegistry` and receive
// per-record changes instead of whole snapshots. Consecutive snapshots are
// diffed by id; a record counts as updated when its contents differ.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{Device, Group};

type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Records the registry keys by id.
pub trait Identified: PartialEq + Send + Sync + 'static {
    fn id(&self) -> &str;
}

impl Identified for Device {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Group {
    fn id(&self) -> &str {
        &self.id
    }
}

/// One record's transition between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange<T> {
    Added(Arc<T>),
    Updated(Arc<T>),
    Removed(String),
}

impl<T: Identified> RegistryChange<T> {
    pub fn id(&self) -> &str {
        match self {
            Self::Added(record) | Self::Updated(record) => record.id(),
            Self::Removed(id) => id,
        }
    }
}

/// Changes that turn `before` into `after`, in `after`'s (id-sorted) order
/// followed by removals.
pub fn diff<T: Identified>(before: &[Arc<T>], after: &[Arc<T>]) -> Vec<RegistryChange<T>> {
    let previous: HashMap<&str, &Arc<T>> = before.iter().map(|r| (r.id(), r)).collect();
    let mut changes = Vec::new();
    let mut seen = 0;

    for record in after {
        match previous.get(record.id()) {
            None => changes.push(RegistryChange::Added(Arc::clone(record))),
            Some(old) => {
                seen += 1;
                if !Arc::ptr_eq(old, record) && **old != *record {
                    changes.push(RegistryChange::Updated(Arc::clone(record)));
                }
            }
        }
    }

    if seen < previous.len() {
        let current: HashSet<&str> = after.iter().map(|r| r.id()).collect();
        changes.extend(
            before
                .iter()
                .filter(|r| !current.contains(r.id()))
                .map(|r| RegistryChange::Removed(r.id().to_owned())),
        );
    }
    changes
}

/// Subscription to one registry collection.
pub struct RegistryWatch<T: Identified> {
    current: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Identified> RegistryWatch<T> {
    pub(crate) fn new(mut receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// Records as of creation or the last [`changed`](Self::changed).
    pub fn current(&self) -> &Snapshot<T> {
        &self.current
    }

    /// Wait until the collection differs from [`current`](Self::current).
    ///
    /// Publications that leave every record equal are skipped. Returns
    /// `None` once the registry is gone.
    pub async fn changed(&mut self) -> Option<Vec<RegistryChange<T>>> {
        loop {
            self.receiver.changed().await.ok()?;
            let next = self.receiver.borrow_and_update().clone();
            let changes = diff(&self.current, &next);
            self.current = next;
            if !changes.is_empty() {
                return Some(changes);
            }
        }
    }

    /// Consume into a `Stream` of change batches.
    pub fn into_stream(self) -> RegistryChangeStream<T> {
        RegistryChangeStream {
            previous: self.current,
            inner: WatchStream::from_changes(self.receiver),
        }
    }
}

/// `Stream` form of [`RegistryWatch`]; never yields an empty batch.
pub struct RegistryChangeStream<T: Identified> {
    previous: Snapshot<T>,
    inner: WatchStream<Snapshot<T>>,
}

impl<T: Identified> Stream for RegistryChangeStream<T> {
    type Item = Vec<RegistryChange<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(next) = ready!(Pin::new(&mut self.inner).poll_next(cx)) else {
                return Poll::Ready(None);
            };
            let changes = diff(&self.previous, &next);
            self.previous = next;
            if !changes.is_empty() {
                return Poll::Ready(Some(changes));
            }
        }
    }
}
