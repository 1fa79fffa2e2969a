// ── Device registry ──
//
// The in-memory mirror of one home: devices and groups by id plus the
// single home record. Mutation is crate-private and driven by the
// synchronizer; everyone else reads snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use super::collection::EntityCollection;
use crate::model::{Device, Group, Home, HomeState};
use crate::stream::RegistryWatch;

/// Group map handed to device handlers on every update.
pub type GroupMap = BTreeMap<String, Arc<Group>>;

pub struct DeviceRegistry {
    devices: EntityCollection<Device>,
    groups: EntityCollection<Group>,
    home: watch::Sender<Arc<Home>>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        let (home, _) = watch::channel(Arc::new(Home::default()));
        Self {
            devices: EntityCollection::new(),
            groups: EntityCollection::new(),
            home,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn group(&self, id: &str) -> Option<Arc<Group>> {
        self.groups.get(id)
    }

    pub fn home(&self) -> Arc<Home> {
        self.home.borrow().clone()
    }

    pub fn has_device(&self, id: &str) -> bool {
        self.devices.contains(id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Current groups keyed by id.
    pub fn groups_map(&self) -> GroupMap {
        self.groups.entries().into_iter().collect()
    }

    /// Follow device additions, updates and removals.
    pub fn devices(&self) -> RegistryWatch<Device> {
        RegistryWatch::new(self.devices.subscribe())
    }

    /// Follow group additions, updates and removals.
    pub fn groups(&self) -> RegistryWatch<Group> {
        RegistryWatch::new(self.groups.subscribe())
    }

    /// All devices, sorted by id.

    pub fn device_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    /// All groups, sorted by id.
    pub fn group_snapshot(&self) -> Arc<Vec<Arc<Group>>> {
        self.groups.snapshot()
    }

    pub fn subscribe_home(&self) -> watch::Receiver<Arc<Home>> {
        self.home.subscribe()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Replace everything with a fresh full-state snapshot.
    pub(crate) fn replace_all(&self, state: &HomeState) {
        self.devices.replace_all(
            state
                .devices
                .iter()
                .map(|(id, device)| (id.clone(), device.clone())),
        );
        self.groups.replace_all(
            state
                .groups
                .iter()
                .map(|(id, group)| (id.clone(), group.clone())),
        );
        self.home.send_replace(Arc::new(state.home.clone()));
    }

    /// Upsert by id; the stored record becomes exactly `group`.
    pub(crate) fn upsert_group(&self, group: Group) -> bool {
        self.groups.upsert(group.id.clone(), group)
    }

    pub(crate) fn remove_group(&self, id: &str) -> Option<Arc<Group>> {
        self.groups.remove(id)
    }

    /// Merge a device delta into the stored record (or insert it).
    pub(crate) fn merge_device(&self, delta: Device) -> Arc<Device> {
        let id = delta.id.clone();
        self.devices.update_or_insert(
            &id,
            || Device {
                id: id.clone(),
                ..Device::default()
            },
            |device| device.merge(delta),
        )
    }

    pub(crate) fn remove_device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.remove(id)
    }

    pub(crate) fn merge_home(&self, delta: Home) -> Arc<Home> {
        let mut merged = None;
        self.home.send_modify(|home| {
            let mut next = Home::clone(home);
            next.merge(delta);
            let next = Arc::new(next);
            *home = Arc::clone(&next);
            merged = Some(next);
        });
        merged.unwrap_or_else(|| self.home())
    }
}
