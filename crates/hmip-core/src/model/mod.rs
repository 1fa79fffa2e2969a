// ── Domain model ──
//
// Canonical device, group and home records plus the push event types that
// patch them. Typed fields cover what the synchronizer and adapters route
// on; everything else is carried verbatim in `extra`.

pub mod device;
pub mod event;
pub mod group;
pub mod home;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

pub use device::{Device, FunctionalChannel};
pub use event::{PushEvent, PushEventKind, RawPushEvent, parse_event_batch};
pub use group::{Group, GroupChannel};
pub use home::Home;

/// Raw `home/getCurrentState` body. Entries are typed one by one so a single
/// unusable record does not fail the whole fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentState {
    #[serde(default)]
    pub devices: Option<Map<String, Value>>,
    #[serde(default)]
    pub groups: Option<Map<String, Value>>,
    #[serde(default)]
    pub home: Option<Value>,
}

/// A typed full-state snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomeState {
    pub devices: BTreeMap<String, Device>,
    pub groups: BTreeMap<String, Group>,
    pub home: Home,
    /// Ids whose record could not be parsed, with the reason.
    pub skipped: Vec<(String, String)>,
}
