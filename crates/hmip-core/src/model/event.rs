// ── Push event types ──
//
// Inbound frames carry a batch of named events:
//   { "events": { "<id>": { "pushEventType": "...", "device": {...} }, ... } }
// Batch order is the object's key order, which `IndexMap` preserves.

use std::str::FromStr;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use super::{Device, Group, Home};

/// Event kinds the synchronizer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PushEventKind {
    GroupAdded,
    GroupChanged,
    GroupRemoved,
    DeviceAdded,
    DeviceChanged,
    DeviceRemoved,
    HomeChanged,
}

/// One event as it appears on the wire, before typing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPushEvent {
    pub push_event_type: String,
    #[serde(default)]
    pub device: Option<Value>,
    #[serde(default)]
    pub group: Option<Value>,
    #[serde(default)]
    pub home: Option<Value>,
    /// Some removal events carry the id here instead of in the payload.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventBatch {
    #[serde(default)]
    events: IndexMap<String, RawPushEvent>,
}

/// A typed push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    GroupAdded(Group),
    GroupChanged(Group),
    GroupRemoved { id: String },
    DeviceAdded(Device),
    DeviceChanged(Device),
    DeviceRemoved { id: String },
    HomeChanged(Home),
    /// A kind this crate does not handle (clients, security journal, ...).
    Unknown { kind: String },
    /// A known kind whose payload could not be used.
    Malformed { kind: String, reason: String },
}

impl PushEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::GroupAdded(_) => "GROUP_ADDED",
            Self::GroupChanged(_) => "GROUP_CHANGED",
            Self::GroupRemoved { .. } => "GROUP_REMOVED",
            Self::DeviceAdded(_) => "DEVICE_ADDED",
            Self::DeviceChanged(_) => "DEVICE_CHANGED",
            Self::DeviceRemoved { .. } => "DEVICE_REMOVED",
            Self::HomeChanged(_) => "HOME_CHANGED",
            Self::Unknown { kind } | Self::Malformed { kind, .. } => kind,
        }
    }
}

impl From<RawPushEvent> for PushEvent {
    fn from(raw: RawPushEvent) -> Self {
        let Ok(kind) = PushEventKind::from_str(&raw.push_event_type) else {
            return Self::Unknown {
                kind: raw.push_event_type,
            };
        };
        let kind_name = raw.push_event_type;

        let typed = match kind {
            PushEventKind::GroupAdded => payload(raw.group, "group").map(Self::GroupAdded),
            PushEventKind::GroupChanged => payload(raw.group, "group").map(Self::GroupChanged),
            PushEventKind::DeviceAdded => payload(raw.device, "device").map(Self::DeviceAdded),
            PushEventKind::DeviceChanged => {
                payload(raw.device, "device").map(Self::DeviceChanged)
            }
            PushEventKind::HomeChanged => payload(raw.home, "home").map(Self::HomeChanged),
            PushEventKind::GroupRemoved => {
                removed_id(raw.group.as_ref(), raw.id).map(|id| Self::GroupRemoved { id })
            }
            PushEventKind::DeviceRemoved => {
                removed_id(raw.device.as_ref(), raw.id).map(|id| Self::DeviceRemoved { id })
            }
        };

        typed.unwrap_or_else(|reason| Self::Malformed {
            kind: kind_name,
            reason,
        })
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    value: Option<Value>,
    field: &str,
) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing {field} payload"))?;
    serde_json::from_value(value).map_err(|e| format!("invalid {field} payload: {e}"))
}

fn removed_id(payload: Option<&Value>, top_level: Option<String>) -> Result<String, String> {
    payload
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or(top_level)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| "missing id".to_owned())
}

/// Parse one inbound frame into its events, in batch order.
///
/// Only a frame that is not a JSON object with an `events` map fails as a
/// whole; individual unusable events come back as
/// [`PushEvent::Malformed`] or [`PushEvent::Unknown`].
pub fn parse_event_batch(text: &str) -> Result<Vec<PushEvent>, serde_json::Error> {
    let batch: EventBatch = serde_json::from_str(text)?;
    Ok(batch.events.into_values().map(PushEvent::from).collect())
}
