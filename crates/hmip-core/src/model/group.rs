// ── Group domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference from a group to one device channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChannel {
    pub device_id: String,
    pub channel_index: u32,
}

/// A group of device channels (room heating, security zone, ...).
///
/// Groups are replaced wholesale on every add/change event, so the stored
/// record always equals the last one reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub group_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_update: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<GroupChannel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Group {
    pub fn group_type(&self) -> Option<&str> {
        self.group_type.as_deref()
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.channels.iter().any(|c| c.device_id == device_id)
    }
}
