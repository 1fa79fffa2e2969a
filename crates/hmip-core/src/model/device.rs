// ── Device domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One sub-addressable facet of a device (e.g. one button of a remote).
///
/// Only the routing fields are typed; state fields (`on`, `dimLevel`,
/// `shutterLevel`, `valveActualTemperature`, ...) stay in `fields` so
/// adapters can read whatever their device type reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionalChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_channel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FunctionalChannel {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Fields reported in `delta` overwrite; unreported ones keep.
    pub fn merge(&mut self, delta: Self) {
        merge_option(&mut self.functional_channel_type, delta.functional_channel_type);
        merge_option(&mut self.index, delta.index);
        merge_option(&mut self.groups, delta.groups);
        self.fields.extend(delta.fields);
    }
}

/// A physical HomematicIP device as reported by the access point.
///
/// Every field except `id` is optional: event deltas may report any
/// subset, and an absent field means "not reported", never "cleared".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default)]
    pub id: String,
    /// Type tag used to pick a handler, e.g. `PLUGABLE_SWITCH_MEASURING`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_update: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanently_reachable: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functional_channels: BTreeMap<String, FunctionalChannel>,
    /// Everything else the access point sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn device_type(&self) -> Option<&str> {
        self.device_type.as_deref()
    }

    /// Channel by index key (`"0"`, `"1"`, ...).
    pub fn channel(&self, index: u32) -> Option<&FunctionalChannel> {
        self.functional_channels.get(&index.to_string())
    }

    /// Display name: label if set, otherwise the id.
    pub fn name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Fold a partial update into this record.
    ///
    /// Present fields overwrite, absent fields keep their value. Applying
    /// the same delta twice yields the same record as applying it once.
    pub fn merge(&mut self, delta: Self) {
        if !delta.id.is_empty() {
            self.id = delta.id;
        }
        merge_option(&mut self.device_type, delta.device_type);
        merge_option(&mut self.label, delta.label);
        merge_option(&mut self.model_type, delta.model_type);
        merge_option(&mut self.oem, delta.oem);
        merge_option(&mut self.firmware_version, delta.firmware_version);
        merge_option(&mut self.last_status_update, delta.last_status_update);
        merge_option(&mut self.permanently_reachable, delta.permanently_reachable);
        for (key, channel) in delta.functional_channels {
            match self.functional_channels.get_mut(&key) {
                Some(existing) => existing.merge(channel),
                None => {
                    self.functional_channels.insert(key, channel);
                }
            }
        }
        self.extra.extend(delta.extra);
    }
}

pub(crate) fn merge_option<T>(slot: &mut Option<T>, delta: Option<T>) {
    if delta.is_some() {
        *slot = delta;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn device(value: Value) -> Device {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn deserializes_typed_and_extra_fields() {
        let d = device(json!({
            "id": "3014F711A000000000000001",
            "type": "PLUGABLE_SWITCH",
            "label": "Coffee",
            "updateState": "UP_TO_DATE",
            "functionalChannels": {
                "1": { "functionalChannelType": "SWITCH_CHANNEL", "index": 1, "on": true }
            }
        }));
        assert_eq!(d.device_type(), Some("PLUGABLE_SWITCH"));
        assert_eq!(d.name(), "Coffee");
        assert_eq!(d.extra["updateState"], "UP_TO_DATE");
        assert_eq!(d.channel(1).unwrap().field("on"), Some(&json!(true)));
    }

    #[test]
    fn merge_keeps_unreported_fields() {
        let mut d = device(json!({
            "id": "d1", "type": "PLUGABLE_SWITCH", "label": "Coffee",
            "functionalChannels": { "1": { "index": 1, "on": true, "profileMode": "AUTOMATIC" } }
        }));
        d.merge(device(json!({
            "id": "d1",
            "functionalChannels": { "1": { "on": false } }
        })));

        assert_eq!(d.label.as_deref(), Some("Coffee"));
        let ch = d.channel(1).unwrap();
        assert_eq!(ch.field("on"), Some(&json!(false)));
        assert_eq!(ch.field("profileMode"), Some(&json!("AUTOMATIC")));
        assert_eq!(ch.index, Some(1));
    }

    #[test]
    fn explicit_falsy_values_overwrite() {
        let mut d = device(json!({ "id": "d1", "permanentlyReachable": true }));
        d.merge(device(json!({ "id": "d1", "permanentlyReachable": false })));
        assert_eq!(d.permanently_reachable, Some(false));
    }

    #[test]
    fn merge_is_idempotent() {
        let base = device(json!({ "id": "d1", "label": "a", "functionalChannels": { "0": { "x": 1 } } }));
        let delta = device(json!({ "id": "d1", "label": "b", "functionalChannels": { "0": { "x": 2 }, "1": { "y": 3 } } }));

        let mut once = base.clone();
        once.merge(delta.clone());
        let mut twice = base;
        twice.merge(delta.clone());
        twice.merge(delta);
        assert_eq!(once, twice);
    }
}
