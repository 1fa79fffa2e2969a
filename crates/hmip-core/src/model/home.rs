// ── Home domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::device::merge_option;

/// The single home record: weather, location, access point status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Home {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ap_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Home {
    /// Same merge rules as [`Device::merge`](super::Device::merge).
    pub fn merge(&mut self, delta: Self) {
        merge_option(&mut self.id, delta.id);
        merge_option(&mut self.connected, delta.connected);
        merge_option(&mut self.current_ap_version, delta.current_ap_version);
        merge_option(&mut self.weather, delta.weather);
        merge_option(&mut self.location, delta.location);
        self.extra.extend(delta.extra);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_overwrites_reported_fields_only() {
        let mut home: Home =
            serde_json::from_value(json!({ "id": "h1", "connected": true, "dutyCycle": 8.0 }))
                .unwrap();
        let delta: Home =
            serde_json::from_value(json!({ "weather": { "temperature": 4.5 } })).unwrap();
        home.merge(delta);

        assert_eq!(home.id.as_deref(), Some("h1"));
        assert_eq!(home.connected, Some(true));
        assert_eq!(home.weather, Some(json!({ "temperature": 4.5 })));
        assert_eq!(home.extra["dutyCycle"], 8.0);
    }
}
