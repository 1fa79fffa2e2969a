// Typed command helpers
//
// Thin wrappers over `AccessPointClient::call` for the device and group
// operations adapters need. Each returns `Ok(true)` when the access point
// accepted the command, `Ok(false)` on a soft failure (already logged).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::{AccessPointClient, CallOptions, CallResponse};
use crate::dispatcher::{PRIORITY_DEFAULT, PRIORITY_INTERACTIVE};
use crate::error::Error;
use crate::identity::ClientCharacteristics;

/// Target state for door locks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    Open,
    Locked,
    Unlocked,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentStateRequest<'a> {
    client_characteristics: &'a ClientCharacteristics,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelTarget<'a, V: Serialize> {
    device_id: &'a str,
    channel_index: u32,
    #[serde(flatten)]
    value: V,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupTarget<'a, V: Serialize> {
    group_id: &'a str,
    #[serde(flatten)]
    value: V,
}

#[derive(Serialize)]
struct SwitchState {
    on: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DimLevel {
    dim_level: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShutterLevel {
    shutter_level: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlatsLevel {
    slats_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    shutter_level: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetPointTemperature {
    set_point_temperature: f64,
}

#[derive(Serialize)]
struct Boost {
    boost: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LockTarget<'a> {
    authorization_pin: &'a str,
    target_lock_state: LockState,
}

#[derive(Serialize)]
struct Empty {}

impl AccessPointClient {
    /// Fetch the full home state (devices, groups, home) in one call.
    pub async fn get_current_state<T: DeserializeOwned>(&self) -> Result<CallResponse<T>, Error> {
        let body = CurrentStateRequest {
            client_characteristics: self.identity().characteristics(),
        };
        self.call(
            "home/getCurrentState",
            &body,
            CallOptions::default().with_priority(PRIORITY_DEFAULT),
        )
        .await
    }

    pub async fn set_switch_state(&self, device_id: &str, channel: u32, on: bool) -> Result<bool, Error> {
        self.channel_command("device/control/setSwitchState", device_id, channel, SwitchState { on })
            .await
    }

    /// `level` is 0.0 (off) to 1.0 (full).
    pub async fn set_dim_level(&self, device_id: &str, channel: u32, level: f64) -> Result<bool, Error> {
        self.channel_command(
            "device/control/setDimLevel",
            device_id,
            channel,
            DimLevel { dim_level: level },
        )
        .await
    }

    /// `level` is 0.0 (open) to 1.0 (closed).
    pub async fn set_shutter_level(
        &self,
        device_id: &str,
        channel: u32,
        level: f64,
    ) -> Result<bool, Error> {
        self.channel_command(
            "device/control/setShutterLevel",
            device_id,
            channel,
            ShutterLevel {
                shutter_level: level,
            },
        )
        .await
    }

    pub async fn stop_shutter(&self, device_id: &str, channel: u32) -> Result<bool, Error> {
        self.channel_command("device/control/stop", device_id, channel, Empty {})
            .await
    }

    pub async fn set_slats_level(
        &self,
        device_id: &str,
        channel: u32,
        slats_level: f64,
        shutter_level: Option<f64>,
    ) -> Result<bool, Error> {
        self.channel_command(
            "device/control/setSlatsLevel",
            device_id,
            channel,
            SlatsLevel {
                slats_level,
                shutter_level,
            },
        )
        .await
    }

    /// Requires a PIN when the access point has one configured.
    pub async fn set_lock_state(
        &self,
        device_id: &str,
        channel: u32,
        state: LockState,
        pin: &str,
    ) -> Result<bool, Error> {
        self.channel_command(
            "device/control/setLockState",
            device_id,
            channel,
            LockTarget {
                authorization_pin: pin,
                target_lock_state: state,
            },
        )
        .await
    }

    pub async fn set_point_temperature(&self, group_id: &str, temperature: f64) -> Result<bool, Error> {
        self.group_command(
            "group/heating/setSetPointTemperature",
            group_id,
            SetPointTemperature {
                set_point_temperature: temperature,
            },
        )
        .await
    }

    pub async fn set_boost(&self, group_id: &str, boost: bool) -> Result<bool, Error> {
        self.group_command("group/heating/setBoost", group_id, Boost { boost })
            .await
    }

    async fn channel_command<V: Serialize + Sync>(
        &self,
        path: &str,
        device_id: &str,
        channel: u32,
        value: V,
    ) -> Result<bool, Error> {
        let body = ChannelTarget {
            device_id,
            channel_index: channel,
            value,
        };
        self.command(path, &body).await
    }

    async fn group_command<V: Serialize + Sync>(
        &self,
        path: &str,
        group_id: &str,
        value: V,
    ) -> Result<bool, Error> {
        let body = GroupTarget { group_id, value };
        self.command(path, &body).await
    }

    async fn command(&self, path: &str, body: &(impl Serialize + Sync)) -> Result<bool, Error> {
        let response = self
            .call::<serde_json::Value>(
                path,
                body,
                CallOptions::default().with_priority(PRIORITY_INTERACTIVE),
            )
            .await?;
        Ok(response.is_success())
    }
}
