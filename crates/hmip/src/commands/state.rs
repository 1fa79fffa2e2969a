//! `hmip state`: one-shot full fetch, printed as a summary.

use serde::Serialize;

use hmip_api::CallResponse;
use hmip_core::{CoreError, CurrentState, Device, Group};

use crate::cli::{GlobalOpts, StateArgs};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct DeviceRow {
    id: String,
    #[serde(rename = "type")]
    device_type: String,
    label: String,
    firmware: String,
}

#[derive(Serialize)]
struct GroupRow {
    id: String,
    #[serde(rename = "type")]
    group_type: String,
    label: String,
    channels: usize,
}

#[derive(Serialize)]
struct StateSummary {
    access_point: String,
    devices: Vec<DeviceRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<Vec<GroupRow>>,
}

pub async fn handle(args: StateArgs, global: &GlobalOpts, config: &Config) -> Result<(), CliError> {
    let resolved = config::resolve_paired(global, config)?;
    let client = resolved.connector.build_client()?;
    client.lookup().await.map_err(CoreError::from)?;

    let state = match client
        .get_current_state::<CurrentState>()
        .await
        .map_err(CoreError::from)?
    {
        CallResponse::Data(state) => state,
        CallResponse::Accepted => {
            return Err(CoreError::IncompleteState { missing: "devices" }.into());
        }
        CallResponse::Failed { status, body } => {
            return Err(CliError::Rejected {
                path: "home/getCurrentState".into(),
                status,
                body,
            });
        }
    };

    let devices = state
        .devices
        .ok_or(CoreError::IncompleteState { missing: "devices" })?
        .into_iter()
        .filter_map(|(id, value)| {
            let device: Device = serde_json::from_value(value)
                .inspect_err(|e| tracing::warn!(device_id = %id, error = %e, "skipping device"))
                .ok()?;
            Some(DeviceRow {
                label: device.label.unwrap_or_default(),
                device_type: device.device_type.unwrap_or_default(),
                firmware: device.firmware_version.unwrap_or_default(),
                id,
            })
        })
        .collect::<Vec<_>>();

    let groups = args.groups.then(|| {
        state
            .groups
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, value)| {
                let group: Group = serde_json::from_value(value).ok()?;
                Some(GroupRow {
                    group_type: group.group_type.unwrap_or_default(),
                    label: group.label.unwrap_or_default(),
                    channels: group.channels.len(),
                    id,
                })
            })
            .collect::<Vec<_>>()
    });

    let summary = StateSummary {
        access_point: client.identity().serial().to_owned(),
        devices,
        groups,
    };

    let rendered = match global.output {
        crate::cli::OutputFormat::Plain => summary
            .devices
            .iter()
            .map(|d| d.id.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        ref format => output::render_single(format, &summary, render_text)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn render_text(summary: &StateSummary) -> String {
    let mut lines = vec![format!(
        "Access point {}: {} devices",
        summary.access_point,
        summary.devices.len()
    )];
    lines.extend(summary.devices.iter().map(|d| {
        format!("  {:<26} {:<36} {} ({})", d.id, d.device_type, d.label, d.firmware)
    }));
    if let Some(groups) = &summary.groups {
        lines.push(format!("{} groups", groups.len()));
        lines.extend(groups.iter().map(|g| {
            format!("  {:<26} {:<20} {} [{} channels]", g.id, g.group_type, g.label, g.channels)
        }));
    }
    lines.join("\n")
}
