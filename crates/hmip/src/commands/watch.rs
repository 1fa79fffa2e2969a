//! `hmip watch`: bootstrap, then follow the event stream and log every
//! handler callback until Ctrl-C.

use std::sync::Arc;

use tracing::{debug, info, warn};

use hmip_core::{
    ConnectionState, Device, DeviceContext, DeviceHandler, GroupMap, HandlerRegistry, Home,
    RegistryChange, StateSynchronizer,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config::{self, Config};
use crate::error::CliError;

/// Device type tags bound by default.
pub const DEFAULT_TYPES: &[&str] = &[
    "BRAND_DIMMER",
    "BRAND_SHUTTER",
    "BRAND_SWITCH_MEASURING",
    "DOOR_LOCK_DRIVE",
    "FULL_FLUSH_DIMMER",
    "FULL_FLUSH_SHUTTER",
    "FULL_FLUSH_SWITCH_MEASURING",
    "HEATING_THERMOSTAT",
    "HEATING_THERMOSTAT_COMPACT",
    "MOTION_DETECTOR_INDOOR",
    "PLUGABLE_SWITCH",
    "PLUGABLE_SWITCH_MEASURING",
    "PRESENCE_DETECTOR_INDOOR",
    "PUSH_BUTTON",
    "SHUTTER_CONTACT",
    "SHUTTER_CONTACT_INVISIBLE",
    "SMOKE_DETECTOR",
    "TEMPERATURE_HUMIDITY_SENSOR_DISPLAY",
    "TEMPERATURE_HUMIDITY_SENSOR_OUTDOOR",
    "WALL_MOUNTED_THERMOSTAT_PRO",
];

/// Logs every callback it receives.
struct LoggingHandler {
    device_id: String,
    device_type: String,
}

impl DeviceHandler for LoggingHandler {
    fn register(&self) {
        info!(device_id = %self.device_id, device_type = %self.device_type, "handler registered");
    }

    fn update_device(&self, home: &Home, device: Option<&Device>, groups: &GroupMap) {
        match device {
            Some(device) => info!(
                device_id = %self.device_id,
                label = device.name(),
                channels = device.functional_channels.len(),
                groups = groups.values().filter(|g| g.contains_device(&self.device_id)).count(),
                "device update"
            ),
            None => info!(
                device_id = %self.device_id,
                connected = ?home.connected,
                "home update"
            ),
        }
    }

    fn unregister(&self) {
        info!(device_id = %self.device_id, "handler unregistered");
    }
}

pub fn logging_handlers<'a>(extra: impl IntoIterator<Item = &'a str>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for tag in DEFAULT_TYPES.iter().copied().chain(extra) {
        registry.register(tag, |ctx: &DeviceContext, _: &Device| {
            Arc::new(LoggingHandler {
                device_id: ctx.device_id.clone(),
                device_type: ctx.device_type.clone(),
            }) as Arc<dyn DeviceHandler>
        });
    }
    registry
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts, config: &Config) -> Result<(), CliError> {
    let config::Resolved {
        mut connector, ..
    } = config::resolve_paired(global, config)?;
    connector.resync_on_reconnect |= args.resync;

    let handlers = logging_handlers(args.types.iter().map(String::as_str));
    let sync = StateSynchronizer::from_config(&connector, handlers)?;

    let report = sync.bootstrap().await?;
    info!(
        devices = report.devices,
        bound = report.bound,
        unsupported = report.unsupported.len(),
        "bootstrapped"
    );
    sync.subscribe()?;

    let mut states = sync.connection_state();
    let mut devices = sync.registry().devices();
    let mut groups = sync.registry().groups();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(changes) = devices.changed() => {
                for change in &changes {
                    log_change("device", change);
                }
            }
            Some(changes) = groups.changed() => {
                for change in &changes {
                    log_change("group", change);
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Reconnecting { attempt } => {
                        warn!(attempt, "event stream lost, reconnecting");
                    }
                    other => info!(state = %other, "event stream"),
                }
            }
        }
    }

    info!("shutting down");
    sync.shutdown().await;
    Ok(())
}

fn log_change<T: hmip_core::Identified>(kind: &str, change: &RegistryChange<T>) {
    let what = match change {
        RegistryChange::Added(_) => "added",
        RegistryChange::Updated(_) => "updated",
        RegistryChange::Removed(_) => "removed",
    };
    debug!(kind, id = change.id(), change = what, "registry change");
}
