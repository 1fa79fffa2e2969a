// ── Device handler bindings ──
//
// The presentation layer plugs in here. A `HandlerRegistry` maps device
// type tags to constructors; the synchronizer calls the constructor once
// per recognized device and drives the resulting handler through
// `register` / `update_device` / `unregister`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hmip_api::AccessPointClient;

use crate::model::{Device, Home};
use crate::store::GroupMap;

/// Presents one device to the outside world.
///
/// Callbacks run synchronously on the synchronizer's event task and must
/// not block. To send commands, spawn onto the runtime with the client from
/// [`DeviceContext`].
pub trait DeviceHandler: Send + Sync {
    /// Called once after construction, before the first update.
    fn register(&self) {}

    /// Fresh state for this device. `device` is `None` when only the home
    /// record changed.
    fn update_device(&self, home: &Home, device: Option<&Device>, groups: &GroupMap);

    /// The device disappeared from the access point.
    fn unregister(&self) {}
}

/// What a handler constructor gets to work with.
#[derive(Clone)]
pub struct DeviceContext {
    pub device_id: String,
    pub device_type: String,
    pub client: Arc<AccessPointClient>,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device_id", &self.device_id)
            .field("device_type", &self.device_type)
            .finish_non_exhaustive()
    }
}

pub type HandlerFactory =
    Arc<dyn Fn(&DeviceContext, &Device) -> Arc<dyn DeviceHandler> + Send + Sync>;

/// Device type tag → handler constructor.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for one device type tag. Replaces any
    /// previous constructor for the same tag.
    pub fn register<F>(&mut self, device_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&DeviceContext, &Device) -> Arc<dyn DeviceHandler> + Send + Sync + 'static,
    {
        self.factories.insert(device_type.into(), Arc::new(factory));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, device_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&DeviceContext, &Device) -> Arc<dyn DeviceHandler> + Send + Sync + 'static,
    {
        self.register(device_type, factory);
        self
    }

    pub fn supports(&self, device_type: &str) -> bool {
        self.factories.contains_key(device_type)
    }

    pub(crate) fn factory(&self, device_type: &str) -> Option<&HandlerFactory> {
        self.factories.get(device_type)
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

/// One live device-id → handler association. At most one per id.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) device_type: String,
    pub(crate) handler: Arc<dyn DeviceHandler>,
}
