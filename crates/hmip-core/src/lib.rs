//! State synchronization between a HomematicIP access point and device
//! handlers.
//!
//! - **[`StateSynchronizer`]** -- Central facade.
//!   [`bootstrap()`](StateSynchronizer::bootstrap) resolves endpoints, fetches
//!   the full state and binds every recognized device to a handler;
//!   [`subscribe()`](StateSynchronizer::subscribe) opens the push channel and
//!   applies events as they arrive.
//!
//! - **[`DeviceRegistry`]** -- Concurrent in-memory mirror of devices, groups
//!   and the home record, built on `EntityCollection<T>` (`DashMap` +
//!   `tokio::sync::watch`). [`RegistryWatch`] turns its snapshots into
//!   per-record [`RegistryChange`]s.
//!
//! - **[`HandlerRegistry`]** / **[`DeviceHandler`]** -- The seam where a
//!   presentation layer plugs in: one constructor per device type tag.
//!
//! - **Domain model** ([`model`]) -- `Device`, `Group`, `Home` and the push
//!   event variants that patch them.

pub mod binding;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;
pub mod synchronizer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use binding::{DeviceContext, DeviceHandler, HandlerFactory, HandlerRegistry};
pub use config::ConnectorConfig;
pub use error::CoreError;
pub use store::{DeviceRegistry, GroupMap};
pub use stream::{Identified, RegistryChange, RegistryChangeStream, RegistryWatch};
pub use synchronizer::{BootstrapReport, EventOutcome, StateSynchronizer, SyncOptions};

pub use model::{
    CurrentState, Device, FunctionalChannel, Group, GroupChannel, Home, HomeState, PushEvent,
    PushEventKind,
};

// The connection layer, re-exported so embedders need a single dependency.
pub use hmip_api::{
    AccessPointClient, ConnectionState, DispatcherConfig, LockState, PairingConfig, StreamConfig,
    TlsMode,
};
