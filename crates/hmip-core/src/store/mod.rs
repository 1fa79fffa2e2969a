// ── Reactive device registry ──
//
// Concurrent entity storage with push-based change notification.

mod collection;
mod registry;

pub use registry::{DeviceRegistry, GroupMap};
