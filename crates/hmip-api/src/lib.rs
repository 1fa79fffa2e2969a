// hmip-api: Async Rust client for HomematicIP access points
//
// Discovery, pairing, rate-limited REST commands and the push event
// stream. No state is kept here beyond credentials and resolved
// endpoints; the device model lives in `hmip-core`.

pub mod client;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod pairing;
pub mod transport;
pub mod websocket;

pub use client::{AccessPointClient, CallOptions, CallResponse, DEFAULT_LOOKUP_URL};
pub use commands::LockState;
pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherConfig, DispatcherEvent, InvalidLimit, PRIORITY_BACKGROUND,
    PRIORITY_CRITICAL, PRIORITY_DEFAULT, PRIORITY_INTERACTIVE,
};
pub use error::Error;
pub use identity::{AccessPointIdentity, ClientCharacteristics, Credentials, Endpoints};
pub use pairing::{PairingConfig, PairingError, PairingFlow, PairingOutcome, PairingState};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{ConnectionState, Dial, EventStream, StreamConfig, TungsteniteDialer};
