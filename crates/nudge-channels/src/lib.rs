//! # Nudge Channels
//! The chat network side of Nudge: transports, the credential store, the
//! connection state machine and the outbound dispatch lane.

pub mod address;
pub mod bridge;
pub mod connection;
pub mod credentials;
pub mod dispatcher;
pub mod loopback;

pub use address::AddressFormat;
pub use bridge::BridgeTransport;
pub use connection::{ConnectionHandle, ConnectionManager, ReconnectPolicy};
pub use credentials::SqliteCredentialStore;
pub use dispatcher::{DispatchStatsSnapshot, Dispatcher, DispatcherHandle};
pub use loopback::LoopbackTransport;
