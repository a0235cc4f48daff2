//! WebSocket bridge transport, the production path to the chat network.
pub mod client;
pub mod protocol;

pub use client::BridgeTransport;
