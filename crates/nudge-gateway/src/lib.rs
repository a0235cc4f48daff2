//! # Nudge Gateway
//! HTTP control API: status, provisioning code, send, broadcast.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, resolve_api_key, start};
