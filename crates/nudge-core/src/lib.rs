//! # Nudge Core
//! Shared error type, configuration, domain types and the traits that
//! separate the gateway's components from each other.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::NudgeConfig;
pub use error::{NudgeError, Result};
pub use types::{
    BroadcastSummary, CloseReason, ConnectionSnapshot, ConnectionState, Credentials,
    OutboundJob, ProvisioningCode, ReminderCriterion, TransportEvent,
};
