//! JSON frames exchanged with the network bridge.

use serde::{Deserialize, Serialize};

use nudge_core::types::{CloseReason, Credentials};

/// Close reason the bridge uses for an explicit de-authorization.
pub const LOGGED_OUT: &str = "logged_out";

/// Frames we send to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of a session; resumes when credentials are present.
    Hello { credentials: Option<Credentials> },
    Send { id: String, to: String, text: String },
}

/// Frames the bridge sends to us.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// A fresh provisioning code to render for scanning.
    Qr { code: String },
    /// Session authenticated.
    Open { credentials: Credentials },
    /// Credentials or keys rotated.
    Creds { credentials: Credentials },
    Ack {
        id: String,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Close { reason: String },
}

impl BridgeFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Map a bridge close reason onto the manager's view of it.
pub fn close_reason(reason: &str) -> CloseReason {
    if reason == LOGGED_OUT {
        CloseReason::LoggedOut
    } else {
        CloseReason::Transient(reason.to_string())
    }
}
