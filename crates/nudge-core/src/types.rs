//! Domain types shared by every gateway component.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the single logical chat connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or reconnect attempts exhausted.
    #[default]
    Disconnected,
    /// Opening (or re-opening) the network session.
    Connecting,
    /// Waiting for a human to scan the provisioning code.
    AwaitingProvisioning,
    /// Authenticated; sends are allowed.
    Connected,
    /// Explicitly de-authorized. Terminal until a manual reconnect.
    LoggedOut,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingProvisioning => "awaiting_provisioning",
            ConnectionState::Connected => "connected",
            ConnectionState::LoggedOut => "logged_out",
        }
    }

    /// States the connection manager parks in until asked to reconnect.
    pub fn is_parked(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::LoggedOut)
    }

    /// Whether `self → next` is an edge of the lifecycle.
    ///
    /// Self-loops on `Connecting` and `AwaitingProvisioning` are allowed:
    /// a failed connect retries from `Connecting`, and providers rotate
    /// provisioning codes while waiting.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, Connecting | AwaitingProvisioning | Connected | Disconnected | LoggedOut) => {
                true
            }
            (
                AwaitingProvisioning,
                AwaitingProvisioning | Connected | Connecting | Disconnected | LoggedOut,
            ) => true,
            (Connected, Connecting | LoggedOut) => true,
            (LoggedOut, Connecting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short-lived token a human transfers out-of-band to authorize the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningCode {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl ProvisioningCode {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
        }
    }
}

/// What every reader sees of the connection: state plus the code that is
/// only ever present while awaiting provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub provisioning_code: Option<ProvisioningCode>,
    pub since: DateTime<Utc>,
}

impl ConnectionSnapshot {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            provisioning_code: None,
            since: Utc::now(),
        }
    }

    pub fn awaiting(code: ProvisioningCode) -> Self {
        Self {
            state: ConnectionState::AwaitingProvisioning,
            provisioning_code: Some(code),
            since: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

/// Opaque provider authentication state plus its rotating keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub blob: serde_json::Value,
    #[serde(default)]
    pub keys: BTreeMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(blob: serde_json::Value) -> Self {
        Self {
            blob,
            keys: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_key(mut self, id: impl Into<String>, value: serde_json::Value) -> Self {
        self.keys.insert(id.into(), value);
        self
    }
}

/// Why the provider closed the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit de-authorization (e.g. the device was unlinked).
    LoggedOut,
    /// Anything else: network loss, server restart, stream error.
    Transient(String),
}

/// Events a transport reports to the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ProvisioningCode(String),
    Authenticated(Credentials),
    CredentialsUpdated(Credentials),
    Closed(CloseReason),
}

/// One recipient's share of a send or broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundJob {
    pub recipient: String,
    pub message: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboundJob {
    pub fn new(recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            message: message.into(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// Aggregate outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSummary {
    pub sent: usize,
    pub failed: usize,
}

impl BroadcastSummary {
    pub fn total(&self) -> usize {
        self.sent + self.failed
    }
}

/// A recipient that has no qualifying activity record in the current period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderCriterion {
    pub recipient_name: String,
    pub recipient_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&AwaitingProvisioning).unwrap();
        assert_eq!(json, "\"awaiting_provisioning\"");
        let back: ConnectionState = serde_json::from_str("\"logged_out\"").unwrap();
        assert_eq!(back, LoggedOut);
        assert_eq!(Connected.to_string(), "connected");
    }

    #[test]
    fn test_lifecycle_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(AwaitingProvisioning));
        assert!(AwaitingProvisioning.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(LoggedOut));
        assert!(LoggedOut.can_transition_to(Connecting));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(AwaitingProvisioning));
        assert!(!LoggedOut.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_parked_states() {
        assert!(Disconnected.is_parked());
        assert!(LoggedOut.is_parked());
        assert!(!Connecting.is_parked());
        assert!(!Connected.is_parked());
    }

    #[test]
    fn test_snapshot_only_carries_code_while_awaiting() {
        let snap = ConnectionSnapshot::awaiting(ProvisioningCode::new("abc"));
        assert_eq!(snap.state, AwaitingProvisioning);
        assert!(snap.provisioning_code.is_some());

        let snap = ConnectionSnapshot::new(Connected);
        assert!(snap.provisioning_code.is_none());
        assert!(snap.is_connected());
    }

    #[test]
    fn test_credentials_keys_roundtrip() {
        let creds = Credentials::new(serde_json::json!({"me": "628111"}))
            .with_key("pre-key-1", serde_json::json!("AAAA"));
        let json = serde_json::to_string(&creds).unwrap();
        let back: Credentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back, creds);
    }
}
