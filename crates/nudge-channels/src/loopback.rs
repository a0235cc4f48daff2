//! In-process transport for development and tests.
//!
//! Behaves like a well-mannered network: resumes instantly with stored
//! credentials, otherwise issues a provisioning code and waits until
//! `approve()` is called. Every send is recorded instead of delivered.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::mpsc;

use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::Transport;
use nudge_core::types::{CloseReason, Credentials, TransportEvent};

#[derive(Default)]
struct Session {
    events: Option<mpsc::Sender<TransportEvent>>,
    authenticated: bool,
}

/// Scriptable loopback transport.
#[derive(Default)]
pub struct LoopbackTransport {
    session: Mutex<Session>,
    sent: Mutex<Vec<(String, String)>>,
    rejected: Mutex<HashSet<String>>,
    connects: AtomicUsize,
    codes: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the human scanning the code: authenticate the open session.
    pub fn approve(&self) -> bool {
        let creds = Credentials::new(serde_json::json!({
            "device": "loopback",
            "session": random_token(16),
        }))
        .with_key("pre-key-1", serde_json::json!(random_token(8)));
        self.emit(TransportEvent::Authenticated(creds))
    }

    /// Simulate a key rotation on a live session.
    pub fn rotate_keys(&self) -> bool {
        let creds = Credentials::new(serde_json::json!({"device": "loopback"}))
            .with_key("pre-key-2", serde_json::json!(random_token(8)));
        self.emit(TransportEvent::CredentialsUpdated(creds))
    }

    /// Simulate a network drop.
    pub fn drop_connection(&self) -> bool {
        self.close(CloseReason::Transient("loopback connection dropped".into()))
    }

    /// Simulate the device being unlinked.
    pub fn log_out(&self) -> bool {
        self.close(CloseReason::LoggedOut)
    }

    /// Make every send to `address` fail.
    pub fn reject_address(&self, address: impl Into<String>) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(address.into());
        }
    }

    /// Messages delivered so far, as (address, text).
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn codes_issued(&self) -> usize {
        self.codes.load(Ordering::SeqCst)
    }

    fn close(&self, reason: CloseReason) -> bool {
        let sent = self.emit(TransportEvent::Closed(reason));
        if let Ok(mut session) = self.session.lock() {
            session.events = None;
            session.authenticated = false;
        }
        sent
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let Ok(mut session) = self.session.lock() else {
            return false;
        };
        if matches!(event, TransportEvent::Authenticated(_)) {
            session.authenticated = true;
        }
        session
            .events
            .as_ref()
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(32);

        let resumable = credentials
            .as_ref()
            .is_some_and(|c| c.blob["revoked"] != serde_json::json!(true));
        let first = match credentials {
            Some(creds) if resumable => TransportEvent::Authenticated(creds),
            _ => {
                self.codes.fetch_add(1, Ordering::SeqCst);
                TransportEvent::ProvisioningCode(format!("2@{}", random_token(24)))
            }
        };

        let mut session = self
            .session
            .lock()
            .map_err(|e| NudgeError::transport(format!("Lock: {e}")))?;
        session.authenticated = matches!(first, TransportEvent::Authenticated(_));
        tx.try_send(first)
            .map_err(|e| NudgeError::transport(format!("loopback event: {e}")))?;
        session.events = Some(tx);
        tracing::debug!("Loopback: session opened");
        Ok(rx)
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let live = self
            .session
            .lock()
            .map(|s| s.events.is_some() && s.authenticated)
            .unwrap_or(false);
        if !live {
            return Err(NudgeError::transport("loopback session not authenticated"));
        }
        let rejected = self
            .rejected
            .lock()
            .map(|r| r.contains(address))
            .unwrap_or(false);
        if rejected {
            return Err(NudgeError::send_failed(address, "recipient not on network"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((address.to_string(), text.to_string()));
        }
        tracing::info!("📨 Loopback: {address} ← {text}");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Ok(mut session) = self.session.lock() {
            session.events = None;
            session.authenticated = false;
        }
        Ok(())
    }
}
