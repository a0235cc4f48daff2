//! Connection manager. Owns the single chat session and its state machine.
//!
//! The manager runs as one task and is the only holder of the
//! `watch::Sender` for the connection snapshot, so it is the sole writer of
//! connection state by construction. Everyone else gets a cloneable
//! [`ConnectionHandle`] that can only read.
//!
//! ```text
//! Disconnected ─► Connecting ─► AwaitingProvisioning ─► Connected
//!                     ▲                                    │
//!                     └──────── transient close ◄──────────┤
//!                                                          ▼
//!                                                      LoggedOut
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use nudge_core::config::ConnectionConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::{CredentialStore, Transport};
use nudge_core::types::{
    CloseReason, ConnectionSnapshot, ConnectionState, ProvisioningCode, TransportEvent,
};

/// Reconnect and provisioning policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// None = retry forever.
    pub max_attempts: Option<u32>,
    /// None = wait for a scan forever.
    pub provisioning_timeout: Option<Duration>,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            delay: Duration::from_secs(config.reconnect_delay_secs),
            max_attempts: config.max_reconnect_attempts,
            provisioning_timeout: config.provisioning_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

/// Requests the manager accepts while parked.
#[derive(Debug)]
enum Command {
    Reconnect,
}

/// How one session ended.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    LoggedOut,
    Transient(String),
}

/// Owns the transport session, the credentials and the connection state.
pub struct ConnectionManager {
    worker: Worker,
    handle: ConnectionHandle,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, snapshot) = watch::channel(ConnectionSnapshot::default());
        let (command_tx, commands) = mpsc::channel(1);
        let handle = ConnectionHandle {
            snapshot,
            transport: transport.clone(),
            commands: command_tx,
        };
        let worker = Worker {
            transport,
            store,
            policy,
            state,
            commands,
            attempts: 0,
        };
        Self { worker, handle }
    }

    /// A read-only handle for other components.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Move the manager into its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drive sessions until every [`ConnectionHandle`] is gone: reconnect
    /// after transient closes, park on logout (or exhausted attempts) until
    /// a reconnect is requested.
    pub async fn run(self) {
        let Self { worker, handle } = self;
        // Only handles given out by `handle()` may keep the command channel open.
        drop(handle);
        worker.run().await;
    }
}

/// The task side of the manager; sole holder of the state sender.
struct Worker {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionSnapshot>,
    commands: mpsc::Receiver<Command>,
    attempts: u32,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.run_until_parked().await;

            tracing::info!(
                "🅿️ Connection parked in '{}' — waiting for a reconnect request",
                self.state.borrow().state
            );
            match self.commands.recv().await {
                Some(Command::Reconnect) => {
                    tracing::info!("🔄 Manual reconnect requested");
                    self.attempts = 0;
                }
                None => break,
            }
        }
        tracing::info!("🔌 Connection manager stopped: no handles left");
    }

    async fn run_until_parked(&mut self) {
        // Requests made before we parked are stale.
        while self.commands.try_recv().is_ok() {}

        loop {
            match self.run_session().await {
                SessionEnd::LoggedOut => {
                    if let Err(e) = self.store.clear() {
                        tracing::error!("❌ Failed to clear credentials after logout: {e}");
                    }
                    self.transition(ConnectionSnapshot::new(ConnectionState::LoggedOut));
                    tracing::warn!("🚪 Session logged out — provisioning required");
                    return;
                }
                SessionEnd::Transient(reason) => {
                    self.transition(ConnectionSnapshot::new(ConnectionState::Connecting));
                    self.attempts += 1;
                    if let Some(max) = self.policy.max_attempts
                        && self.attempts > max
                    {
                        tracing::error!(
                            "❌ Giving up after {max} reconnect attempt(s), last error: {reason}"
                        );
                        self.transition(ConnectionSnapshot::new(ConnectionState::Disconnected));
                        return;
                    }
                    tracing::warn!(
                        "⚠️ Connection lost ({reason}) — reconnecting in {:?} (attempt {})",
                        self.policy.delay,
                        self.attempts
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }

    /// `start()`: load credentials, open a session and follow it to its end.
    async fn run_session(&mut self) -> SessionEnd {
        let credentials = match self.store.load() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("⚠️ Could not load stored credentials, provisioning afresh: {e}");
                None
            }
        };
        tracing::info!(
            "🔌 Connecting via {} ({})",
            self.transport.name(),
            if credentials.is_some() { "stored credentials" } else { "no credentials" }
        );
        self.transition(ConnectionSnapshot::new(ConnectionState::Connecting));

        let mut events = match self.transport.connect(credentials).await {
            Ok(events) => events,
            Err(e) => return SessionEnd::Transient(e.to_string()),
        };

        let mut deadline: Option<tokio::time::Instant> = None;
        loop {
            let event = match deadline {
                Some(at) => tokio::select! {
                    event = events.recv() => event,
                    _ = tokio::time::sleep_until(at) => {
                        tracing::warn!("⏱️ Provisioning code was not scanned in time — restarting session");
                        if let Err(e) = self.transport.disconnect().await {
                            tracing::debug!("Disconnect after provisioning timeout: {e}");
                        }
                        return SessionEnd::Transient("provisioning timed out".into());
                    }
                },
                None => events.recv().await,
            };

            let Some(event) = event else {
                return SessionEnd::Transient("event stream ended".into());
            };

            match event {
                TransportEvent::ProvisioningCode(code) => {
                    if deadline.is_none() {
                        deadline = self
                            .policy
                            .provisioning_timeout
                            .map(|t| tokio::time::Instant::now() + t);
                    }
                    tracing::info!("📱 Provisioning code issued — scan it via GET /qr");
                    self.transition(ConnectionSnapshot::awaiting(ProvisioningCode::new(code)));
                }
                TransportEvent::Authenticated(creds) => {
                    deadline = None;
                    if let Err(e) = self.store.save(&creds) {
                        tracing::error!("❌ Failed to persist credentials: {e}");
                    }
                    self.attempts = 0;
                    self.transition(ConnectionSnapshot::new(ConnectionState::Connected));
                    tracing::info!("✅ Connected");
                }
                TransportEvent::CredentialsUpdated(creds) => {
                    if let Err(e) = self.store.save(&creds) {
                        tracing::error!("❌ Failed to persist rotated credentials: {e}");
                    }
                }
                TransportEvent::Closed(CloseReason::LoggedOut) => return SessionEnd::LoggedOut,
                TransportEvent::Closed(CloseReason::Transient(reason)) => {
                    return SessionEnd::Transient(reason);
                }
            }
        }
    }

    /// Publish a new snapshot if the lifecycle allows the edge.
    fn transition(&self, next: ConnectionSnapshot) {
        let current = self.state.borrow().state;
        if current == next.state && !matches!(current, ConnectionState::AwaitingProvisioning) {
            return;
        }
        if !current.can_transition_to(next.state) {
            tracing::warn!("Ignoring invalid transition {current} → {}", next.state);
            return;
        }
        tracing::debug!("Connection state: {current} → {}", next.state);
        self.state.send_replace(next);
    }
}

/// Cloneable, read-only view of the connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    snapshot: watch::Receiver<ConnectionSnapshot>,
    transport: Arc<dyn Transport>,
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// The current provisioning code; never served outside `AwaitingProvisioning`.
    pub fn provisioning_code(&self) -> Result<ProvisioningCode> {
        let snap = self.snapshot.borrow();
        match (&snap.state, &snap.provisioning_code) {
            (ConnectionState::AwaitingProvisioning, Some(code)) => Ok(code.clone()),
            (state, _) => Err(NudgeError::ProvisioningUnavailable(*state)),
        }
    }

    /// Wait until the state equals `target`. Returns false on timeout.
    pub async fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.snapshot.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| s.state == target))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Ask a parked manager to start a fresh connection cycle.
    pub fn request_reconnect(&self) -> Result<()> {
        let state = self.state();
        if !state.is_parked() {
            return Err(NudgeError::invalid_request(format!(
                "reconnect is only possible when disconnected or logged out (state: {state})"
            )));
        }
        match self.commands.try_send(Command::Reconnect) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(NudgeError::Other("connection manager stopped".into()))
            }
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
