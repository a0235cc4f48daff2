//! Outbound dispatcher: one lane, one network call at a time.
//!
//! Every outbound message (single sends and broadcast batches alike) goes
//! through a single worker task fed by a bounded queue. The worker keeps a
//! minimum gap between consecutive network calls, so a single send that
//! arrives mid-broadcast waits its turn instead of slipping past the pacing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use nudge_core::config::DispatchConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::Broadcaster;
use nudge_core::types::{BroadcastSummary, ConnectionState, OutboundJob};

use crate::address::AddressFormat;
use crate::connection::ConnectionHandle;

/// Work accepted by the lane.
enum DispatchRequest {
    Send {
        job: OutboundJob,
        reply: oneshot::Sender<Result<String>>,
    },
    Broadcast {
        recipients: Vec<String>,
        message: String,
        reply: oneshot::Sender<BroadcastSummary>,
    },
}

/// Lifetime counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: AtomicU64,
    failed: AtomicU64,
    broadcasts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub broadcasts: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

/// The lane worker. Create with [`Dispatcher::new`], then [`Dispatcher::spawn`].
pub struct Dispatcher {
    connection: ConnectionHandle,
    format: AddressFormat,
    pacing: Duration,
    requests: mpsc::Receiver<DispatchRequest>,
    stats: Arc<DispatchStats>,
    last_call: Option<Instant>,
}

impl Dispatcher {
    pub fn new(connection: ConnectionHandle, config: &DispatchConfig) -> (Self, DispatcherHandle) {
        let (tx, requests) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let handle = DispatcherHandle {
            requests: tx,
            connection: connection.clone(),
            stats: stats.clone(),
        };
        let dispatcher = Self {
            connection,
            format: AddressFormat::from_config(config),
            pacing: Duration::from_millis(config.pacing_ms),
            requests,
            stats,
            last_call: None,
        };
        (dispatcher, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!("📤 Dispatcher lane started (pacing: {:?})", self.pacing);
        while let Some(request) = self.requests.recv().await {
            match request {
                DispatchRequest::Send { job, reply } => {
                    let result = self.deliver(job).await;
                    let _ = reply.send(result);
                }
                DispatchRequest::Broadcast {
                    recipients,
                    message,
                    reply,
                } => {
                    let summary = self.run_broadcast(recipients, message).await;
                    let _ = reply.send(summary);
                }
            }
        }
        tracing::info!("📤 Dispatcher lane stopped");
    }

    /// Deliver one job. Returns the canonical address it went to.
    async fn deliver(&mut self, mut job: OutboundJob) -> Result<String> {
        let result = self.try_deliver(&job).await;
        job.attempts += 1;
        match &result {
            Ok(address) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("✅ Sent to {address}");
            }
            Err(e) => {
                job.last_error = Some(e.to_string());
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "⚠️ Send to '{}' failed after {} attempt(s): {e}",
                    job.recipient,
                    job.attempts
                );
            }
        }
        result
    }

    async fn try_deliver(&mut self, job: &OutboundJob) -> Result<String> {
        let address = self.format.normalize(&job.recipient)?;
        let state = self.connection.state();
        if !self.connection.is_connected() {
            return Err(NudgeError::NotConnected(state));
        }

        self.pace().await;
        let result = self
            .connection
            .transport()
            .send_text(&address, &job.message)
            .await;
        self.last_call = Some(Instant::now());

        match result {
            Ok(()) => Ok(address),
            Err(e @ NudgeError::SendFailed { .. }) => Err(e),
            Err(other) => Err(NudgeError::send_failed(address, other.to_string())),
        }
    }

    async fn run_broadcast(&mut self, recipients: Vec<String>, message: String) -> BroadcastSummary {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        tracing::info!("📣 Broadcast to {} recipient(s)", recipients.len());

        let mut summary = BroadcastSummary::default();
        for recipient in recipients {
            match self.deliver(OutboundJob::new(recipient, message.clone())).await {
                Ok(_) => summary.sent += 1,
                Err(_) => summary.failed += 1,
            }
        }

        tracing::info!(
            "📣 Broadcast finished: {} sent, {} failed",
            summary.sent,
            summary.failed
        );
        summary
    }

    /// Hold until `pacing` has elapsed since the previous network call.
    async fn pace(&self) {
        if let Some(last) = self.last_call {
            tokio::time::sleep_until(last + self.pacing).await;
        }
    }
}

/// Cloneable submission side of the lane.
#[derive(Clone)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<DispatchRequest>,
    connection: ConnectionHandle,
    stats: Arc<DispatchStats>,
}

impl DispatcherHandle {
    /// Send one message. Fails fast when the session is not connected.
    pub async fn send_one(
        &self,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<String> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        let job = OutboundJob::new(recipient.into(), message.into());
        self.submit(DispatchRequest::Send { job, reply }).await?;
        rx.await
            .map_err(|_| NudgeError::Dispatcher("dispatcher dropped the request".into()))?
    }

    /// Send the same message to every recipient, one after another.
    pub async fn broadcast(
        &self,
        recipients: Vec<String>,
        message: impl Into<String>,
    ) -> Result<BroadcastSummary> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        self.submit(DispatchRequest::Broadcast {
            recipients,
            message: message.into(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| NudgeError::Dispatcher("dispatcher dropped the request".into()))
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.connection.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::LoggedOut => Err(NudgeError::LoggedOut),
            state => Err(NudgeError::NotConnected(state)),
        }
    }

    async fn submit(&self, request: DispatchRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| NudgeError::Dispatcher("dispatcher is not running".into()))
    }
}

#[async_trait]
impl Broadcaster for DispatcherHandle {
    async fn broadcast(&self, recipients: Vec<String>, message: String) -> Result<BroadcastSummary> {
        DispatcherHandle::broadcast(self, recipients, message).await
    }
}
