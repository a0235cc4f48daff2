//! Seams between the gateway components.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{BroadcastSummary, Credentials, ReminderCriterion, TransportEvent};

/// A connection to the external chat network.
///
/// `connect` opens one session and returns the stream of events for it.
/// The stream ends (or yields `Closed`) when the session is over; the caller
/// decides whether to connect again.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Send a text message to a canonical network address.
    async fn send_text(&self, address: &str, text: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Durable storage for the authentication session.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credentials>>;
    fn save(&self, credentials: &Credentials) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Read-only view of the external data store used by the reminder job.
#[async_trait]
pub trait ReminderSource: Send + Sync {
    /// Recipients with a contact address and no activity record dated in
    /// `[period_start, period_end)`.
    async fn pending_reminders(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<ReminderCriterion>>;
}

/// Fan-out of one message to many recipients.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, recipients: Vec<String>, message: String)
        -> Result<BroadcastSummary>;
}
