//! Reminder scheduler: the daily job that nudges everyone who has not
//! filed an activity record for the current month.
//!
//! Runs sequentially (sleep → tick → recompute), and every tick, scheduled
//! or manual, holds the same async mutex, so two ticks never overlap.
//! Failures are logged and reported as a [`TickOutcome`]; they never
//! escape into the host process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use nudge_core::traits::{Broadcaster, ReminderSource};
use nudge_core::types::{BroadcastSummary, ConnectionSnapshot, ConnectionState};

use crate::schedule::{DailySchedule, month_bounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotConnected,
    DayNotAllowed,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Skipped { reason: SkipReason },
    NothingToSend,
    Dispatched(BroadcastSummary),
    Failed { error: String },
}

pub struct ReminderScheduler {
    schedule: DailySchedule,
    source: Arc<dyn ReminderSource>,
    broadcaster: Arc<dyn Broadcaster>,
    connection: watch::Receiver<ConnectionSnapshot>,
    message: String,
    running: Mutex<()>,
}

impl ReminderScheduler {
    pub fn new(
        schedule: DailySchedule,
        source: Arc<dyn ReminderSource>,
        broadcaster: Arc<dyn Broadcaster>,
        connection: watch::Receiver<ConnectionSnapshot>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            schedule,
            source,
            broadcaster,
            connection,
            message: message.into(),
            running: Mutex::new(()),
        }
    }

    pub fn schedule(&self) -> &DailySchedule {
        &self.schedule
    }

    /// Run one tick for `now`. `force` bypasses the day filter only.
    pub async fn tick(&self, now: DateTime<Utc>, force: bool) -> TickOutcome {
        let _guard = self.running.lock().await;

        let state = self.connection.borrow().state;
        if state != ConnectionState::Connected {
            tracing::warn!("⏭️ Reminder tick skipped: connection is {state}");
            return TickOutcome::Skipped { reason: SkipReason::NotConnected };
        }

        let today = self.schedule.local_date(now);
        if !force && !self.schedule.allows(today) {
            tracing::debug!("Reminder tick skipped: {today} is not a reminder day");
            return TickOutcome::Skipped { reason: SkipReason::DayNotAllowed };
        }

        let (start, end) = month_bounds(today);
        let pending = match self.source.pending_reminders(start, end).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("❌ Reminder query failed: {e}");
                return TickOutcome::Failed { error: e.to_string() };
            }
        };
        if pending.is_empty() {
            tracing::info!("🎉 Everyone has filed for {start}..{end}, no reminders today");
            return TickOutcome::NothingToSend;
        }

        tracing::info!("🔔 Sending reminders to {} recipient(s)", pending.len());
        let recipients = pending.into_iter().map(|c| c.recipient_address).collect();
        match self.broadcaster.broadcast(recipients, self.message.clone()).await {
            Ok(summary) => TickOutcome::Dispatched(summary),
            Err(e) => {
                tracing::error!("❌ Reminder broadcast failed: {e}");
                TickOutcome::Failed { error: e.to_string() }
            }
        }
    }

    /// Manual trigger, used by the control API.
    pub async fn run_now(&self, force: bool) -> TickOutcome {
        tracing::info!("🔔 Manual reminder run (force: {force})");
        self.tick(Utc::now(), force).await
    }

    /// Sleep until each fire time and tick, forever.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_fire: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                let from = last_fire.map_or(now, |f| f.max(now));
                let Some(next) = self.schedule.next_fire_after(from) else {
                    tracing::error!("❌ Could not compute the next reminder time, retrying in 1h");
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    continue;
                };
                tracing::info!("⏰ Next reminder check at {}", next.with_timezone(&self.schedule.tz));

                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                last_fire = Some(next);

                let outcome = self.tick(next, false).await;
                tracing::debug!("Reminder tick finished: {outcome:?}");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use nudge_core::error::{NudgeError, Result};
    use nudge_core::types::ReminderCriterion;

    #[derive(Default)]
    struct FakeSource {
        rows: Vec<ReminderCriterion>,
        fail: bool,
        calls: std::sync::Mutex<Vec<(NaiveDate, NaiveDate)>>,
    }

    #[async_trait]
    impl ReminderSource for FakeSource {
        async fn pending_reminders(
            &self,
            period_start: NaiveDate,
            period_end: NaiveDate,
        ) -> Result<Vec<ReminderCriterion>> {
            self.calls.lock().unwrap().push((period_start, period_end));
            if self.fail {
                return Err(NudgeError::store("database is locked"));
            }
            Ok(self.rows.clone())
        }
    }

    #[derive(Default)]
    struct FakeBroadcaster {
        calls: std::sync::Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl Broadcaster for FakeBroadcaster {
        async fn broadcast(&self, recipients: Vec<String>, message: String) -> Result<BroadcastSummary> {
            let sent = recipients.len();
            self.calls.lock().unwrap().push((recipients, message));
            Ok(BroadcastSummary { sent, failed: 0 })
        }
    }

    fn criterion(name: &str, phone: &str) -> ReminderCriterion {
        ReminderCriterion {
            recipient_name: name.into(),
            recipient_address: phone.into(),
        }
    }

    fn scheduler(
        source: Arc<FakeSource>,
        broadcaster: Arc<FakeBroadcaster>,
        state: ConnectionState,
    ) -> (ReminderScheduler, watch::Sender<ConnectionSnapshot>) {
        let (tx, rx) = watch::channel(ConnectionSnapshot::new(state));
        let schedule =
            DailySchedule::new(9, 0, vec![25, 26, 27, 28], chrono_tz::Asia::Jakarta).unwrap();
        (
            ReminderScheduler::new(schedule, source, broadcaster, rx, "Mohon isi laporan"),
            tx,
        )
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_disallowed_day_queries_nothing() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let (s, _tx) = scheduler(source.clone(), broadcaster.clone(), ConnectionState::Connected);

        let outcome = s.tick(at("2026-02-10T02:00:00Z"), false).await;
        assert_eq!(outcome, TickOutcome::Skipped { reason: SkipReason::DayNotAllowed });
        assert!(source.calls.lock().unwrap().is_empty());
        assert!(broadcaster.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_day_broadcasts_once() {
        let source = Arc::new(FakeSource {
            rows: vec![criterion("Sari", "081111111111"), criterion("Dewi", "085555555555")],
            ..Default::default()
        });
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let (s, _tx) = scheduler(source.clone(), broadcaster.clone(), ConnectionState::Connected);

        let outcome = s.tick(at("2026-02-25T02:00:00Z"), false).await;
        assert_eq!(outcome, TickOutcome::Dispatched(BroadcastSummary { sent: 2, failed: 0 }));

        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(*source.calls.lock().unwrap(), vec![(d(2026, 2, 1), d(2026, 3, 1))]);

        let calls = broadcaster.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec!["081111111111", "085555555555"]);
        assert_eq!(calls[0].1, "Mohon isi laporan");
    }

    #[tokio::test]
    async fn test_not_connected_skips_before_query() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let (s, _tx) = scheduler(source.clone(), broadcaster, ConnectionState::Connecting);

        let outcome = s.tick(at("2026-02-25T02:00:00Z"), false).await;
        assert_eq!(outcome, TickOutcome::Skipped { reason: SkipReason::NotConnected });
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_send() {
        let source = Arc::new(FakeSource::default());
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let (s, _tx) = scheduler(source, broadcaster.clone(), ConnectionState::Connected);

        let outcome = s.tick(at("2026-02-26T02:00:00Z"), false).await;
        assert_eq!(outcome, TickOutcome::NothingToSend);
        assert!(broadcaster.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_is_contained() {
        let source = Arc::new(FakeSource { fail: true, ..Default::default() });
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let (s, _tx) = scheduler(source, broadcaster.clone(), ConnectionState::Connected);

        let outcome = s.tick(at("2026-02-27T02:00:00Z"), false).await;
        assert!(matches!(outcome, TickOutcome::Failed { .. }));
        assert!(broadcaster.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_bypasses_day_filter_only() {
        let source = Arc::new(FakeSource {
            rows: vec![criterion("Sari", "081111111111")],
            ..Default::default()
        });
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let (s, tx) = scheduler(source, broadcaster.clone(), ConnectionState::Connected);

        let outcome = s.tick(at("2026-02-10T02:00:00Z"), true).await;
        assert!(matches!(outcome, TickOutcome::Dispatched(_)));

        tx.send_replace(ConnectionSnapshot::new(ConnectionState::LoggedOut));
        let outcome = s.run_now(true).await;
        assert_eq!(outcome, TickOutcome::Skipped { reason: SkipReason::NotConnected });
        assert_eq!(broadcaster.calls.lock().unwrap().len(), 1);
    }

    /// Broadcaster that takes a while and records how many calls overlap.
    #[derive(Default)]
    struct SlowBroadcaster {
        active: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Broadcaster for SlowBroadcaster {
        async fn broadcast(&self, recipients: Vec<String>, _message: String) -> Result<BroadcastSummary> {
            use std::sync::atomic::Ordering::SeqCst;
            let now = self.active.fetch_add(1, SeqCst) + 1;
            self.peak.fetch_max(now, SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, SeqCst);
            self.calls.fetch_add(1, SeqCst);
            Ok(BroadcastSummary { sent: recipients.len(), failed: 0 })
        }
    }

    #[tokio::test]
    async fn test_concurrent_ticks_never_overlap() {
        use std::sync::atomic::Ordering::SeqCst;
        let source = Arc::new(FakeSource {
            rows: vec![criterion("Sari", "081111111111")],
            ..Default::default()
        });
        let broadcaster = Arc::new(SlowBroadcaster::default());
        let (_tx, rx) = watch::channel(ConnectionSnapshot::new(ConnectionState::Connected));
        let schedule = DailySchedule::new(9, 0, vec![25], chrono_tz::Asia::Jakarta).unwrap();
        let s = ReminderScheduler::new(schedule, source, broadcaster.clone(), rx, "Mohon isi laporan");

        let (a, b) = tokio::join!(s.run_now(true), s.run_now(true));
        assert!(matches!(a, TickOutcome::Dispatched(_)));
        assert!(matches!(b, TickOutcome::Dispatched(_)));
        assert_eq!(broadcaster.calls.load(SeqCst), 2);
        assert_eq!(broadcaster.peak.load(SeqCst), 1);
    }

    /// Broadcaster that reports each call on a channel.
    struct NotifyingBroadcaster {
        fired: tokio::sync::mpsc::UnboundedSender<usize>,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Broadcaster for NotifyingBroadcaster {
        async fn broadcast(&self, recipients: Vec<String>, _message: String) -> Result<BroadcastSummary> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            let _ = self.fired.send(n);
            Ok(BroadcastSummary { sent: recipients.len(), failed: 0 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_fires_once_per_fire_time() {
        use std::sync::atomic::Ordering::SeqCst;
        let source = Arc::new(FakeSource {
            rows: vec![criterion("Sari", "081111111111")],
            ..Default::default()
        });
        let (fired, mut fired_rx) = tokio::sync::mpsc::unbounded_channel();
        let broadcaster = Arc::new(NotifyingBroadcaster {
            fired,
            calls: Default::default(),
        });
        let (_tx, rx) = watch::channel(ConnectionSnapshot::new(ConnectionState::Connected));
        let every_day = (1..=31).collect();
        let schedule = DailySchedule::new(9, 0, every_day, chrono_tz::Asia::Jakarta).unwrap();
        let s = Arc::new(ReminderScheduler::new(
            schedule,
            source.clone(),
            broadcaster.clone(),
            rx,
            "Mohon isi laporan",
        ));

        let task = s.spawn();

        // Paused time jumps straight to each fire time; after every tick the
        // loop goes back to sleep until the next day's fire time.
        assert_eq!(fired_rx.recv().await, Some(1));
        assert_eq!(broadcaster.calls.load(SeqCst), 1);
        assert_eq!(source.calls.lock().unwrap().len(), 1);

        assert_eq!(fired_rx.recv().await, Some(2));
        assert_eq!(broadcaster.calls.load(SeqCst), 2);
        assert_eq!(source.calls.lock().unwrap().len(), 2);

        task.abort();
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(TickOutcome::Skipped { reason: SkipReason::DayNotAllowed }).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "day_not_allowed");

        let json = serde_json::to_value(TickOutcome::Dispatched(BroadcastSummary { sent: 3, failed: 1 })).unwrap();
        assert_eq!(json["outcome"], "dispatched");
        assert_eq!(json["sent"], 3);
    }
}
