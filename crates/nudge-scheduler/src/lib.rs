//! # Nudge Scheduler
//! Daily reminder job: wall-clock schedule, the records query and the tick
//! that turns pending recipients into one broadcast.

pub mod reminder;
pub mod schedule;
pub mod source;

pub use reminder::{ReminderScheduler, SkipReason, TickOutcome};
pub use schedule::DailySchedule;
pub use source::SqliteReminderSource;
