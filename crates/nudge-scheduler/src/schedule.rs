//! Daily wall-clock schedule with a day-of-month filter.
//!
//! Unlike a cron expression, the fire time is fixed (`HH:MM` in one time
//! zone) and the day filter is applied by the caller at tick time, so the
//! loop wakes every day and simply skips the days that are not allowed.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use nudge_core::config::ReminderConfig;
use nudge_core::error::{NudgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct DailySchedule {
    pub hour: u32,
    pub minute: u32,
    /// Empty means every day.
    pub days_of_month: Vec<u32>,
    pub tz: Tz,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, days_of_month: Vec<u32>, tz: Tz) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(NudgeError::config(format!("invalid fire time {hour:02}:{minute:02}")));
        }
        if let Some(day) = days_of_month.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(NudgeError::config(format!("invalid day of month: {day}")));
        }
        Ok(Self { hour, minute, days_of_month, tz })
    }

    pub fn from_config(config: &ReminderConfig) -> Result<Self> {
        Self::new(config.hour, config.minute, config.days_of_month.clone(), config.tz()?)
    }

    /// Whether reminders may go out on `date` (a local date).
    pub fn allows(&self, date: NaiveDate) -> bool {
        self.days_of_month.is_empty() || self.days_of_month.contains(&date.day())
    }

    /// The calendar date of `instant` in the schedule's zone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// Next `HH:MM` strictly after `after`, regardless of the day filter.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = self.local_date(after);
        // A DST gap can swallow one day's fire time; never more than that.
        for _ in 0..3 {
            let naive = date.and_hms_opt(self.hour, self.minute, 0)?;
            if let Some(local) = self.tz.from_local_datetime(&naive).earliest() {
                let fire = local.with_timezone(&Utc);
                if fire > after {
                    return Some(fire);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// `[first day of the month, first day of the next month)` around `date`.
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date.with_day(1).unwrap_or(date);
    let end = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .unwrap_or(start + Duration::days(31));
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jakarta() -> DailySchedule {
        DailySchedule::new(9, 0, vec![25, 26, 27, 28], chrono_tz::Asia::Jakarta).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_next_fire_same_day() {
        // 01:00 UTC = 08:00 WIB
        let next = jakarta().next_fire_after(utc("2026-03-10T01:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-03-10T02:00:00Z"));
    }

    #[test]
    fn test_next_fire_rolls_to_tomorrow() {
        let next = jakarta().next_fire_after(utc("2026-03-10T02:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-03-11T02:00:00Z"));
    }

    #[test]
    fn test_next_fire_ignores_day_filter() {
        // The loop wakes daily; the filter is checked at tick time.
        let next = jakarta().next_fire_after(utc("2026-03-01T05:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-03-02T02:00:00Z"));
    }

    #[test]
    fn test_dst_gap_skips_to_next_day() {
        // 02:30 does not exist in New York on 2026-03-08.
        let schedule = DailySchedule::new(2, 30, vec![], chrono_tz::America::New_York).unwrap();
        let next = schedule.next_fire_after(utc("2026-03-08T05:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-03-09T06:30:00Z"));
    }

    #[test]
    fn test_allows() {
        let s = jakarta();
        assert!(s.allows(NaiveDate::from_ymd_opt(2026, 2, 25).unwrap()));
        assert!(s.allows(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
        assert!(!s.allows(NaiveDate::from_ymd_opt(2026, 2, 24).unwrap()));
        assert!(!s.allows(NaiveDate::from_ymd_opt(2026, 3, 29).unwrap()));

        let every_day = DailySchedule::new(9, 0, vec![], chrono_tz::UTC).unwrap();
        assert!(every_day.allows(NaiveDate::from_ymd_opt(2026, 3, 29).unwrap()));
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        // 20:00 UTC on the 24th is already the 25th in Jakarta.
        let date = jakarta().local_date(utc("2026-04-24T20:00:00Z"));
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 4, 25).unwrap());
    }

    #[test]
    fn test_month_bounds() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(month_bounds(d(2026, 2, 25)), (d(2026, 2, 1), d(2026, 3, 1)));
        assert_eq!(month_bounds(d(2026, 12, 31)), (d(2026, 12, 1), d(2027, 1, 1)));
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(DailySchedule::new(24, 0, vec![], chrono_tz::UTC).is_err());
        assert!(DailySchedule::new(9, 60, vec![], chrono_tz::UTC).is_err());
        assert!(DailySchedule::new(9, 0, vec![0], chrono_tz::UTC).is_err());
        assert!(DailySchedule::new(9, 0, vec![32], chrono_tz::UTC).is_err());
    }
}
