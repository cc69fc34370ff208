//! Schedule spec parsing and occurrence computation.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{ScheduleError, ScheduleResult};

/// A parsed schedule: recurring cron or one-shot instant.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// Recurring five-field cron, evaluated in `tz`.
    Cron {
        /// The parsed schedule.
        schedule: Box<cron::Schedule>,
        /// Timezone occurrences are computed in.
        tz: Tz,
    },
    /// A single instant.
    OneShot(DateTime<Utc>),
}

impl ScheduleSpec {
    /// Parse a spec string with its timezone.
    ///
    /// An RFC 3339 timestamp is a one-shot; anything else must be a
    /// standard five-field cron expression (seconds omitted).
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidSpec`] for unparseable specs and
    /// [`ScheduleError::UnknownTimezone`] for unknown zone names.
    pub fn parse(spec: &str, timezone: &str) -> ScheduleResult<Self> {
        if let Ok(at) = DateTime::parse_from_rfc3339(spec.trim()) {
            return Ok(Self::OneShot(at.with_timezone(&Utc)));
        }

        let tz: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::UnknownTimezone(timezone.to_owned()))?;

        let fields = spec.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError::InvalidSpec {
                spec: spec.to_owned(),
                reason: format!("expected 5 cron fields, got {fields}"),
            });
        }
        // The parser wants a seconds column; pin it to zero.
        let with_seconds = format!("0 {}", spec.trim());
        let schedule =
            cron::Schedule::from_str(&with_seconds).map_err(|e| ScheduleError::InvalidSpec {
                spec: spec.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self::Cron {
            schedule: Box::new(schedule),
            tz,
        })
    }

    /// The first `next_run_at` for a freshly created task.
    ///
    /// A one-shot keeps its instant even when it already passed — a missed
    /// window fires once on the next tick.
    #[must_use]
    pub fn initial_next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { .. } => self.next_after(now),
            Self::OneShot(at) => Some(*at),
        }
    }

    /// The occurrence strictly after `after`, or `None` when the schedule
    /// is exhausted (always, for a fired one-shot).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { schedule, tz } => schedule
                .after(&after.with_timezone(tz))
                .next()
                .map(|at| at.with_timezone(&Utc)),
            Self::OneShot(_) => None,
        }
    }

    /// Whether this is a one-shot.
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::OneShot(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_one_shot() {
        let spec = ScheduleSpec::parse("2026-03-05T14:30:00Z", "UTC").unwrap();
        assert!(spec.is_one_shot());
        let at = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(spec.initial_next_run(Utc::now()), Some(at));
        assert_eq!(spec.next_after(at), None);
    }

    #[test]
    fn parses_five_field_cron() {
        let spec = ScheduleSpec::parse("0 7 * * *", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 6, 7, 0, 0).unwrap());
    }

    #[test]
    fn cron_respects_timezone() {
        // 07:00 in New York is 12:00 UTC in March (EST→EDT shifts it to 11:00
        // after the DST switch on March 8).
        let spec = ScheduleSpec::parse("0 7 * * *", "America/New_York").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap());
    }

    #[test]
    fn missed_one_shot_still_fires_once() {
        let spec = ScheduleSpec::parse("2020-01-01T00:00:00Z", "UTC").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        // Initial run is kept in the past, so the next tick sees it due.
        assert!(spec.initial_next_run(now).unwrap() < now);
        // And there is never a second occurrence.
        assert!(spec.next_after(now).is_none());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(ScheduleSpec::parse("0 7 * *", "UTC").is_err());
        assert!(ScheduleSpec::parse("0 0 7 * * *", "UTC").is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = ScheduleSpec::parse("0 7 * * *", "Mars/Olympus").unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownTimezone(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ScheduleSpec::parse("every tuesday", "UTC").is_err());
    }
}
