//! Downtime window evaluation.
//!
//! A downtime window is a pair of wall-clock times in a configured timezone.
//! When `start > end` the window crosses midnight (e.g. 23:00 to 07:00).
//! A window with `start == end` is empty.

use crate::config::DowntimeConfig;
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Parse an "HH:MM" string
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Timezone the window is expressed in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DowntimeZone {
    /// System local time
    Local,
    /// UTC
    Utc,
    /// IANA zone
    Named(Tz),
}

impl DowntimeZone {
    /// Parse "local"/"system" (or empty), "UTC", or an IANA zone name
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty()
            || value.eq_ignore_ascii_case("local")
            || value.eq_ignore_ascii_case("system")
        {
            return Some(DowntimeZone::Local);
        }
        if value.eq_ignore_ascii_case("utc") {
            return Some(DowntimeZone::Utc);
        }
        value.parse::<Tz>().ok().map(DowntimeZone::Named)
    }

    fn wall_clock(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            DowntimeZone::Local => now.with_timezone(&Local).naive_local(),
            DowntimeZone::Utc => now.naive_utc(),
            DowntimeZone::Named(tz) => now.with_timezone(tz).naive_local(),
        }
    }
}

/// Result of evaluating a window at an instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DowntimeStatus {
    /// Polling allowed
    Inactive,
    /// Polling paused until `ends_at`
    Active {
        /// Instant at which the window closes
        ends_at: DateTime<Utc>,
    },
}

impl DowntimeStatus {
    /// Whether the window is currently open
    pub fn is_active(&self) -> bool {
        matches!(self, DowntimeStatus::Active { .. })
    }
}

/// A parsed, enabled downtime window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DowntimeWindow {
    start: NaiveTime,
    end: NaiveTime,
    zone: DowntimeZone,
}

impl DowntimeWindow {
    /// Create a window from explicit times
    pub fn new(start: NaiveTime, end: NaiveTime, zone: DowntimeZone) -> Self {
        Self { start, end, zone }
    }

    /// Build from configuration; None when disabled or unparseable
    ///
    /// An unknown timezone falls back to local time.
    pub fn from_config(config: &DowntimeConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let start = parse_hhmm(&config.start)?;
        let end = parse_hhmm(&config.end)?;
        let zone = DowntimeZone::parse(&config.timezone).unwrap_or(DowntimeZone::Local);
        Some(Self::new(start, end, zone))
    }

    /// Evaluate the window at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> DowntimeStatus {
        let wall = self.zone.wall_clock(now);
        let today = wall.date();
        let start_dt = today.and_time(self.start);
        let end_dt = today.and_time(self.end);

        let end_wall = if self.start <= self.end {
            if wall >= start_dt && wall < end_dt {
                Some(end_dt)
            } else {
                None
            }
        } else if wall >= start_dt {
            // Crosses midnight; ends tomorrow
            Some(end_dt + chrono::Duration::days(1))
        } else if wall < end_dt {
            Some(end_dt)
        } else {
            None
        };

        match end_wall {
            Some(end_wall) => DowntimeStatus::Active {
                ends_at: now + (end_wall - wall),
            },
            None => DowntimeStatus::Inactive,
        }
    }

    /// Next time the window opens strictly after `now`; None for an empty window
    pub fn next_start_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.start == self.end {
            return None;
        }
        let wall = self.zone.wall_clock(now);
        let mut start_wall = wall.date().and_time(self.start);
        if start_wall <= wall {
            start_wall += chrono::Duration::days(1);
        }
        Some(now + (start_wall - wall))
    }
}
