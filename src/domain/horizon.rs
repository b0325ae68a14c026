use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed forecast granularity/lookahead classes.
///
/// The set is closed: every horizon defines its own window length, point
/// resolution and scheduling tick, so two triggers for the same nominal
/// window always agree on its bounds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForecastHorizon {
    /// One calendar hour, minutely points.
    Hourly,
    /// One calendar day, hourly points.
    Daily,
    /// One ISO week (Monday-aligned), daily points.
    Weekly,
}

impl ForecastHorizon {
    pub const ALL: [ForecastHorizon; 3] = [Self::Hourly, Self::Daily, Self::Weekly];

    /// Length of a single target window.
    pub fn window_length(&self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
        }
    }

    /// Spacing between forecast points inside a window.
    pub fn resolution(&self) -> Duration {
        match self {
            Self::Hourly => Duration::minutes(1),
            Self::Daily => Duration::hours(1),
            Self::Weekly => Duration::days(1),
        }
    }

    /// Number of forecast points a full window must contain.
    pub fn expected_points(&self) -> usize {
        (self.window_length().num_seconds() / self.resolution().num_seconds()) as usize
    }

    /// How often the scheduler wakes for this horizon class.
    pub fn tick_interval(&self) -> std::time::Duration {
        match self {
            Self::Hourly => std::time::Duration::from_secs(300),
            Self::Daily => std::time::Duration::from_secs(3600),
            Self::Weekly => std::time::Duration::from_secs(21600),
        }
    }

    /// The calendar-aligned window containing `t`.
    pub fn window_containing(&self, t: DateTime<Utc>) -> TargetWindow {
        let start = match self {
            Self::Hourly => Utc
                .with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), 0, 0)
                .single()
                .expect("hour-truncated UTC timestamp is unambiguous"),
            Self::Daily => Utc
                .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                .single()
                .expect("day-truncated UTC timestamp is unambiguous"),
            Self::Weekly => {
                let day = Utc
                    .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                    .single()
                    .expect("day-truncated UTC timestamp is unambiguous");
                day - Duration::days(i64::from(t.weekday().num_days_from_monday()))
            }
        };
        TargetWindow::new(start, start + self.window_length())
    }

    /// The window `steps` window-lengths before the one containing `t`.
    pub fn window_before(&self, t: DateTime<Utc>, steps: u32) -> TargetWindow {
        let current = self.window_containing(t);
        let start = current.start - self.window_length() * (steps as i32);
        TargetWindow::new(start, start + self.window_length())
    }
}

/// Half-open `[start, end)` time range a single forecast run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TargetWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "window start must precede end");
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TargetWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
