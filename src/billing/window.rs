//! Timezone-anchored usage windows
//!
//! Quotas reset at a fixed civil boundary regardless of the device timezone.
//! Window keys are computed by converting "now" into the reference offset and
//! formatting the civil date there, never by truncating a UTC or local date.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

use super::types::Period;
use crate::utils::{acquire_read_lock, acquire_write_lock};

/// Buenos Aires civil time (UTC-03:00, no daylight saving)
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *acquire_write_lock(&self.now) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = acquire_write_lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *acquire_read_lock(&self.now)
    }
}

/// When the current window of a feature ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetInfo {
    pub current_window: String,
    pub next_window: String,
    pub resets_at: DateTime<Utc>,
    /// e.g. "-03:00"
    pub utc_offset: String,
}

/// Computes window identifiers in the reference timezone
#[derive(Clone)]
pub struct WindowClock {
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl WindowClock {
    /// Reference offset in minutes east of UTC; out-of-range values fall back to the default
    pub fn new(utc_offset_minutes: i32, clock: Arc<dyn Clock>) -> Self {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    utc_offset_minutes,
                    "Invalid window offset, using Buenos Aires time"
                );
                default_offset()
            });
        Self { offset, clock }
    }

    pub fn system() -> Self {
        Self::new(DEFAULT_UTC_OFFSET_MINUTES, Arc::new(SystemClock))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Today's civil date in the reference timezone
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset).date_naive()
    }

    /// Current window identifier for a period
    pub fn window_id(&self, period: Period) -> String {
        format_window(self.today(), period)
    }

    /// Next reset boundary for a period; `None` only at the end of the calendar
    pub fn next_reset(&self, period: Period) -> Option<ResetInfo> {
        let today = self.today();
        let boundary = next_boundary(today, period)?;
        let local_midnight = boundary.and_hms_opt(0, 0, 0)?;
        let resets_at = self
            .offset
            .from_local_datetime(&local_midnight)
            .single()?
            .with_timezone(&Utc);

        Some(ResetInfo {
            current_window: format_window(today, period),
            next_window: format_window(boundary, period),
            resets_at,
            utc_offset: self.offset.to_string(),
        })
    }
}

impl std::fmt::Debug for WindowClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowClock")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

fn default_offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap_or_else(|| Utc.fix())
}

fn format_window(date: NaiveDate, period: Period) -> String {
    match period {
        Period::Day => date.format("%Y-%m-%d").to_string(),
        Period::Month => date.format("%Y-%m").to_string(),
    }
}

fn next_boundary(date: NaiveDate, period: Period) -> Option<NaiveDate> {
    match period {
        Period::Day => date.succ_opt(),
        Period::Month => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
        }
    }
}

/// Human label for a window id: "DD/MM/YYYY" for days, "MM/YYYY" for months
pub fn window_label(window_id: &str) -> String {
    let parts: Vec<&str> = window_id.split('-').collect();
    match parts.as_slice() {
        [y, m, d] => format!("{}/{}/{}", d, m, y),
        [y, m] => format!("{}/{}", m, y),
        _ => window_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(rfc3339: &str) -> WindowClock {
        let now = DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc);
        WindowClock::new(DEFAULT_UTC_OFFSET_MINUTES, Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn test_day_key_uses_reference_timezone() {
        // 01:30 UTC is still the previous evening in Buenos Aires
        let clock = clock_at("2026-02-04T01:30:00Z");
        assert_eq!(clock.window_id(Period::Day), "2026-02-03");

        let clock = clock_at("2026-02-04T03:00:00Z");
        assert_eq!(clock.window_id(Period::Day), "2026-02-04");
    }

    #[test]
    fn test_month_key_near_boundary() {
        let clock = clock_at("2026-03-01T02:59:59Z");
        assert_eq!(clock.window_id(Period::Month), "2026-02");

        let clock = clock_at("2026-03-01T03:00:00Z");
        assert_eq!(clock.window_id(Period::Month), "2026-03");
    }

    #[test]
    fn test_next_reset_day() {
        let clock = clock_at("2026-02-03T15:00:00Z");
        let info = clock.next_reset(Period::Day).unwrap();
        assert_eq!(info.current_window, "2026-02-03");
        assert_eq!(info.next_window, "2026-02-04");
        assert_eq!(info.resets_at.to_rfc3339(), "2026-02-04T03:00:00+00:00");
        assert_eq!(info.utc_offset, "-03:00");
    }

    #[test]
    fn test_next_reset_month_rolls_year() {
        let clock = clock_at("2026-12-20T12:00:00Z");
        let info = clock.next_reset(Period::Month).unwrap();
        assert_eq!(info.current_window, "2026-12");
        assert_eq!(info.next_window, "2027-01");
    }

    #[test]
    fn test_window_label() {
        assert_eq!(window_label("2026-02-03"), "03/02/2026");
        assert_eq!(window_label("2026-02"), "02/2026");
        assert_eq!(window_label("garbage"), "garbage");
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-02-03T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let windows = WindowClock::new(DEFAULT_UTC_OFFSET_MINUTES, clock.clone());
        assert_eq!(windows.window_id(Period::Day), "2026-02-03");

        clock.advance(chrono::Duration::days(1));
        assert_eq!(windows.window_id(Period::Day), "2026-02-04");
    }

    #[test]
    fn test_out_of_range_offset_uses_default() {
        let now = Utc::now();
        for minutes in [40_000_000, i32::MIN, 1440, -1440] {
            let windows = WindowClock::new(minutes, Arc::new(ManualClock::new(now)));
            assert_eq!(windows.offset(), default_offset());
        }

        let windows = WindowClock::new(60, Arc::new(ManualClock::new(now)));
        assert_eq!(windows.offset().local_minus_utc(), 3600);
    }
}
