/*!
Wall-clock derived scope.

The Date scope owns no telemetry cell. Its value is recomputed on every
resolve, and a ticker wakes widgets whenever the rendered text could change:
on the next second boundary when the format shows seconds, otherwise on the
next minute boundary.
*/

use std::fmt::Write;
use std::time::Duration;

use async_broadcast::Sender;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone, Timelike};
use tokio::task::JoinHandle;

use crate::types::{EngineError, EngineEvent, EngineResult};

/// Default strftime pattern for the `date` key.
pub const DEFAULT_DATE_FORMAT: &str = "%a %d %b %H:%M";

/// Specifiers whose output changes every second.
const SECOND_SPECIFIERS: [&str; 7] = ["%S", "%T", "%X", "%r", "%c", "%s", "%+"];

/// How often the formatted date can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPrecision {
  /// Pattern shows seconds.
  Second,
  /// Pattern changes at most once a minute.
  Minute,
}

/// A validated strftime pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
  pattern: String,
  precision: TickPrecision,
}

impl DateFormat {
  /// Validate `pattern`. Unknown specifiers are rejected up front so that
  /// formatting can never fail later.
  pub fn new(pattern: impl Into<String>) -> EngineResult<Self> {
    let pattern = pattern.into();
    if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
      return Err(EngineError::Internal(format!("invalid date format: {pattern}")));
    }
    let precision = if SECOND_SPECIFIERS.iter().any(|spec| pattern.contains(spec)) {
      TickPrecision::Second
    } else {
      TickPrecision::Minute
    };
    Ok(Self { pattern, precision })
  }

  /// Pattern as given.
  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  /// Tick rate this pattern needs.
  pub const fn precision(&self) -> TickPrecision {
    self.precision
  }

  /// Format `now`. Empty if the pattern cannot be rendered.
  pub fn format<Tz>(&self, now: &DateTime<Tz>) -> String
  where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
  {
    let mut out = String::new();
    if write!(out, "{}", now.format(&self.pattern)).is_err() {
      log::warn!("[scope] date format {} failed", self.pattern);
      out.clear();
    }
    out
  }
}

impl Default for DateFormat {
  fn default() -> Self {
    Self {
      pattern: DEFAULT_DATE_FORMAT.to_owned(),
      precision: TickPrecision::Minute,
    }
  }
}

/// Time until the next boundary of `precision`, never zero.
pub fn next_tick_delay(now: &impl Timelike, precision: TickPrecision) -> Duration {
  let into_second = Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
  let until_second = Duration::from_secs(1).saturating_sub(into_second);
  let delay = match precision {
    TickPrecision::Second => until_second,
    TickPrecision::Minute => {
      let whole_seconds_left = u64::from(59 - now.second().min(59));
      until_second + Duration::from_secs(whole_seconds_left)
    }
  };
  if delay.is_zero() {
    Duration::from_secs(1)
  } else {
    delay
  }
}

/// Emits `DateTick` on every boundary. Stops on drop.
#[derive(Debug)]
pub struct DateTicker {
  task: JoinHandle<()>,
}

impl DateTicker {
  /// Spawn the ticker on the current runtime.
  pub fn start(events_tx: Sender<EngineEvent>, precision: TickPrecision) -> Self {
    let task = tokio::spawn(async move {
      loop {
        let delay = next_tick_delay(&Local::now(), precision);
        tokio::time::sleep(delay).await;
        if let Err(e) = events_tx.try_broadcast(EngineEvent::DateTick) {
          if e.is_closed() {
            break;
          }
        }
      }
    });
    Self { task }
  }
}

impl Drop for DateTicker {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{NaiveTime, Utc};

  #[test]
  fn default_format_ticks_per_minute() {
    let format = DateFormat::new(DEFAULT_DATE_FORMAT).unwrap();
    assert_eq!(format.precision(), TickPrecision::Minute);
  }

  #[test]
  fn seconds_in_format_tick_per_second() {
    assert_eq!(DateFormat::new("%H:%M:%S").unwrap().precision(), TickPrecision::Second);
    assert_eq!(DateFormat::new("%T").unwrap().precision(), TickPrecision::Second);
  }

  #[test]
  fn invalid_format_is_rejected() {
    assert!(DateFormat::new("%Q %H").is_err());
  }

  #[test]
  fn formats_fixed_time() {
    let format = DateFormat::new("%Y-%m-%d %H:%M").unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
    assert_eq!(format.format(&at), "2024-03-09 07:05");
  }

  #[test]
  fn minute_delay_aligns_to_next_minute() {
    let now = NaiveTime::from_hms_milli_opt(10, 15, 42, 250).unwrap();
    let delay = next_tick_delay(&now, TickPrecision::Minute);
    assert_eq!(delay, Duration::from_millis(17_750));
  }

  #[test]
  fn second_delay_aligns_to_next_second() {
    let now = NaiveTime::from_hms_milli_opt(10, 15, 42, 250).unwrap();
    assert_eq!(next_tick_delay(&now, TickPrecision::Second), Duration::from_millis(750));
  }

  #[test]
  fn exact_boundary_waits_a_full_period() {
    let now = NaiveTime::from_hms_opt(10, 15, 0).unwrap();
    assert_eq!(next_tick_delay(&now, TickPrecision::Second), Duration::from_secs(1));
    assert_eq!(next_tick_delay(&now, TickPrecision::Minute), Duration::from_secs(60));
  }
}
