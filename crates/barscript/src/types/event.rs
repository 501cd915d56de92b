/*! Events broadcast by the engine when widgets may need to re-render. */

use serde::Serialize;
use ts_rs::TS;

use crate::telemetry::TelemetryCategory;

/// Events emitted when engine-visible state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "event", content = "data")]
#[ts(export)]
pub enum EngineEvent {
  /// A telemetry cell became ready or received a push.
  #[serde(rename = "telemetry:changed")]
  TelemetryChanged { category: TelemetryCategory },

  /// The wall clock crossed the boundary shown by the date format.
  #[serde(rename = "date:tick")]
  DateTick,
}
