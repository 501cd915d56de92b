/*! Error types for engine operations. */

use crate::bridge::{BackendCommand, BackendEvent};
use crate::script::ScriptError;
use crate::telemetry::TelemetryCategory;

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("No tokio runtime available, build the engine inside a runtime")]
  NoRuntime,

  #[error("Backend command '{command}' failed: {reason}")]
  CommandFailed {
    command: BackendCommand,
    reason: String,
  },

  #[error("Backend command '{0}' timed out")]
  CommandTimedOut(BackendCommand),

  #[error("Emitting '{event}' failed: {reason}")]
  EmitFailed { event: BackendEvent, reason: String },

  #[error("Telemetry fetch for {category} failed: {reason}")]
  TelemetryFetch {
    category: TelemetryCategory,
    reason: String,
  },

  #[error("Unexpected payload for {category}: {source}")]
  TelemetryPayload {
    category: TelemetryCategory,
    #[source]
    source: serde_json::Error,
  },

  #[error("Remote data request to {url} failed: {reason}")]
  RemoteFetch { url: String, reason: String },

  #[error("Script error: {0}")]
  Script(#[from] ScriptError),

  #[error("Internal error: {0}")]
  Internal(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
