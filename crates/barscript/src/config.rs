//! Engine configuration.

use std::time::Duration;

use crate::scope::DEFAULT_DATE_FORMAT;
use crate::script::EvalLimits;

/// Tunables for an [`Engine`](crate::Engine). Set through [`EngineBuilder`](crate::EngineBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  /// strftime pattern for the `date` scope key.
  pub date_format: String,
  /// Rendered in place of a template that failed.
  pub fallback_glyph: String,
  /// Scope keys replaced by `"<redacted>"` when a failing scope is logged.
  pub redacted_scope_keys: Vec<String>,
  /// Compiled programs kept per evaluator.
  pub template_cache_capacity: usize,
  /// Sandbox limits for every template and action.
  pub eval_limits: EvalLimits,
  /// Per-request timeout for remote data sources.
  pub http_timeout: Duration,
  /// Capacity of the engine event broadcast.
  pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      date_format: DEFAULT_DATE_FORMAT.to_owned(),
      fallback_glyph: "⚠".to_owned(),
      redacted_scope_keys: vec!["env".to_owned()],
      template_cache_capacity: 256,
      eval_limits: EvalLimits::default(),
      http_timeout: Duration::from_secs(30),
      event_channel_capacity: 1000,
    }
  }
}
