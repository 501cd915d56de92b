/*!
Engine handle - owns the telemetry registry, evaluators and event channel.

# Example

```ignore
use barscript::{Engine, MemoryBackend, ScopeId, WidgetSpec};

let engine = Engine::builder(Arc::new(MemoryBackend::new()))
    .date_format("%H:%M:%S")
    .build()?;

let spec = WidgetSpec::new("battery", "`${battery.percentage}%`").with_scopes([ScopeId::Power]);
let mut widget = engine.mount(spec, ScopeData::new());
loop {
    let state = widget.render();
    // hand `state` to the renderer
    widget.changed().await;
}
```
*/

use std::sync::Arc;
use std::time::Duration;

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use tokio::runtime::Handle;

use crate::bridge::Backend;
use crate::config::EngineConfig;
use crate::evaluate::{ActionEvaluator, TemplateEvaluator};
use crate::remote::{HttpRemoteSource, RemoteSource};
use crate::scope::{DateFormat, DateTicker, ScopeData, ScopeResolution, ScopeId, ScopeResolver};
use crate::script::EvalLimits;
use crate::telemetry::TelemetryRegistry;
use crate::types::{EngineError, EngineEvent, EngineResult, WidgetSpec};
use crate::widget::WidgetInstance;

/// State shared by an engine and every widget it mounted.
pub(crate) struct EngineShared {
  pub(crate) config: EngineConfig,
  pub(crate) backend: Arc<dyn Backend>,
  pub(crate) registry: Arc<TelemetryRegistry>,
  pub(crate) resolver: ScopeResolver,
  pub(crate) templates: TemplateEvaluator,
  pub(crate) actions: ActionEvaluator,
  pub(crate) remote_source: Arc<dyn RemoteSource>,
  pub(crate) events_tx: Sender<EngineEvent>,
  events_keepalive: InactiveReceiver<EngineEvent>,
  _ticker: DateTicker,
}

/// Widget engine. Clone is cheap (Arc bump); clones share everything.
#[derive(Clone)]
pub struct Engine {
  shared: Arc<EngineShared>,
}

impl std::fmt::Debug for Engine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Engine")
      .field("config", &self.shared.config)
      .finish_non_exhaustive()
  }
}

/// Builder for an [`Engine`].
#[must_use = "Builder does nothing until .build() is called"]
pub struct EngineBuilder {
  backend: Arc<dyn Backend>,
  config: EngineConfig,
  remote_source: Option<Arc<dyn RemoteSource>>,
}

impl std::fmt::Debug for EngineBuilder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EngineBuilder")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl EngineBuilder {
  /// Replace the whole configuration.
  pub fn config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  /// strftime pattern for the `date` key. Validated by [`build`](Self::build).
  pub fn date_format(mut self, format: impl Into<String>) -> Self {
    self.config.date_format = format.into();
    self
  }

  /// Text rendered in place of a failed template.
  pub fn fallback_glyph(mut self, glyph: impl Into<String>) -> Self {
    self.config.fallback_glyph = glyph.into();
    self
  }

  /// Also redact `key` when logging a failing scope.
  pub fn redact(mut self, key: impl Into<String>) -> Self {
    self.config.redacted_scope_keys.push(key.into());
    self
  }

  /// Compiled programs cached per evaluator.
  pub fn template_cache_capacity(mut self, capacity: usize) -> Self {
    self.config.template_cache_capacity = capacity;
    self
  }

  /// Sandbox limits for templates and actions.
  pub fn eval_limits(mut self, limits: EvalLimits) -> Self {
    self.config.eval_limits = limits;
    self
  }

  /// Per-request timeout for remote data.
  pub fn http_timeout(mut self, timeout: Duration) -> Self {
    self.config.http_timeout = timeout;
    self
  }

  /// Capacity of the event broadcast.
  pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
    self.config.event_channel_capacity = capacity;
    self
  }

  /// Fetch remote data through `source` instead of HTTP.
  pub fn remote_source(mut self, source: Arc<dyn RemoteSource>) -> Self {
    self.remote_source = Some(source);
    self
  }

  /// Build the engine. Must be called inside a tokio runtime.
  pub fn build(self) -> EngineResult<Engine> {
    let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
    let config = self.config;
    let date_format = DateFormat::new(config.date_format.clone())?;
    let remote_source: Arc<dyn RemoteSource> = match self.remote_source {
      Some(source) => source,
      None => Arc::new(HttpRemoteSource::new(config.http_timeout)?),
    };

    let (mut tx, rx) = async_broadcast::broadcast(config.event_channel_capacity.max(1));
    tx.set_overflow(true); // Drop oldest messages when full

    let registry = Arc::new(TelemetryRegistry::new(Arc::clone(&self.backend), &tx));
    registry.connect();
    let ticker = DateTicker::start(tx.clone(), date_format.precision());

    let templates = TemplateEvaluator::new(
      config.template_cache_capacity,
      config.eval_limits,
      config.fallback_glyph.clone(),
      config.redacted_scope_keys.clone(),
    );
    let actions = ActionEvaluator::new(
      Arc::clone(&self.backend),
      config.template_cache_capacity,
      config.eval_limits,
      config.redacted_scope_keys.clone(),
      runtime,
    );

    log::info!("[engine] started (date format {:?})", date_format.pattern());
    Ok(Engine {
      shared: Arc::new(EngineShared {
        resolver: ScopeResolver::new(Arc::clone(&registry), date_format),
        registry,
        templates,
        actions,
        remote_source,
        backend: self.backend,
        events_tx: tx,
        events_keepalive: rx.deactivate(),
        _ticker: ticker,
        config,
      }),
    })
  }
}

impl Engine {
  /// Builder over `backend` with the default configuration.
  pub fn builder(backend: Arc<dyn Backend>) -> EngineBuilder {
    EngineBuilder {
      backend,
      config: EngineConfig::default(),
      remote_source: None,
    }
  }

  /// Engine with the default configuration.
  pub fn new(backend: Arc<dyn Backend>) -> EngineResult<Self> {
    Self::builder(backend).build()
  }

  /// Configuration the engine was built with.
  pub fn config(&self) -> &EngineConfig {
    &self.shared.config
  }

  /// Backend the engine talks to.
  pub fn backend(&self) -> &Arc<dyn Backend> {
    &self.shared.backend
  }

  /// Telemetry cells shared by every widget.
  pub fn registry(&self) -> &Arc<TelemetryRegistry> {
    &self.shared.registry
  }

  /// Scope resolver over [`registry`](Self::registry).
  pub fn resolver(&self) -> &ScopeResolver {
    &self.shared.resolver
  }

  /// Template evaluator and its program cache.
  pub fn templates(&self) -> &TemplateEvaluator {
    &self.shared.templates
  }

  /// Action evaluator and its program cache.
  pub fn actions(&self) -> &ActionEvaluator {
    &self.shared.actions
  }

  /// Subscribe to engine events.
  pub fn subscribe(&self) -> Receiver<EngineEvent> {
    self.shared.events_keepalive.activate_cloned()
  }

  /// Resolution snapshot for `scopes`. Starts fetching cells not fetched yet.
  pub fn resolve(&self, scopes: &[ScopeId]) -> ScopeResolution {
    self.shared.resolver.resolve(scopes)
  }

  /// Mount a widget. Remote polling starts immediately; the first
  /// [`render`](WidgetInstance::render) also starts its telemetry fetches.
  pub fn mount(&self, spec: WidgetSpec, extra_vars: ScopeData) -> WidgetInstance {
    WidgetInstance::new(Arc::clone(&self.shared), spec, extra_vars)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bridge::MemoryBackend;

  #[test]
  fn build_requires_runtime() {
    let result = Engine::new(Arc::new(MemoryBackend::new()));
    assert!(matches!(result, Err(EngineError::NoRuntime)));
  }

  #[tokio::test]
  async fn invalid_date_format_is_rejected() {
    let result = Engine::builder(Arc::new(MemoryBackend::new()))
      .date_format("%Q")
      .build();
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn builder_applies_config() {
    let engine = Engine::builder(Arc::new(MemoryBackend::new()))
      .fallback_glyph("?")
      .redact("secrets")
      .template_cache_capacity(4)
      .build()
      .unwrap();
    assert_eq!(engine.config().fallback_glyph, "?");
    assert_eq!(engine.config().redacted_scope_keys, vec!["env".to_owned(), "secrets".to_owned()]);
    assert_eq!(engine.templates().fallback(), crate::node::EvaluatedNode::text("?"));
  }

  #[tokio::test]
  async fn connects_one_listener_per_category() {
    let backend = MemoryBackend::new();
    let _engine = Engine::new(Arc::new(backend.clone())).unwrap();
    tokio::task::yield_now().await;
    for category in crate::telemetry::TelemetryCategory::ALL {
      assert_eq!(backend.listener_count(category.event()), 1, "{category}");
    }
  }
}
