/*!
Mounted widgets.

A [`WidgetInstance`] ties one [`WidgetSpec`] to the engine: it owns the
widget's remote polling, resolves its scopes, renders its template, tooltip
and badge, and routes clicks to the action evaluator. There is no error
state; a failing template renders the fallback glyph.
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use async_broadcast::{Receiver, RecvError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use ts_rs::TS;

use crate::core::EngineShared;
use crate::node::EvaluatedNode;
use crate::remote::RemoteDataFetcher;
use crate::scope::{merge_into, ScopeData, ScopeId};
use crate::types::{EngineEvent, WidgetId, WidgetSpec};

/// Everything the renderer needs for one widget.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RenderedWidget {
  /// Main content.
  pub content: EvaluatedNode,
  /// Rendered tooltip, when the spec has one.
  pub tooltip: Option<EvaluatedNode>,
  /// Rendered badge, when the spec has one.
  pub badge: Option<EvaluatedNode>,
  /// Style entries copied from the spec.
  pub style: BTreeMap<String, String>,
}

/// A widget's latest render.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "status", rename_all = "camelCase")]
#[ts(export)]
pub enum WidgetState {
  /// Some declared scope has no value yet. Renders nothing.
  AwaitingScope,
  /// Every declared scope resolved.
  Ready(RenderedWidget),
}

impl WidgetState {
  /// Whether the widget has rendered.
  pub const fn is_ready(&self) -> bool {
    matches!(self, Self::Ready(_))
  }

  /// The render, if ready.
  pub const fn rendered(&self) -> Option<&RenderedWidget> {
    match self {
      Self::Ready(rendered) => Some(rendered),
      Self::AwaitingScope => None,
    }
  }
}

/// One mounted widget. Dropping it stops its remote polling; shared
/// telemetry cells are left alone.
pub struct WidgetInstance {
  engine: Arc<EngineShared>,
  spec: WidgetSpec,
  extra_vars: ScopeData,
  remote: RemoteDataFetcher,
  remote_version: watch::Receiver<u64>,
  events: Receiver<EngineEvent>,
  state: WidgetState,
}

impl std::fmt::Debug for WidgetInstance {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WidgetInstance")
      .field("id", &self.spec.id)
      .field("ready", &self.state.is_ready())
      .finish_non_exhaustive()
  }
}

impl WidgetInstance {
  pub(crate) fn new(engine: Arc<EngineShared>, spec: WidgetSpec, extra_vars: ScopeData) -> Self {
    let mut remote = RemoteDataFetcher::new(Arc::clone(&engine.remote_source));
    remote.update(spec.remote_data.clone());
    let remote_version = remote.subscribe();
    let events = engine.events_tx.new_receiver();
    log::debug!("[widget] mounted {} with scopes {:?}", spec.id, spec.scopes);
    Self {
      engine,
      spec,
      extra_vars,
      remote,
      remote_version,
      events,
      state: WidgetState::AwaitingScope,
    }
  }

  /// Id from the spec.
  pub const fn id(&self) -> &WidgetId {
    &self.spec.id
  }

  /// Spec the widget currently renders.
  pub const fn spec(&self) -> &WidgetSpec {
    &self.spec
  }

  /// State produced by the last [`render`](Self::render).
  pub const fn state(&self) -> &WidgetState {
    &self.state
  }

  /// Merged evaluation scope, or `None` while a declared scope is not ready.
  ///
  /// Precedence, lowest first: scopes in declaration order, remote data,
  /// `extraVars`. A declared remote key without a value yet is `null`.
  pub fn scope(&self) -> Option<ScopeData> {
    let resolution = self.engine.resolver.resolve(&self.spec.scopes);
    if resolution.fetching {
      return None;
    }
    let mut scope = resolution.data;

    let values = self.remote.values();
    let remote: ScopeData = self
      .remote
      .declarations()
      .keys()
      .map(|key| (key.clone(), values.get(key).cloned().unwrap_or(JsonValue::Null)))
      .collect();
    merge_into(&mut scope, remote);
    merge_into(&mut scope, self.extra_vars.clone());
    Some(scope)
  }

  /// Re-render from current data.
  pub fn render(&mut self) -> &WidgetState {
    self.state = match self.scope() {
      None => WidgetState::AwaitingScope,
      Some(scope) => {
        let templates = &self.engine.templates;
        let optional = |source: &Option<String>| source.as_deref().map(|s| templates.render(s, &scope));
        WidgetState::Ready(RenderedWidget {
          content: templates.render(&self.spec.template, &scope),
          tooltip: optional(&self.spec.tooltip),
          badge: optional(&self.spec.badge),
          style: self.spec.style.clone(),
        })
      }
    };
    &self.state
  }

  /// Run the widget's `onClick`, if any.
  pub fn click(&self) -> Option<JoinHandle<()>> {
    let expression = self.spec.on_click.clone()?;
    self.trigger(expression)
  }

  /// Run an action expression (a `Button` node's `onClick`) in this
  /// widget's scope. Skipped while the scope is not ready.
  pub fn trigger(&self, expression: impl Into<String>) -> Option<JoinHandle<()>> {
    let Some(scope) = self.scope() else {
      log::debug!("[action] {} clicked before its scope was ready", self.spec.id);
      return None;
    };
    Some(self.engine.actions.spawn(expression, scope))
  }

  /// Replace the spec. Remote polling restarts only when the declaration
  /// map changed by value. Returns whether it restarted.
  pub fn update_spec(&mut self, spec: WidgetSpec) -> bool {
    let restarted = self.remote.update(spec.remote_data.clone());
    if restarted {
      log::debug!("[widget] {} remote data restarted", spec.id);
    }
    self.spec = spec;
    restarted
  }

  /// Replace the host-supplied variables merged over the scope bundle.
  pub fn set_extra_vars(&mut self, extra_vars: ScopeData) {
    self.extra_vars = extra_vars;
  }

  /// Wait until something this widget depends on may have changed: a
  /// telemetry cell behind one of its scopes, the date tick when it shows
  /// the date, or one of its remote values.
  pub async fn changed(&mut self) {
    let mut events_open = true;
    let mut remote_open = true;
    while events_open || remote_open {
      tokio::select! {
        event = self.events.recv(), if events_open => match event {
          Ok(event) if affects(&self.spec.scopes, event) => return,
          Ok(_) => {}
          Err(RecvError::Overflowed(_)) => return,
          Err(RecvError::Closed) => events_open = false,
        },
        result = self.remote_version.changed(), if remote_open => match result {
          Ok(()) => return,
          Err(_) => remote_open = false,
        },
      }
    }
    std::future::pending::<()>().await;
  }
}

fn affects(scopes: &[ScopeId], event: EngineEvent) -> bool {
  match event {
    EngineEvent::TelemetryChanged { category } => scopes.iter().any(|scope| scope.reads(category)),
    EngineEvent::DateTick => scopes.contains(&ScopeId::Date),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::telemetry::TelemetryCategory;

  #[test]
  fn relevance_follows_declared_scopes() {
    let scopes = [ScopeId::Power, ScopeId::Date];
    assert!(affects(&scopes, EngineEvent::DateTick));
    assert!(affects(&scopes, EngineEvent::TelemetryChanged {
      category: TelemetryCategory::Batteries
    }));
    assert!(!affects(&scopes, EngineEvent::TelemetryChanged {
      category: TelemetryCategory::Memory
    }));
    assert!(!affects(&[ScopeId::Memory], EngineEvent::DateTick));
  }

  #[test]
  fn state_serializes_with_status() {
    let json = serde_json::to_value(WidgetState::AwaitingScope).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "awaitingScope" }));
  }
}
