/*!
Privileged tier for click handlers.

Evaluation is synchronous and only records what the expression asked for;
the recorded [`ActionEffect`]s are then performed in order against the
backend. Command and event names are parsed into the closed enumerations
during evaluation, so an unknown name fails before anything runs.
*/

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{redact, ProgramCache};
use crate::bridge::{Backend, BackendCommand, BackendEvent};
use crate::scope::ScopeData;
use crate::script::{Capabilities, EvalLimits, Interpreter, ScriptError, ScriptResult, Value};
use crate::types::EngineResult;

/// One side effect requested by an action expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActionEffect {
  /// Open a file, folder or URI with its default handler.
  Open {
    /// Path or URI.
    target: String,
  },
  /// Spawn a program.
  #[serde(rename_all = "camelCase")]
  Run {
    /// Program path or name.
    program: String,
    /// Arguments, each already stringified.
    args: Vec<String>,
    /// Directory to start in. Inherited when `None`.
    working_dir: Option<String>,
  },
  /// Put `text` on the clipboard.
  CopyToClipboard {
    /// Text to copy.
    text: String,
  },
  /// Invoke a backend command.
  Invoke {
    /// Command to invoke.
    command: BackendCommand,
    /// Arguments, converted to JSON.
    args: JsonValue,
  },
  /// Broadcast a backend event.
  Emit {
    /// Event to broadcast.
    event: BackendEvent,
    /// Payload, converted to JSON.
    payload: JsonValue,
  },
  /// Send a backend event to one window, `target` being its label.
  EmitTo {
    /// Label of the receiving window.
    target: String,
    /// Event to send.
    event: BackendEvent,
    /// Payload, converted to JSON.
    payload: JsonValue,
  },
}

impl ActionEffect {
  async fn perform(&self, backend: &dyn Backend) -> EngineResult<()> {
    match self {
      Self::Open { target } => {
        backend
          .invoke(BackendCommand::OpenFile, json!({ "path": target }))
          .await?;
      }
      Self::Run {
        program,
        args,
        working_dir,
      } => {
        backend
          .invoke(
            BackendCommand::Run,
            json!({ "program": program, "args": args, "workingDir": working_dir }),
          )
          .await?;
      }
      Self::CopyToClipboard { text } => {
        backend
          .invoke(BackendCommand::WriteClipboard, json!({ "text": text }))
          .await?;
      }
      Self::Invoke { command, args } => {
        backend.invoke(*command, args.clone()).await?;
      }
      Self::Emit { event, payload } => backend.emit(*event, payload.clone()).await?,
      Self::EmitTo {
        target,
        event,
        payload,
      } => backend.emit_to(target, *event, payload.clone()).await?,
    }
    Ok(())
  }
}

/// Capability table of the privileged tier. Records instead of performing.
#[derive(Debug)]
pub struct ActionCapabilities {
  effects: Vec<ActionEffect>,
  max_len: usize,
}

impl Default for ActionCapabilities {
  fn default() -> Self {
    Self::new(&EvalLimits::default())
  }
}

impl ActionCapabilities {
  /// Capability names an action may call.
  pub const NAMES: &'static [&'static str] =
    &["open", "run", "copyToClipboard", "invoke", "emit", "emitTo"];

  /// Arguments and payloads are held to `limits.max_string_len`.
  pub const fn new(limits: &EvalLimits) -> Self {
    Self {
      effects: Vec::new(),
      max_len: limits.max_string_len,
    }
  }

  /// Effects collected so far, in call order.
  pub fn into_effects(self) -> Vec<ActionEffect> {
    self.effects
  }
}

impl Capabilities for ActionCapabilities {
  fn names(&self) -> &'static [&'static str] {
    Self::NAMES
  }

  fn call(&mut self, name: &'static str, args: Vec<Value>) -> ScriptResult<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let payload = |value: &Value, default: JsonValue| match value {
      Value::Undefined => Ok(default),
      other => other.to_json_within(self.max_len),
    };
    let effect = match name {
      "open" => ActionEffect::Open {
        target: string_arg(name, "target", &arg(0))?,
      },
      "run" => ActionEffect::Run {
        program: string_arg(name, "program", &arg(0))?,
        args: match arg(1) {
          Value::Undefined | Value::Null => Vec::new(),
          Value::Array(items) => items
            .iter()
            .map(|item| item.display_within(self.max_len))
            .collect::<ScriptResult<_>>()?,
          other => {
            return Err(ScriptError::invalid_argument(format!(
              "run() args must be an array, got {}",
              other.type_of()
            )))
          }
        },
        working_dir: optional_string(name, "workingDir", &arg(2))?,
      },
      "copyToClipboard" => ActionEffect::CopyToClipboard {
        text: match arg(0) {
          Value::String(s) => s.to_string(),
          Value::Number(_) | Value::Bool(_) => arg(0).to_display(),
          other => {
            return Err(ScriptError::invalid_argument(format!(
              "copyToClipboard() expects text, got {}",
              other.type_of()
            )))
          }
        },
      },
      "invoke" => {
        let command = string_arg(name, "command", &arg(0))?;
        ActionEffect::Invoke {
          command: command
            .parse()
            .map_err(|_| ScriptError::invalid_argument(format!("unknown command '{command}'")))?,
          args: payload(&arg(1), JsonValue::Object(serde_json::Map::new()))?,
        }
      }
      "emit" => ActionEffect::Emit {
        event: event_arg(&arg(0))?,
        payload: payload(&arg(1), JsonValue::Null)?,
      },
      "emitTo" => ActionEffect::EmitTo {
        target: string_arg(name, "target", &arg(0))?,
        event: event_arg(&arg(1))?,
        payload: payload(&arg(2), JsonValue::Null)?,
      },
      _ => return Err(ScriptError::invalid_argument(format!("{name} is not an action"))),
    };
    self.effects.push(effect);
    Ok(Value::Undefined)
  }
}

fn string_arg(function: &str, param: &str, value: &Value) -> ScriptResult<String> {
  match value {
    Value::String(s) if !s.is_empty() => Ok(s.to_string()),
    other => Err(ScriptError::invalid_argument(format!(
      "{function}() {param} must be a non-empty string, got {}",
      other.type_of()
    ))),
  }
}

fn optional_string(function: &str, param: &str, value: &Value) -> ScriptResult<Option<String>> {
  if value.is_nullish() {
    return Ok(None);
  }
  string_arg(function, param, value).map(Some)
}

fn event_arg(value: &Value) -> ScriptResult<BackendEvent> {
  let name = string_arg("emit", "event", value)?;
  name
    .parse()
    .map_err(|_| ScriptError::invalid_argument(format!("unknown event '{name}'")))
}

/// Runs click expressions against the privileged capability table.
///
/// Cheap to clone; clones share the compile cache.
#[derive(Clone)]
pub struct ActionEvaluator {
  backend: Arc<dyn Backend>,
  cache: Arc<ProgramCache>,
  limits: EvalLimits,
  redacted_keys: Arc<[String]>,
  runtime: Handle,
}

impl std::fmt::Debug for ActionEvaluator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActionEvaluator")
      .field("limits", &self.limits)
      .field("cached", &self.cache.len())
      .finish_non_exhaustive()
  }
}

impl ActionEvaluator {
  /// Evaluator whose effects run on `runtime`.
  pub fn new(
    backend: Arc<dyn Backend>,
    cache_capacity: usize,
    limits: EvalLimits,
    redacted_keys: Vec<String>,
    runtime: Handle,
  ) -> Self {
    Self {
      backend,
      cache: Arc::new(ProgramCache::new(cache_capacity)),
      limits,
      redacted_keys: redacted_keys.into(),
      runtime,
    }
  }

  /// Evaluate `expression` and return the effects it requested, in order.
  pub fn plan(&self, expression: &str, scope: &ScopeData) -> ScriptResult<Vec<ActionEffect>> {
    let program = self.cache.compile(expression)?;
    let mut capabilities = ActionCapabilities::new(&self.limits);
    Interpreter::evaluate(&program, scope, &mut capabilities, self.limits)?;
    Ok(capabilities.into_effects())
  }

  /// Perform `effects` in order. The first failure stops the chain.
  pub async fn execute(&self, effects: &[ActionEffect]) -> EngineResult<()> {
    for effect in effects {
      effect.perform(self.backend.as_ref()).await?;
    }
    Ok(())
  }

  /// Plan and execute.
  pub async fn run(&self, expression: &str, scope: &ScopeData) -> EngineResult<()> {
    let effects = self.plan(expression, scope)?;
    log::debug!("[action] {} effect(s) from {expression:?}", effects.len());
    self.execute(&effects).await
  }

  /// Fire-and-forget [`run`](Self::run). Failures are logged, never returned.
  pub fn spawn(&self, expression: impl Into<String>, scope: ScopeData) -> JoinHandle<()> {
    let this = self.clone();
    let expression = expression.into();
    self.runtime.spawn(async move {
      if let Err(e) = this.run(&expression, &scope).await {
        log::warn!(
          "[action] {e} (expression: {expression:?}, scope: {})",
          redact(&scope, &this.redacted_keys)
        );
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bridge::{EmittedEvent, MemoryBackend};
  use crate::script::ScriptErrorCode;
  use crate::types::EngineError;

  fn evaluator(backend: &MemoryBackend) -> ActionEvaluator {
    ActionEvaluator::new(
      Arc::new(backend.clone()),
      8,
      EvalLimits::default(),
      vec!["env".into()],
      Handle::current(),
    )
  }

  #[tokio::test]
  async fn plans_effects_in_order() {
    let backend = MemoryBackend::new();
    let effects = evaluator(&backend)
      .plan(
        "open('C:/x.txt')\ncopyToClipboard(42)\ninvoke('set_volume', { level: 0.5 })",
        &ScopeData::new(),
      )
      .unwrap();
    assert_eq!(effects, vec![
      ActionEffect::Open {
        target: "C:/x.txt".into()
      },
      ActionEffect::CopyToClipboard { text: "42".into() },
      ActionEffect::Invoke {
        command: BackendCommand::SetVolume,
        args: json!({ "level": 0.5 }),
      },
    ]);
  }

  #[tokio::test]
  async fn unknown_names_fail_at_evaluation() {
    let backend = MemoryBackend::new();
    let evaluator = evaluator(&backend);
    for source in ["invoke('rm_rf')", "emit('anything')", "emitTo('main', 'nope')"] {
      let err = evaluator.plan(source, &ScopeData::new()).unwrap_err();
      assert_eq!(err.code, ScriptErrorCode::InvalidArgument, "{source}");
    }
    assert!(backend.invocations().is_empty());
  }

  #[tokio::test]
  async fn oversized_payloads_fail_at_evaluation() {
    let backend = MemoryBackend::new();
    let source = format!(
      "let a = ['x'.padStart(1000)]{}\nemitTo('toolbar', 'widget_triggered', a)",
      "\na = [a, a]".repeat(20)
    );
    let err = evaluator(&backend).plan(&source, &ScopeData::new()).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::SizeLimitExceeded);
    assert!(backend.emitted().is_empty());
  }

  #[tokio::test]
  async fn builders_are_not_available() {
    let backend = MemoryBackend::new();
    let err = evaluator(&backend)
      .plan("Icon('x')", &ScopeData::new())
      .unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::UnknownIdentifier);
  }

  #[tokio::test]
  async fn executes_against_backend() {
    let backend = MemoryBackend::new();
    backend.respond(BackendCommand::Run, JsonValue::Null);
    backend.respond(BackendCommand::MediaNext, JsonValue::Null);
    evaluator(&backend)
      .run(
        "run('code', ['.'], 'C:/src')\ninvoke('media_next')\nemitTo('toolbar', 'widget_triggered', { id: 'w' })",
        &ScopeData::new(),
      )
      .await
      .unwrap();

    let invocations = backend.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].0, BackendCommand::Run);
    assert_eq!(
      invocations[0].1,
      json!({ "program": "code", "args": ["."], "workingDir": "C:/src" })
    );
    assert_eq!(invocations[1], (BackendCommand::MediaNext, json!({})));
    assert_eq!(backend.emitted(), vec![EmittedEvent {
      target: Some("toolbar".into()),
      event: BackendEvent::WidgetTriggered,
      payload: json!({ "id": "w" }),
    }]);
  }

  #[tokio::test]
  async fn first_failure_stops_the_chain() {
    let backend = MemoryBackend::new();
    backend.on(BackendCommand::Lock, |_| {
      Err(EngineError::CommandFailed {
        command: BackendCommand::Lock,
        reason: "denied".into(),
      })
    });
    backend.respond(BackendCommand::Suspend, JsonValue::Null);
    let result = evaluator(&backend)
      .run("invoke('lock')\ninvoke('suspend')", &ScopeData::new())
      .await;
    assert!(result.is_err());
    assert_eq!(backend.invocation_count(BackendCommand::Suspend), 0);
  }

  #[tokio::test]
  async fn spawn_logs_instead_of_failing() {
    let backend = MemoryBackend::new();
    backend.respond(BackendCommand::ToggleMute, JsonValue::Null);
    let evaluator = evaluator(&backend);
    evaluator.spawn("nope()", ScopeData::new()).await.unwrap();
    evaluator.spawn("invoke('toggle_mute')", ScopeData::new()).await.unwrap();
    assert_eq!(backend.invocation_count(BackendCommand::ToggleMute), 1);
  }

  #[tokio::test]
  async fn scope_is_visible_to_actions() {
    let backend = MemoryBackend::new();
    let scope = json!({ "focusedApp": { "path": "C:/app.exe" } });
    let effects = evaluator(&backend)
      .plan("if (focusedApp) open(focusedApp.path)", scope.as_object().unwrap())
      .unwrap();
    assert_eq!(effects, vec![ActionEffect::Open {
      target: "C:/app.exe".into()
    }]);
  }
}
