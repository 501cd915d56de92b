/*!
In-process backend.

Command handlers are registered per command; `push` delivers a payload to
every listener of an event. Everything invoked or emitted is recorded so the
caller can inspect it afterwards.
*/

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_broadcast::{InactiveReceiver, Sender};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use super::{Backend, BackendCommand, BackendEvent};
use crate::types::{EngineError, EngineResult};

const LISTENER_CAPACITY: usize = 64;

type HandlerFuture = Pin<Box<dyn Future<Output = EngineResult<JsonValue>> + Send>>;
type Handler = Arc<dyn Fn(JsonValue) -> HandlerFuture + Send + Sync>;

/// An event emitted through the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
  /// `None` for broadcasts.
  pub target: Option<String>,
  /// Event emitted.
  pub event: BackendEvent,
  /// Payload as sent.
  pub payload: JsonValue,
}

struct Channel {
  tx: Sender<JsonValue>,
  keepalive: InactiveReceiver<JsonValue>,
}

/// Backend living in the same process. Clone shares all state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
  handlers: Arc<Mutex<HashMap<BackendCommand, Handler>>>,
  channels: Arc<Mutex<HashMap<BackendEvent, Channel>>>,
  invocations: Arc<Mutex<Vec<(BackendCommand, JsonValue)>>>,
  emitted: Arc<Mutex<Vec<EmittedEvent>>>,
}

impl std::fmt::Debug for MemoryBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryBackend")
      .field("handlers", &self.handlers.lock().len())
      .finish_non_exhaustive()
  }
}

impl MemoryBackend {
  /// Backend with no handlers registered.
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer `command` with a synchronous handler.
  pub fn on<F>(&self, command: BackendCommand, handler: F)
  where
    F: Fn(JsonValue) -> EngineResult<JsonValue> + Send + Sync + 'static,
  {
    let handler = Arc::new(handler);
    self.handlers.lock().insert(
      command,
      Arc::new(move |args| -> HandlerFuture {
        let result = handler(args);
        Box::pin(async move { result })
      }),
    );
  }

  /// Answer `command` with an async handler.
  pub fn on_async<F, Fut>(&self, command: BackendCommand, handler: F)
  where
    F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<JsonValue>> + Send + 'static,
  {
    self
      .handlers
      .lock()
      .insert(command, Arc::new(move |args| -> HandlerFuture { Box::pin(handler(args)) }));
  }

  /// Always answer `command` with `value`.
  pub fn respond(&self, command: BackendCommand, value: JsonValue) {
    self.on(command, move |_| Ok(value.clone()));
  }

  /// Push `payload` to every listener of `event`.
  pub fn push(&self, event: BackendEvent, payload: JsonValue) {
    let tx = self.sender(event);
    if let Err(e) = tx.try_broadcast(payload) {
      log::debug!("[bridge] push of {event} not delivered: {e}");
    }
  }

  /// Commands invoked so far, in order.
  pub fn invocations(&self) -> Vec<(BackendCommand, JsonValue)> {
    self.invocations.lock().clone()
  }

  /// How many times `command` was invoked.
  pub fn invocation_count(&self, command: BackendCommand) -> usize {
    self
      .invocations
      .lock()
      .iter()
      .filter(|(c, _)| *c == command)
      .count()
  }

  /// Active listeners on `event`.
  pub fn listener_count(&self, event: BackendEvent) -> usize {
    self
      .channels
      .lock()
      .get(&event)
      .map_or(0, |channel| channel.tx.receiver_count())
  }

  /// Events emitted so far, in order.
  pub fn emitted(&self) -> Vec<EmittedEvent> {
    self.emitted.lock().clone()
  }

  fn sender(&self, event: BackendEvent) -> Sender<JsonValue> {
    let mut channels = self.channels.lock();
    let channel = channels.entry(event).or_insert_with(|| {
      let (mut tx, rx) = async_broadcast::broadcast(LISTENER_CAPACITY);
      tx.set_overflow(true);
      Channel {
        tx,
        keepalive: rx.deactivate(),
      }
    });
    channel.tx.clone()
  }
}

#[async_trait]
impl Backend for MemoryBackend {
  async fn invoke(&self, command: BackendCommand, args: JsonValue) -> EngineResult<JsonValue> {
    self.invocations.lock().push((command, args.clone()));
    let handler = self.handlers.lock().get(&command).cloned();
    match handler {
      Some(handler) => handler(args).await,
      None => Err(EngineError::CommandFailed {
        command,
        reason: "no handler registered".to_owned(),
      }),
    }
  }

  async fn emit(&self, event: BackendEvent, payload: JsonValue) -> EngineResult<()> {
    self.emitted.lock().push(EmittedEvent {
      target: None,
      event,
      payload: payload.clone(),
    });
    self.push(event, payload);
    Ok(())
  }

  async fn emit_to(
    &self,
    target: &str,
    event: BackendEvent,
    payload: JsonValue,
  ) -> EngineResult<()> {
    self.emitted.lock().push(EmittedEvent {
      target: Some(target.to_owned()),
      event,
      payload,
    });
    Ok(())
  }

  fn listen(&self, event: BackendEvent) -> async_broadcast::Receiver<JsonValue> {
    // Make sure the channel exists before activating a receiver on it.
    drop(self.sender(event));
    let channels = self.channels.lock();
    match channels.get(&event) {
      Some(channel) => channel.keepalive.activate_cloned(),
      None => async_broadcast::broadcast(1).1,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn unregistered_command_fails() {
    let backend = MemoryBackend::new();
    let result = backend.invoke(BackendCommand::GetUser, JsonValue::Null).await;
    assert!(matches!(
      result,
      Err(EngineError::CommandFailed {
        command: BackendCommand::GetUser,
        ..
      })
    ));
    assert_eq!(backend.invocation_count(BackendCommand::GetUser), 1);
  }

  #[tokio::test]
  async fn respond_answers_every_call() {
    let backend = MemoryBackend::new();
    backend.respond(BackendCommand::GetMemory, json!({ "total": 8 }));
    let a = backend.invoke(BackendCommand::GetMemory, JsonValue::Null).await.unwrap();
    let b = backend.invoke(BackendCommand::GetMemory, JsonValue::Null).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(backend.invocation_count(BackendCommand::GetMemory), 2);
  }

  #[tokio::test]
  async fn push_reaches_listeners() {
    let backend = MemoryBackend::new();
    let mut rx = backend.listen(BackendEvent::UserChanged);
    backend.push(BackendEvent::UserChanged, json!({ "name": "ada" }));
    assert_eq!(rx.recv().await.unwrap(), json!({ "name": "ada" }));
  }

  #[tokio::test]
  async fn emit_to_is_recorded_with_target() {
    let backend = MemoryBackend::new();
    backend
      .emit_to("toolbar", BackendEvent::ToolbarHidden, JsonValue::Null)
      .await
      .unwrap();
    let emitted = backend.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].target.as_deref(), Some("toolbar"));
  }
}
