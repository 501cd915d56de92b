/*!
Backend bridge over the WebSocket broadcast.

The native backend is just another socket client. Commands go out as
`bridge:invoke` frames carrying a request id and come back through the
`command_result` RPC method; events go out as `bridge:emit` frames; push
events come in through the `push` RPC method.
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use async_trait::async_trait;
use barscript::{Backend, BackendCommand, BackendEvent, EngineError, EngineResult};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, oneshot};

/// Default time to wait for a `command_result`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const LISTENER_CAPACITY: usize = 64;

/// Serialize an outbound `{event, data}` frame.
pub fn frame(event: &str, data: impl Serialize) -> String {
  json!({ "event": event, "data": data }).to_string()
}

type Reply = Result<JsonValue, String>;

struct Listener {
  tx: Sender<JsonValue>,
  keepalive: InactiveReceiver<JsonValue>,
}

/// [`Backend`] implemented by a socket client on the other end.
pub struct SocketBackend {
  outbound: broadcast::Sender<String>,
  timeout: Duration,
  next_request: AtomicU64,
  pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
  listeners: Mutex<HashMap<BackendEvent, Listener>>,
}

impl std::fmt::Debug for SocketBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SocketBackend")
      .field("timeout", &self.timeout)
      .field("pending", &self.pending.lock().len())
      .finish_non_exhaustive()
  }
}

impl SocketBackend {
  /// Frames go out on `outbound`. Commands wait `timeout` for a reply.
  pub fn new(outbound: broadcast::Sender<String>, timeout: Duration) -> Self {
    Self {
      outbound,
      timeout,
      next_request: AtomicU64::new(1),
      pending: Mutex::new(HashMap::new()),
      listeners: Mutex::new(HashMap::new()),
    }
  }

  /// Deliver a backend reply. Returns false for unknown or expired ids.
  pub fn complete(&self, request_id: u64, reply: Reply) -> bool {
    let Some(tx) = self.pending.lock().remove(&request_id) else {
      log::debug!("[bridge] reply for unknown request {request_id}");
      return false;
    };
    tx.send(reply).is_ok()
  }

  /// Deliver a push event from the backend to every listener.
  pub fn push(&self, event: BackendEvent, payload: JsonValue) {
    let tx = self.sender(event);
    if let Err(e) = tx.try_broadcast(payload) {
      if e.is_full() {
        log::warn!("[bridge] listener channel full, dropping {event}");
      }
    }
  }

  /// Requests still waiting for a reply.
  pub fn pending_count(&self) -> usize {
    self.pending.lock().len()
  }

  fn sender(&self, event: BackendEvent) -> Sender<JsonValue> {
    let mut listeners = self.listeners.lock();
    let listener = listeners.entry(event).or_insert_with(|| {
      let (mut tx, rx) = async_broadcast::broadcast(LISTENER_CAPACITY);
      tx.set_overflow(true);
      Listener {
        tx,
        keepalive: rx.deactivate(),
      }
    });
    listener.tx.clone()
  }

  fn send(&self, message: String) -> Result<(), String> {
    self
      .outbound
      .send(message)
      .map(drop)
      .map_err(|_| "no backend connected".to_owned())
  }
}

#[async_trait]
impl Backend for SocketBackend {
  async fn invoke(&self, command: BackendCommand, args: JsonValue) -> EngineResult<JsonValue> {
    let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    self.pending.lock().insert(request_id, tx);

    let message = frame(
      "bridge:invoke",
      json!({ "requestId": request_id, "command": command, "args": args }),
    );
    if let Err(reason) = self.send(message) {
      self.pending.lock().remove(&request_id);
      return Err(EngineError::CommandFailed { command, reason });
    }

    match tokio::time::timeout(self.timeout, rx).await {
      Ok(Ok(Ok(value))) => Ok(value),
      Ok(Ok(Err(reason))) => Err(EngineError::CommandFailed { command, reason }),
      Ok(Err(_)) => Err(EngineError::CommandFailed {
        command,
        reason: "reply channel dropped".to_owned(),
      }),
      Err(_) => {
        self.pending.lock().remove(&request_id);
        log::warn!("[bridge] {command} (request {request_id}) timed out");
        Err(EngineError::CommandTimedOut(command))
      }
    }
  }

  async fn emit(&self, event: BackendEvent, payload: JsonValue) -> EngineResult<()> {
    let message = frame("bridge:emit", json!({ "event": event, "payload": payload }));
    self
      .send(message)
      .map_err(|reason| EngineError::EmitFailed { event, reason })
  }

  async fn emit_to(&self, target: &str, event: BackendEvent, payload: JsonValue) -> EngineResult<()> {
    let message = frame(
      "bridge:emit",
      json!({ "target": target, "event": event, "payload": payload }),
    );
    self
      .send(message)
      .map_err(|reason| EngineError::EmitFailed { event, reason })
  }

  fn listen(&self, event: BackendEvent) -> Receiver<JsonValue> {
    let listeners = self.listeners.lock();
    match listeners.get(&event) {
      Some(listener) => listener.keepalive.activate_cloned(),
      None => {
        drop(listeners);
        self.sender(event).new_receiver()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  fn backend(timeout: Duration) -> (Arc<SocketBackend>, broadcast::Receiver<String>) {
    let (tx, rx) = broadcast::channel(16);
    (Arc::new(SocketBackend::new(tx, timeout)), rx)
  }

  #[tokio::test]
  async fn invoke_round_trips_through_frames() {
    let (backend, mut rx) = backend(DEFAULT_COMMAND_TIMEOUT);
    let call = tokio::spawn({
      let backend = Arc::clone(&backend);
      async move { backend.invoke(BackendCommand::GetUser, JsonValue::Null).await }
    });

    let sent: JsonValue = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(sent["event"], "bridge:invoke");
    assert_eq!(sent["data"]["command"], "get_user");
    let request_id = sent["data"]["requestId"].as_u64().unwrap();

    assert!(backend.complete(request_id, Ok(json!({ "name": "ada" }))));
    assert_eq!(call.await.unwrap().unwrap(), json!({ "name": "ada" }));
    assert_eq!(backend.pending_count(), 0);
  }

  #[tokio::test]
  async fn error_replies_fail_the_command() {
    let (backend, mut rx) = backend(DEFAULT_COMMAND_TIMEOUT);
    let call = tokio::spawn({
      let backend = Arc::clone(&backend);
      async move { backend.invoke(BackendCommand::Lock, JsonValue::Null).await }
    });
    let sent: JsonValue = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    backend.complete(sent["data"]["requestId"].as_u64().unwrap(), Err("denied".into()));
    assert!(matches!(
      call.await.unwrap(),
      Err(EngineError::CommandFailed { command: BackendCommand::Lock, .. })
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn unanswered_commands_time_out() {
    let (backend, _rx) = backend(Duration::from_millis(100));
    let result = backend.invoke(BackendCommand::GetMemory, JsonValue::Null).await;
    assert!(matches!(result, Err(EngineError::CommandTimedOut(BackendCommand::GetMemory))));
    assert_eq!(backend.pending_count(), 0);
    assert!(!backend.complete(1, Ok(JsonValue::Null)));
  }

  #[tokio::test]
  async fn invoke_without_clients_fails_fast() {
    let (tx, rx) = broadcast::channel(4);
    drop(rx);
    let backend = SocketBackend::new(tx, DEFAULT_COMMAND_TIMEOUT);
    let result = backend.invoke(BackendCommand::GetUser, JsonValue::Null).await;
    assert!(matches!(result, Err(EngineError::CommandFailed { .. })));
  }

  #[tokio::test]
  async fn pushes_reach_listeners() {
    let (backend, _rx) = backend(DEFAULT_COMMAND_TIMEOUT);
    let mut listener = backend.listen(BackendEvent::MemoryChanged);
    backend.push(BackendEvent::MemoryChanged, json!({ "total": 1 }));
    assert_eq!(listener.recv().await.unwrap(), json!({ "total": 1 }));
  }

  #[tokio::test]
  async fn emit_to_sends_target() {
    let (backend, mut rx) = backend(DEFAULT_COMMAND_TIMEOUT);
    backend
      .emit_to("toolbar", BackendEvent::ToolbarHidden, JsonValue::Null)
      .await
      .unwrap();
    let sent: JsonValue = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(sent, json!({
      "event": "bridge:emit",
      "data": { "target": "toolbar", "event": "toolbar_hidden", "payload": null },
    }));
  }
}
