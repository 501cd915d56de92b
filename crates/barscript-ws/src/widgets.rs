/*!
Mounted widgets served over the socket.

Each widget runs on its own task that owns the [`WidgetInstance`]: render,
broadcast `widget:rendered`, wait for [`WidgetInstance::changed`] or a
command, repeat. Unmounting aborts the task, which drops the instance and
stops its remote polling.
*/

use std::collections::HashMap;

use barscript::{Engine, ScopeData, WidgetId, WidgetInstance, WidgetSpec, WidgetState};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::frame;

const COMMAND_CAPACITY: usize = 32;

enum WidgetCommand {
  Update(Box<WidgetSpec>),
  SetExtraVars(ScopeData),
  Render(oneshot::Sender<WidgetState>),
  Click(oneshot::Sender<bool>),
}

struct MountedWidget {
  commands: mpsc::Sender<WidgetCommand>,
  task: JoinHandle<()>,
}

/// Owns every widget mounted by socket clients.
pub struct WidgetHost {
  engine: Engine,
  outbound: broadcast::Sender<String>,
  widgets: Mutex<HashMap<WidgetId, MountedWidget>>,
}

impl std::fmt::Debug for WidgetHost {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WidgetHost")
      .field("widgets", &self.widgets.lock().len())
      .finish_non_exhaustive()
  }
}

impl WidgetHost {
  /// Host whose frames go out on `outbound`.
  pub fn new(engine: Engine, outbound: broadcast::Sender<String>) -> Self {
    Self {
      engine,
      outbound,
      widgets: Mutex::new(HashMap::new()),
    }
  }

  /// Engine every widget shares.
  pub const fn engine(&self) -> &Engine {
    &self.engine
  }

  /// Mount `spec`, replacing any widget with the same id.
  pub fn mount(&self, spec: WidgetSpec, extra_vars: ScopeData) {
    let id = spec.id.clone();
    let instance = self.engine.mount(spec, extra_vars);
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let task = tokio::spawn(drive(instance, rx, self.outbound.clone()));
    let previous = self.widgets.lock().insert(id.clone(), MountedWidget { commands: tx, task });
    if let Some(previous) = previous {
      previous.task.abort();
      log::debug!("[widgets] remounted {id}");
    } else {
      log::debug!("[widgets] mounted {id}");
    }
  }

  /// Replace a mounted widget's spec. False when `spec.id` is not mounted.
  pub async fn update(&self, spec: WidgetSpec) -> bool {
    let id = spec.id.clone();
    self.send(&id, WidgetCommand::Update(Box::new(spec))).await
  }

  /// Replace the variables merged over a widget's scope. False if `id` is not mounted.
  pub async fn set_extra_vars(&self, id: &WidgetId, extra_vars: ScopeData) -> bool {
    self.send(id, WidgetCommand::SetExtraVars(extra_vars)).await
  }

  /// Current state of a widget.
  pub async fn render(&self, id: &WidgetId) -> Option<WidgetState> {
    let (tx, rx) = oneshot::channel();
    if !self.send(id, WidgetCommand::Render(tx)).await {
      return None;
    }
    rx.await.ok()
  }

  /// Run a widget's `onClick`. `Some(false)` when it has none or its scope
  /// is not ready.
  pub async fn click(&self, id: &WidgetId) -> Option<bool> {
    let (tx, rx) = oneshot::channel();
    if !self.send(id, WidgetCommand::Click(tx)).await {
      return None;
    }
    rx.await.ok()
  }

  /// Stop a widget and announce `widget:unmounted`. False if it was not mounted.
  pub fn unmount(&self, id: &WidgetId) -> bool {
    let Some(widget) = self.widgets.lock().remove(id) else {
      return false;
    };
    widget.task.abort();
    drop(
      self
        .outbound
        .send(frame("widget:unmounted", json!({ "widgetId": id }))),
    );
    log::debug!("[widgets] unmounted {id}");
    true
  }

  /// Ids of every mounted widget, sorted.
  pub fn ids(&self) -> Vec<WidgetId> {
    let mut ids: Vec<_> = self.widgets.lock().keys().cloned().collect();
    ids.sort();
    ids
  }

  async fn send(&self, id: &WidgetId, command: WidgetCommand) -> bool {
    let Some(commands) = self.widgets.lock().get(id).map(|w| w.commands.clone()) else {
      return false;
    };
    commands.send(command).await.is_ok()
  }
}

impl Drop for WidgetHost {
  fn drop(&mut self) {
    for (_, widget) in self.widgets.get_mut().drain() {
      widget.task.abort();
    }
  }
}

async fn drive(
  mut instance: WidgetInstance,
  mut commands: mpsc::Receiver<WidgetCommand>,
  outbound: broadcast::Sender<String>,
) {
  let mut dirty = true;
  loop {
    if dirty {
      let state = instance.render().clone();
      // No receivers just means no client is connected yet
      drop(outbound.send(frame(
        "widget:rendered",
        json!({ "widgetId": instance.id(), "state": state }),
      )));
    }
    dirty = true;

    tokio::select! {
      () = instance.changed() => {}
      command = commands.recv() => match command {
        None => break,
        Some(WidgetCommand::Update(spec)) => {
          instance.update_spec(*spec);
        }
        Some(WidgetCommand::SetExtraVars(extra_vars)) => instance.set_extra_vars(extra_vars),
        Some(WidgetCommand::Render(reply)) => {
          drop(reply.send(instance.state().clone()));
          dirty = false;
        }
        Some(WidgetCommand::Click(reply)) => {
          drop(reply.send(instance.click().is_some()));
          dirty = false;
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use barscript::{BackendCommand, EvaluatedNode, MemoryBackend};
  use std::sync::Arc;

  fn host() -> (WidgetHost, MemoryBackend, broadcast::Receiver<String>) {
    let backend = MemoryBackend::new();
    let engine = Engine::new(Arc::new(backend.clone())).unwrap();
    let (tx, rx) = broadcast::channel(64);
    (WidgetHost::new(engine, tx), backend, rx)
  }

  async fn next_frame(rx: &mut broadcast::Receiver<String>) -> serde_json::Value {
    serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
  }

  #[tokio::test]
  async fn mount_broadcasts_first_render() {
    let (host, _backend, mut rx) = host();
    host.mount(WidgetSpec::new("hello", "'hi'"), ScopeData::new());

    let frame = next_frame(&mut rx).await;
    assert_eq!(frame["event"], "widget:rendered");
    assert_eq!(frame["data"]["widgetId"], "hello");
    assert_eq!(frame["data"]["state"]["status"], "ready");
    assert_eq!(frame["data"]["state"]["content"], json!({ "@component": "Text", "value": "hi" }));
    assert_eq!(host.ids(), vec![WidgetId::from("hello")]);
  }

  #[tokio::test]
  async fn update_rerenders_with_new_template() {
    let (host, _backend, mut rx) = host();
    host.mount(WidgetSpec::new("w", "'one'"), ScopeData::new());
    next_frame(&mut rx).await;

    assert!(host.update(WidgetSpec::new("w", "'two'")).await);
    next_frame(&mut rx).await;
    let state = host.render(&WidgetId::from("w")).await.unwrap();
    assert_eq!(state.rendered().unwrap().content, EvaluatedNode::text("two"));
    assert!(!host.update(WidgetSpec::new("missing", "1")).await);
  }

  #[tokio::test]
  async fn click_reaches_backend() {
    let (host, backend, _rx) = host();
    backend.respond(BackendCommand::Lock, serde_json::Value::Null);
    let spec = WidgetSpec::new("lock", "icon('Lock')").with_on_click("invoke('lock')");
    host.mount(spec, ScopeData::new());

    assert_eq!(host.click(&WidgetId::from("lock")).await, Some(true));
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
      while backend.invocation_count(BackendCommand::Lock) == 0 {
        tokio::task::yield_now().await;
      }
    })
    .await
    .unwrap();
    assert_eq!(host.click(&WidgetId::from("nope")).await, None);
  }

  #[tokio::test]
  async fn unmount_announces_and_forgets() {
    let (host, _backend, mut rx) = host();
    host.mount(WidgetSpec::new("w", "1"), ScopeData::new());
    next_frame(&mut rx).await;

    assert!(host.unmount(&WidgetId::from("w")));
    let frame = next_frame(&mut rx).await;
    assert_eq!(frame, json!({ "event": "widget:unmounted", "data": { "widgetId": "w" } }));
    assert!(host.ids().is_empty());
    assert!(!host.unmount(&WidgetId::from("w")));
    assert_eq!(host.render(&WidgetId::from("w")).await, None);
  }
}
