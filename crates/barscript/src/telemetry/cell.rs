/*!
A single lazily-initialized, push-refreshed telemetry value.

```text
Uninitialized --init()--> Fetching --fetch ok--> Ready
                              |                   ^ |
                              |--fetch err--> Failed |
                              '-----push----------'  push (replace in place)
```

Only one fetch is ever issued per cell. A push always wins: if it lands
while the fetch is in flight, the fetch result is discarded when it arrives.
*/

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_broadcast::Sender;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use super::TelemetryCategory;
use crate::types::{EngineError, EngineEvent, EngineResult};

/// Boxed future returned by a cell's fetcher.
pub type FetchFuture<T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send>>;

/// Produces the initial value of a cell.
pub type Fetcher<T> = Box<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Lifecycle state of a cell.
#[derive(Debug)]
pub enum CellState<T> {
  /// No fetch attempted.
  Uninitialized,
  /// Initial fetch in flight.
  Fetching,
  /// Latest value, from the fetch or a push.
  Ready(Arc<T>),
  /// The initial fetch failed. A later push can still make the cell ready.
  Failed(String),
}

impl<T> CellState<T> {
  /// Ready or failed: `init()` has nothing left to wait for.
  pub const fn is_settled(&self) -> bool {
    matches!(self, Self::Ready(_) | Self::Failed(_))
  }

  /// Drop the payload.
  pub const fn status(&self) -> CellStatus {
    match self {
      Self::Uninitialized => CellStatus::Uninitialized,
      Self::Fetching => CellStatus::Fetching,
      Self::Ready(_) => CellStatus::Ready,
      Self::Failed(_) => CellStatus::Failed,
    }
  }
}

/// Payload-free view of [`CellState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
  /// See [`CellState::Uninitialized`].
  Uninitialized,
  /// See [`CellState::Fetching`].
  Fetching,
  /// See [`CellState::Ready`].
  Ready,
  /// See [`CellState::Failed`].
  Failed,
}

/// Shared holder for one category of telemetry.
pub struct TelemetryCell<T> {
  category: TelemetryCategory,
  state: watch::Sender<CellState<T>>,
  fetcher: Fetcher<T>,
  events_tx: Sender<EngineEvent>,
}

impl<T> std::fmt::Debug for TelemetryCell<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TelemetryCell")
      .field("category", &self.category)
      .field("status", &self.state.borrow().status())
      .finish_non_exhaustive()
  }
}

impl<T> TelemetryCell<T>
where
  T: Send + Sync + 'static,
{
  /// Uninitialized cell. Nothing is fetched before `init()`.
  pub fn new(
    category: TelemetryCategory,
    fetcher: Fetcher<T>,
    events_tx: Sender<EngineEvent>,
  ) -> Self {
    let (state, _) = watch::channel(CellState::Uninitialized);
    Self {
      category,
      state,
      fetcher,
      events_tx,
    }
  }

  /// Category this cell holds.
  pub const fn category(&self) -> TelemetryCategory {
    self.category
  }

  /// Current lifecycle status.
  pub fn status(&self) -> CellStatus {
    self.state.borrow().status()
  }

  /// Whether a value is available.
  pub fn is_ready(&self) -> bool {
    self.status() == CellStatus::Ready
  }

  /// Current value, if the cell is ready.
  pub fn get(&self) -> Option<Arc<T>> {
    match &*self.state.borrow() {
      CellState::Ready(value) => Some(Arc::clone(value)),
      CellState::Uninitialized | CellState::Fetching | CellState::Failed(_) => None,
    }
  }

  /// Watch every state transition.
  pub fn subscribe(&self) -> watch::Receiver<CellState<T>> {
    self.state.subscribe()
  }

  /// Start the one and only fetch, without waiting for it.
  ///
  /// The fetch runs on its own task so a cancelled caller never strands the
  /// cell in `Fetching`.
  pub fn ensure_init(self: &Arc<Self>) {
    let claimed = self.state.send_if_modified(|state| {
      if matches!(state, CellState::Uninitialized) {
        *state = CellState::Fetching;
        true
      } else {
        false
      }
    });
    if !claimed {
      return;
    }

    log::debug!("[telemetry] {} fetching", self.category);
    let cell = Arc::clone(self);
    tokio::spawn(async move {
      let result = (cell.fetcher)().await;
      cell.settle_fetch(result);
    });
  }

  /// Resolve once the first value is available (from either fetch or push).
  ///
  /// Idempotent. Returns the fetch error if the cell settled as failed.
  pub async fn init(self: &Arc<Self>) -> EngineResult<()> {
    self.ensure_init();
    let mut rx = self.state.subscribe();
    let failure = {
      let state = rx
        .wait_for(CellState::is_settled)
        .await
        .map_err(|e| {
          EngineError::Internal(format!("{} state channel closed: {e}", self.category))
        })?;
      match &*state {
        CellState::Failed(reason) => Some(reason.clone()),
        CellState::Uninitialized | CellState::Fetching | CellState::Ready(_) => None,
      }
    };
    match failure {
      Some(reason) => Err(EngineError::TelemetryFetch {
        category: self.category,
        reason,
      }),
      None => Ok(()),
    }
  }

  /// Replace the value. Always wins over an in-flight fetch.
  pub fn push(&self, value: T) {
    self.state.send_replace(CellState::Ready(Arc::new(value)));
    self.emit_changed();
  }

  fn settle_fetch(&self, result: EngineResult<T>) {
    let category = self.category;
    let mut became_ready = false;
    self.state.send_if_modified(|state| {
      if !matches!(state, CellState::Fetching) {
        log::debug!("[telemetry] {category} fetch resolved after a push, discarding");
        return false;
      }
      *state = match result {
        Ok(value) => {
          became_ready = true;
          CellState::Ready(Arc::new(value))
        }
        Err(e) => {
          log::warn!("[telemetry] {category} initial fetch failed: {e}");
          CellState::Failed(e.to_string())
        }
      };
      true
    });
    if became_ready {
      self.emit_changed();
    }
  }

  fn emit_changed(&self) {
    let event = EngineEvent::TelemetryChanged {
      category: self.category,
    };
    if let Err(e) = self.events_tx.try_broadcast(event) {
      if e.is_full() {
        log::error!("[telemetry] event channel overflow, dropping {} change", self.category);
      }
    }
  }
}

impl<T> TelemetryCell<T>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  /// Push a raw backend payload.
  pub fn push_json(&self, payload: JsonValue) -> EngineResult<()> {
    let value = serde_json::from_value(payload).map_err(|source| EngineError::TelemetryPayload {
      category: self.category,
      source,
    })?;
    self.push(value);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::oneshot;

  type Slot = Arc<Mutex<Option<oneshot::Receiver<EngineResult<u32>>>>>;

  /// A cell whose single fetch resolves when the returned sender fires.
  fn gated_cell() -> (
    Arc<TelemetryCell<u32>>,
    oneshot::Sender<EngineResult<u32>>,
    Arc<AtomicUsize>,
  ) {
    let (tx, rx) = oneshot::channel();
    let slot: Slot = Arc::new(Mutex::new(Some(rx)));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in = Arc::clone(&calls);
    let fetcher: Fetcher<u32> = Box::new(move || {
      calls_in.fetch_add(1, Ordering::SeqCst);
      let rx = slot.lock().take();
      Box::pin(async move {
        match rx {
          Some(rx) => rx
            .await
            .unwrap_or_else(|_| Err(EngineError::Internal("gate dropped".into()))),
          None => Err(EngineError::Internal("fetched twice".into())),
        }
      })
    });
    let (events_tx, _) = async_broadcast::broadcast(16);
    let cell = Arc::new(TelemetryCell::new(TelemetryCategory::Memory, fetcher, events_tx));
    (cell, tx, calls)
  }

  #[tokio::test]
  async fn push_before_fetch_wins_the_race() {
    let (cell, gate, _) = gated_cell();
    cell.ensure_init();
    assert_eq!(cell.status(), CellStatus::Fetching);

    cell.push(1); // value A
    gate.send(Ok(2)).unwrap(); // value B resolves later
    cell.init().await.unwrap();
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    assert_eq!(cell.get().as_deref(), Some(&1));
  }

  #[tokio::test]
  async fn fetch_result_lands_when_no_push() {
    let (cell, gate, calls) = gated_cell();
    let waiter = {
      let cell = Arc::clone(&cell);
      tokio::spawn(async move { cell.init().await })
    };
    gate.send(Ok(7)).unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(cell.get().as_deref(), Some(&7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn init_is_idempotent() {
    let (cell, gate, calls) = gated_cell();
    cell.ensure_init();
    cell.ensure_init();
    gate.send(Ok(3)).unwrap();
    cell.init().await.unwrap();
    cell.init().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn failed_fetch_then_push_recovers() {
    let (cell, gate, _) = gated_cell();
    cell.ensure_init();
    gate.send(Err(EngineError::Internal("offline".into()))).unwrap();
    let err = cell.init().await.unwrap_err();
    assert!(matches!(err, EngineError::TelemetryFetch { .. }));
    assert_eq!(cell.status(), CellStatus::Failed);
    assert!(cell.get().is_none());

    cell.push(9);
    assert_eq!(cell.get().as_deref(), Some(&9));
    assert_eq!(cell.status(), CellStatus::Ready);
  }

  #[tokio::test]
  async fn push_replaces_ready_value_in_place() {
    let (cell, gate, _) = gated_cell();
    cell.ensure_init();
    gate.send(Ok(1)).unwrap();
    cell.init().await.unwrap();

    let mut rx = cell.subscribe();
    cell.push(5);
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().status(), CellStatus::Ready);
    assert_eq!(cell.get().as_deref(), Some(&5));
  }

  #[tokio::test]
  async fn bad_payload_is_rejected() {
    let (cell, _gate, _) = gated_cell();
    let err = cell.push_json(serde_json::json!("not a number")).unwrap_err();
    assert!(matches!(err, EngineError::TelemetryPayload { .. }));
    assert_eq!(cell.status(), CellStatus::Uninitialized);
  }
}
