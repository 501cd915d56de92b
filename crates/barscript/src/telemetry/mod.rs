/*!
Telemetry cache - one shared cell per category of system data.

The registry is the only owner of telemetry state. Cells are written by
their own initial fetch and by backend push events, never by widget code.
Widgets read.

## Module Structure

- `mod.rs` - `TelemetryCategory`, `TelemetryRegistry`, push listeners
- `cell.rs` - `TelemetryCell` state machine
*/

mod cell;

pub use cell::{CellState, CellStatus, FetchFuture, Fetcher, TelemetryCell};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_broadcast::{RecvError, Sender};
use derive_more::Display;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use ts_rs::TS;

use crate::bridge::{Backend, BackendCommand, BackendEvent};
use crate::types::{
  AppNotification, Battery, BluetoothDevice, CoreUsage, Disk, EngineError, EngineEvent,
  EngineResult, FocusedApp, MediaDevice, MediaPlayer, MemoryStats, NetworkAdapter,
  NetworkStatistics, PowerMode, PowerStatus, SystemLanguage, User, Workspace, WorkspaceId,
};

/// One cell per category. Each has exactly one getter command and one push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, Display)]
#[ts(export)]
pub enum TelemetryCategory {
  /// AC line and battery saver flags.
  PowerStatus,
  /// Installed batteries.
  Batteries,
  /// Active power plan.
  PowerMode,
  /// Notification center entries.
  Notifications,
  /// Audio endpoints.
  MediaDevices,
  /// Media sessions.
  MediaPlayers,
  /// Network interfaces.
  NetworkAdapters,
  /// Whether the internet is reachable.
  InternetConnection,
  /// Input languages and layouts.
  Keyboards,
  /// Signed-in user.
  User,
  /// Known bluetooth devices.
  BluetoothDevices,
  /// Foreground window.
  FocusedApp,
  /// Virtual desktops.
  Workspaces,
  /// Current virtual desktop.
  ActiveWorkspace,
  /// Mounted disks.
  Disks,
  /// Per-interface traffic counters.
  NetworkStatistics,
  /// Physical and swap memory.
  Memory,
  /// Per-core CPU usage.
  Cores,
}

impl TelemetryCategory {
  /// Every category, in registry order.
  pub const ALL: [Self; 18] = [
    Self::PowerStatus,
    Self::Batteries,
    Self::PowerMode,
    Self::Notifications,
    Self::MediaDevices,
    Self::MediaPlayers,
    Self::NetworkAdapters,
    Self::InternetConnection,
    Self::Keyboards,
    Self::User,
    Self::BluetoothDevices,
    Self::FocusedApp,
    Self::Workspaces,
    Self::ActiveWorkspace,
    Self::Disks,
    Self::NetworkStatistics,
    Self::Memory,
    Self::Cores,
  ];

  /// Command returning the current value.
  pub const fn command(self) -> BackendCommand {
    match self {
      Self::PowerStatus => BackendCommand::GetPowerStatus,
      Self::Batteries => BackendCommand::GetBatteries,
      Self::PowerMode => BackendCommand::GetPowerMode,
      Self::Notifications => BackendCommand::GetNotifications,
      Self::MediaDevices => BackendCommand::GetMediaDevices,
      Self::MediaPlayers => BackendCommand::GetMediaPlayers,
      Self::NetworkAdapters => BackendCommand::GetNetworkAdapters,
      Self::InternetConnection => BackendCommand::GetInternetConnection,
      Self::Keyboards => BackendCommand::GetKeyboards,
      Self::User => BackendCommand::GetUser,
      Self::BluetoothDevices => BackendCommand::GetBluetoothDevices,
      Self::FocusedApp => BackendCommand::GetFocusedApp,
      Self::Workspaces => BackendCommand::GetWorkspaces,
      Self::ActiveWorkspace => BackendCommand::GetActiveWorkspace,
      Self::Disks => BackendCommand::GetDisks,
      Self::NetworkStatistics => BackendCommand::GetNetworkStatistics,
      Self::Memory => BackendCommand::GetMemory,
      Self::Cores => BackendCommand::GetCores,
    }
  }

  /// Event the backend pushes when the value changes.
  pub const fn event(self) -> BackendEvent {
    match self {
      Self::PowerStatus => BackendEvent::PowerStatusChanged,
      Self::Batteries => BackendEvent::BatteriesChanged,
      Self::PowerMode => BackendEvent::PowerModeChanged,
      Self::Notifications => BackendEvent::NotificationsChanged,
      Self::MediaDevices => BackendEvent::MediaDevicesChanged,
      Self::MediaPlayers => BackendEvent::MediaPlayersChanged,
      Self::NetworkAdapters => BackendEvent::NetworkAdaptersChanged,
      Self::InternetConnection => BackendEvent::InternetConnectionChanged,
      Self::Keyboards => BackendEvent::KeyboardsChanged,
      Self::User => BackendEvent::UserChanged,
      Self::BluetoothDevices => BackendEvent::BluetoothDevicesChanged,
      Self::FocusedApp => BackendEvent::FocusedAppChanged,
      Self::Workspaces => BackendEvent::WorkspacesChanged,
      Self::ActiveWorkspace => BackendEvent::ActiveWorkspaceChanged,
      Self::Disks => BackendEvent::DisksChanged,
      Self::NetworkStatistics => BackendEvent::NetworkStatisticsChanged,
      Self::Memory => BackendEvent::MemoryChanged,
      Self::Cores => BackendEvent::CoresChanged,
    }
  }
}

/// Type-erased view of a cell, for code that works across categories.
pub trait AnyCell: Send + Sync {
  /// Category held.
  fn category(&self) -> TelemetryCategory;

  /// Current lifecycle status.
  fn status(&self) -> CellStatus;

  /// Trigger the initial fetch if nobody has yet.
  fn trigger_init(self: Arc<Self>);

  /// Await the first settled state.
  fn wait_init(self: Arc<Self>) -> FetchFuture<()>;

  /// Deserialize and store a pushed payload.
  fn accept_push(&self, payload: JsonValue) -> EngineResult<()>;

  /// Current value as JSON, if ready.
  fn value_json(&self) -> Option<JsonValue>;
}

impl<T> AnyCell for TelemetryCell<T>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  fn category(&self) -> TelemetryCategory {
    TelemetryCell::category(self)
  }

  fn status(&self) -> CellStatus {
    TelemetryCell::status(self)
  }

  fn trigger_init(self: Arc<Self>) {
    self.ensure_init();
  }

  fn wait_init(self: Arc<Self>) -> FetchFuture<()> {
    Box::pin(async move { self.init().await })
  }

  fn accept_push(&self, payload: JsonValue) -> EngineResult<()> {
    self.push_json(payload)
  }

  fn value_json(&self) -> Option<JsonValue> {
    let value = self.get()?;
    match serde_json::to_value(&*value) {
      Ok(json) => Some(json),
      Err(e) => {
        log::warn!("[telemetry] {} value not serializable: {e}", self.category());
        None
      }
    }
  }
}

type Cell<T> = Arc<TelemetryCell<T>>;

/// Explicit registry of every telemetry cell. Created once per engine.
pub struct TelemetryRegistry {
  backend: Arc<dyn Backend>,
  connected: AtomicBool,
  listeners: Mutex<Vec<JoinHandle<()>>>,

  power_status: Cell<PowerStatus>,
  batteries: Cell<Vec<Battery>>,
  power_mode: Cell<PowerMode>,
  notifications: Cell<Vec<AppNotification>>,
  media_devices: Cell<Vec<MediaDevice>>,
  media_players: Cell<Vec<MediaPlayer>>,
  network_adapters: Cell<Vec<NetworkAdapter>>,
  internet_connection: Cell<bool>,
  keyboards: Cell<Vec<SystemLanguage>>,
  user: Cell<User>,
  bluetooth_devices: Cell<Vec<BluetoothDevice>>,
  focused_app: Cell<Option<FocusedApp>>,
  workspaces: Cell<Vec<Workspace>>,
  active_workspace: Cell<Option<WorkspaceId>>,
  disks: Cell<Vec<Disk>>,
  network_statistics: Cell<Vec<NetworkStatistics>>,
  memory: Cell<MemoryStats>,
  cores: Cell<Vec<CoreUsage>>,
}

impl std::fmt::Debug for TelemetryRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TelemetryRegistry")
      .field("connected", &self.connected.load(Ordering::SeqCst))
      .finish_non_exhaustive()
  }
}

/// Build a cell whose initial fetch invokes the category's getter command.
fn backend_cell<T>(
  backend: &Arc<dyn Backend>,
  category: TelemetryCategory,
  events_tx: &Sender<EngineEvent>,
) -> Cell<T>
where
  T: DeserializeOwned + Send + Sync + 'static,
{
  let backend = Arc::clone(backend);
  let fetcher: Fetcher<T> = Box::new(move || {
    let backend = Arc::clone(&backend);
    Box::pin(async move {
      let raw = backend.invoke(category.command(), JsonValue::Null).await?;
      serde_json::from_value(raw).map_err(|source| EngineError::TelemetryPayload { category, source })
    })
  });
  Arc::new(TelemetryCell::new(category, fetcher, events_tx.clone()))
}

impl TelemetryRegistry {
  /// One uninitialized cell per category, fetched through `backend`.
  pub fn new(backend: Arc<dyn Backend>, events_tx: &Sender<EngineEvent>) -> Self {
    use TelemetryCategory as C;
    let b = &backend;
    Self {
      power_status: backend_cell(b, C::PowerStatus, events_tx),
      batteries: backend_cell(b, C::Batteries, events_tx),
      power_mode: backend_cell(b, C::PowerMode, events_tx),
      notifications: backend_cell(b, C::Notifications, events_tx),
      media_devices: backend_cell(b, C::MediaDevices, events_tx),
      media_players: backend_cell(b, C::MediaPlayers, events_tx),
      network_adapters: backend_cell(b, C::NetworkAdapters, events_tx),
      internet_connection: backend_cell(b, C::InternetConnection, events_tx),
      keyboards: backend_cell(b, C::Keyboards, events_tx),
      user: backend_cell(b, C::User, events_tx),
      bluetooth_devices: backend_cell(b, C::BluetoothDevices, events_tx),
      focused_app: backend_cell(b, C::FocusedApp, events_tx),
      workspaces: backend_cell(b, C::Workspaces, events_tx),
      active_workspace: backend_cell(b, C::ActiveWorkspace, events_tx),
      disks: backend_cell(b, C::Disks, events_tx),
      network_statistics: backend_cell(b, C::NetworkStatistics, events_tx),
      memory: backend_cell(b, C::Memory, events_tx),
      cores: backend_cell(b, C::Cores, events_tx),
      connected: AtomicBool::new(false),
      listeners: Mutex::new(Vec::new()),
      backend,
    }
  }

  /// Register one push listener per cell. Only the first call does anything.
  pub fn connect(&self) {
    if self.connected.swap(true, Ordering::SeqCst) {
      return;
    }

    let mut listeners = self.listeners.lock();
    for category in TelemetryCategory::ALL {
      let cell = self.cell(category);
      let mut rx = self.backend.listen(category.event());
      listeners.push(tokio::spawn(async move {
        loop {
          match rx.recv().await {
            Ok(payload) => {
              if let Err(e) = cell.accept_push(payload) {
                log::warn!("[telemetry] ignoring push: {e}");
              }
            }
            Err(RecvError::Overflowed(n)) => {
              log::warn!("[telemetry] {category} listener lagged, skipped {n} pushes");
            }
            Err(RecvError::Closed) => break,
          }
        }
        log::debug!("[telemetry] {category} listener closed");
      }));
    }
  }

  /// Type-erased cell for `category`.
  pub fn cell(&self, category: TelemetryCategory) -> Arc<dyn AnyCell> {
    use TelemetryCategory as C;
    match category {
      C::PowerStatus => self.power_status.clone(),
      C::Batteries => self.batteries.clone(),
      C::PowerMode => self.power_mode.clone(),
      C::Notifications => self.notifications.clone(),
      C::MediaDevices => self.media_devices.clone(),
      C::MediaPlayers => self.media_players.clone(),
      C::NetworkAdapters => self.network_adapters.clone(),
      C::InternetConnection => self.internet_connection.clone(),
      C::Keyboards => self.keyboards.clone(),
      C::User => self.user.clone(),
      C::BluetoothDevices => self.bluetooth_devices.clone(),
      C::FocusedApp => self.focused_app.clone(),
      C::Workspaces => self.workspaces.clone(),
      C::ActiveWorkspace => self.active_workspace.clone(),
      C::Disks => self.disks.clone(),
      C::NetworkStatistics => self.network_statistics.clone(),
      C::Memory => self.memory.clone(),
      C::Cores => self.cores.clone(),
    }
  }

  /// [`TelemetryCategory::PowerStatus`] cell.
  pub const fn power_status(&self) -> &Cell<PowerStatus> {
    &self.power_status
  }

  /// [`TelemetryCategory::Batteries`] cell.
  pub const fn batteries(&self) -> &Cell<Vec<Battery>> {
    &self.batteries
  }

  /// [`TelemetryCategory::PowerMode`] cell.
  pub const fn power_mode(&self) -> &Cell<PowerMode> {
    &self.power_mode
  }

  /// [`TelemetryCategory::Notifications`] cell.
  pub const fn notifications(&self) -> &Cell<Vec<AppNotification>> {
    &self.notifications
  }

  /// [`TelemetryCategory::MediaDevices`] cell.
  pub const fn media_devices(&self) -> &Cell<Vec<MediaDevice>> {
    &self.media_devices
  }

  /// [`TelemetryCategory::MediaPlayers`] cell.
  pub const fn media_players(&self) -> &Cell<Vec<MediaPlayer>> {
    &self.media_players
  }

  /// [`TelemetryCategory::NetworkAdapters`] cell.
  pub const fn network_adapters(&self) -> &Cell<Vec<NetworkAdapter>> {
    &self.network_adapters
  }

  /// [`TelemetryCategory::InternetConnection`] cell.
  pub const fn internet_connection(&self) -> &Cell<bool> {
    &self.internet_connection
  }

  /// [`TelemetryCategory::Keyboards`] cell.
  pub const fn keyboards(&self) -> &Cell<Vec<SystemLanguage>> {
    &self.keyboards
  }

  /// [`TelemetryCategory::User`] cell.
  pub const fn user(&self) -> &Cell<User> {
    &self.user
  }

  /// [`TelemetryCategory::BluetoothDevices`] cell.
  pub const fn bluetooth_devices(&self) -> &Cell<Vec<BluetoothDevice>> {
    &self.bluetooth_devices
  }

  /// [`TelemetryCategory::FocusedApp`] cell.
  pub const fn focused_app(&self) -> &Cell<Option<FocusedApp>> {
    &self.focused_app
  }

  /// [`TelemetryCategory::Workspaces`] cell.
  pub const fn workspaces(&self) -> &Cell<Vec<Workspace>> {
    &self.workspaces
  }

  /// [`TelemetryCategory::ActiveWorkspace`] cell.
  pub const fn active_workspace(&self) -> &Cell<Option<WorkspaceId>> {
    &self.active_workspace
  }

  /// [`TelemetryCategory::Disks`] cell.
  pub const fn disks(&self) -> &Cell<Vec<Disk>> {
    &self.disks
  }

  /// [`TelemetryCategory::NetworkStatistics`] cell.
  pub const fn network_statistics(&self) -> &Cell<Vec<NetworkStatistics>> {
    &self.network_statistics
  }

  /// [`TelemetryCategory::Memory`] cell.
  pub const fn memory(&self) -> &Cell<MemoryStats> {
    &self.memory
  }

  /// [`TelemetryCategory::Cores`] cell.
  pub const fn cores(&self) -> &Cell<Vec<CoreUsage>> {
    &self.cores
  }
}

impl Drop for TelemetryRegistry {
  fn drop(&mut self) {
    for listener in self.listeners.lock().drain(..) {
      listener.abort();
    }
  }
}
