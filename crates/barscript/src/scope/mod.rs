/*!
Scope resolution - turning a widget's declared scopes into one flat bundle.

A scope is ready when every telemetry cell behind it is ready. Until then
the whole resolution reports `fetching` and carries no data; the widget
renders nothing rather than a half-populated template.

Keys are merged in the widget's declaration order, so a later scope wins a
key collision. Repeated scopes collapse to their first position.

## Module Structure

- `mod.rs` - `ScopeId`, `ScopeResolver`, key producers, merging
- `date.rs` - date formatting and the aligned `DateTicker`
*/

mod date;

pub use date::{next_tick_delay, DateFormat, DateTicker, TickPrecision, DEFAULT_DATE_FORMAT};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use ts_rs::TS;

use crate::telemetry::{CellStatus, TelemetryCategory, TelemetryRegistry};
use crate::types::{EngineResult, MediaDevice, MediaDeviceKind};

/// Flat key to value bundle handed to evaluation.
pub type ScopeData = Map<String, JsonValue>;

/// A named bundle of live data a widget can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ScopeId {
  /// `date`, `timestamp`.
  Date,
  /// `notifications`, `notificationCount`.
  Notifications,
  /// Volume and mute state of both default devices, plus media sessions.
  Media,
  /// `online`, `interfaces`, `usingInterface`.
  Network,
  /// `keyboards`, `activeKeyboard`, `activeLayout`.
  Keyboard,
  /// `user`.
  User,
  /// `bluetoothDevices`, `connectedDevices`.
  Bluetooth,
  /// `power`, `batteries`, `battery`, `powerMode`.
  Power,
  /// `focusedApp`.
  FocusedApp,
  /// `workspaces`, `activeWorkspace`.
  Workspaces,
  /// `disks`.
  Disk,
  /// `networkStatistics`.
  NetworkStatistics,
  /// `memory`.
  Memory,
  /// `cores`, `cpuUsage`.
  Cpu,
}

impl ScopeId {
  /// Canonical listing order.
  pub const ALL: [Self; 14] = [
    Self::Date,
    Self::Notifications,
    Self::Media,
    Self::Network,
    Self::Keyboard,
    Self::User,
    Self::Bluetooth,
    Self::Power,
    Self::FocusedApp,
    Self::Workspaces,
    Self::Disk,
    Self::NetworkStatistics,
    Self::Memory,
    Self::Cpu,
  ];

  /// Telemetry cells this scope reads. Date reads none.
  pub const fn cells(self) -> &'static [TelemetryCategory] {
    use TelemetryCategory as C;
    match self {
      Self::Date => &[],
      Self::Notifications => &[C::Notifications],
      Self::Media => &[C::MediaDevices, C::MediaPlayers],
      Self::Network => &[C::NetworkAdapters, C::InternetConnection],
      Self::Keyboard => &[C::Keyboards],
      Self::User => &[C::User],
      Self::Bluetooth => &[C::BluetoothDevices],
      Self::Power => &[C::PowerStatus, C::Batteries, C::PowerMode],
      Self::FocusedApp => &[C::FocusedApp],
      Self::Workspaces => &[C::Workspaces, C::ActiveWorkspace],
      Self::Disk => &[C::Disks],
      Self::NetworkStatistics => &[C::NetworkStatistics],
      Self::Memory => &[C::Memory],
      Self::Cpu => &[C::Cores],
    }
  }

  /// Keys this scope contributes to the bundle.
  pub const fn keys(self) -> &'static [&'static str] {
    match self {
      Self::Date => &["date", "timestamp"],
      Self::Notifications => &["notifications", "notificationCount"],
      Self::Media => &[
        "volume",
        "isMuted",
        "inputVolume",
        "inputIsMuted",
        "mediaSession",
        "mediaSessions",
      ],
      Self::Network => &["online", "interfaces", "usingInterface"],
      Self::Keyboard => &["keyboards", "activeKeyboard", "activeLayout"],
      Self::User => &["user"],
      Self::Bluetooth => &["bluetoothDevices", "connectedDevices"],
      Self::Power => &["power", "batteries", "battery", "powerMode"],
      Self::FocusedApp => &["focusedApp"],
      Self::Workspaces => &["workspaces", "activeWorkspace"],
      Self::Disk => &["disks"],
      Self::NetworkStatistics => &["networkStatistics"],
      Self::Memory => &["memory"],
      Self::Cpu => &["cores", "cpuUsage"],
    }
  }

  /// Whether `category` backs this scope.
  pub fn reads(self, category: TelemetryCategory) -> bool {
    self.cells().contains(&category)
  }
}

/// Drop repeated scopes, keeping each at its first position.
pub fn dedup_scopes(scopes: &[ScopeId]) -> Vec<ScopeId> {
  let mut seen = Vec::with_capacity(scopes.len());
  for scope in scopes {
    if !seen.contains(scope) {
      seen.push(*scope);
    }
  }
  seen
}

/// Assign every key of `layer` into `base`, overwriting collisions.
pub fn merge_into(base: &mut ScopeData, layer: ScopeData) {
  for (key, value) in layer {
    base.insert(key, value);
  }
}

/// Result of resolving a widget's scopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ScopeResolution {
  /// At least one backing cell is not ready yet.
  pub fetching: bool,
  /// Merged bundle. Empty while fetching.
  #[ts(type = "Record<string, unknown>")]
  pub data: ScopeData,
}

impl ScopeResolution {
  fn pending() -> Self {
    Self {
      fetching: true,
      data: ScopeData::new(),
    }
  }
}

/// Reads telemetry cells and produces scope bundles.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
  registry: Arc<TelemetryRegistry>,
  date_format: DateFormat,
}

impl ScopeResolver {
  /// Resolver over `registry`, formatting `date` with `date_format`.
  pub const fn new(registry: Arc<TelemetryRegistry>, date_format: DateFormat) -> Self {
    Self {
      registry,
      date_format,
    }
  }

  /// Cells scopes read from.
  pub const fn registry(&self) -> &Arc<TelemetryRegistry> {
    &self.registry
  }

  /// Format of the `date` key.
  pub const fn date_format(&self) -> &DateFormat {
    &self.date_format
  }

  /// Whether every cell behind `scope` is ready.
  pub fn is_ready(&self, scope: ScopeId) -> bool {
    scope
      .cells()
      .iter()
      .all(|category| self.registry.cell(*category).status() == CellStatus::Ready)
  }

  /// Snapshot resolution. Starts the initial fetch of every backing cell
  /// that has not been fetched yet; never waits.
  pub fn resolve(&self, scopes: &[ScopeId]) -> ScopeResolution {
    let scopes = dedup_scopes(scopes);
    for scope in &scopes {
      for category in scope.cells() {
        self.registry.cell(*category).trigger_init();
      }
    }

    if !scopes.iter().all(|scope| self.is_ready(*scope)) {
      return ScopeResolution::pending();
    }

    let mut data = ScopeData::new();
    for scope in scopes {
      match self.produce(scope) {
        Some(layer) => merge_into(&mut data, layer),
        None => return ScopeResolution::pending(),
      }
    }
    ScopeResolution {
      fetching: false,
      data,
    }
  }

  /// Wait until every backing cell has settled (ready or failed).
  pub async fn wait_ready(&self, scopes: &[ScopeId]) -> EngineResult<()> {
    for scope in dedup_scopes(scopes) {
      for category in scope.cells() {
        self.registry.cell(*category).wait_init().await?;
      }
    }
    Ok(())
  }

  /// Keys of one scope, or `None` if a backing cell has no value.
  pub fn produce(&self, scope: ScopeId) -> Option<ScopeData> {
    let r = &self.registry;
    let mut out = ScopeData::new();
    match scope {
      ScopeId::Date => {
        let now = chrono::Local::now();
        out.insert("date".into(), self.date_format.format(&now).into());
        out.insert("timestamp".into(), now.timestamp_millis().into());
      }
      ScopeId::Notifications => {
        let notifications = r.notifications().get()?;
        out.insert("notificationCount".into(), notifications.len().into());
        out.insert("notifications".into(), to_json(&*notifications));
      }
      ScopeId::Media => {
        let devices = r.media_devices().get()?;
        let players = r.media_players().get()?;
        let output = default_device(&devices, MediaDeviceKind::Output);
        let input = default_device(&devices, MediaDeviceKind::Input);
        out.insert("volume".into(), output.map_or(0.0, |d| d.volume).into());
        out.insert("isMuted".into(), output.is_some_and(|d| d.muted).into());
        out.insert("inputVolume".into(), input.map_or(0.0, |d| d.volume).into());
        out.insert("inputIsMuted".into(), input.is_some_and(|d| d.muted).into());
        let session = players.iter().find(|p| p.default).or_else(|| players.first());
        out.insert("mediaSession".into(), to_json(&session));
        out.insert("mediaSessions".into(), to_json(&*players));
      }
      ScopeId::Network => {
        let adapters = r.network_adapters().get()?;
        let online = r.internet_connection().get()?;
        let using = adapters
          .iter()
          .find(|a| a.status.eq_ignore_ascii_case("up") && a.gateway.is_some());
        out.insert("online".into(), (*online).into());
        out.insert("interfaces".into(), to_json(&*adapters));
        out.insert("usingInterface".into(), to_json(&using));
      }
      ScopeId::Keyboard => {
        let keyboards = r.keyboards().get()?;
        let active = keyboards
          .iter()
          .find(|lang| lang.active_layout().is_some())
          .or_else(|| keyboards.first());
        let layout = active.and_then(|lang| lang.active_layout());
        out.insert("keyboards".into(), to_json(&*keyboards));
        out.insert("activeKeyboard".into(), to_json(&active));
        out.insert("activeLayout".into(), to_json(&layout));
      }
      ScopeId::User => {
        out.insert("user".into(), to_json(&*r.user().get()?));
      }
      ScopeId::Bluetooth => {
        let devices = r.bluetooth_devices().get()?;
        let connected: Vec<_> = devices.iter().filter(|d| d.connected).collect();
        out.insert("bluetoothDevices".into(), to_json(&*devices));
        out.insert("connectedDevices".into(), to_json(&connected));
      }
      ScopeId::Power => {
        let power = r.power_status().get()?;
        let batteries = r.batteries().get()?;
        let mode = r.power_mode().get()?;
        out.insert("power".into(), to_json(&*power));
        out.insert("battery".into(), to_json(&batteries.first()));
        out.insert("batteries".into(), to_json(&*batteries));
        out.insert("powerMode".into(), to_json(&*mode));
      }
      ScopeId::FocusedApp => {
        out.insert("focusedApp".into(), to_json(&*r.focused_app().get()?));
      }
      ScopeId::Workspaces => {
        let workspaces = r.workspaces().get()?;
        let active_id = r.active_workspace().get()?;
        let active = (*active_id)
          .as_ref()
          .and_then(|id| workspaces.iter().find(|w| &w.id == id));
        out.insert("workspaces".into(), to_json(&*workspaces));
        out.insert("activeWorkspace".into(), to_json(&active));
      }
      ScopeId::Disk => {
        out.insert("disks".into(), to_json(&*r.disks().get()?));
      }
      ScopeId::NetworkStatistics => {
        out.insert("networkStatistics".into(), to_json(&*r.network_statistics().get()?));
      }
      ScopeId::Memory => {
        out.insert("memory".into(), to_json(&*r.memory().get()?));
      }
      ScopeId::Cpu => {
        let cores = r.cores().get()?;
        let usage = mean(cores.iter().map(|c| c.usage));
        out.insert("cores".into(), to_json(&*cores));
        out.insert("cpuUsage".into(), usage.into());
      }
    }
    Some(out)
  }
}

fn default_device(devices: &[MediaDevice], kind: MediaDeviceKind) -> Option<&MediaDevice> {
  devices
    .iter()
    .find(|d| d.kind == kind && d.is_default_multimedia)
    .or_else(|| devices.iter().find(|d| d.kind == kind))
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
  let count = values.len();
  if count == 0 {
    return 0.0;
  }
  values.sum::<f64>() / count as f64
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> JsonValue {
  serde_json::to_value(value).unwrap_or_else(|e| {
    log::warn!("[scope] value not serializable: {e}");
    JsonValue::Null
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bridge::MemoryBackend;
  use crate::types::{
    Battery, MediaPlayer, MemoryStats, PowerMode, PowerStatus, User, Workspace, WorkspaceId,
  };
  use serde_json::json;

  fn resolver() -> ScopeResolver {
    let (tx, _rx) = async_broadcast::broadcast(64);
    let registry = TelemetryRegistry::new(Arc::new(MemoryBackend::new()), &tx);
    ScopeResolver::new(Arc::new(registry), DateFormat::default())
  }

  #[test]
  fn every_scope_declares_keys() {
    for scope in ScopeId::ALL {
      assert!(!scope.keys().is_empty(), "{scope:?}");
    }
  }

  #[test]
  fn serializes_as_variant_name() {
    assert_eq!(serde_json::to_value(ScopeId::NetworkStatistics).unwrap(), json!("NetworkStatistics"));
  }

  #[test]
  fn dedup_keeps_first_position() {
    let scopes = dedup_scopes(&[ScopeId::Power, ScopeId::User, ScopeId::Power]);
    assert_eq!(scopes, vec![ScopeId::Power, ScopeId::User]);
  }

  #[tokio::test]
  async fn date_scope_is_always_ready() {
    let resolution = resolver().resolve(&[ScopeId::Date]);
    assert!(!resolution.fetching);
    assert!(resolution.data["date"].is_string());
    assert!(resolution.data["timestamp"].is_i64());
  }

  #[tokio::test]
  async fn fetching_until_every_cell_is_ready() {
    let resolver = resolver();
    let registry = resolver.registry().clone();

    assert!(resolver.resolve(&[ScopeId::User, ScopeId::Memory]).fetching);

    registry.user().push(User::default());
    let partial = resolver.resolve(&[ScopeId::User, ScopeId::Memory]);
    assert!(partial.fetching);
    assert!(partial.data.is_empty());

    registry.memory().push(MemoryStats {
      total: 8,
      ..MemoryStats::default()
    });
    let ready = resolver.resolve(&[ScopeId::User, ScopeId::Memory]);
    assert!(!ready.fetching);
    assert_eq!(ready.data["memory"]["total"], json!(8));
  }

  #[tokio::test]
  async fn power_scope_needs_all_three_cells() {
    let resolver = resolver();
    let registry = resolver.registry().clone();
    registry.power_status().push(PowerStatus::default());
    registry.batteries().push(vec![Battery {
      percentage: 80.0,
      ..Battery::default()
    }]);
    assert!(resolver.resolve(&[ScopeId::Power]).fetching);

    registry.power_mode().push(PowerMode::BatterySaver);
    let data = resolver.resolve(&[ScopeId::Power]).data;
    assert_eq!(data["battery"]["percentage"], json!(80.0));
    assert_eq!(data["powerMode"], json!("batterySaver"));
  }

  #[tokio::test]
  async fn media_prefers_default_session() {
    let resolver = resolver();
    let registry = resolver.registry().clone();
    registry.media_devices().push(Vec::new());
    registry.media_players().push(vec![
      MediaPlayer {
        title: "first".into(),
        ..MediaPlayer::default()
      },
      MediaPlayer {
        title: "second".into(),
        default: true,
        ..MediaPlayer::default()
      },
    ]);
    let data = resolver.resolve(&[ScopeId::Media]).data;
    assert_eq!(data["mediaSession"]["title"], json!("second"));
    assert_eq!(data["volume"], json!(0.0));
    assert_eq!(data["isMuted"], json!(false));
  }

  #[tokio::test]
  async fn active_workspace_is_looked_up() {
    let resolver = resolver();
    let registry = resolver.registry().clone();
    registry.workspaces().push(vec![
      Workspace {
        id: WorkspaceId("a".into()),
        name: Some("Main".into()),
        ..Workspace::default()
      },
      Workspace {
        id: WorkspaceId("b".into()),
        name: Some("Code".into()),
        ..Workspace::default()
      },
    ]);
    registry.active_workspace().push(Some(WorkspaceId("b".into())));
    let data = resolver.resolve(&[ScopeId::Workspaces]).data;
    assert_eq!(data["activeWorkspace"]["name"], json!("Code"));
    assert_eq!(data["workspaces"].as_array().map(Vec::len), Some(2));
  }

  #[test]
  fn later_scope_wins_key_collision() {
    // Two real scopes never share a key, so collide through merge_into directly.
    let mut base = ScopeData::new();
    merge_into(&mut base, json!({ "k": 1, "a": true }).as_object().cloned().unwrap());
    merge_into(&mut base, json!({ "k": 2 }).as_object().cloned().unwrap());
    assert_eq!(base["k"], json!(2));
    assert_eq!(base["a"], json!(true));
  }

  #[tokio::test]
  async fn resolve_triggers_fetch_of_backing_cells() {
    let backend = MemoryBackend::new();
    backend.respond(crate::bridge::BackendCommand::GetUser, json!({ "name": "ada" }));
    let (tx, _rx) = async_broadcast::broadcast(64);
    let registry = Arc::new(TelemetryRegistry::new(Arc::new(backend.clone()), &tx));
    let resolver = ScopeResolver::new(registry, DateFormat::default());

    assert!(resolver.resolve(&[ScopeId::User]).fetching);
    resolver.wait_ready(&[ScopeId::User]).await.unwrap();
    let data = resolver.resolve(&[ScopeId::User]).data;
    assert_eq!(data["user"]["name"], json!("ada"));
    assert_eq!(backend.invocation_count(crate::bridge::BackendCommand::GetUser), 1);
  }
}
