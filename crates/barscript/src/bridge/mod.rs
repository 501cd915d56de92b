/*!
Backend bridge contract.

The native backend is an external collaborator. The engine only talks to it
through [`Backend`]: invoke a command from a closed set, emit an event from a
closed set, or listen to one of its push events. Payloads are opaque JSON.
*/

mod memory;

pub use memory::{EmittedEvent, MemoryBackend};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::value::{Error as NameError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::EngineResult;

/// Declares a closed, serde-named enumeration with an `ALL` table.
macro_rules! closed_names {
  (
    $(#[$meta:meta])*
    pub enum $name:ident { $($variant:ident => $wire:literal,)+ }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum $name {
      $(
        #[doc = concat!("`", $wire, "` on the wire.")]
        #[serde(rename = $wire)]
        $variant,
      )+
    }

    impl $name {
      /// Every name the backend registers, in declaration order.
      pub const ALL: &'static [Self] = &[$(Self::$variant),+];

      /// Wire name.
      pub const fn as_str(self) -> &'static str {
        match self {
          $(Self::$variant => $wire,)+
        }
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl FromStr for $name {
      type Err = NameError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        let de: StrDeserializer<'_, NameError> = s.into_deserializer();
        Self::deserialize(de)
      }
    }
  };
}

closed_names! {
  /// Commands the backend registers. Anything else cannot be invoked.
  pub enum BackendCommand {
    GetPowerStatus => "get_power_status",
    GetBatteries => "get_batteries",
    GetPowerMode => "get_power_mode",
    GetNotifications => "get_notifications",
    GetMediaDevices => "get_media_devices",
    GetMediaPlayers => "get_media_players",
    GetNetworkAdapters => "get_network_adapters",
    GetInternetConnection => "get_internet_connection",
    GetKeyboards => "get_keyboards",
    GetUser => "get_user",
    GetBluetoothDevices => "get_bluetooth_devices",
    GetFocusedApp => "get_focused_app",
    GetWorkspaces => "get_workspaces",
    GetActiveWorkspace => "get_active_workspace",
    GetDisks => "get_disks",
    GetNetworkStatistics => "get_network_statistics",
    GetMemory => "get_memory",
    GetCores => "get_cores",
    OpenFile => "open_file",
    Run => "run",
    WriteClipboard => "write_clipboard",
    SetVolume => "set_volume",
    ToggleMute => "toggle_mute",
    MediaTogglePlayPause => "media_toggle_play_pause",
    MediaNext => "media_next",
    MediaPrev => "media_prev",
    SwitchWorkspace => "switch_workspace",
    ShowStartMenu => "show_start_menu",
    ShowNotifications => "show_notifications",
    BluetoothDiscover => "bluetooth_discover",
    Lock => "lock",
    LogOut => "log_out",
    Suspend => "suspend",
    Restart => "restart",
    Shutdown => "shutdown",
  }
}

closed_names! {
  /// Events on the backend bus, pushed by the backend or emitted by actions.
  pub enum BackendEvent {
    PowerStatusChanged => "power_status_changed",
    BatteriesChanged => "batteries_changed",
    PowerModeChanged => "power_mode_changed",
    NotificationsChanged => "notifications_changed",
    MediaDevicesChanged => "media_devices_changed",
    MediaPlayersChanged => "media_players_changed",
    NetworkAdaptersChanged => "network_adapters_changed",
    InternetConnectionChanged => "internet_connection_changed",
    KeyboardsChanged => "keyboards_changed",
    UserChanged => "user_changed",
    BluetoothDevicesChanged => "bluetooth_devices_changed",
    FocusedAppChanged => "focused_app_changed",
    WorkspacesChanged => "workspaces_changed",
    ActiveWorkspaceChanged => "active_workspace_changed",
    DisksChanged => "disks_changed",
    NetworkStatisticsChanged => "network_statistics_changed",
    MemoryChanged => "memory_changed",
    CoresChanged => "cores_changed",
    WidgetTriggered => "widget_triggered",
    ToolbarHidden => "toolbar_hidden",
    ToolbarShown => "toolbar_shown",
    LauncherToggled => "launcher_toggled",
    NotificationsToggled => "notifications_toggled",
  }
}

/// Contract with the native backend process.
///
/// Implementations must be cheap to share; the engine holds one `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
  /// Invoke a registered command.
  async fn invoke(&self, command: BackendCommand, args: JsonValue) -> EngineResult<JsonValue>;

  /// Broadcast an event to every listener.
  async fn emit(&self, event: BackendEvent, payload: JsonValue) -> EngineResult<()>;

  /// Send an event to a single target (window label, widget id, ...).
  async fn emit_to(&self, target: &str, event: BackendEvent, payload: JsonValue)
    -> EngineResult<()>;

  /// Receive every payload pushed under `event`.
  fn listen(&self, event: BackendEvent) -> async_broadcast::Receiver<JsonValue>;
}
