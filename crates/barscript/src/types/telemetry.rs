/*!
Telemetry records pushed or returned by the native backend.

Payloads are deserialized leniently: missing fields fall back to their
defaults so an older backend never blanks a whole category.
*/

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// AC line and battery saver state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct PowerStatus {
  pub ac_line_status: u8,
  pub battery_flag: u8,
  pub battery_life_percent: u8,
  pub system_status_flag: u8,
  /// Seconds of battery life left, -1 when unknown.
  pub battery_life_time: i64,
  /// Seconds of battery life when fully charged, -1 when unknown.
  pub battery_full_life_time: i64,
}

impl PowerStatus {
  /// Whether the machine is plugged in.
  pub const fn is_charging(&self) -> bool {
    self.ac_line_status == 1
  }
}

/// One physical battery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct Battery {
  pub vendor: Option<String>,
  pub model: Option<String>,
  pub technology: String,
  pub energy: f64,
  pub energy_full: f64,
  pub energy_full_design: f64,
  pub energy_rate: f64,
  pub voltage: f64,
  /// Charge level, 0-100.
  pub percentage: f64,
  pub smart_charging: bool,
  pub state: String,
  pub time_to_full: Option<f64>,
  pub time_to_empty: Option<f64>,
}

/// OS power plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum PowerMode {
  BatterySaver,
  BetterBattery,
  #[default]
  Balanced,
  HighPerformance,
  MaxPerformance,
  Unknown,
}

/// A toast in the notification center.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct AppNotification {
  pub id: u32,
  pub app_umid: String,
  pub app_name: String,
  pub app_description: String,
  /// Unix timestamp in milliseconds.
  pub date: i64,
  pub title: String,
  pub body: String,
}

/// Whether an audio endpoint plays or records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum MediaDeviceKind {
  #[default]
  Output,
  Input,
}

/// An audio endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct MediaDevice {
  pub id: String,
  pub name: String,
  pub kind: MediaDeviceKind,
  pub is_default_multimedia: bool,
  pub is_default_communications: bool,
  /// Master volume, 0.0-1.0.
  pub volume: f64,
  pub muted: bool,
}

/// Playback state of a media session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum PlaybackStatus {
  Playing,
  Paused,
  #[default]
  Stopped,
}

/// A media session (music player, browser tab, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct MediaPlayer {
  pub umid: String,
  pub title: String,
  pub author: String,
  pub thumbnail: Option<String>,
  pub playing: bool,
  pub status: PlaybackStatus,
  pub default: bool,
}

/// A network interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct NetworkAdapter {
  pub name: String,
  pub description: String,
  pub status: String,
  pub dns_suffix: String,
  /// "wifi", "ethernet", ...
  pub interface_type: String,
  pub ipv6: Option<String>,
  pub ipv4: Option<String>,
  pub gateway: Option<String>,
  pub mac: Option<String>,
}

/// A keyboard layout of an input language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct KeyboardLayout {
  pub id: String,
  pub display_name: String,
  pub active: bool,
}

/// An installed input language and its layouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct SystemLanguage {
  pub id: String,
  pub code: String,
  pub name: String,
  pub native_name: String,
  pub input_methods: Vec<KeyboardLayout>,
}

impl SystemLanguage {
  /// The active layout of this language, if any.
  pub fn active_layout(&self) -> Option<&KeyboardLayout> {
    self.input_methods.iter().find(|layout| layout.active)
  }
}

/// The signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct User {
  pub name: String,
  pub domain: String,
  pub profile_home_path: String,
  pub email: Option<String>,
  pub profile_picture: Option<String>,
}

/// A paired or discovered bluetooth device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct BluetoothDevice {
  pub id: String,
  pub name: String,
  pub address: u64,
  pub major_class: String,
  pub minor_class: String,
  pub connected: bool,
  pub paired: bool,
  pub can_pair: bool,
  pub is_low_energy: bool,
}

/// The window that currently holds keyboard focus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct FocusedApp {
  pub hwnd: i64,
  pub title: String,
  pub name: String,
  pub exe: Option<String>,
  pub umid: Option<String>,
  pub is_maximized: bool,
  pub is_fullscreened: bool,
}

/// Virtual desktop identifier.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS, Display, From, Into,
)]
#[ts(export)]
pub struct WorkspaceId(pub String);

/// A virtual desktop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct Workspace {
  pub id: WorkspaceId,
  pub name: Option<String>,
  pub wallpaper: Option<String>,
}

/// A mounted disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct Disk {
  pub name: String,
  pub file_system: String,
  pub mount_point: String,
  pub total_space: u64,
  pub available_space: u64,
  pub is_removable: bool,
  pub read_bytes: u64,
  pub written_bytes: u64,
}

/// Per-interface traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct NetworkStatistics {
  pub name: String,
  pub received: u64,
  pub transmitted: u64,
  pub packets_received: u64,
  pub packets_transmitted: u64,
}

/// Physical and swap memory counters, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct MemoryStats {
  pub total: u64,
  pub free: u64,
  pub swap_total: u64,
  pub swap_free: u64,
}

/// Load of one logical core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct CoreUsage {
  pub name: String,
  pub brand: String,
  /// Usage in percent, 0-100.
  pub usage: f64,
  pub frequency: u64,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn partial_payload_uses_defaults() {
    let battery: Battery = serde_json::from_value(json!({ "percentage": 42.0 })).unwrap();
    assert_eq!(battery.percentage, 42.0);
    assert!(battery.vendor.is_none());
    assert!(!battery.smart_charging);
  }

  #[test]
  fn power_status_reports_charging() {
    let status: PowerStatus = serde_json::from_value(json!({ "acLineStatus": 1 })).unwrap();
    assert!(status.is_charging());
  }

  #[test]
  fn active_layout_is_found() {
    let lang = SystemLanguage {
      id: "en-US".into(),
      input_methods: vec![
        KeyboardLayout {
          id: "a".into(),
          display_name: "US".into(),
          active: false,
        },
        KeyboardLayout {
          id: "b".into(),
          display_name: "Dvorak".into(),
          active: true,
        },
      ],
      ..SystemLanguage::default()
    };
    assert_eq!(lang.active_layout().map(|l| l.id.as_str()), Some("b"));
  }
}
