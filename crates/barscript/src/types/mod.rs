/*! Core types for barscript.

Regenerate TypeScript types: `cargo test -p barscript export_bindings`
*/

#![allow(missing_docs)]

mod error;
mod event;
mod ids;
mod telemetry;
mod widget;

pub use error::{EngineError, EngineResult};
pub use event::EngineEvent;
pub use ids::WidgetId;
pub use telemetry::{
  AppNotification, Battery, BluetoothDevice, CoreUsage, Disk, FocusedApp, KeyboardLayout,
  MediaDevice, MediaDeviceKind, MediaPlayer, MemoryStats, NetworkAdapter, NetworkStatistics,
  PlaybackStatus, PowerMode, PowerStatus, SystemLanguage, User, Workspace, WorkspaceId,
};
pub use widget::{RemoteDataDeclaration, RequestInit, WidgetSpec};
