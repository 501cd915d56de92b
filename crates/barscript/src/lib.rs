/*!
barscript - widget data and scripting engine for desktop toolbars

Telemetry pushed by a native backend is cached in shared cells, resolved
into per-widget scopes, merged with polled remote data, and handed to an
untrusted template running in a capability-limited sandbox. Its output is
validated into an [`EvaluatedNode`] tree before any renderer sees it.

```ignore
use barscript::{Engine, MemoryBackend, ScopeData, ScopeId, WidgetSpec};

let backend = Arc::new(MemoryBackend::new());
let engine = Engine::new(backend)?;

let spec = WidgetSpec::new("volume", "`${(volume * 100).toFixed(0)}%`")
    .with_scopes([ScopeId::Media])
    .with_on_click("invoke('toggle_mute')");
let mut widget = engine.mount(spec, ScopeData::new());

// Render, then wait for anything the widget depends on
loop {
    match widget.render() {
        WidgetState::AwaitingScope => {}
        WidgetState::Ready(rendered) => draw(rendered),
    }
    widget.changed().await;
}

// Remote polling stops when the widget is dropped
drop(widget);
```
*/

mod config;
mod core;
mod node;
mod widget;

pub mod bridge;
pub mod evaluate;
pub mod remote;
pub mod scope;
pub mod script;
pub mod telemetry;

mod types;
pub use types::*;

pub use crate::bridge::{Backend, BackendCommand, BackendEvent, MemoryBackend};
pub use crate::config::EngineConfig;
pub use crate::core::{Engine, EngineBuilder};
pub use crate::evaluate::{ActionEffect, ActionEvaluator, TemplateEvaluator};
pub use crate::node::{EvaluatedNode, NodeError, TextValue, COMPONENT_TAG, DEFAULT_ICON_SIZE};
pub use crate::remote::{HttpRemoteSource, RemoteDataFetcher, RemoteSource};
pub use crate::scope::{ScopeData, ScopeId, ScopeResolution, ScopeResolver};
pub use crate::script::{EvalLimits, ScriptError, ScriptErrorCode, ScriptResult};
pub use crate::telemetry::{TelemetryCategory, TelemetryRegistry};
pub use crate::widget::{RenderedWidget, WidgetInstance, WidgetState};
