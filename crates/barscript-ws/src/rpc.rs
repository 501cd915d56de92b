/*!
RPC request/response types and dispatch.
*/

#![allow(missing_docs)]

use barscript::{BackendEvent, ScopeData, ScopeId, ScopeResolution, WidgetId, WidgetSpec, WidgetState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use ts_rs::TS;

use crate::server::WebSocketState;

/// RPC request.
#[derive(Debug, Deserialize, TS)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
#[ts(export)]
pub enum RpcRequest {
  /// Mount a widget, replacing any widget with the same id.
  #[serde(rename_all = "camelCase")]
  Mount {
    widget: WidgetSpec,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    extra_vars: ScopeData,
  },
  /// Replace a mounted widget's spec.
  Update { widget: WidgetSpec },
  /// Replace a mounted widget's extra variables.
  #[serde(rename_all = "camelCase")]
  SetExtraVars {
    widget_id: WidgetId,
    #[ts(type = "Record<string, unknown>")]
    extra_vars: ScopeData,
  },
  #[serde(rename_all = "camelCase")]
  Unmount { widget_id: WidgetId },
  /// Current state of a mounted widget.
  #[serde(rename_all = "camelCase")]
  Render { widget_id: WidgetId },
  /// Run a mounted widget's `onClick`.
  #[serde(rename_all = "camelCase")]
  Click { widget_id: WidgetId },
  /// Resolve scopes without mounting anything.
  Scope { scopes: Vec<ScopeId> },
  /// Push event from the native backend.
  Push {
    #[ts(type = "string")]
    event: BackendEvent,
    #[serde(default)]
    #[ts(type = "unknown")]
    payload: JsonValue,
  },
  /// Reply to a `bridge:invoke` frame.
  #[serde(rename_all = "camelCase")]
  CommandResult {
    request_id: u64,
    #[serde(default)]
    #[ts(type = "unknown")]
    result: JsonValue,
    #[serde(default)]
    error: Option<String>,
  },
  /// Ids of every mounted widget.
  Widgets,
}

/// RPC response.
#[derive(Debug, Serialize, TS)]
#[serde(untagged)]
#[ts(export)]
pub enum RpcResponse {
  State(Box<WidgetState>),
  Resolution(ScopeResolution),
  Widgets(Vec<WidgetId>),
  Bool(bool),
  /// No data.
  Null,
}

pub async fn dispatch_json(state: &WebSocketState, method: &str, args: &JsonValue) -> JsonValue {
  let request_value = json!({ "method": method, "args": args });

  match serde_json::from_value::<RpcRequest>(request_value) {
    Ok(request) => match dispatch(state, request).await {
      Ok(response) => json!({ "result": response }),
      Err(e) => {
        log::warn!("[rpc] {method} failed: {e}");
        json!({ "error": e })
      }
    },
    Err(e) => {
      log::warn!("[rpc] Invalid request for {method}: {e}");
      json!({ "error": format!("Invalid request: {e}") })
    }
  }
}

pub async fn dispatch(state: &WebSocketState, request: RpcRequest) -> Result<RpcResponse, String> {
  let host = state.host();
  match request {
    RpcRequest::Mount { widget, extra_vars } => {
      host.mount(widget, extra_vars);
      Ok(RpcResponse::Null)
    }

    RpcRequest::Update { widget } => {
      let id = widget.id.clone();
      if host.update(widget).await {
        Ok(RpcResponse::Null)
      } else {
        Err(format!("Widget {id} is not mounted"))
      }
    }

    RpcRequest::SetExtraVars {
      widget_id,
      extra_vars,
    } => {
      if host.set_extra_vars(&widget_id, extra_vars).await {
        Ok(RpcResponse::Null)
      } else {
        Err(format!("Widget {widget_id} is not mounted"))
      }
    }

    RpcRequest::Unmount { widget_id } => Ok(RpcResponse::Bool(host.unmount(&widget_id))),

    RpcRequest::Render { widget_id } => host
      .render(&widget_id)
      .await
      .map(|state| RpcResponse::State(Box::new(state)))
      .ok_or_else(|| format!("Widget {widget_id} is not mounted")),

    RpcRequest::Click { widget_id } => host
      .click(&widget_id)
      .await
      .map(RpcResponse::Bool)
      .ok_or_else(|| format!("Widget {widget_id} is not mounted")),

    RpcRequest::Scope { scopes } => Ok(RpcResponse::Resolution(host.engine().resolve(&scopes))),

    RpcRequest::Push { event, payload } => {
      state.backend().push(event, payload);
      Ok(RpcResponse::Null)
    }

    RpcRequest::CommandResult {
      request_id,
      result,
      error,
    } => {
      let reply = error.map_or(Ok(result), Err);
      Ok(RpcResponse::Bool(state.backend().complete(request_id, reply)))
    }

    RpcRequest::Widgets => Ok(RpcResponse::Widgets(host.ids())),
  }
}
