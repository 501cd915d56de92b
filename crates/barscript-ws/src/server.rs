/*!
WebSocket server implementation.

Every client receives every outbound frame: `widget:rendered`,
`widget:unmounted`, engine events, and the `bridge:invoke` / `bridge:emit`
frames meant for the native backend. Clients filter what they need.
*/

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket, WebSocketUpgrade},
    State,
  },
  response::Response,
  routing::get,
  Router,
};
use barscript::Engine;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::bridge::SocketBackend;
use crate::widgets::WidgetHost;

/// Default WebSocket server port.
pub const DEFAULT_WS_PORT: u16 = 3040;

/// WebSocket state.
#[derive(Clone)]
pub struct WebSocketState {
  host: Arc<WidgetHost>,
  backend: Arc<SocketBackend>,
  json_sender: broadcast::Sender<String>,
  port: u16,
}

impl std::fmt::Debug for WebSocketState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WebSocketState")
      .field("port", &self.port)
      .finish_non_exhaustive()
  }
}

impl WebSocketState {
  /// `engine` must have been built over `backend`; `json_sender` is the
  /// channel `backend` writes its frames to.
  pub fn new(
    engine: Engine,
    backend: Arc<SocketBackend>,
    json_sender: broadcast::Sender<String>,
    port: u16,
  ) -> Self {
    Self {
      host: Arc::new(WidgetHost::new(engine, json_sender.clone())),
      backend,
      json_sender,
      port,
    }
  }

  /// Mounted widgets.
  pub fn host(&self) -> &WidgetHost {
    &self.host
  }

  /// Backend reached over the socket.
  pub fn backend(&self) -> &SocketBackend {
    &self.backend
  }

  /// Port the server listens on.
  pub const fn port(&self) -> u16 {
    self.port
  }
}

/// Start the WebSocket server. Returns only when binding or serving fails.
pub async fn start_server(ws_state: WebSocketState) -> std::io::Result<()> {
  let sender = ws_state.json_sender.clone();
  let mut rx = ws_state.host.engine().subscribe();
  tokio::spawn(async move {
    while let Ok(event) = rx.recv().await {
      if let Ok(json) = serde_json::to_string(&event) {
        drop(sender.send(json));
      }
    }
  });

  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any);

  let addr = format!("127.0.0.1:{}", ws_state.port);
  let app = Router::new()
    .route("/ws", get(websocket_handler))
    .layer(cors)
    .with_state(ws_state);

  let listener = tokio::net::TcpListener::bind(&addr).await?;
  log::info!("[ws] listening on ws://{addr}/ws");
  axum::serve(listener, app).await
}

async fn websocket_handler(
  ws: WebSocketUpgrade,
  State(ws_state): State<WebSocketState>,
) -> Response {
  ws.on_upgrade(|socket| handle_websocket(socket, ws_state))
}

async fn handle_websocket(mut socket: WebSocket, ws_state: WebSocketState) {
  let mut rx = ws_state.json_sender.subscribe();
  log::debug!("[ws] client connected");

  loop {
    tokio::select! {
        msg = socket.recv() => {
            match msg {
                Some(Ok(Message::Text(text))) => {
                    let response = handle_request(&text, &ws_state).await;
                    while let Ok(event_json) = rx.try_recv() {
                        drop(socket.send(Message::Text(event_json)).await);
                    }
                    drop(socket.send(Message::Text(response)).await);
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::debug!("[ws] client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    log::warn!("[ws] socket error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }

        broadcast = rx.recv() => {
            match broadcast {
                Ok(event_json) => {
                    if socket.send(Message::Text(event_json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("[ws] Client lagged, dropped {n} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
  }
}

/// Handle one `{id, method, args}` request, echoing `id` in the response.
pub async fn handle_request(request: &str, ws_state: &WebSocketState) -> String {
  let req: Value = match serde_json::from_str(request) {
    Ok(v) => v,
    Err(e) => return json!({ "error": format!("Invalid JSON: {e}") }).to_string(),
  };

  let id = req.get("id").cloned().unwrap_or(Value::Null);
  let method = req.get("method").and_then(Value::as_str).unwrap_or("");
  let args = req.get("args").cloned().unwrap_or(Value::Null);

  let mut response = crate::rpc::dispatch_json(ws_state, method, &args).await;
  if let Some(obj) = response.as_object_mut() {
    obj.insert("id".to_owned(), id);
  }
  response.to_string()
}
