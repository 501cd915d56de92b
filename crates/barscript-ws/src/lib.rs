/*!
barscript widgets over a WebSocket JSON-RPC.

Renderers and the native backend connect to the same socket. Requests are
`{id, method, args}` and are answered with `{id, result}` or `{id, error}`;
everything else is a broadcast `{event, data}` frame.
*/

mod bridge;
mod rpc;
mod server;
mod widgets;

pub use bridge::{frame, SocketBackend, DEFAULT_COMMAND_TIMEOUT};
pub use rpc::{dispatch, dispatch_json, RpcRequest, RpcResponse};
pub use server::{handle_request, start_server, WebSocketState, DEFAULT_WS_PORT};
pub use widgets::WidgetHost;
