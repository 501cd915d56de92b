//! barscript WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use barscript::Engine;
use barscript_ws::{start_server, SocketBackend, WebSocketState, DEFAULT_WS_PORT};
use clap::Parser;
use tokio::sync::broadcast;

const FRAME_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Parser)]
#[command(version, about = "Serve barscript widgets over WebSocket")]
struct Args {
  /// Port to listen on (127.0.0.1 only).
  #[arg(long, default_value_t = DEFAULT_WS_PORT)]
  port: u16,

  /// strftime pattern for the `date` scope.
  #[arg(long)]
  date_format: Option<String>,

  /// How long to wait for the backend to answer a command.
  #[arg(long, default_value_t = 5000)]
  command_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();

  let (json_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
  let backend = Arc::new(SocketBackend::new(
    json_tx.clone(),
    Duration::from_millis(args.command_timeout_ms),
  ));

  let mut builder = Engine::builder(Arc::clone(&backend) as Arc<dyn barscript::Backend>);
  if let Some(format) = args.date_format {
    builder = builder.date_format(format);
  }
  let engine = match builder.build() {
    Ok(engine) => engine,
    Err(e) => {
      log::error!("Failed to start engine: {e}");
      std::process::exit(1);
    }
  };

  let state = WebSocketState::new(engine, backend, json_tx, args.port);
  if let Err(e) = start_server(state).await {
    log::error!("WebSocket server failed: {e}");
    std::process::exit(1);
  }
}
