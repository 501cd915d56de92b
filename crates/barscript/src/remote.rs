/*!
Per-widget polling of user-declared HTTP data sources.

Each declaration key gets one task. Changing the declaration map (by value)
tears every task down, clears all values and starts over, so a widget can
never show a value from a source it no longer declares. A generation's
alive flag is checked under the value lock, which makes a fetch that
resolves after teardown a no-op even if its task was not yet aborted.
*/

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::scope::ScopeData;
use crate::types::{EngineError, EngineResult, RemoteDataDeclaration};

/// Declaration map of one widget, keyed by scope key.
pub type RemoteDeclarations = BTreeMap<String, RemoteDataDeclaration>;

/// Transport for remote data. Swappable so polling can be driven without a network.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
  /// Perform one request for `declaration`.
  async fn fetch(&self, declaration: &RemoteDataDeclaration) -> EngineResult<JsonValue>;
}

/// `application/json` and any `+json` media type decode as JSON; anything
/// else is kept as text.
pub fn is_json_content_type(content_type: &str) -> bool {
  let essence = content_type
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
    .to_ascii_lowercase();
  essence == "application/json" || essence.ends_with("+json")
}

/// JSON when the content type says so, otherwise the body as a string.
pub fn decode_body(url: &str, content_type: Option<&str>, body: String) -> EngineResult<JsonValue> {
  if content_type.is_some_and(is_json_content_type) {
    serde_json::from_str(&body).map_err(|e| EngineError::RemoteFetch {
      url: url.to_owned(),
      reason: format!("invalid json body: {e}"),
    })
  } else {
    Ok(JsonValue::String(body))
  }
}

/// reqwest-backed source.
#[derive(Debug, Clone)]
pub struct HttpRemoteSource {
  client: reqwest::Client,
}

impl HttpRemoteSource {
  /// Client whose requests give up after `timeout`.
  pub fn new(timeout: Duration) -> EngineResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| EngineError::Internal(format!("http client: {e}")))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
  async fn fetch(&self, declaration: &RemoteDataDeclaration) -> EngineResult<JsonValue> {
    let url = declaration.url.as_str();
    let failed = |reason: String| EngineError::RemoteFetch {
      url: url.to_owned(),
      reason,
    };
    let init = &declaration.request_init;

    let method = match &init.method {
      Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| failed(format!("bad method {method}: {e}")))?,
      None => Method::GET,
    };
    let mut headers = HeaderMap::new();
    for (name, value) in &init.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| failed(format!("bad header name {name}: {e}")))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| failed(format!("bad header value: {e}")))?;
      headers.insert(name, value);
    }

    let mut request = self.client.request(method, url).headers(headers);
    if let Some(body) = &init.body {
      request = request.body(body.clone());
    }
    let response = request
      .send()
      .await
      .and_then(reqwest::Response::error_for_status)
      .map_err(|e| failed(e.to_string()))?;
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(str::to_owned);
    let body = response.text().await.map_err(|e| failed(e.to_string()))?;
    decode_body(url, content_type.as_deref(), body)
  }
}

/// Values shared between the fetcher and its tasks.
#[derive(Debug)]
struct RemoteValues {
  values: Mutex<ScopeData>,
  version: watch::Sender<u64>,
}

impl RemoteValues {
  /// Store `value` unless `alive` has been cleared.
  fn write(&self, alive: &AtomicBool, key: &str, value: JsonValue) -> bool {
    {
      let mut values = self.values.lock();
      if !alive.load(Ordering::SeqCst) {
        return false;
      }
      values.insert(key.to_owned(), value);
    }
    self.version.send_modify(|v| *v += 1);
    true
  }

  /// Kill `alive` and forget every value, atomically with respect to `write`.
  fn reset(&self, alive: &AtomicBool) {
    {
      let mut values = self.values.lock();
      alive.store(false, Ordering::SeqCst);
      values.clear();
    }
    self.version.send_modify(|v| *v += 1);
  }
}

/// One set of polling tasks started from one declaration map.
#[derive(Debug)]
struct Generation {
  alive: Arc<AtomicBool>,
  tasks: Vec<JoinHandle<()>>,
}

impl Generation {
  fn stop(self, values: &RemoteValues) {
    values.reset(&self.alive);
    for task in self.tasks {
      task.abort();
    }
  }
}

/// Keeps a widget's remote values live.
pub struct RemoteDataFetcher {
  source: Arc<dyn RemoteSource>,
  declarations: RemoteDeclarations,
  shared: Arc<RemoteValues>,
  generation: Option<Generation>,
}

impl std::fmt::Debug for RemoteDataFetcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RemoteDataFetcher")
      .field("keys", &self.declarations.keys().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

impl RemoteDataFetcher {
  /// Fetcher with no declarations. Nothing polls until [`apply`](Self::apply).
  pub fn new(source: Arc<dyn RemoteSource>) -> Self {
    let (version, _) = watch::channel(0);
    Self {
      source,
      declarations: RemoteDeclarations::new(),
      shared: Arc::new(RemoteValues {
        values: Mutex::new(ScopeData::new()),
        version,
      }),
      generation: None,
    }
  }

  /// Declarations currently applied.
  pub const fn declarations(&self) -> &RemoteDeclarations {
    &self.declarations
  }

  /// Apply a declaration map. Returns whether polling was restarted.
  ///
  /// The first call always starts polling, even for an empty map.
  pub fn update(&mut self, declarations: RemoteDeclarations) -> bool {
    if self.generation.is_some() && declarations == self.declarations {
      return false;
    }
    self.stop();
    log::debug!("[remote] starting {} source(s)", declarations.len());

    let alive = Arc::new(AtomicBool::new(true));
    let tasks = declarations
      .iter()
      .map(|(key, declaration)| {
        spawn_poll(
          Arc::clone(&self.source),
          Arc::clone(&self.shared),
          Arc::clone(&alive),
          key.clone(),
          declaration.clone(),
        )
      })
      .collect();
    self.generation = Some(Generation { alive, tasks });
    self.declarations = declarations;
    true
  }

  /// Current values. Keys whose source has not answered yet are absent.
  pub fn values(&self) -> ScopeData {
    self.shared.values.lock().clone()
  }

  /// Bumped on every accepted write and every reset.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.shared.version.subscribe()
  }

  /// Cancel all polling and forget every value.
  pub fn stop(&mut self) {
    if let Some(generation) = self.generation.take() {
      generation.stop(&self.shared);
    }
  }
}

impl Drop for RemoteDataFetcher {
  fn drop(&mut self) {
    self.stop();
  }
}

fn spawn_poll(
  source: Arc<dyn RemoteSource>,
  shared: Arc<RemoteValues>,
  alive: Arc<AtomicBool>,
  key: String,
  declaration: RemoteDataDeclaration,
) -> JoinHandle<()> {
  let interval = declaration
    .update_interval_seconds
    .filter(|secs| *secs > 0)
    .map(Duration::from_secs);
  tokio::spawn(async move {
    loop {
      match source.fetch(&declaration).await {
        Ok(value) => {
          if !shared.write(&alive, &key, value) {
            return;
          }
        }
        Err(e) => log::warn!("[remote] {key}: {e}"),
      }
      match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => return,
      }
      if !alive.load(Ordering::SeqCst) {
        return;
      }
    }
  })
}
