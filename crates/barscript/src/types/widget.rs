/*! Widget declarations, as loaded from configuration. */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::WidgetId;
use crate::scope::ScopeId;

/// Immutable declaration attached to a toolbar or dock entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WidgetSpec {
  pub id: WidgetId,
  /// Data dependencies. Order decides which scope wins on a key collision.
  #[serde(default)]
  pub scopes: Vec<ScopeId>,
  /// Expression producing the visible content.
  pub template: String,
  #[serde(default)]
  pub tooltip: Option<String>,
  #[serde(default)]
  pub badge: Option<String>,
  #[serde(default)]
  pub on_click: Option<String>,
  #[serde(default)]
  pub remote_data: BTreeMap<String, RemoteDataDeclaration>,
  #[serde(default)]
  pub style: BTreeMap<String, String>,
}

impl WidgetSpec {
  /// A widget with only a template; everything else empty.
  pub fn new(id: impl Into<WidgetId>, template: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      scopes: Vec::new(),
      template: template.into(),
      tooltip: None,
      badge: None,
      on_click: None,
      remote_data: BTreeMap::new(),
      style: BTreeMap::new(),
    }
  }

  #[must_use]
  pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = ScopeId>) -> Self {
    self.scopes = scopes.into_iter().collect();
    self
  }

  #[must_use]
  pub fn with_on_click(mut self, expression: impl Into<String>) -> Self {
    self.on_click = Some(expression.into());
    self
  }

  #[must_use]
  pub fn with_remote(mut self, key: impl Into<String>, declaration: RemoteDataDeclaration) -> Self {
    self.remote_data.insert(key.into(), declaration);
    self
  }
}

/// Subset of the fetch `RequestInit` honoured for remote data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct RequestInit {
  /// HTTP method, GET when absent.
  pub method: Option<String>,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
}

/// An external HTTP value polled into a widget's scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RemoteDataDeclaration {
  pub url: String,
  #[serde(default)]
  pub request_init: RequestInit,
  /// Poll cadence. One-shot when absent.
  #[serde(default)]
  pub update_interval_seconds: Option<u64>,
}

impl RemoteDataDeclaration {
  /// A one-shot GET.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      request_init: RequestInit::default(),
      update_interval_seconds: None,
    }
  }

  #[must_use]
  pub const fn every(mut self, seconds: u64) -> Self {
    self.update_interval_seconds = Some(seconds);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn spec_deserializes_with_defaults() {
    let spec: WidgetSpec = serde_json::from_value(json!({
      "id": "clock",
      "scopes": ["Date"],
      "template": "return date",
    }))
    .unwrap();
    assert_eq!(spec.id, WidgetId::from("clock"));
    assert_eq!(spec.scopes, vec![ScopeId::Date]);
    assert!(spec.on_click.is_none());
    assert!(spec.remote_data.is_empty());
  }

  #[test]
  fn remote_declaration_reads_request_init() {
    let decl: RemoteDataDeclaration = serde_json::from_value(json!({
      "url": "https://example.com/api",
      "requestInit": { "method": "POST", "headers": { "x-key": "1" } },
      "updateIntervalSeconds": 60,
    }))
    .unwrap();
    assert_eq!(decl.request_init.method.as_deref(), Some("POST"));
    assert_eq!(decl.request_init.headers.get("x-key").map(String::as_str), Some("1"));
    assert_eq!(decl.update_interval_seconds, Some(60));
  }

  #[test]
  fn declarations_compare_by_value() {
    let a = RemoteDataDeclaration::get("https://a").every(5);
    let b = RemoteDataDeclaration::get("https://a").every(5);
    assert_eq!(a, b);
    assert_ne!(a, RemoteDataDeclaration::get("https://a"));
  }
}
