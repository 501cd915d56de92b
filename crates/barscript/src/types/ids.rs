/*! Branded ID types. */

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Widget identifier, as assigned by the configuration that declared the widget.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, Display, From, Into,
)]
#[ts(export)]
pub struct WidgetId(pub String);

impl From<&str> for WidgetId {
  fn from(value: &str) -> Self {
    Self(value.to_owned())
  }
}

impl WidgetId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}
