/*!
Typed component tree handed to the renderer.

Evaluation output is plain JSON until it passes through
[`EvaluatedNode::from_json`]. Objects are trusted only when they carry a
recognized `@component` tag and match that component's shape; untagged or
unknown objects become [`EvaluatedNode::Null`] and are never rendered
verbatim.
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use ts_rs::TS;

use crate::script::{ScriptError, ScriptErrorCode};

/// Discriminator key carried by builder output.
pub const COMPONENT_TAG: &str = "@component";

/// Size applied when a builder or node omits one.
pub const DEFAULT_ICON_SIZE: u32 = 16;

/// Scalar shown as text.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(untagged)]
pub enum TextValue {
  /// Shown as is.
  String(String),
  /// Shown in its script form.
  Number(f64),
  /// `true` or `false`.
  Bool(bool),
}

/// Validated renderable tree.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "@component")]
#[ts(export)]
pub enum EvaluatedNode {
  /// Plain text.
  Text {
    /// Scalar to show.
    value: TextValue,
  },
  /// Children in order. Never contains another `Sequence`.
  Sequence {
    /// Flattened children.
    children: Vec<EvaluatedNode>,
  },
  /// Named glyph from the icon set.
  Icon {
    /// Glyph name.
    name: String,
    /// Edge length in pixels.
    size: u32,
  },
  /// Icon of an application, by executable path or app user model id.
  AppIcon {
    /// Executable path.
    path: Option<String>,
    /// App user model id.
    umid: Option<String>,
    /// Edge length in pixels.
    size: u32,
  },
  /// Image by URL or local path.
  Image {
    /// Remote source.
    url: Option<String>,
    /// Local file.
    path: Option<String>,
    /// Edge length in pixels.
    size: u32,
  },
  /// Clickable wrapper. `onClick` is an action expression, run by the action evaluator.
  Button {
    /// Wrapped node.
    content: Box<EvaluatedNode>,
    /// Action run on click.
    #[serde(rename = "onClick")]
    on_click: String,
    /// Style entries for the wrapper.
    style: BTreeMap<String, String>,
  },
  /// Styled wrapper without a click action.
  Group {
    /// Wrapped node.
    content: Box<EvaluatedNode>,
    /// Style entries for the wrapper.
    style: BTreeMap<String, String>,
  },
  /// Renders nothing.
  Null,
}

/// A tagged object that does not match its component's shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {component} node: {reason}")]
pub struct NodeError {
  /// Value of the `@component` tag.
  pub component: &'static str,
  /// What did not match.
  pub reason: String,
}

impl From<NodeError> for ScriptError {
  fn from(err: NodeError) -> Self {
    Self::new(ScriptErrorCode::InvalidNode, err.to_string())
  }
}

const fn default_size() -> u32 {
  DEFAULT_ICON_SIZE
}

#[derive(Deserialize)]
struct IconFields {
  name: String,
  #[serde(default = "default_size")]
  size: u32,
}

#[derive(Deserialize)]
struct SourceFields {
  #[serde(default)]
  url: Option<String>,
  #[serde(default)]
  path: Option<String>,
  #[serde(default)]
  umid: Option<String>,
  #[serde(default = "default_size")]
  size: u32,
}

#[derive(Deserialize)]
struct WrapperFields {
  #[serde(default, rename = "onClick")]
  on_click: Option<String>,
  #[serde(default)]
  style: BTreeMap<String, String>,
}

impl EvaluatedNode {
  /// Text node holding `value`.
  pub fn text(value: impl Into<String>) -> Self {
    Self::Text {
      value: TextValue::String(value.into()),
    }
  }

  /// Whether this renders nothing.
  pub const fn is_null(&self) -> bool {
    matches!(self, Self::Null)
  }

  /// Convert raw evaluation output into a validated tree.
  pub fn from_json(json: &JsonValue) -> Result<Self, NodeError> {
    Ok(match json {
      JsonValue::Null => Self::Null,
      JsonValue::Bool(b) => Self::Text {
        value: TextValue::Bool(*b),
      },
      JsonValue::Number(n) => Self::Text {
        value: TextValue::Number(n.as_f64().unwrap_or_default()),
      },
      JsonValue::String(s) => Self::text(s.clone()),
      JsonValue::Array(items) => {
        let mut children = Vec::with_capacity(items.len());
        for item in items {
          match Self::from_json(item)? {
            Self::Sequence { children: nested } => children.extend(nested),
            node => children.push(node),
          }
        }
        Self::Sequence { children }
      }
      JsonValue::Object(map) => Self::from_object(map)?,
    })
  }

  fn from_object(map: &Map<String, JsonValue>) -> Result<Self, NodeError> {
    let Some(tag) = map.get(COMPONENT_TAG).and_then(JsonValue::as_str) else {
      return Ok(Self::Null);
    };
    Ok(match tag {
      "Icon" => {
        let fields: IconFields = fields("Icon", map)?;
        Self::Icon {
          name: fields.name,
          size: fields.size,
        }
      }
      "AppIcon" => {
        let fields: SourceFields = fields("AppIcon", map)?;
        if fields.path.is_none() && fields.umid.is_none() {
          return Err(invalid("AppIcon", "needs a path or an umid"));
        }
        Self::AppIcon {
          path: fields.path,
          umid: fields.umid,
          size: fields.size,
        }
      }
      "Image" => {
        let fields: SourceFields = fields("Image", map)?;
        if fields.url.is_none() && fields.path.is_none() {
          return Err(invalid("Image", "needs a url or a path"));
        }
        Self::Image {
          url: fields.url,
          path: fields.path,
          size: fields.size,
        }
      }
      "Button" => {
        let fields: WrapperFields = fields("Button", map)?;
        let on_click = fields
          .on_click
          .ok_or_else(|| invalid("Button", "missing onClick"))?;
        Self::Button {
          content: Box::new(content("Button", map)?),
          on_click,
          style: fields.style,
        }
      }
      "Group" => {
        let fields: WrapperFields = fields("Group", map)?;
        Self::Group {
          content: Box::new(content("Group", map)?),
          style: fields.style,
        }
      }
      _ => Self::Null,
    })
  }
}

fn invalid(component: &'static str, reason: impl Into<String>) -> NodeError {
  NodeError {
    component,
    reason: reason.into(),
  }
}

fn fields<T: for<'de> Deserialize<'de>>(
  component: &'static str,
  map: &Map<String, JsonValue>,
) -> Result<T, NodeError> {
  T::deserialize(JsonValue::Object(map.clone())).map_err(|e| invalid(component, e.to_string()))
}

fn content(component: &'static str, map: &Map<String, JsonValue>) -> Result<EvaluatedNode, NodeError> {
  let content = map
    .get("content")
    .ok_or_else(|| invalid(component, "missing content"))?;
  EvaluatedNode::from_json(content)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use serde_json::json;

  fn node(json: JsonValue) -> EvaluatedNode {
    EvaluatedNode::from_json(&json).unwrap()
  }

  #[test]
  fn scalars_become_text() {
    assert_eq!(node(json!("hi")), EvaluatedNode::text("hi"));
    assert_eq!(
      node(json!(3)),
      EvaluatedNode::Text {
        value: TextValue::Number(3.0)
      }
    );
    assert_eq!(node(json!(null)), EvaluatedNode::Null);
  }

  #[test]
  fn icon_gets_default_size() {
    assert_eq!(
      node(json!({ "@component": "Icon", "name": "Foo" })),
      EvaluatedNode::Icon {
        name: "Foo".into(),
        size: DEFAULT_ICON_SIZE
      }
    );
  }

  #[test]
  fn unknown_and_missing_tags_fail_closed() {
    assert_eq!(node(json!({ "@component": "NotARealTag" })), EvaluatedNode::Null);
    assert_eq!(node(json!({ "name": "Foo" })), EvaluatedNode::Null);
    assert_eq!(node(json!({ "@component": 7 })), EvaluatedNode::Null);
  }

  #[test]
  fn nested_arrays_flatten() {
    let tree = node(json!(["a", ["b", ["c"]], null]));
    let EvaluatedNode::Sequence { children } = tree else {
      panic!("expected sequence");
    };
    assert_eq!(children, vec![
      EvaluatedNode::text("a"),
      EvaluatedNode::text("b"),
      EvaluatedNode::text("c"),
      EvaluatedNode::Null,
    ]);
  }

  #[test]
  fn button_wraps_content() {
    let tree = node(json!({
      "@component": "Button",
      "content": { "@component": "Icon", "name": "Bell", "size": 20 },
      "onClick": "invoke('show_notifications')",
      "style": { "color": "red" },
    }));
    let EvaluatedNode::Button {
      content,
      on_click,
      style,
    } = tree
    else {
      panic!("expected button");
    };
    assert_eq!(*content, EvaluatedNode::Icon {
      name: "Bell".into(),
      size: 20
    });
    assert_eq!(on_click, "invoke('show_notifications')");
    assert_eq!(style.get("color").map(String::as_str), Some("red"));
  }

  #[test]
  fn shape_violations_are_errors() {
    let bad = [
      json!({ "@component": "Icon" }),
      json!({ "@component": "Icon", "name": "x", "size": -1 }),
      json!({ "@component": "AppIcon" }),
      json!({ "@component": "Image", "size": 4 }),
      json!({ "@component": "Button", "content": "x" }),
      json!({ "@component": "Group" }),
    ];
    for json in bad {
      assert!(EvaluatedNode::from_json(&json).is_err(), "{json}");
    }
  }

  #[test]
  fn node_errors_map_to_invalid_node() {
    let err: ScriptError = invalid("Icon", "missing field").into();
    assert_eq!(err.code, ScriptErrorCode::InvalidNode);
  }

  #[test]
  fn serializes_with_component_tag() {
    let json = serde_json::to_value(EvaluatedNode::Icon {
      name: "Wifi".into(),
      size: 16,
    })
    .unwrap();
    assert_eq!(json, json!({ "@component": "Icon", "name": "Wifi", "size": 16 }));
  }

  fn arbitrary_json() -> impl Strategy<Value = JsonValue> {
    let leaf = prop_oneof![
      Just(JsonValue::Null),
      any::<bool>().prop_map(JsonValue::from),
      (-1000i64..1000).prop_map(JsonValue::from),
      "[a-zA-Z@]{0,6}".prop_map(JsonValue::from),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
      prop_oneof![
        proptest::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
        proptest::collection::btree_map("[a-z@]{1,4}", inner, 0..4)
          .prop_map(|m| JsonValue::Object(m.into_iter().collect())),
      ]
    })
  }

  fn has_nested_sequence(node: &EvaluatedNode) -> bool {
    match node {
      EvaluatedNode::Sequence { children } => children
        .iter()
        .any(|c| matches!(c, EvaluatedNode::Sequence { .. }) || has_nested_sequence(c)),
      EvaluatedNode::Button { content, .. } | EvaluatedNode::Group { content, .. } => {
        has_nested_sequence(content)
      }
      _ => false,
    }
  }

  proptest! {
    #[test]
    fn conversion_is_deterministic_and_flat(json in arbitrary_json()) {
      let first = EvaluatedNode::from_json(&json);
      let second = EvaluatedNode::from_json(&json);
      prop_assert_eq!(&first, &second);
      if let Ok(tree) = first {
        prop_assert!(!has_nested_sequence(&tree));
      }
    }
  }
}
