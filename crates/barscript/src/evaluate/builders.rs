/*!
UI-description builders, the only functions visible to templates.

Each builder checks its arguments, applies defaults and returns an object
tagged with `@component`. Shape errors raise `InvalidArgument` inside the
sandboxed call.
*/

use std::collections::BTreeMap;

use crate::node::{COMPONENT_TAG, DEFAULT_ICON_SIZE};
use crate::script::{Capabilities, ObjectMap, ScriptError, ScriptResult, Value};

/// Upper bound for icon and image sizes, in pixels.
const MAX_SIZE: f64 = 1024.0;

/// Read-only capability table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builders;

impl Builders {
  /// Capability names a template may call.
  pub const NAMES: &'static [&'static str] = &["Icon", "icon", "AppIcon", "Image", "Button", "Group"];
}

impl Capabilities for Builders {
  fn names(&self) -> &'static [&'static str] {
    Self::NAMES
  }

  fn call(&mut self, name: &'static str, args: Vec<Value>) -> ScriptResult<Value> {
    let first = args.first().cloned().unwrap_or_default();
    let mut node = ObjectMap::new();
    match name {
      "Icon" => match &first {
        Value::String(icon) => {
          node.insert("name".into(), non_empty(name, "name", icon)?);
          node.insert("size".into(), size(name, &Value::Undefined)?);
        }
        Value::Object(fields) => {
          let icon = fields.get("name").and_then(Value::as_str).ok_or_else(|| {
            ScriptError::invalid_argument("Icon() expects {name: string, size?: number}")
          })?;
          node.insert("name".into(), non_empty(name, "name", icon)?);
          node.insert("size".into(), size(name, field(fields, "size"))?);
        }
        _ => {
          return Err(ScriptError::invalid_argument(
            "Icon() expects a name or {name, size}",
          ))
        }
      },
      "icon" => {
        let icon = first
          .as_str()
          .ok_or_else(|| ScriptError::invalid_argument("icon() expects a name"))?;
        node.insert("name".into(), non_empty(name, "name", icon)?);
        node.insert(
          "size".into(),
          size(name, args.get(1).unwrap_or(&Value::Undefined))?,
        );
        return Ok(tagged("Icon", node));
      }
      "AppIcon" | "Image" => {
        let fields = options(name, &first)?;
        let sources: &[&str] = if name == "AppIcon" { &["path", "umid"] } else { &["url", "path"] };
        let mut found = false;
        for key in sources {
          match field(fields, key) {
            Value::Undefined | Value::Null => {}
            Value::String(s) => {
              node.insert((*key).into(), Value::String(s.clone()));
              found = true;
            }
            other => {
              return Err(ScriptError::invalid_argument(format!(
                "{name}() {key} must be a string, got {}",
                other.type_of()
              )))
            }
          }
        }
        if !found {
          return Err(ScriptError::invalid_argument(format!(
            "{name}() needs one of {}",
            sources.join(" or ")
          )));
        }
        node.insert("size".into(), size(name, field(fields, "size"))?);
      }
      "Button" | "Group" => {
        let fields = options(name, &first)?;
        let content = field(fields, "content");
        if matches!(content, Value::Undefined) {
          return Err(ScriptError::invalid_argument(format!("{name}() needs content")));
        }
        node.insert("content".into(), content.clone());
        if name == "Button" {
          let on_click = field(fields, "onClick")
            .as_str()
            .ok_or_else(|| ScriptError::invalid_argument("Button() onClick must be an action string"))?;
          node.insert("onClick".into(), Value::from(on_click));
        }
        node.insert("style".into(), style(name, field(fields, "style"))?);
      }
      _ => {
        return Err(ScriptError::invalid_argument(format!("{name} is not a builder")));
      }
    }
    Ok(tagged(name, node))
  }
}

fn tagged(component: &str, mut node: ObjectMap) -> Value {
  node.insert(COMPONENT_TAG.into(), Value::from(component));
  Value::from(node)
}

fn field<'a>(fields: &'a ObjectMap, key: &str) -> &'a Value {
  fields.get(key).unwrap_or(&Value::Undefined)
}

fn options<'a>(builder: &str, value: &'a Value) -> ScriptResult<&'a ObjectMap> {
  value
    .as_object()
    .ok_or_else(|| ScriptError::invalid_argument(format!("{builder}() expects an options object")))
}

fn non_empty(builder: &str, key: &str, value: &str) -> ScriptResult<Value> {
  if value.trim().is_empty() {
    return Err(ScriptError::invalid_argument(format!("{builder}() {key} is empty")));
  }
  Ok(Value::from(value))
}

fn size(builder: &str, value: &Value) -> ScriptResult<Value> {
  match value {
    Value::Undefined | Value::Null => Ok(Value::Number(f64::from(DEFAULT_ICON_SIZE))),
    Value::Number(n) if n.is_finite() && *n > 0.0 && *n <= MAX_SIZE => Ok(Value::Number(n.round())),
    Value::Number(n) => Err(ScriptError::invalid_argument(format!(
      "{builder}() size must be in 1..={MAX_SIZE}, got {n}"
    ))),
    other => Err(ScriptError::invalid_argument(format!(
      "{builder}() size must be a number, got {}",
      other.type_of()
    ))),
  }
}

/// Style values must be strings or numbers; numbers are stringified.
fn style(builder: &str, value: &Value) -> ScriptResult<Value> {
  let mut out = BTreeMap::new();
  match value {
    Value::Undefined | Value::Null => {}
    Value::Object(entries) => {
      for (key, entry) in entries.iter() {
        let entry = match entry {
          Value::String(_) | Value::Number(_) => Value::from(entry.to_display()),
          other => {
            return Err(ScriptError::invalid_argument(format!(
              "{builder}() style.{key} must be a string or number, got {}",
              other.type_of()
            )))
          }
        };
        out.insert(key.clone(), entry);
      }
    }
    other => {
      return Err(ScriptError::invalid_argument(format!(
        "{builder}() style must be an object, got {}",
        other.type_of()
      )))
    }
  }
  Ok(Value::from(out))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::script::{parse_program, EvalLimits, Interpreter, ScriptErrorCode};
  use serde_json::{json, Map, Value as JsonValue};

  fn build(source: &str) -> ScriptResult<JsonValue> {
    let program = parse_program(source)?;
    let mut builders = Builders;
    Interpreter::evaluate(&program, &Map::new(), &mut builders, EvalLimits::default()).map(|v| v.to_json())
  }

  #[test]
  fn icon_forms() {
    let expected = json!({ "@component": "Icon", "name": "Wifi", "size": 16 });
    assert_eq!(build("Icon('Wifi')").unwrap(), expected);
    assert_eq!(build("Icon({ name: 'Wifi' })").unwrap(), expected);
    assert_eq!(build("icon('Wifi')").unwrap(), expected);
    assert_eq!(
      build("icon('Wifi', 24)").unwrap(),
      json!({ "@component": "Icon", "name": "Wifi", "size": 24 })
    );
  }

  #[test]
  fn sources_are_required() {
    assert_eq!(
      build("AppIcon({ umid: 'App.Id', size: 20 })").unwrap(),
      json!({ "@component": "AppIcon", "umid": "App.Id", "size": 20 })
    );
    assert_eq!(
      build("Image({ url: 'https://x/a.png' })").unwrap(),
      json!({ "@component": "Image", "url": "https://x/a.png", "size": 16 })
    );
    assert_eq!(build("Image({ size: 3 })").unwrap_err().code, ScriptErrorCode::InvalidArgument);
    assert_eq!(build("AppIcon({ path: 4 })").unwrap_err().code, ScriptErrorCode::InvalidArgument);
  }

  #[test]
  fn wrappers_carry_content_and_style() {
    let json = build("Button({ content: [icon('Bell'), 3], onClick: \"invoke('show_notifications')\", style: { gap: 4 } })")
      .unwrap();
    assert_eq!(json["@component"], "Button");
    assert_eq!(json["onClick"], "invoke('show_notifications')");
    assert_eq!(json["style"], json!({ "gap": "4" }));
    assert_eq!(json["content"][0]["name"], "Bell");

    let group = build("Group({ content: 'x' })").unwrap();
    assert_eq!(group, json!({ "@component": "Group", "content": "x", "style": {} }));
  }

  #[test]
  fn invalid_shapes_raise() {
    for source in [
      "Icon(3)",
      "Icon({ size: 3 })",
      "Icon('')",
      "icon('x', -2)",
      "icon('x', 5000)",
      "Button({ content: 'x' })",
      "Button({ content: 'x', onClick: () => 1 })",
      "Group({})",
      "Group({ content: 'x', style: { a: [] } })",
      "Group('x')",
    ] {
      assert_eq!(build(source).unwrap_err().code, ScriptErrorCode::InvalidArgument, "{source}");
    }
  }
}
