/*!
Runtime values.

Arrays and objects are immutable once built, so sharing them is a pointer
copy. Each container records how deeply it nests, which keeps the depth
check at construction constant-time even for heavily shared structures.

Conversion to JSON follows `JSON.stringify`: `undefined` and functions
vanish from objects and become `null` in arrays, non-finite numbers become
`null`, and integral numbers serialize as integers.
*/

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use serde_json::{Number, Value as JsonValue};

use super::interpreter::Closure;
use super::{ScriptError, ScriptErrorCode, ScriptResult};

/// Object storage. Keys iterate in sorted order.
pub type ObjectMap = BTreeMap<String, Value>;

/// Contents of an array or object, with the height of the value tree below.
#[derive(Debug)]
pub struct Nested<T> {
  items: T,
  depth: usize,
}

impl<T> Nested<T> {
  /// Levels of arrays and objects, counting this one.
  pub const fn depth(&self) -> usize {
    self.depth
  }
}

impl<T> Deref for Nested<T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.items
  }
}

/// Something that can be called.
pub enum Callable {
  /// Arrow function defined by the script.
  Closure(Closure),
  /// Entry of the evaluation's capability table, dispatched by name.
  Native(&'static str),
}

impl Callable {
  /// Name for error messages.
  pub fn name(&self) -> &str {
    match self {
      Self::Closure(_) => "<anonymous>",
      Self::Native(name) => name,
    }
  }
}

/// A script value.
///
/// Containers are shared behind `Rc` and never mutated after construction.
#[derive(Clone, Default)]
pub enum Value {
  /// Missing property, missing argument, or `undefined`.
  #[default]
  Undefined,
  /// `null`.
  Null,
  /// `true` or `false`.
  Bool(bool),
  /// Every number is a double.
  Number(f64),
  /// Immutable string.
  String(Rc<str>),
  /// Array, with its nesting depth.
  Array(Rc<Nested<Vec<Value>>>),
  /// Object, with its nesting depth.
  Object(Rc<Nested<ObjectMap>>),
  /// Callable value.
  Function(Rc<Callable>),
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Undefined => f.write_str("undefined"),
      Self::Null => f.write_str("null"),
      Self::Bool(b) => write!(f, "{b}"),
      Self::Number(n) => f.write_str(&format_number(*n)),
      Self::String(s) => write!(f, "{s:?}"),
      Self::Array(items) => f.debug_list().entries(items.iter()).finish(),
      Self::Object(map) => f.debug_map().entries(map.iter()).finish(),
      Self::Function(callable) => write!(f, "[function {}]", callable.name()),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Self::String(Rc::from(s))
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Self::String(Rc::from(s))
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Self::Number(n)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Self::Bool(b)
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    let depth = items.iter().map(Value::depth).max().unwrap_or(0) + 1;
    Self::Array(Rc::new(Nested { items, depth }))
  }
}

impl From<ObjectMap> for Value {
  fn from(map: ObjectMap) -> Self {
    let depth = map.values().map(Value::depth).max().unwrap_or(0) + 1;
    Self::Object(Rc::new(Nested { items: map, depth }))
  }
}

impl Value {
  /// `undefined` or `null`.
  pub const fn is_nullish(&self) -> bool {
    matches!(self, Self::Undefined | Self::Null)
  }

  /// Truthiness as used by `&&`, `||`, `!` and `?:`.
  pub fn truthy(&self) -> bool {
    match self {
      Self::Undefined | Self::Null => false,
      Self::Bool(b) => *b,
      Self::Number(n) => *n != 0.0 && !n.is_nan(),
      Self::String(s) => !s.is_empty(),
      Self::Array(_) | Self::Object(_) | Self::Function(_) => true,
    }
  }

  /// Result of `typeof`.
  pub const fn type_of(&self) -> &'static str {
    match self {
      Self::Undefined => "undefined",
      Self::Null | Self::Array(_) | Self::Object(_) => "object",
      Self::Bool(_) => "boolean",
      Self::Number(_) => "number",
      Self::String(_) => "string",
      Self::Function(_) => "function",
    }
  }

  /// Borrow a string value.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  /// Borrow an object value.
  pub fn as_object(&self) -> Option<&ObjectMap> {
    match self {
      Self::Object(map) => Some(&map.items),
      _ => None,
    }
  }

  /// Levels of arrays and objects; 0 for everything else.
  pub fn depth(&self) -> usize {
    match self {
      Self::Array(items) => items.depth,
      Self::Object(map) => map.depth,
      Self::Undefined
      | Self::Null
      | Self::Bool(_)
      | Self::Number(_)
      | Self::String(_)
      | Self::Function(_) => 0,
    }
  }

  /// Numeric conversion (`+value`).
  pub fn to_number(&self) -> f64 {
    match self {
      Self::Undefined | Self::Function(_) | Self::Object(_) => f64::NAN,
      Self::Null => 0.0,
      Self::Bool(b) => f64::from(u8::from(*b)),
      Self::Number(n) => *n,
      Self::String(s) => {
        let trimmed = s.trim();
        if trimmed.is_empty() {
          0.0
        } else {
          trimmed.parse().unwrap_or(f64::NAN)
        }
      }
      Self::Array(items) => match items.as_slice() {
        [] => 0.0,
        [only] => only.to_number(),
        _ => f64::NAN,
      },
    }
  }

  /// String conversion, as used by `+` and template literals.
  pub fn to_display(&self) -> String {
    match self {
      Self::Undefined => "undefined".to_owned(),
      Self::Null => "null".to_owned(),
      Self::Bool(b) => b.to_string(),
      Self::Number(n) => format_number(*n),
      Self::String(s) => s.to_string(),
      Self::Array(items) => items
        .iter()
        .map(|item| if item.is_nullish() { String::new() } else { item.to_display() })
        .collect::<Vec<_>>()
        .join(","),
      Self::Object(_) => "[object Object]".to_owned(),
      Self::Function(callable) => format!("function {}() {{ [native code] }}", callable.name()),
    }
  }

  /// [`to_display`](Self::to_display), failing once the text would pass
  /// `max_len` bytes.
  pub fn display_within(&self, max_len: usize) -> ScriptResult<String> {
    let mut out = String::new();
    self.write_display(&mut out, max_len)?;
    Ok(out)
  }

  fn write_display(&self, out: &mut String, max_len: usize) -> ScriptResult<()> {
    match self {
      Self::String(s) => push_within(out, s, max_len),
      Self::Array(items) => {
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            push_within(out, ",", max_len)?;
          }
          if !item.is_nullish() {
            item.write_display(out, max_len)?;
          }
        }
        Ok(())
      }
      other => push_within(out, &other.to_display(), max_len),
    }
  }

  /// `===`. Containers and functions compare by identity.
  pub fn strict_eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
      (Self::Bool(a), Self::Bool(b)) => a == b,
      (Self::Number(a), Self::Number(b)) => a == b,
      (Self::String(a), Self::String(b)) => a == b,
      (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
      (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
      (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
      _ => false,
    }
  }

  /// Convert scope data into a script value.
  pub fn from_json(json: &JsonValue) -> Self {
    match json {
      JsonValue::Null => Self::Null,
      JsonValue::Bool(b) => Self::Bool(*b),
      JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
      JsonValue::String(s) => Self::from(s.as_str()),
      JsonValue::Array(items) => Self::from(items.iter().map(Self::from_json).collect::<Vec<_>>()),
      JsonValue::Object(map) => Self::from(
        map
          .iter()
          .map(|(k, v)| (k.clone(), Self::from_json(v)))
          .collect::<ObjectMap>(),
      ),
    }
  }

  /// [`to_json`](Self::to_json), failing once the output would pass roughly
  /// `max_len` bytes. Shared containers count once per occurrence.
  pub fn to_json_within(&self, max_len: usize) -> ScriptResult<JsonValue> {
    let mut budget = max_len;
    self.json_within(&mut budget, max_len)
  }

  fn json_within(&self, budget: &mut usize, max_len: usize) -> ScriptResult<JsonValue> {
    let cost = match self {
      Self::String(s) => s.len() + 2,
      _ => 1,
    };
    *budget = budget.checked_sub(cost).ok_or_else(|| too_large(max_len))?;
    Ok(match self {
      Self::Array(items) => JsonValue::Array(
        items
          .iter()
          .map(|item| item.json_within(budget, max_len))
          .collect::<ScriptResult<_>>()?,
      ),
      Self::Object(map) => {
        let mut out = serde_json::Map::new();
        for (key, value) in map.iter() {
          if matches!(value, Self::Undefined | Self::Function(_)) {
            continue;
          }
          *budget = budget.checked_sub(key.len()).ok_or_else(|| too_large(max_len))?;
          out.insert(key.clone(), value.json_within(budget, max_len)?);
        }
        JsonValue::Object(out)
      }
      other => other.to_json(),
    })
  }

  /// Convert a result to JSON. Functions and `undefined` become `null`, or are dropped from objects.
  pub fn to_json(&self) -> JsonValue {
    match self {
      Self::Undefined | Self::Null | Self::Function(_) => JsonValue::Null,
      Self::Bool(b) => JsonValue::Bool(*b),
      Self::Number(n) => number_to_json(*n),
      Self::String(s) => JsonValue::String(s.to_string()),
      Self::Array(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
      Self::Object(map) => JsonValue::Object(
        map
          .iter()
          .filter(|(_, v)| !matches!(v, Self::Undefined | Self::Function(_)))
          .map(|(k, v)| (k.clone(), v.to_json()))
          .collect(),
      ),
    }
  }
}

fn push_within(out: &mut String, text: &str, max_len: usize) -> ScriptResult<()> {
  if out.len() + text.len() > max_len {
    return Err(too_large(max_len));
  }
  out.push_str(text);
  Ok(())
}

/// The error raised when a string, array or result outgrows its limit.
pub fn too_large(max_len: usize) -> ScriptError {
  ScriptError::new(
    ScriptErrorCode::SizeLimitExceeded,
    format!("value larger than the limit of {max_len}"),
  )
}

/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn is_safe_integer(n: f64) -> bool {
  n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

fn number_to_json(n: f64) -> JsonValue {
  if is_safe_integer(n) {
    // Exact: the magnitude check above keeps this cast lossless.
    #[allow(clippy::cast_possible_truncation)]
    return JsonValue::from(n as i64);
  }
  Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
}

/// JavaScript-style number formatting.
pub fn format_number(n: f64) -> String {
  if n.is_nan() {
    "NaN".to_owned()
  } else if n.is_infinite() {
    let sign = if n > 0.0 { "" } else { "-" };
    format!("{sign}Infinity")
  } else if n == 0.0 {
    "0".to_owned()
  } else if is_safe_integer(n) {
    #[allow(clippy::cast_possible_truncation)]
    let int = n as i64;
    int.to_string()
  } else {
    n.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use serde_json::json;

  #[test]
  fn number_formatting() {
    assert_eq!(format_number(3.0), "3");
    assert_eq!(format_number(-0.0), "0");
    assert_eq!(format_number(0.25), "0.25");
    assert_eq!(format_number(f64::NAN), "NaN");
    assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
  }

  #[test]
  fn truthiness() {
    assert!(!Value::from("").truthy());
    assert!(Value::from("0").truthy());
    assert!(!Value::Number(f64::NAN).truthy());
    assert!(Value::from(Vec::new()).truthy());
    assert!(!Value::Null.truthy());
  }

  #[test]
  fn to_json_follows_stringify_rules() {
    let mut map = ObjectMap::new();
    map.insert("a".into(), Value::Number(2.0));
    map.insert("b".into(), Value::Undefined);
    map.insert("c".into(), Value::from(vec![Value::Undefined, Value::Number(0.5)]));
    assert_eq!(Value::from(map).to_json(), json!({ "a": 2, "c": [null, 0.5] }));
    assert_eq!(Value::Number(f64::INFINITY).to_json(), JsonValue::Null);
  }

  #[test]
  fn display_of_arrays() {
    let items = Value::from(vec![Value::Number(1.0), Value::Null, Value::from("x")]);
    assert_eq!(items.to_display(), "1,,x");
  }

  #[test]
  fn containers_record_their_depth() {
    let leaf = Value::from(vec![Value::Number(1.0)]);
    let mut map = ObjectMap::new();
    map.insert("list".into(), leaf.clone());
    let object = Value::from(map);
    assert_eq!(leaf.depth(), 1);
    assert_eq!(object.depth(), 2);
    assert_eq!(Value::from(vec![object.clone(), leaf]).depth(), 3);
    assert_eq!(Value::from("x").depth(), 0);
  }

  #[test]
  fn bounded_display_stops_at_the_limit() {
    let word = Value::from("abcd");
    let items = Value::from(vec![word.clone(), word.clone(), word]);
    assert_eq!(items.display_within(14).unwrap(), "abcd,abcd,abcd");
    let err = items.display_within(13).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::SizeLimitExceeded);
  }

  #[test]
  fn bounded_json_counts_shared_values_each_time() {
    let mut value = Value::from("x".repeat(100));
    for _ in 0..40 {
      value = Value::from(vec![value.clone(), value]);
    }
    let err = value.to_json_within(1 << 20).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::SizeLimitExceeded);

    let small = Value::from(vec![Value::from("ok"), Value::Number(1.0)]);
    assert_eq!(small.to_json_within(64).unwrap(), json!(["ok", 1]));
  }

  #[test]
  fn string_to_number() {
    assert_eq!(Value::from(" 42 ").to_number(), 42.0);
    assert_eq!(Value::from("").to_number(), 0.0);
    assert!(Value::from("4x").to_number().is_nan());
  }

  proptest! {
    #[test]
    fn json_survives_conversion(n in -1_000_000i64..1_000_000, s in "[a-z]{0,8}", b: bool) {
      let json = json!({ "n": n, "s": s, "list": [b, null, n] });
      prop_assert_eq!(Value::from_json(&json).to_json(), json);
    }
  }
}
