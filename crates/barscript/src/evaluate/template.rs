use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{redact, Builders, ProgramCache};
use crate::node::EvaluatedNode;
use crate::scope::ScopeData;
use crate::script::{EvalLimits, Interpreter, Program, ScriptResult};

/// Read-only evaluator for templates, tooltips and badges.
///
/// [`TemplateEvaluator::render`] is the boundary: compilation, execution
/// and node validation all fail into the same fallback glyph, and nothing
/// escapes it.
#[derive(Debug)]
pub struct TemplateEvaluator {
  cache: ProgramCache,
  limits: EvalLimits,
  fallback_glyph: String,
  redacted_keys: Vec<String>,
}

impl TemplateEvaluator {
  /// Evaluator rendering `fallback_glyph` for failed templates.
  pub fn new(
    cache_capacity: usize,
    limits: EvalLimits,
    fallback_glyph: impl Into<String>,
    redacted_keys: Vec<String>,
  ) -> Self {
    Self {
      cache: ProgramCache::new(cache_capacity),
      limits,
      fallback_glyph: fallback_glyph.into(),
      redacted_keys,
    }
  }

  /// Program cache.
  pub const fn cache(&self) -> &ProgramCache {
    &self.cache
  }

  /// Compile `source` through the cache.
  pub fn compile(&self, source: &str) -> ScriptResult<Arc<Program>> {
    self.cache.compile(source)
  }

  /// Raw evaluation output, before validation.
  pub fn evaluate_raw(&self, source: &str, scope: &ScopeData) -> ScriptResult<JsonValue> {
    let program = self.compile(source)?;
    let mut builders = Builders;
    let value = Interpreter::evaluate(&program, scope, &mut builders, self.limits)?;
    value.to_json_within(self.limits.max_string_len)
  }

  /// Evaluate and validate.
  pub fn evaluate(&self, source: &str, scope: &ScopeData) -> ScriptResult<EvaluatedNode> {
    let raw = self.evaluate_raw(source, scope)?;
    Ok(EvaluatedNode::from_json(&raw)?)
  }

  /// Evaluate, validate, or fall back. Never fails.
  pub fn render(&self, source: &str, scope: &ScopeData) -> EvaluatedNode {
    match self.evaluate(source, scope) {
      Ok(node) => node,
      Err(e) => {
        log::warn!(
          "[template] {e} (template: {source:?}, scope: {})",
          redact(scope, &self.redacted_keys)
        );
        self.fallback()
      }
    }
  }

  /// Text node holding the fallback glyph.
  pub fn fallback(&self) -> EvaluatedNode {
    EvaluatedNode::text(self.fallback_glyph.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::script::ScriptErrorCode;
  use serde_json::json;

  fn evaluator() -> TemplateEvaluator {
    TemplateEvaluator::new(8, EvalLimits::default(), "⚠", vec!["env".into()])
  }

  fn scope(json: JsonValue) -> ScopeData {
    json.as_object().cloned().unwrap_or_default()
  }

  #[test]
  fn renders_icon_with_return() {
    let node = evaluator().render("return icon(\"Wifi\", 16)", &ScopeData::new());
    assert_eq!(node, EvaluatedNode::Icon {
      name: "Wifi".into(),
      size: 16
    });
  }

  #[test]
  fn renders_scope_values() {
    let node = evaluator().render(
      "`${Math.round(battery.percentage)}%`",
      &scope(json!({ "battery": { "percentage": 80 } })),
    );
    assert_eq!(node, EvaluatedNode::text("⚠"));

    let node = evaluator().render(
      "`${battery.percentage}%`",
      &scope(json!({ "battery": { "percentage": 80 } })),
    );
    assert_eq!(node, EvaluatedNode::text("80%"));
  }

  #[test]
  fn failures_fall_back() {
    let evaluator = evaluator();
    for source in ["1 +", "missing", "Icon(3)", "({ '@component': 'Icon' })"] {
      assert_eq!(evaluator.render(source, &ScopeData::new()), evaluator.fallback(), "{source}");
    }
  }

  #[test]
  fn oversized_templates_fall_back() {
    let evaluator = evaluator();
    let scope = scope(json!({ "a": {} }));
    let n = 10_000;
    for source in [
      format!("1{}", "+1".repeat(n)),
      format!("a{}", ".b".repeat(n)),
      format!("{}1{}", "`${".repeat(n), "}`".repeat(n)),
      "'x'.padStart(1e15)".to_owned(),
      "const f = (s, n) => n ? f(s + s, n - 1) : s.length\nf('x', 50)".to_owned(),
    ] {
      assert_eq!(evaluator.render(&source, &scope), evaluator.fallback());
    }
  }

  #[test]
  fn shared_results_are_bounded_when_serialized() {
    let source = format!("let a = ['x'.padStart(1000)]{}\na", "\na = [a, a]".repeat(20));
    let err = evaluator().evaluate_raw(&source, &ScopeData::new()).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::SizeLimitExceeded);
  }

  #[test]
  fn validation_errors_surface_as_invalid_node() {
    let err = evaluator()
      .evaluate("({ '@component': 'Button', content: 'x' })", &ScopeData::new())
      .unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::InvalidNode);
  }

  #[test]
  fn unknown_tag_is_null() {
    let node = evaluator().render(r#"{"@component":"NotARealTag"}"#, &ScopeData::new());
    assert_eq!(node, EvaluatedNode::Null);
  }

  #[test]
  fn templates_are_compiled_once() {
    let evaluator = evaluator();
    evaluator.render("volume", &scope(json!({ "volume": 1 })));
    evaluator.render("volume", &scope(json!({ "volume": 2 })));
    assert_eq!(evaluator.cache().len(), 1);
  }
}
