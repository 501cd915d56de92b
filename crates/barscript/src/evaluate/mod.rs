/*!
The two sandbox tiers.

Both tiers compile through a shared [`ProgramCache`] and run a fresh
[`Interpreter`](crate::script::Interpreter) per call; they differ only in
the capability table bound next to the scope.

## Module Structure

- `mod.rs` - `ProgramCache`, scope redaction for logs
- `builders.rs` - read-only tier: `Icon`, `icon`, `AppIcon`, `Image`, `Button`, `Group`
- `template.rs` - `TemplateEvaluator`: compile, run, validate, fall back
- `action.rs` - privileged tier: `ActionEvaluator` and its recorded effects
*/

mod action;
mod builders;
mod template;

pub use action::{ActionCapabilities, ActionEffect, ActionEvaluator};
pub use builders::Builders;
pub use template::TemplateEvaluator;

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::scope::ScopeData;
use crate::script::{parse_program, Program, ScriptResult};

/// Placeholder logged instead of a redacted scope value.
pub const REDACTED: &str = "<redacted>";

/// Compiled programs keyed by source text, evicting the least recently
/// used entry first.
///
/// Compile errors are cached as well: a broken template is not re-parsed
/// on every render.
#[derive(Debug)]
pub struct ProgramCache {
  programs: Mutex<LruCache<Arc<str>, ScriptResult<Arc<Program>>>>,
}

impl ProgramCache {
  /// A cache holding at most `capacity` programs (at least one).
  pub fn new(capacity: usize) -> Self {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Self {
      programs: Mutex::new(LruCache::new(capacity)),
    }
  }

  /// Compiled `source`, parsing it on a miss.
  pub fn compile(&self, source: &str) -> ScriptResult<Arc<Program>> {
    if let Some(cached) = self.programs.lock().get(source) {
      return cached.clone();
    }

    // Parse outside the lock; a concurrent miss on the same source just
    // parses twice.
    let compiled = parse_program(source).map(Arc::new);
    self
      .programs
      .lock()
      .get_or_insert(Arc::from(source), || compiled.clone())
      .clone()
  }

  /// Number of cached programs.
  pub fn len(&self) -> usize {
    self.programs.lock().len()
  }

  /// Whether nothing has been compiled yet.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Copy of `scope` safe to log: listed keys are replaced by [`REDACTED`].
pub fn redact(scope: &ScopeData, keys: &[String]) -> JsonValue {
  JsonValue::Object(
    scope
      .iter()
      .map(|(key, value)| {
        let value = if keys.iter().any(|k| k == key) {
          JsonValue::String(REDACTED.to_owned())
        } else {
          value.clone()
        };
        (key.clone(), value)
      })
      .collect(),
  )
}
