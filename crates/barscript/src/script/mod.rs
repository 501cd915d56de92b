/*!
Embedded expression sandbox for widget templates and click actions.

A small JavaScript-flavoured language, parsed into an AST once and walked
by a fresh [`Interpreter`] on every evaluation. The interpreter's global
frame holds exactly the merged scope plus the functions of one
[`Capabilities`] table; there are no ambient globals and no loops. Every
evaluation runs under the [`EvalLimits`]: a step budget, call and nesting
depth, and the size of the strings and arrays it may build.

## Module Structure

- `mod.rs` - `ScriptError`, `Position`
- `lexer.rs` - source text to tokens, including template literals
- `ast.rs` - statement and expression trees
- `parser.rs` - recursive descent parser
- `value.rs` - runtime values and JSON conversion
- `interpreter.rs` - tree-walking evaluator, built-in methods, limits
*/

mod ast;
mod interpreter;
mod lexer;
mod parser;
mod value;

pub use ast::{
  BinaryOp, Expr, Function, FunctionBody, LogicalOp, Program, Property, Stmt, TemplatePart,
  UnaryOp,
};
pub use interpreter::{Capabilities, EvalLimits, Interpreter, NoCapabilities};
pub use lexer::{tokenize, Punct, TemplateChunk, Token, TokenKind};
pub use parser::parse_program;
pub use value::{Callable, Nested, ObjectMap, Value};

use std::fmt;

use derive_more::Display;
use serde::Serialize;

/// One-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
  /// Byte offset into the source.
  pub offset: usize,
  /// One-based line.
  pub line: u32,
  /// One-based column.
  pub column: u32,
}

impl Position {
  /// First character of the source.
  pub const fn start() -> Self {
    Self {
      offset: 0,
      line: 1,
      column: 1,
    }
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}

/// Stable classification of sandbox failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ScriptErrorCode {
  /// Source failed to tokenize or parse.
  Syntax,
  /// Name bound nowhere in scope.
  UnknownIdentifier,
  /// Operation applied to the wrong kind of value.
  TypeError,
  /// Called something that is not a function.
  NotCallable,
  /// Capability or method rejected its arguments.
  InvalidArgument,
  /// Evaluation ran past its step budget.
  StepLimitExceeded,
  /// Closure calls nested past the call depth limit.
  CallDepthExceeded,
  /// Expressions or values nested past the evaluation limit.
  NestingTooDeep,
  /// A string, array or result outgrew its size limit.
  SizeLimitExceeded,
  /// Result is not a valid node.
  InvalidNode,
}

fn at(position: &Option<Position>) -> String {
  position.map(|p| format!(" at {p}")).unwrap_or_default()
}

/// Compile or evaluation failure inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}{}", at(.position))]
pub struct ScriptError {
  /// Classification.
  pub code: ScriptErrorCode,
  /// Human readable detail.
  pub message: String,
  /// Where in the source, when known.
  pub position: Option<Position>,
}

impl ScriptError {
  /// Error without a position.
  pub fn new(code: ScriptErrorCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
      position: None,
    }
  }

  /// [`ScriptErrorCode::Syntax`] at `position`.
  pub fn syntax(message: impl Into<String>, position: Position) -> Self {
    Self::new(ScriptErrorCode::Syntax, message).at(position)
  }

  /// [`ScriptErrorCode::InvalidArgument`] without a position.
  pub fn invalid_argument(message: impl Into<String>) -> Self {
    Self::new(ScriptErrorCode::InvalidArgument, message)
  }

  /// [`ScriptErrorCode::TypeError`] without a position.
  pub fn type_error(message: impl Into<String>) -> Self {
    Self::new(ScriptErrorCode::TypeError, message)
  }

  /// Attach `position` unless one is already set.
  #[must_use]
  pub fn at(mut self, position: Position) -> Self {
    self.position.get_or_insert(position);
    self
  }
}

/// Result type for sandbox operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_display_includes_position() {
    let err = ScriptError::syntax("unexpected ')'", Position {
      offset: 4,
      line: 1,
      column: 5,
    });
    assert_eq!(err.to_string(), "Syntax: unexpected ')' at 1:5");
  }

  #[test]
  fn first_position_sticks() {
    let first = Position {
      offset: 1,
      line: 1,
      column: 2,
    };
    let err = ScriptError::type_error("x").at(first).at(Position::start());
    assert_eq!(err.position, Some(first));
  }
}
