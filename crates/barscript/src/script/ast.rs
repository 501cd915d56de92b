/*!
Syntax tree produced by the parser.

Trees are immutable once built and shared between evaluations, so function
bodies sit behind `Arc` and closures only clone a pointer.
*/

#![allow(missing_docs)]

use std::sync::Arc;

use super::Position;

/// A parsed template or action.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
  /// `const` (immutable) or `let` (mutable) binding.
  Declare {
    name: String,
    init: Expr,
    mutable: bool,
    pos: Position,
  },
  Return(Option<Expr>),
  If {
    test: Expr,
    consequent: Box<Stmt>,
    alternate: Option<Box<Stmt>>,
  },
  Block(Vec<Stmt>),
  Expr(Expr),
  Empty,
}

/// Arrow function.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
  pub params: Vec<String>,
  pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
  Expr(Expr),
  Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
  Text(String),
  Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
  Named(String),
  Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Not,
  Neg,
  Plus,
  TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  NotEq,
  Lt,
  LtEq,
  Gt,
  GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
  And,
  Or,
  Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Number(f64),
  Str(String),
  Bool(bool),
  Null,
  Undefined,
  Template(Vec<TemplatePart>),
  Array(Vec<Expr>),
  Object(Vec<(String, Expr)>),
  Ident {
    name: String,
    pos: Position,
  },
  Member {
    object: Box<Expr>,
    property: Property,
    optional: bool,
    pos: Position,
  },
  Call {
    callee: Box<Expr>,
    args: Vec<Expr>,
    optional: bool,
    pos: Position,
  },
  Arrow(Arc<Function>),
  Unary {
    op: UnaryOp,
    arg: Box<Expr>,
    pos: Position,
  },
  Binary {
    op: BinaryOp,
    left: Box<Expr>,
    right: Box<Expr>,
    pos: Position,
  },
  Logical {
    op: LogicalOp,
    left: Box<Expr>,
    right: Box<Expr>,
  },
  Conditional {
    test: Box<Expr>,
    consequent: Box<Expr>,
    alternate: Box<Expr>,
  },
  /// `name = value`, only for `let` bindings.
  Assign {
    name: String,
    value: Box<Expr>,
    pos: Position,
  },
}

impl Expr {
  /// Part of an optional chain (`a?.b.c()`), which short-circuits as a whole.
  pub const fn is_chain(&self) -> bool {
    matches!(self, Self::Member { .. } | Self::Call { .. })
  }

  /// Height of the tree below and including this node. Arrow bodies count.
  pub fn depth(&self) -> usize {
    let children = match self {
      Self::Number(_)
      | Self::Str(_)
      | Self::Bool(_)
      | Self::Null
      | Self::Undefined
      | Self::Ident { .. } => 0,
      Self::Template(parts) => max_depth(parts.iter().filter_map(|part| match part {
        TemplatePart::Expr(expr) => Some(expr),
        TemplatePart::Text(_) => None,
      })),
      Self::Array(items) => max_depth(items.iter()),
      Self::Object(entries) => max_depth(entries.iter().map(|(_, value)| value)),
      Self::Member {
        object, property, ..
      } => match property {
        Property::Named(_) => object.depth(),
        Property::Computed(index) => object.depth().max(index.depth()),
      },
      Self::Call { callee, args, .. } => callee.depth().max(max_depth(args.iter())),
      Self::Arrow(function) => match &function.body {
        FunctionBody::Expr(body) => body.depth(),
        FunctionBody::Block(body) => block_depth(body),
      },
      Self::Unary { arg, .. } => arg.depth(),
      Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
        left.depth().max(right.depth())
      }
      Self::Conditional {
        test,
        consequent,
        alternate,
      } => test.depth().max(consequent.depth()).max(alternate.depth()),
      Self::Assign { value, .. } => value.depth(),
    };
    children + 1
  }
}

impl Stmt {
  /// Height of the deepest expression or nested statement.
  pub fn depth(&self) -> usize {
    match self {
      Self::Declare { init, .. } => init.depth() + 1,
      Self::Return(value) => value.as_ref().map_or(0, Expr::depth) + 1,
      Self::If {
        test,
        consequent,
        alternate,
      } => {
        let branches = consequent.depth().max(alternate.as_ref().map_or(0, |alt| alt.depth()));
        test.depth().max(branches) + 1
      }
      Self::Block(body) => block_depth(body) + 1,
      Self::Expr(expr) => expr.depth() + 1,
      Self::Empty => 1,
    }
  }
}

fn max_depth<'a>(exprs: impl Iterator<Item = &'a Expr>) -> usize {
  exprs.map(Expr::depth).max().unwrap_or(0)
}

fn block_depth(body: &[Stmt]) -> usize {
  body.iter().map(Stmt::depth).max().unwrap_or(0)
}
