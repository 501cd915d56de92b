/*!
Tree-walking evaluator.

An [`Interpreter`] lives for exactly one evaluation. Its global frame is
built from the capability table first and the scope second, so a scope key
can never shadow a capability. Every frame it creates is tracked and
emptied on drop, which breaks the reference cycles that recursive closures
form with their own environment.
*/

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::ast::{BinaryOp, Expr, Function, FunctionBody, LogicalOp, Program, Property, Stmt, TemplatePart, UnaryOp};
use super::value::{format_number, too_large, Callable, ObjectMap, Value};
use super::{Position, ScriptError, ScriptErrorCode, ScriptResult};

/// Resource limits for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalLimits {
  /// Statements and expressions evaluated before giving up.
  pub max_steps: u64,
  /// Nested closure calls.
  pub max_call_depth: usize,
  /// Expressions being evaluated inside one another, and levels of nested
  /// arrays and objects in a value.
  pub max_nesting: usize,
  /// Bytes in one string, and in the JSON an evaluation hands back.
  pub max_string_len: usize,
  /// Elements in one array.
  pub max_array_len: usize,
}

impl Default for EvalLimits {
  fn default() -> Self {
    Self {
      max_steps: 100_000,
      max_call_depth: 64,
      max_nesting: 256,
      max_string_len: 1 << 20,
      max_array_len: 100_000,
    }
  }
}

/// The functions one sandbox tier exposes as globals.
pub trait Capabilities {
  /// Global names, each bound to a native function.
  fn names(&self) -> &'static [&'static str];

  /// Invoke the native function bound to `name`.
  fn call(&mut self, name: &'static str, args: Vec<Value>) -> ScriptResult<Value>;
}

/// Empty capability table: only the scope is visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl Capabilities for NoCapabilities {
  fn names(&self) -> &'static [&'static str] {
    &[]
  }

  fn call(&mut self, name: &'static str, _args: Vec<Value>) -> ScriptResult<Value> {
    Err(ScriptError::new(ScriptErrorCode::NotCallable, format!("{name} is not available")))
  }
}

struct Binding {
  value: Value,
  mutable: bool,
}

pub(crate) struct Frame {
  parent: Option<Rc<Frame>>,
  bindings: RefCell<HashMap<String, Binding>>,
}

/// An arrow function together with the frame it was created in.
pub struct Closure {
  function: Arc<Function>,
  env: Rc<Frame>,
}

impl std::fmt::Debug for Closure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Closure")
      .field("params", &self.function.params)
      .finish_non_exhaustive()
  }
}

enum Flow {
  /// Completed; carries the value of the last expression statement.
  Normal(Option<Value>),
  Return(Value),
}

/// Property key after evaluation.
enum Key {
  Name(String),
  Index(f64),
}

impl Key {
  fn display(&self) -> String {
    match self {
      Self::Name(name) => name.clone(),
      Self::Index(n) => format_number(*n),
    }
  }
}

/// One evaluation.
pub struct Interpreter<'h> {
  host: &'h mut dyn Capabilities,
  limits: EvalLimits,
  steps: u64,
  depth: usize,
  nesting: usize,
  globals: Rc<Frame>,
  frames: Vec<Rc<Frame>>,
}

impl std::fmt::Debug for Interpreter<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Interpreter")
      .field("limits", &self.limits)
      .field("steps", &self.steps)
      .field("frames", &self.frames.len())
      .finish_non_exhaustive()
  }
}

impl<'h> Interpreter<'h> {
  /// Interpreter with `host` as its capability table.
  pub fn new(host: &'h mut dyn Capabilities, limits: EvalLimits) -> Self {
    let globals = Rc::new(Frame {
      parent: None,
      bindings: RefCell::new(HashMap::new()),
    });
    for name in host.names() {
      globals.bindings.borrow_mut().insert(
        (*name).to_owned(),
        Binding {
          value: Value::Function(Rc::new(Callable::Native(*name))),
          mutable: false,
        },
      );
    }
    Self {
      host,
      limits,
      steps: 0,
      depth: 0,
      nesting: 0,
      frames: vec![Rc::clone(&globals)],
      globals,
    }
  }

  /// Make every scope key a read-only global. Capabilities keep their names.
  pub fn bind_scope(&mut self, scope: &Map<String, JsonValue>) {
    let mut bindings = self.globals.bindings.borrow_mut();
    for (key, value) in scope {
      bindings.entry(key.clone()).or_insert_with(|| Binding {
        value: Value::from_json(value),
        mutable: false,
      });
    }
  }

  /// Run `program`. Its result is the value of the first `return`, or of the
  /// last expression statement when there is none.
  pub fn run(&mut self, program: &Program) -> ScriptResult<Value> {
    let frame = self.new_frame(&Rc::clone(&self.globals));
    match self.exec_block(&program.body, &frame)? {
      Flow::Return(value) | Flow::Normal(Some(value)) => Ok(value),
      Flow::Normal(None) => Ok(Value::Undefined),
    }
  }

  /// Convenience: fresh interpreter, bind `scope`, run.
  pub fn evaluate(
    program: &Program,
    scope: &Map<String, JsonValue>,
    host: &'h mut dyn Capabilities,
    limits: EvalLimits,
  ) -> ScriptResult<Value> {
    let mut interpreter = Self::new(host, limits);
    interpreter.bind_scope(scope);
    interpreter.run(program)
  }

  fn new_frame(&mut self, parent: &Rc<Frame>) -> Rc<Frame> {
    let frame = Rc::new(Frame {
      parent: Some(Rc::clone(parent)),
      bindings: RefCell::new(HashMap::new()),
    });
    self.frames.push(Rc::clone(&frame));
    frame
  }

  /// Count one level of nested evaluation. Pair with [`leave`](Self::leave).
  fn enter(&mut self) -> ScriptResult<()> {
    if self.nesting >= self.limits.max_nesting {
      return Err(self.nesting_error());
    }
    self.nesting += 1;
    Ok(())
  }

  fn leave(&mut self) {
    self.nesting -= 1;
  }

  fn nesting_error(&self) -> ScriptError {
    ScriptError::new(
      ScriptErrorCode::NestingTooDeep,
      format!("nesting limit of {} exceeded", self.limits.max_nesting),
    )
  }

  /// Reject strings, arrays and nested values past the limits.
  fn admit(&self, value: Value) -> ScriptResult<Value> {
    match &value {
      Value::String(s) if s.len() > self.limits.max_string_len => {
        return Err(too_large(self.limits.max_string_len));
      }
      Value::Array(items) if items.len() > self.limits.max_array_len => {
        return Err(too_large(self.limits.max_array_len));
      }
      _ => {}
    }
    if value.depth() > self.limits.max_nesting {
      return Err(self.nesting_error());
    }
    Ok(value)
  }

  /// Display text of `value`, as long as appending it to `used` bytes stays
  /// within the string limit.
  fn display(&self, value: &Value, used: usize) -> ScriptResult<String> {
    let max_len = self.limits.max_string_len;
    value
      .display_within(max_len.saturating_sub(used))
      .map_err(|_| too_large(max_len))
  }

  fn tick(&mut self) -> ScriptResult<()> {
    self.steps += 1;
    if self.steps > self.limits.max_steps {
      return Err(ScriptError::new(
        ScriptErrorCode::StepLimitExceeded,
        format!("step budget of {} exhausted", self.limits.max_steps),
      ));
    }
    Ok(())
  }

  // Statements

  fn exec_block(&mut self, body: &[Stmt], env: &Rc<Frame>) -> ScriptResult<Flow> {
    let mut completion = None;
    for stmt in body {
      match self.exec(stmt, env)? {
        Flow::Return(value) => return Ok(Flow::Return(value)),
        Flow::Normal(Some(value)) => completion = Some(value),
        Flow::Normal(None) => {}
      }
    }
    Ok(Flow::Normal(completion))
  }

  fn exec(&mut self, stmt: &Stmt, env: &Rc<Frame>) -> ScriptResult<Flow> {
    self.tick()?;
    self.enter()?;
    let flow = self.exec_stmt(stmt, env);
    self.leave();
    flow
  }

  fn exec_stmt(&mut self, stmt: &Stmt, env: &Rc<Frame>) -> ScriptResult<Flow> {
    match stmt {
      Stmt::Declare {
        name,
        init,
        mutable,
        pos,
      } => {
        let value = self.eval(init, env)?;
        let mut bindings = env.bindings.borrow_mut();
        if bindings.contains_key(name) {
          return Err(ScriptError::type_error(format!("'{name}' has already been declared")).at(*pos));
        }
        bindings.insert(
          name.clone(),
          Binding {
            value,
            mutable: *mutable,
          },
        );
        Ok(Flow::Normal(None))
      }
      Stmt::Return(value) => {
        let value = match value {
          Some(expr) => self.eval(expr, env)?,
          None => Value::Undefined,
        };
        Ok(Flow::Return(value))
      }
      Stmt::If {
        test,
        consequent,
        alternate,
      } => {
        if self.eval(test, env)?.truthy() {
          self.exec(consequent, env)
        } else if let Some(alternate) = alternate {
          self.exec(alternate, env)
        } else {
          Ok(Flow::Normal(None))
        }
      }
      Stmt::Block(body) => {
        let frame = self.new_frame(env);
        self.exec_block(body, &frame)
      }
      Stmt::Expr(expr) => Ok(Flow::Normal(Some(self.eval(expr, env)?))),
      Stmt::Empty => Ok(Flow::Normal(None)),
    }
  }

  // Expressions

  fn eval(&mut self, expr: &Expr, env: &Rc<Frame>) -> ScriptResult<Value> {
    self.tick()?;
    self.enter()?;
    let value = self.eval_expr(expr, env);
    self.leave();
    value
  }

  fn eval_expr(&mut self, expr: &Expr, env: &Rc<Frame>) -> ScriptResult<Value> {
    match expr {
      Expr::Number(n) => Ok(Value::Number(*n)),
      Expr::Str(s) => Ok(Value::from(s.as_str())),
      Expr::Bool(b) => Ok(Value::Bool(*b)),
      Expr::Null => Ok(Value::Null),
      Expr::Undefined => Ok(Value::Undefined),
      Expr::Template(parts) => {
        let mut out = String::new();
        for part in parts {
          match part {
            TemplatePart::Text(text) => out.push_str(text),
            TemplatePart::Expr(expr) => {
              let value = self.eval(expr, env)?;
              let text = self.display(&value, out.len())?;
              out.push_str(&text);
            }
          }
        }
        self.admit(Value::from(out))
      }
      Expr::Array(items) => {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
          values.push(self.eval(item, env)?);
        }
        self.admit(Value::from(values))
      }
      Expr::Object(entries) => {
        let mut map = ObjectMap::new();
        for (key, value) in entries {
          let value = self.eval(value, env)?;
          map.insert(key.clone(), value);
        }
        self.admit(Value::from(map))
      }
      Expr::Ident { name, pos } => lookup(env, name).ok_or_else(|| {
        ScriptError::new(ScriptErrorCode::UnknownIdentifier, format!("'{name}' is not defined")).at(*pos)
      }),
      Expr::Member { .. } | Expr::Call { .. } => Ok(self.eval_chain(expr, env)?.unwrap_or_default()),
      Expr::Arrow(function) => Ok(Value::Function(Rc::new(Callable::Closure(Closure {
        function: Arc::clone(function),
        env: Rc::clone(env),
      })))),
      Expr::Unary { op, arg, pos } => {
        let value = self.eval(arg, env).map_err(|e| e.at(*pos))?;
        Ok(match op {
          UnaryOp::Not => Value::Bool(!value.truthy()),
          UnaryOp::Neg => Value::Number(-value.to_number()),
          UnaryOp::Plus => Value::Number(value.to_number()),
          UnaryOp::TypeOf => Value::from(value.type_of()),
        })
      }
      Expr::Binary { op, left, right, .. } => {
        let left = self.eval(left, env)?;
        let right = self.eval(right, env)?;
        if *op == BinaryOp::Add && (concatenates(&left) || concatenates(&right)) {
          let mut text = self.display(&left, 0)?;
          let right = self.display(&right, text.len())?;
          text.push_str(&right);
          return Ok(Value::from(text));
        }
        Ok(binary(*op, &left, &right))
      }
      Expr::Logical { op, left, right } => {
        let left = self.eval(left, env)?;
        let short_circuit = match op {
          LogicalOp::And => !left.truthy(),
          LogicalOp::Or => left.truthy(),
          LogicalOp::Nullish => !left.is_nullish(),
        };
        if short_circuit {
          Ok(left)
        } else {
          self.eval(right, env)
        }
      }
      Expr::Conditional {
        test,
        consequent,
        alternate,
      } => {
        if self.eval(test, env)?.truthy() {
          self.eval(consequent, env)
        } else {
          self.eval(alternate, env)
        }
      }
      Expr::Assign { name, value, pos } => {
        let value = self.eval(value, env)?;
        assign(env, name, value.clone()).map_err(|e| e.at(*pos))?;
        Ok(value)
      }
    }
  }

  /// Evaluate a member or call expression. `None` means an optional link
  /// short-circuited the whole chain.
  fn eval_chain(&mut self, expr: &Expr, env: &Rc<Frame>) -> ScriptResult<Option<Value>> {
    match expr {
      Expr::Member {
        object,
        property,
        optional,
        pos,
      } => {
        let Some(target) = self.eval_link(object, env)? else {
          return Ok(None);
        };
        if *optional && target.is_nullish() {
          return Ok(None);
        }
        let key = self.property_key(property, env)?;
        get_property(&target, &key).map(Some).map_err(|e| e.at(*pos))
      }
      Expr::Call {
        callee,
        args,
        optional,
        pos,
      } => {
        if let Expr::Member {
          object,
          property,
          optional: member_optional,
          pos: member_pos,
        } = callee.as_ref()
        {
          let Some(target) = self.eval_link(object, env)? else {
            return Ok(None);
          };
          if *member_optional && target.is_nullish() {
            return Ok(None);
          }
          let key = self.property_key(property, env)?;
          return self.call_method(target, &key, args, *optional, env, *pos).map_err(|e| e.at(*member_pos));
        }

        let Some(function) = self.eval_link(callee, env)? else {
          return Ok(None);
        };
        if *optional && function.is_nullish() {
          return Ok(None);
        }
        let args = self.eval_args(args, env)?;
        self.call_function(&function, args, *pos).map(Some)
      }
      other => self.eval(other, env).map(Some),
    }
  }

  fn eval_link(&mut self, expr: &Expr, env: &Rc<Frame>) -> ScriptResult<Option<Value>> {
    if expr.is_chain() {
      self.tick()?;
      self.enter()?;
      let link = self.eval_chain(expr, env);
      self.leave();
      link
    } else {
      self.eval(expr, env).map(Some)
    }
  }

  fn eval_args(&mut self, args: &[Expr], env: &Rc<Frame>) -> ScriptResult<Vec<Value>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
      values.push(self.eval(arg, env)?);
    }
    Ok(values)
  }

  fn property_key(&mut self, property: &Property, env: &Rc<Frame>) -> ScriptResult<Key> {
    Ok(match property {
      Property::Named(name) => Key::Name(name.clone()),
      Property::Computed(expr) => match self.eval(expr, env)? {
        Value::Number(n) => Key::Index(n),
        other => Key::Name(self.display(&other, 0)?),
      },
    })
  }

  // Calls

  fn call_function(&mut self, function: &Value, args: Vec<Value>, pos: Position) -> ScriptResult<Value> {
    let Value::Function(callable) = function else {
      return Err(
        ScriptError::new(
          ScriptErrorCode::NotCallable,
          format!("{} is not a function", function.type_of()),
        )
        .at(pos),
      );
    };
    match callable.as_ref() {
      Callable::Native(name) => {
        let value = self.host.call(*name, args).map_err(|e| e.at(pos))?;
        self.admit(value).map_err(|e| e.at(pos))
      }
      Callable::Closure(closure) => self.call_closure(closure, args, pos),
    }
  }

  fn call_closure(&mut self, closure: &Closure, args: Vec<Value>, pos: Position) -> ScriptResult<Value> {
    if self.depth >= self.limits.max_call_depth {
      return Err(
        ScriptError::new(
          ScriptErrorCode::CallDepthExceeded,
          format!("call depth limit of {} exceeded", self.limits.max_call_depth),
        )
        .at(pos),
      );
    }
    let frame = self.new_frame(&closure.env);
    {
      let mut bindings = frame.bindings.borrow_mut();
      let mut args = args.into_iter();
      for param in &closure.function.params {
        bindings.insert(
          param.clone(),
          Binding {
            value: args.next().unwrap_or_default(),
            mutable: true,
          },
        );
      }
    }

    self.depth += 1;
    let result = match &closure.function.body {
      FunctionBody::Expr(expr) => self.eval(expr, &frame),
      FunctionBody::Block(body) => self.exec_block(body, &frame).map(|flow| match flow {
        Flow::Return(value) => value,
        Flow::Normal(_) => Value::Undefined,
      }),
    };
    self.depth -= 1;
    result
  }

  fn call_method(
    &mut self,
    target: Value,
    key: &Key,
    args: &[Expr],
    optional: bool,
    env: &Rc<Frame>,
    pos: Position,
  ) -> ScriptResult<Option<Value>> {
    let name = key.display();
    if let Value::Object(map) = &target {
      let member = map.get(&name).cloned().unwrap_or_default();
      if optional && member.is_nullish() {
        return Ok(None);
      }
      if !matches!(member, Value::Function(_)) {
        return Err(not_a_function(&target, &name));
      }
      let args = self.eval_args(args, env)?;
      return self.call_function(&member, args, pos).map(Some);
    }
    if target.is_nullish() {
      return Err(ScriptError::type_error(format!(
        "cannot read properties of {} (reading '{name}')",
        target.to_display()
      )));
    }

    let args = self.eval_args(args, env)?;
    let result = match &target {
      Value::String(s) => string_method(s, &name, &args, &self.limits)?,
      Value::Array(items) => self.array_method(items, &name, &args, pos)?,
      Value::Number(n) => number_method(*n, &name, &args)?,
      Value::Undefined | Value::Null | Value::Bool(_) | Value::Object(_) | Value::Function(_) => None,
    };
    match result {
      Some(value) => self.admit(value).map(Some),
      None if optional => Ok(None),
      None => Err(not_a_function(&target, &name)),
    }
  }

  fn array_method(
    &mut self,
    items: &[Value],
    name: &str,
    args: &[Value],
    pos: Position,
  ) -> ScriptResult<Option<Value>> {
    let value = match name {
      "map" | "filter" | "find" | "some" | "every" => {
        let callback = arg(args, 0);
        if !matches!(callback, Value::Function(_)) {
          return Err(ScriptError::type_error(format!(
            "{} is not a function",
            callback.type_of()
          )));
        }
        let mut mapped = Vec::new();
        for (index, item) in items.iter().enumerate() {
          let result = self.call_function(&callback, vec![item.clone(), index_value(index)], pos)?;
          match name {
            "map" => mapped.push(result),
            "filter" if result.truthy() => mapped.push(item.clone()),
            "find" if result.truthy() => return Ok(Some(item.clone())),
            "some" if result.truthy() => return Ok(Some(Value::Bool(true))),
            "every" if !result.truthy() => return Ok(Some(Value::Bool(false))),
            _ => {}
          }
        }
        match name {
          "map" | "filter" => Value::from(mapped),
          "find" => Value::Undefined,
          "some" => Value::Bool(false),
          _ => Value::Bool(true),
        }
      }
      "join" => {
        let separator = match arg(args, 0) {
          Value::Undefined => ",".to_owned(),
          other => self.display(&other, 0)?,
        };
        let mut joined = String::new();
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            if joined.len() + separator.len() > self.limits.max_string_len {
              return Err(too_large(self.limits.max_string_len));
            }
            joined.push_str(&separator);
          }
          if !item.is_nullish() {
            let text = self.display(item, joined.len())?;
            joined.push_str(&text);
          }
        }
        Value::from(joined)
      }
      "includes" => {
        let needle = arg(args, 0);
        Value::Bool(items.iter().any(|item| same_value_zero(item, &needle)))
      }
      "indexOf" => {
        let needle = arg(args, 0);
        let found = items.iter().position(|item| item.strict_eq(&needle));
        found.map_or(Value::Number(-1.0), index_value)
      }
      "slice" => {
        let (start, end) = slice_bounds(items.len(), args);
        Value::from(items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default())
      }
      "concat" => {
        let added: usize = args
          .iter()
          .map(|value| match value {
            Value::Array(more) => more.len(),
            _ => 1,
          })
          .sum();
        if items.len() + added > self.limits.max_array_len {
          return Err(too_large(self.limits.max_array_len));
        }
        let mut out = items.to_vec();
        for value in args {
          match value {
            Value::Array(more) => out.extend(more.iter().cloned()),
            other => out.push(other.clone()),
          }
        }
        Value::from(out)
      }
      "at" => relative_index(items.len(), args)
        .and_then(|i| items.get(i).cloned())
        .unwrap_or_default(),
      _ => return Ok(None),
    };
    Ok(Some(value))
  }
}

impl Drop for Interpreter<'_> {
  fn drop(&mut self) {
    for frame in self.frames.drain(..) {
      let bindings = std::mem::take(&mut *frame.bindings.borrow_mut());
      drop(bindings);
    }
  }
}

// Environment

fn lookup(env: &Rc<Frame>, name: &str) -> Option<Value> {
  let mut frame = env;
  loop {
    if let Some(binding) = frame.bindings.borrow().get(name) {
      return Some(binding.value.clone());
    }
    frame = frame.parent.as_ref()?;
  }
}

fn assign(env: &Rc<Frame>, name: &str, value: Value) -> ScriptResult<()> {
  let mut frame = env;
  loop {
    if let Some(binding) = frame.bindings.borrow_mut().get_mut(name) {
      if !binding.mutable {
        return Err(ScriptError::type_error(format!("assignment to constant '{name}'")));
      }
      binding.value = value;
      return Ok(());
    }
    match &frame.parent {
      Some(parent) => frame = parent,
      None => {
        return Err(ScriptError::new(
          ScriptErrorCode::UnknownIdentifier,
          format!("'{name}' is not defined"),
        ))
      }
    }
  }
}

// Operators and built-ins

/// Whether `+` with this operand concatenates instead of adding.
const fn concatenates(value: &Value) -> bool {
  matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_))
}

/// Operators on already evaluated operands. `+` here is numeric; the
/// interpreter handles concatenation.
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
  let numbers = || (left.to_number(), right.to_number());
  match op {
    BinaryOp::Add => {
      let (a, b) = numbers();
      Value::Number(a + b)
    }
    BinaryOp::Sub => {
      let (a, b) = numbers();
      Value::Number(a - b)
    }
    BinaryOp::Mul => {
      let (a, b) = numbers();
      Value::Number(a * b)
    }
    BinaryOp::Div => {
      let (a, b) = numbers();
      Value::Number(a / b)
    }
    BinaryOp::Rem => {
      let (a, b) = numbers();
      Value::Number(a % b)
    }
    BinaryOp::Eq => Value::Bool(left.strict_eq(right)),
    BinaryOp::NotEq => Value::Bool(!left.strict_eq(right)),
    BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
      let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
          let (a, b) = numbers();
          a.partial_cmp(&b)
        }
      };
      Value::Bool(ordering.is_some_and(|ordering| match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
      }))
    }
  }
}

fn not_a_function(target: &Value, name: &str) -> ScriptError {
  ScriptError::new(
    ScriptErrorCode::NotCallable,
    format!("{}.{name} is not a function", target.type_of()),
  )
}

fn get_property(target: &Value, key: &Key) -> ScriptResult<Value> {
  let index = |len: usize| match key {
    Key::Index(n) => array_index(*n, len),
    Key::Name(name) => name.parse::<f64>().ok().and_then(|n| array_index(n, len)),
  };
  Ok(match target {
    Value::Undefined | Value::Null => {
      return Err(ScriptError::type_error(format!(
        "cannot read properties of {} (reading '{}')",
        target.to_display(),
        key.display()
      )));
    }
    Value::String(s) => match key {
      Key::Name(name) if name == "length" => index_value(s.chars().count()),
      _ => index(s.chars().count())
        .and_then(|i| s.chars().nth(i))
        .map_or(Value::Undefined, |c| Value::from(c.to_string())),
    },
    Value::Array(items) => match key {
      Key::Name(name) if name == "length" => index_value(items.len()),
      _ => index(items.len())
        .and_then(|i| items.get(i).cloned())
        .unwrap_or_default(),
    },
    Value::Object(map) => map.get(&key.display()).cloned().unwrap_or_default(),
    Value::Bool(_) | Value::Number(_) | Value::Function(_) => Value::Undefined,
  })
}

fn array_index(n: f64, len: usize) -> Option<usize> {
  if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
    return None;
  }
  #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
  Some(n as usize)
}

#[allow(clippy::cast_precision_loss)]
fn index_value(index: usize) -> Value {
  Value::Number(index as f64)
}

fn arg(args: &[Value], i: usize) -> Value {
  args.get(i).cloned().unwrap_or_default()
}

/// Integer argument; `undefined` gives `default`, NaN gives 0.
#[allow(clippy::cast_possible_truncation)]
fn int_arg(args: &[Value], i: usize, default: i64) -> i64 {
  match arg(args, i) {
    Value::Undefined => default,
    other => {
      let n = other.to_number();
      if n.is_nan() {
        0
      } else {
        n.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64
      }
    }
  }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn resolve_relative(n: i64, len: usize) -> usize {
  let len = len as i64;
  let resolved = if n < 0 { (len + n).max(0) } else { n.min(len) };
  resolved as usize
}

#[allow(clippy::cast_possible_wrap)]
fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
  let start = resolve_relative(int_arg(args, 0, 0), len);
  let end = resolve_relative(int_arg(args, 1, len as i64), len);
  (start, end.max(start))
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn relative_index(len: usize, args: &[Value]) -> Option<usize> {
  let n = int_arg(args, 0, 0);
  let resolved = if n < 0 { len as i64 + n } else { n };
  (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
    _ => a.strict_eq(b),
  }
}

fn pad(s: &str, args: &[Value], at_start: bool, max_len: usize) -> ScriptResult<String> {
  let target = usize::try_from(int_arg(args, 0, 0)).unwrap_or(0);
  let fill = match arg(args, 1) {
    Value::Undefined => " ".to_owned(),
    other => other.display_within(max_len)?,
  };
  let len = s.chars().count();
  if target <= len || fill.is_empty() {
    return Ok(s.to_owned());
  }
  // Every char takes at least one byte.
  if target > max_len {
    return Err(too_large(max_len));
  }
  let padding: String = fill.chars().cycle().take(target - len).collect();
  let padded = if at_start {
    padding + s
  } else {
    s.to_owned() + &padding
  };
  if padded.len() > max_len {
    return Err(too_large(max_len));
  }
  Ok(padded)
}

fn string_method(
  s: &str,
  name: &str,
  args: &[Value],
  limits: &EvalLimits,
) -> ScriptResult<Option<Value>> {
  let max_len = limits.max_string_len;
  let text = |i: usize| arg(args, i).display_within(max_len);
  let value = match name {
    "toUpperCase" => Value::from(s.to_uppercase()),
    "toLowerCase" => Value::from(s.to_lowercase()),
    "trim" => Value::from(s.trim()),
    "toString" => Value::from(s),
    "includes" => Value::Bool(s.contains(text(0)?.as_str())),
    "startsWith" => Value::Bool(s.starts_with(text(0)?.as_str())),
    "endsWith" => Value::Bool(s.ends_with(text(0)?.as_str())),
    "slice" => {
      let chars: Vec<char> = s.chars().collect();
      let (start, end) = slice_bounds(chars.len(), args);
      Value::from(chars.get(start..end).unwrap_or_default().iter().collect::<String>())
    }
    "split" => {
      let max_parts = limits.max_array_len;
      let taken = max_parts.saturating_add(1);
      let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::from(s)],
        separator => {
          let separator = separator.display_within(max_len)?;
          if separator.is_empty() {
            s.chars().take(taken).map(|c| Value::from(c.to_string())).collect()
          } else {
            s.split(separator.as_str()).take(taken).map(Value::from).collect()
          }
        }
      };
      if parts.len() > max_parts {
        return Err(too_large(max_parts));
      }
      Value::from(parts)
    }
    "replace" => {
      let (pattern, replacement) = (text(0)?, text(1)?);
      if s.contains(pattern.as_str()) && s.len() - pattern.len() + replacement.len() > max_len {
        return Err(too_large(max_len));
      }
      Value::from(s.replacen(pattern.as_str(), &replacement, 1))
    }
    "padStart" => Value::from(pad(s, args, true, max_len)?),
    "padEnd" => Value::from(pad(s, args, false, max_len)?),
    _ => return Ok(None),
  };
  Ok(Some(value))
}

fn number_method(n: f64, name: &str, args: &[Value]) -> ScriptResult<Option<Value>> {
  let value = match name {
    "toFixed" => {
      let digits = int_arg(args, 0, 0);
      let digits = usize::try_from(digits)
        .ok()
        .filter(|d| *d <= 100)
        .ok_or_else(|| ScriptError::invalid_argument(format!("toFixed() digits out of range: {digits}")))?;
      if n.is_finite() {
        Value::from(format!("{n:.digits$}"))
      } else {
        Value::from(format_number(n))
      }
    }
    "toString" => Value::from(format_number(n)),
    _ => return Ok(None),
  };
  Ok(Some(value))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::script::parse_program;
  use proptest::prelude::*;
  use serde_json::json;

  /// Records native calls; exposes `echo` and `count`.
  #[derive(Default)]
  struct Recorder {
    calls: Vec<(&'static str, Vec<Value>)>,
  }

  impl Capabilities for Recorder {
    fn names(&self) -> &'static [&'static str] {
      &["echo", "count"]
    }

    fn call(&mut self, name: &'static str, args: Vec<Value>) -> ScriptResult<Value> {
      self.calls.push((name, args.clone()));
      match name {
        "echo" => Ok(arg(&args, 0)),
        _ => Ok(Value::Number(self.calls.len() as f64)),
      }
    }
  }

  fn eval_with(source: &str, scope: JsonValue, limits: EvalLimits) -> ScriptResult<JsonValue> {
    let program = parse_program(source)?;
    let mut host = Recorder::default();
    let scope = scope.as_object().cloned().unwrap_or_default();
    Interpreter::evaluate(&program, &scope, &mut host, limits).map(|v| v.to_json())
  }

  fn eval(source: &str, scope: JsonValue) -> ScriptResult<JsonValue> {
    eval_with(source, scope, EvalLimits::default())
  }

  fn ok(source: &str) -> JsonValue {
    eval(source, json!({})).unwrap()
  }

  fn code(source: &str) -> ScriptErrorCode {
    eval(source, json!({})).unwrap_err().code
  }

  #[test]
  fn arithmetic_and_concatenation() {
    assert_eq!(ok("1 + 2 * 3"), json!(7));
    assert_eq!(ok("(1 + 2) * 3"), json!(9));
    assert_eq!(ok("7 % 4 - 1"), json!(2));
    assert_eq!(ok("'a' + 1 + 2"), json!("a12"));
    assert_eq!(ok("1 / 4"), json!(0.25));
    assert_eq!(ok("-'3'"), json!(-3));
  }

  #[test]
  fn comparison_and_equality_are_strict() {
    assert_eq!(ok("1 == '1'"), json!(false));
    assert_eq!(ok("1 === 1 && 'a' !== 'b'"), json!(true));
    assert_eq!(ok("'b' > 'a'"), json!(true));
    assert_eq!(ok("null ?? 'fallback'"), json!("fallback"));
    assert_eq!(ok("0 ?? 'fallback'"), json!(0));
    assert_eq!(ok("0 || 'fallback'"), json!("fallback"));
    assert_eq!(ok("typeof 1 + typeof 'x' + typeof null"), json!("numberstringobject"));
  }

  #[test]
  fn last_expression_is_the_result() {
    assert_eq!(ok("const a = 2\na * 21"), json!(42));
    assert_eq!(ok("if (true) { 'yes' } else { 'no' }"), json!("yes"));
    assert_eq!(ok("const a = 1"), JsonValue::Null);
  }

  #[test]
  fn return_stops_evaluation() {
    assert_eq!(ok("return 1\nmissing()"), json!(1));
  }

  #[test]
  fn scope_values_are_visible() {
    let result = eval("`${battery.percentage}% ${user.name}`", json!({
      "battery": { "percentage": 80 },
      "user": { "name": "ada" },
    }));
    assert_eq!(result.unwrap(), json!("80% ada"));
  }

  #[test]
  fn unknown_identifiers_fail() {
    let err = eval("volume + 1", json!({})).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::UnknownIdentifier);
    assert_eq!(err.position.map(|p| (p.line, p.column)), Some((1, 1)));
  }

  #[test]
  fn there_are_no_ambient_globals() {
    for name in ["Math", "window", "globalThis", "fetch", "process", "eval", "Function", "require"] {
      assert_eq!(code(name), ScriptErrorCode::UnknownIdentifier, "{name}");
    }
  }

  #[test]
  fn closures_and_recursion() {
    assert_eq!(ok("const f = n => n <= 1 ? 1 : n * f(n - 1)\nreturn f(5)"), json!(120));
    assert_eq!(ok("const add = a => b => a + b\nadd(2)(3)"), json!(5));
    assert_eq!(ok("const f = (a, b) => { return b }\nf(1)"), JsonValue::Null);
  }

  #[test]
  fn let_reassigns_const_does_not() {
    assert_eq!(ok("let a = 1\na = a + 1\na"), json!(2));
    assert_eq!(code("const a = 1\na = 2"), ScriptErrorCode::TypeError);
    assert_eq!(code("const a = 1\nconst a = 2"), ScriptErrorCode::TypeError);
    assert_eq!(code("b = 2"), ScriptErrorCode::UnknownIdentifier);
  }

  #[test]
  fn scope_bindings_are_read_only() {
    let err = eval("volume = 1", json!({ "volume": 0.5 })).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::TypeError);
  }

  #[test]
  fn block_scoping_shadows() {
    assert_eq!(ok("const a = 1\nif (true) { const a = 2 }\na"), json!(1));
  }

  #[test]
  fn optional_chaining_short_circuits() {
    assert_eq!(eval("a?.b.c", json!({ "a": null })).unwrap(), JsonValue::Null);
    assert_eq!(eval("a?.b?.c", json!({ "a": { "b": null } })).unwrap(), JsonValue::Null);
    assert_eq!(eval("a.missing?.()", json!({ "a": {} })).unwrap(), JsonValue::Null);
    assert_eq!(
      eval("a.b.c", json!({ "a": {} })).unwrap_err().code,
      ScriptErrorCode::TypeError
    );
  }

  #[test]
  fn member_access() {
    let scope = json!({ "xs": [10, 20, 30], "o": { "k": "v" }, "s": "héllo" });
    assert_eq!(eval("xs[1] + xs.length", scope.clone()).unwrap(), json!(23));
    assert_eq!(eval("o['k'] + o.nope", scope.clone()).unwrap(), json!("vundefined"));
    assert_eq!(eval("s.length + s[1]", scope).unwrap(), json!("5é"));
  }

  #[test]
  fn array_methods() {
    assert_eq!(ok("[1, 2, 3, 4].filter(x => x % 2 === 0).map(x => x * 10)"), json!([20, 40]));
    assert_eq!(ok("[1, 2, 3].find(x => x > 1)"), json!(2));
    assert_eq!(ok("[1, 2].some(x => x > 1) && [1, 2].every(x => x > 0)"), json!(true));
    assert_eq!(ok("['a', null, 'b'].join('-')"), json!("a--b"));
    assert_eq!(ok("[1, 2, 3].slice(-2)"), json!([2, 3]));
    assert_eq!(ok("[1].concat([2, 3], 4)"), json!([1, 2, 3, 4]));
    assert_eq!(ok("[1, 2, 3].indexOf(3) + [1, 2, 3].at(-1)"), json!(5));
    assert_eq!(ok("[1, 2].includes(2)"), json!(true));
    assert_eq!(ok("['a', 'b'].map((x, i) => x + i)"), json!(["a0", "b1"]));
  }

  #[test]
  fn string_and_number_methods() {
    assert_eq!(ok("' Hi '.trim().toUpperCase()"), json!("HI"));
    assert_eq!(ok("'a,b,c'.split(',')"), json!(["a", "b", "c"]));
    assert_eq!(ok("'5'.padStart(3, '0')"), json!("005"));
    assert_eq!(ok("'ab'.padEnd(4)"), json!("ab  "));
    assert_eq!(ok("'hello'.slice(1, -1)"), json!("ell"));
    assert_eq!(ok("'aaa'.replace('a', 'b')"), json!("baa"));
    assert_eq!(ok("'wifi'.startsWith('wi') && 'wifi'.includes('if')"), json!(true));
    assert_eq!(ok("(0.456).toFixed(2)"), json!("0.46"));
    assert_eq!(ok("(12).toString() + 1"), json!("121"));
  }

  #[test]
  fn calling_non_functions_fails() {
    assert_eq!(code("'x'.nope()"), ScriptErrorCode::NotCallable);
    assert_eq!(code("const a = 1\na()"), ScriptErrorCode::NotCallable);
    assert_eq!(code("[1].map(2)"), ScriptErrorCode::TypeError);
  }

  #[test]
  fn natives_dispatch_to_host() {
    let program = parse_program("echo(1, 'two') + count()").unwrap();
    let mut host = Recorder::default();
    let result = Interpreter::evaluate(&program, &Map::new(), &mut host, EvalLimits::default()).unwrap();
    assert_eq!(result.to_json(), json!(3));
    assert_eq!(host.calls.len(), 2);
    assert_eq!(host.calls[0].0, "echo");
  }

  #[test]
  fn scope_cannot_shadow_capabilities() {
    let result = eval("typeof echo", json!({ "echo": 5 })).unwrap();
    assert_eq!(result, json!("function"));
  }

  #[test]
  fn step_budget_is_enforced() {
    let limits = EvalLimits {
      max_steps: 50,
      ..EvalLimits::default()
    };
    let err = eval_with("[1,2,3,4,5,6,7,8,9,10].map(x => x * 2).map(x => x + 1)", json!({}), limits).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::StepLimitExceeded);
  }

  #[test]
  fn call_depth_is_enforced() {
    assert_eq!(code("const f = n => f(n + 1)\nf(0)"), ScriptErrorCode::CallDepthExceeded);
  }

  #[test]
  fn nesting_is_enforced() {
    let limits = EvalLimits {
      max_nesting: 16,
      ..EvalLimits::default()
    };
    let sum = format!("1{}", " + 1".repeat(50));
    let err = eval_with(&sum, json!({}), limits).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::NestingTooDeep);

    let chain = format!("a{}", ".b".repeat(50));
    let err = eval_with(&chain, json!({ "a": {} }), limits).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::NestingTooDeep);

    let wrapped = format!("let a = []{}\na", "\na = [[[[a]]]]".repeat(5));
    let err = eval_with(&wrapped, json!({}), limits).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::NestingTooDeep);
  }

  #[test]
  fn longest_parseable_chain_evaluates() {
    let sum = format!("1{}", "+1".repeat(200));
    assert_eq!(ok(&sum), json!(201));
  }

  fn small_limits() -> EvalLimits {
    EvalLimits {
      max_string_len: 64,
      max_array_len: 10,
      ..EvalLimits::default()
    }
  }

  fn size_error(source: &str, scope: JsonValue) {
    let err = eval_with(source, scope, small_limits()).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::SizeLimitExceeded, "{source}");
  }

  #[test]
  fn huge_padding_is_refused_before_allocating() {
    assert_eq!(code("'x'.padStart(1e15)"), ScriptErrorCode::SizeLimitExceeded);
    assert_eq!(code("'x'.padEnd(1e15, 'ab')"), ScriptErrorCode::SizeLimitExceeded);
    assert_eq!(ok("'ab'.padStart(5, '-')"), json!("---ab"));
  }

  #[test]
  fn repeated_doubling_hits_the_string_limit() {
    let source = "const f = (s, n) => n ? f(s + s, n - 1) : s.length\nf('x', 50)";
    assert_eq!(code(source), ScriptErrorCode::SizeLimitExceeded);
    let within = "const f = (s, n) => n ? f(s + s, n - 1) : s.length\nf('x', 10)";
    assert_eq!(ok(within), json!(1024));
  }

  #[test]
  fn string_building_respects_the_limit() {
    let scope = || json!({ "s": "a".repeat(40) });
    size_error("s + s", scope());
    size_error("`${s}${s}`", scope());
    size_error("[s, s].join('-')", scope());
    size_error("s.replace('a', s)", scope());
    size_error("s.padEnd(65)", scope());
    assert_eq!(
      eval_with("s.replace('aa', 'b').length", scope(), small_limits()).unwrap(),
      json!(39)
    );
  }

  #[test]
  fn array_building_respects_the_limit() {
    size_error("[1, 2, 3, 4, 5, 6].concat([1, 2, 3, 4, 5])", json!({}));
    size_error("'abcdefghijkl'.split('')", json!({}));
    size_error("[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]", json!({}));
    assert_eq!(
      eval_with("[1, 2, 3].concat([4], 5).length", json!({}), small_limits()).unwrap(),
      json!(5)
    );
  }

  #[test]
  fn frames_are_emptied_after_evaluation() {
    let program = parse_program("const f = () => f\nf").unwrap();
    let mut host = NoCapabilities;
    let result = Interpreter::evaluate(&program, &Map::new(), &mut host, EvalLimits::default()).unwrap();
    let Value::Function(callable) = result else {
      panic!("expected function");
    };
    let Callable::Closure(closure) = callable.as_ref() else {
      panic!("expected closure");
    };
    assert!(closure.env.bindings.borrow().is_empty());
  }

  proptest! {
    #[test]
    fn integer_arithmetic_matches(a in -1000i64..1000, b in -1000i64..1000, c in -1000i64..1000) {
      let result = ok(&format!("{a} + {b} * {c}"));
      prop_assert_eq!(result, json!(a + b * c));
    }

    #[test]
    fn evaluation_is_deterministic(xs in proptest::collection::vec(-100i64..100, 0..8)) {
      let scope = json!({ "xs": xs });
      let source = "xs.filter(x => x > 0).map(x => ({ v: x, s: `${x}` }))";
      prop_assert_eq!(eval(source, scope.clone()).unwrap(), eval(source, scope).unwrap());
    }
  }
}
