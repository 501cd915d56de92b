/*! Recursive descent parser from tokens to [`Program`]. */

use std::sync::Arc;

use super::ast::{
  BinaryOp, Expr, Function, FunctionBody, LogicalOp, Program, Property, Stmt, TemplatePart,
  UnaryOp,
};
use super::lexer::{tokenize, Punct, TemplateChunk, Token, TokenKind};
use super::value::format_number;
use super::{Position, ScriptError, ScriptResult};

/// Deepest allowed nesting of blocks, brackets and unary operators.
const MAX_NESTING: usize = 128;

/// Tallest expression tree an operator or member chain may build.
const MAX_EXPR_DEPTH: usize = 256;

/// Words that can never name a binding.
const RESERVED: &[&str] = &[
  "async", "await", "break", "case", "catch", "class", "const", "continue", "delete", "do",
  "else", "export", "false", "for", "function", "if", "import", "in", "instanceof", "let", "new",
  "null", "return", "switch", "this", "throw", "true", "try", "typeof", "undefined", "var",
  "void", "while", "with", "yield",
];

fn is_reserved(name: &str) -> bool {
  RESERVED.contains(&name)
}

/// Parse a whole template or action source.
pub fn parse_program(source: &str) -> ScriptResult<Program> {
  let mut parser = Parser::new(tokenize(source)?, 0);
  let mut body = Vec::new();
  while !parser.at_eof() {
    body.push(parser.statement()?);
  }
  Ok(Program { body })
}

struct Parser {
  tokens: Vec<Token>,
  idx: usize,
  depth: usize,
  prev_line: u32,
}

impl Parser {
  fn new(tokens: Vec<Token>, depth: usize) -> Self {
    Self {
      tokens,
      idx: 0,
      depth,
      prev_line: 1,
    }
  }

  // Token access

  fn peek(&self) -> &Token {
    let last = self.tokens.len().saturating_sub(1);
    &self.tokens[self.idx.min(last)]
  }

  fn peek_kind_at(&self, ahead: usize) -> Option<&TokenKind> {
    self.tokens.get(self.idx + ahead).map(|t| &t.kind)
  }

  fn pos(&self) -> Position {
    self.peek().pos
  }

  fn at_eof(&self) -> bool {
    self.peek().kind == TokenKind::Eof
  }

  fn bump(&mut self) -> Token {
    let token = self.peek().clone();
    self.prev_line = token.pos.line;
    if self.idx < self.tokens.len() {
      self.idx += 1;
    }
    token
  }

  fn check(&self, punct: Punct) -> bool {
    self.peek().kind == TokenKind::Punct(punct)
  }

  fn eat(&mut self, punct: Punct) -> bool {
    if self.check(punct) {
      self.bump();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, punct: Punct) -> ScriptResult<Position> {
    if self.check(punct) {
      Ok(self.bump().pos)
    } else {
      Err(self.unexpected(&format!("expected '{}'", punct.as_str())))
    }
  }

  fn check_keyword(&self, keyword: &str) -> bool {
    matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
  }

  fn eat_keyword(&mut self, keyword: &str) -> bool {
    if self.check_keyword(keyword) {
      self.bump();
      true
    } else {
      false
    }
  }

  fn binding_name(&mut self) -> ScriptResult<String> {
    match &self.peek().kind {
      TokenKind::Ident(name) if !is_reserved(name) => {
        let name = name.clone();
        self.bump();
        Ok(name)
      }
      _ => Err(self.unexpected("expected a name")),
    }
  }

  fn unexpected(&self, context: &str) -> ScriptError {
    let found = match &self.peek().kind {
      TokenKind::Number(n) => format!("number {}", format_number(*n)),
      TokenKind::String(_) => "string".to_owned(),
      TokenKind::Template(_) => "template literal".to_owned(),
      TokenKind::Ident(name) => format!("'{name}'"),
      TokenKind::Punct(p) => format!("'{}'", p.as_str()),
      TokenKind::Eof => "end of input".to_owned(),
    };
    ScriptError::syntax(format!("{context}, found {found}"), self.pos())
  }

  fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ScriptResult<T>) -> ScriptResult<T> {
    if self.depth >= MAX_NESTING {
      return Err(ScriptError::syntax("nesting too deep", self.pos()));
    }
    self.depth += 1;
    let result = parse(self);
    self.depth -= 1;
    result
  }

  // Statements

  fn statement(&mut self) -> ScriptResult<Stmt> {
    if self.eat(Punct::Semi) {
      return Ok(Stmt::Empty);
    }
    if self.check(Punct::LBrace) && !self.object_ahead() {
      return Ok(Stmt::Block(self.block()?));
    }
    if self.check_keyword("const") || self.check_keyword("let") {
      let mutable = self.check_keyword("let");
      let pos = self.bump().pos;
      let name = self.binding_name()?;
      self.expect(Punct::Assign)?;
      let init = self.expression()?;
      self.end_statement()?;
      return Ok(Stmt::Declare {
        name,
        init,
        mutable,
        pos,
      });
    }
    if self.eat_keyword("return") {
      let value = if self.check(Punct::Semi) || self.check(Punct::RBrace) || self.at_eof() {
        None
      } else {
        Some(self.expression()?)
      };
      self.end_statement()?;
      return Ok(Stmt::Return(value));
    }
    if self.eat_keyword("if") {
      self.expect(Punct::LParen)?;
      let test = self.expression()?;
      self.expect(Punct::RParen)?;
      let consequent = Box::new(self.nested(Self::statement)?);
      let alternate = if self.eat_keyword("else") {
        Some(Box::new(self.nested(Self::statement)?))
      } else {
        None
      };
      return Ok(Stmt::If {
        test,
        consequent,
        alternate,
      });
    }

    let expr = self.expression()?;
    self.end_statement()?;
    Ok(Stmt::Expr(expr))
  }

  /// `{ key: ...` at statement start. There are no labels, so this can only
  /// be an object literal.
  fn object_ahead(&self) -> bool {
    matches!(
      self.peek_kind_at(1),
      Some(TokenKind::Ident(_) | TokenKind::String(_) | TokenKind::Number(_))
    ) && matches!(self.peek_kind_at(2), Some(TokenKind::Punct(Punct::Colon)))
  }

  /// A statement ends at `;`, `}`, end of input, or a line break.
  fn end_statement(&mut self) -> ScriptResult<()> {
    if self.eat(Punct::Semi) || self.check(Punct::RBrace) || self.at_eof() {
      return Ok(());
    }
    if self.pos().line > self.prev_line {
      return Ok(());
    }
    Err(self.unexpected("expected ';'"))
  }

  fn block(&mut self) -> ScriptResult<Vec<Stmt>> {
    self.nested(|p| {
      p.expect(Punct::LBrace)?;
      let mut body = Vec::new();
      while !p.check(Punct::RBrace) {
        if p.at_eof() {
          return Err(p.unexpected("expected '}'"));
        }
        body.push(p.statement()?);
      }
      p.expect(Punct::RBrace)?;
      Ok(body)
    })
  }

  // Expressions, lowest precedence first

  fn expression(&mut self) -> ScriptResult<Expr> {
    self.assignment()
  }

  fn assignment(&mut self) -> ScriptResult<Expr> {
    if let TokenKind::Ident(name) = &self.peek().kind {
      if !is_reserved(name) {
        match self.peek_kind_at(1) {
          Some(TokenKind::Punct(Punct::Assign)) => {
            let name = name.clone();
            let pos = self.bump().pos;
            self.bump();
            let value = Box::new(self.nested(Self::assignment)?);
            return Ok(Expr::Assign { name, value, pos });
          }
          Some(TokenKind::Punct(Punct::Arrow)) => {
            let param = name.clone();
            self.bump();
            self.bump();
            return self.arrow_body(vec![param]);
          }
          _ => {}
        }
      }
    }
    if self.check(Punct::LParen) && self.arrow_ahead() {
      let params = self.arrow_params()?;
      self.expect(Punct::Arrow)?;
      return self.arrow_body(params);
    }
    self.conditional()
  }

  /// Whether the `(` at the cursor opens an arrow parameter list.
  fn arrow_ahead(&self) -> bool {
    let mut depth = 0usize;
    for (offset, token) in self.tokens[self.idx..].iter().enumerate() {
      match token.kind {
        TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => depth += 1,
        TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => {
          depth = depth.saturating_sub(1);
          if depth == 0 {
            return matches!(
              self.peek_kind_at(offset + 1),
              Some(TokenKind::Punct(Punct::Arrow))
            );
          }
        }
        TokenKind::Eof => return false,
        _ => {}
      }
    }
    false
  }

  fn arrow_params(&mut self) -> ScriptResult<Vec<String>> {
    self.expect(Punct::LParen)?;
    let mut params = Vec::new();
    while !self.check(Punct::RParen) {
      let name = self.binding_name()?;
      if params.contains(&name) {
        return Err(ScriptError::syntax(format!("duplicate parameter '{name}'"), self.pos()));
      }
      params.push(name);
      if !self.eat(Punct::Comma) {
        break;
      }
    }
    self.expect(Punct::RParen)?;
    Ok(params)
  }

  fn arrow_body(&mut self, params: Vec<String>) -> ScriptResult<Expr> {
    let body = if self.check(Punct::LBrace) {
      FunctionBody::Block(self.block()?)
    } else {
      FunctionBody::Expr(self.nested(Self::assignment)?)
    };
    Ok(Expr::Arrow(Arc::new(Function { params, body })))
  }

  fn conditional(&mut self) -> ScriptResult<Expr> {
    let test = self.nullish()?;
    if !self.eat(Punct::Question) {
      return Ok(test);
    }
    self.nested(|p| {
      let consequent = p.assignment()?;
      p.expect(Punct::Colon)?;
      let alternate = p.assignment()?;
      Ok(Expr::Conditional {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
      })
    })
  }

  fn logical(
    &mut self,
    punct: Punct,
    op: LogicalOp,
    next: fn(&mut Self) -> ScriptResult<Expr>,
  ) -> ScriptResult<Expr> {
    let mut left = next(self)?;
    let mut depth = None;
    loop {
      let pos = self.pos();
      if !self.eat(punct) {
        return Ok(left);
      }
      let right = next(self)?;
      let base = depth.unwrap_or_else(|| left.depth());
      depth = Some(grow(base, right.depth(), pos)?);
      left = Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
      };
    }
  }

  fn nullish(&mut self) -> ScriptResult<Expr> {
    self.logical(Punct::QuestionQuestion, LogicalOp::Nullish, Self::or)
  }

  fn or(&mut self) -> ScriptResult<Expr> {
    self.logical(Punct::OrOr, LogicalOp::Or, Self::and)
  }

  fn and(&mut self) -> ScriptResult<Expr> {
    self.logical(Punct::AndAnd, LogicalOp::And, Self::equality)
  }

  fn binary(
    &mut self,
    table: &[(Punct, BinaryOp)],
    next: fn(&mut Self) -> ScriptResult<Expr>,
  ) -> ScriptResult<Expr> {
    let mut left = next(self)?;
    let mut depth = None;
    loop {
      let Some((_, op)) = table.iter().find(|(punct, _)| self.check(*punct)) else {
        return Ok(left);
      };
      let pos = self.bump().pos;
      let right = next(self)?;
      let base = depth.unwrap_or_else(|| left.depth());
      depth = Some(grow(base, right.depth(), pos)?);
      left = Expr::Binary {
        op: *op,
        left: Box::new(left),
        right: Box::new(right),
        pos,
      };
    }
  }

  fn equality(&mut self) -> ScriptResult<Expr> {
    self.binary(
      &[
        (Punct::EqEqEq, BinaryOp::Eq),
        (Punct::EqEq, BinaryOp::Eq),
        (Punct::NotEqEq, BinaryOp::NotEq),
        (Punct::NotEq, BinaryOp::NotEq),
      ],
      Self::relational,
    )
  }

  fn relational(&mut self) -> ScriptResult<Expr> {
    self.binary(
      &[
        (Punct::Lt, BinaryOp::Lt),
        (Punct::LtEq, BinaryOp::LtEq),
        (Punct::Gt, BinaryOp::Gt),
        (Punct::GtEq, BinaryOp::GtEq),
      ],
      Self::additive,
    )
  }

  fn additive(&mut self) -> ScriptResult<Expr> {
    self.binary(
      &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
      Self::multiplicative,
    )
  }

  fn multiplicative(&mut self) -> ScriptResult<Expr> {
    self.binary(
      &[
        (Punct::Star, BinaryOp::Mul),
        (Punct::Slash, BinaryOp::Div),
        (Punct::Percent, BinaryOp::Rem),
      ],
      Self::unary,
    )
  }

  fn unary(&mut self) -> ScriptResult<Expr> {
    let op = match &self.peek().kind {
      TokenKind::Punct(Punct::Bang) => UnaryOp::Not,
      TokenKind::Punct(Punct::Minus) => UnaryOp::Neg,
      TokenKind::Punct(Punct::Plus) => UnaryOp::Plus,
      TokenKind::Ident(name) if name == "typeof" => UnaryOp::TypeOf,
      _ => return self.postfix(),
    };
    let pos = self.bump().pos;
    let arg = Box::new(self.nested(Self::unary)?);
    Ok(Expr::Unary { op, arg, pos })
  }

  fn postfix(&mut self) -> ScriptResult<Expr> {
    let mut expr = self.primary()?;
    let mut depth = None;
    loop {
      let postfix = [Punct::Dot, Punct::QuestionDot, Punct::LBracket, Punct::LParen];
      if !postfix.iter().any(|punct| self.check(*punct)) {
        return Ok(expr);
      }
      let object_depth = depth.unwrap_or_else(|| expr.depth());
      let pos = self.pos();
      let (next, child_depth) = if self.eat(Punct::Dot) {
        let property = Property::Named(self.property_name()?);
        (member(expr, property, false, pos), 0)
      } else if self.eat(Punct::QuestionDot) {
        if self.check(Punct::LParen) {
          let args = self.arguments()?;
          let args_depth = deepest(&args);
          (call(expr, args, true, pos), args_depth)
        } else if self.eat(Punct::LBracket) {
          let index = self.nested(Self::expression)?;
          self.expect(Punct::RBracket)?;
          let index_depth = index.depth();
          (member(expr, Property::Computed(Box::new(index)), true, pos), index_depth)
        } else {
          let property = Property::Named(self.property_name()?);
          (member(expr, property, true, pos), 0)
        }
      } else if self.eat(Punct::LBracket) {
        let index = self.nested(Self::expression)?;
        self.expect(Punct::RBracket)?;
        let index_depth = index.depth();
        (member(expr, Property::Computed(Box::new(index)), false, pos), index_depth)
      } else if self.check(Punct::LParen) {
        let args = self.arguments()?;
        let args_depth = deepest(&args);
        (call(expr, args, false, pos), args_depth)
      } else {
        return Ok(expr);
      };
      depth = Some(grow(object_depth, child_depth, pos)?);
      expr = next;
    }
  }

  /// Property names may be reserved words (`a.default`, `x.if`).
  fn property_name(&mut self) -> ScriptResult<String> {
    match &self.peek().kind {
      TokenKind::Ident(name) => {
        let name = name.clone();
        self.bump();
        Ok(name)
      }
      _ => Err(self.unexpected("expected a property name")),
    }
  }

  fn arguments(&mut self) -> ScriptResult<Vec<Expr>> {
    self.nested(|p| {
      p.expect(Punct::LParen)?;
      let mut args = Vec::new();
      while !p.check(Punct::RParen) {
        args.push(p.assignment()?);
        if !p.eat(Punct::Comma) {
          break;
        }
      }
      p.expect(Punct::RParen)?;
      Ok(args)
    })
  }

  fn primary(&mut self) -> ScriptResult<Expr> {
    let token = self.peek().clone();
    match token.kind {
      TokenKind::Number(n) => {
        self.bump();
        Ok(Expr::Number(n))
      }
      TokenKind::String(s) => {
        self.bump();
        Ok(Expr::Str(s))
      }
      TokenKind::Template(chunks) => {
        self.bump();
        self.template(chunks)
      }
      TokenKind::Ident(name) => {
        let expr = match name.as_str() {
          "true" => Expr::Bool(true),
          "false" => Expr::Bool(false),
          "null" => Expr::Null,
          "undefined" => Expr::Undefined,
          other if is_reserved(other) => {
            return Err(ScriptError::syntax(format!("unsupported keyword '{other}'"), token.pos));
          }
          _ => Expr::Ident {
            name,
            pos: token.pos,
          },
        };
        self.bump();
        Ok(expr)
      }
      TokenKind::Punct(Punct::LParen) => self.nested(|p| {
        p.bump();
        let expr = p.expression()?;
        p.expect(Punct::RParen)?;
        Ok(expr)
      }),
      TokenKind::Punct(Punct::LBracket) => self.nested(Self::array),
      TokenKind::Punct(Punct::LBrace) => self.nested(Self::object),
      TokenKind::Punct(_) | TokenKind::Eof => Err(self.unexpected("expected an expression")),
    }
  }

  fn template(&mut self, chunks: Vec<TemplateChunk>) -> ScriptResult<Expr> {
    let mut parts = Vec::with_capacity(chunks.len());
    for chunk in chunks {
      match chunk {
        TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
        TemplateChunk::Expr(tokens) => {
          let mut inner = Parser::new(tokens, self.depth + 1);
          if inner.depth >= MAX_NESTING {
            return Err(ScriptError::syntax("nesting too deep", inner.pos()));
          }
          let expr = inner.expression()?;
          if !inner.at_eof() {
            return Err(inner.unexpected("expected '}'"));
          }
          parts.push(TemplatePart::Expr(expr));
        }
      }
    }
    Ok(Expr::Template(parts))
  }

  fn array(&mut self) -> ScriptResult<Expr> {
    self.expect(Punct::LBracket)?;
    let mut items = Vec::new();
    while !self.check(Punct::RBracket) {
      items.push(self.assignment()?);
      if !self.eat(Punct::Comma) {
        break;
      }
    }
    self.expect(Punct::RBracket)?;
    Ok(Expr::Array(items))
  }

  fn object(&mut self) -> ScriptResult<Expr> {
    self.expect(Punct::LBrace)?;
    let mut entries = Vec::new();
    while !self.check(Punct::RBrace) {
      let token = self.bump();
      let (key, shorthand_ok) = match token.kind {
        TokenKind::Ident(name) => {
          let ok = !is_reserved(&name);
          (name, ok)
        }
        TokenKind::String(s) => (s, false),
        TokenKind::Number(n) => (format_number(n), false),
        _ => return Err(ScriptError::syntax("expected a property key", token.pos)),
      };
      let value = if self.eat(Punct::Colon) {
        self.assignment()?
      } else if shorthand_ok && (self.check(Punct::Comma) || self.check(Punct::RBrace)) {
        Expr::Ident {
          name: key.clone(),
          pos: token.pos,
        }
      } else {
        return Err(self.unexpected("expected ':'"));
      };
      entries.push((key, value));
      if !self.eat(Punct::Comma) {
        break;
      }
    }
    self.expect(Punct::RBrace)?;
    Ok(Expr::Object(entries))
  }
}

/// Height of a node over a `left`-high and a `right`-high subtree.
fn grow(left: usize, right: usize, pos: Position) -> ScriptResult<usize> {
  let depth = left.max(right) + 1;
  if depth > MAX_EXPR_DEPTH {
    return Err(ScriptError::syntax("expression nested too deep", pos));
  }
  Ok(depth)
}

fn deepest(exprs: &[Expr]) -> usize {
  exprs.iter().map(Expr::depth).max().unwrap_or(0)
}

fn member(object: Expr, property: Property, optional: bool, pos: Position) -> Expr {
  Expr::Member {
    object: Box::new(object),
    property,
    optional,
    pos,
  }
}

fn call(callee: Expr, args: Vec<Expr>, optional: bool, pos: Position) -> Expr {
  Expr::Call {
    callee: Box::new(callee),
    args,
    optional,
    pos,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::script::ScriptErrorCode;
  use proptest::prelude::*;

  fn expr(source: &str) -> Expr {
    let program = parse_program(source).unwrap();
    match program.body.into_iter().next() {
      Some(Stmt::Expr(expr)) => expr,
      other => panic!("expected expression statement, got {other:?}"),
    }
  }

  fn syntax_error(source: &str) -> ScriptError {
    let err = parse_program(source).unwrap_err();
    assert_eq!(err.code, ScriptErrorCode::Syntax, "{source}");
    err
  }

  #[test]
  fn precedence_multiplication_binds_tighter() {
    let Expr::Binary { op, right, .. } = expr("1 + 2 * 3") else {
      panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
  }

  #[test]
  fn nullish_is_lowest_logical() {
    let Expr::Logical { op, .. } = expr("a || b ?? c") else {
      panic!("expected logical");
    };
    assert_eq!(op, LogicalOp::Nullish);
  }

  #[test]
  fn parenthesized_expression_is_not_arrow() {
    assert!(matches!(expr("(a + b) * 2"), Expr::Binary { op: BinaryOp::Mul, .. }));
  }

  #[test]
  fn arrow_forms() {
    let Expr::Arrow(f) = expr("(a, b) => a + b") else {
      panic!("expected arrow");
    };
    assert_eq!(f.params, vec!["a".to_owned(), "b".to_owned()]);
    assert!(matches!(f.body, FunctionBody::Expr(_)));

    let Expr::Arrow(f) = expr("x => { return x }") else {
      panic!("expected arrow");
    };
    assert!(matches!(f.body, FunctionBody::Block(_)));

    let Expr::Arrow(f) = expr("() => ({ a: 1 })") else {
      panic!("expected arrow");
    };
    assert!(f.params.is_empty());
    assert!(matches!(f.body, FunctionBody::Expr(Expr::Object(_))));
  }

  #[test]
  fn object_literal_keys() {
    let Expr::Call { args, .. } = expr(r#"f({ name, "size": 2, 3: x, default: 1 })"#) else {
      panic!("expected call");
    };
    let Expr::Object(entries) = &args[0] else {
      panic!("expected object");
    };
    let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["name", "size", "3", "default"]);
  }

  #[test]
  fn optional_chain_and_calls() {
    let Expr::Call { callee, optional, .. } = expr("a?.b?.()") else {
      panic!("expected call");
    };
    assert!(optional);
    assert!(matches!(*callee, Expr::Member { optional: true, .. }));
  }

  #[test]
  fn statements_and_asi() {
    let program = parse_program("const a = 1\nlet b = a\nif (a) { return b } else return 2").unwrap();
    assert_eq!(program.body.len(), 3);
    assert!(matches!(program.body[2], Stmt::If { alternate: Some(_), .. }));
  }

  #[test]
  fn leading_object_literal_is_an_expression() {
    assert!(matches!(expr(r#"{"@component": "Icon"}"#), Expr::Object(_)));
    let program = parse_program("{ a }").unwrap();
    assert!(matches!(program.body[0], Stmt::Block(_)));
  }

  #[test]
  fn template_substitutions_are_parsed() {
    let Expr::Template(parts) = expr("`${a + 1}%`") else {
      panic!("expected template");
    };
    assert!(matches!(parts[0], TemplatePart::Expr(Expr::Binary { .. })));
    assert_eq!(parts[1], TemplatePart::Text("%".into()));
  }

  #[test]
  fn rejects_invalid_programs() {
    syntax_error("a b");
    syntax_error("const = 1");
    syntax_error("const class = 1");
    syntax_error("while (true) {}");
    syntax_error("new Foo()");
    syntax_error("(a, a) => a");
    syntax_error("{ a: 1");
    syntax_error("`${1 2}`");
  }

  #[test]
  fn deep_nesting_is_rejected() {
    let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
    let err = syntax_error(&source);
    assert!(err.message.contains("nesting"));
  }

  #[test]
  fn long_operator_chains_are_rejected() {
    for source in [
      format!("1{}", "+1".repeat(5000)),
      format!("a{}", " || a".repeat(5000)),
      format!("a{}", ".b".repeat(5000)),
      format!("f{}", "()".repeat(5000)),
    ] {
      let err = syntax_error(&source);
      assert!(err.message.contains("nested too deep"), "{err}");
    }
  }

  #[test]
  fn chains_inside_parentheses_share_one_limit() {
    let inner = format!("1{}", "+1".repeat(200));
    let source = format!("({inner}){}", "+1".repeat(200));
    let err = syntax_error(&source);
    assert!(err.message.contains("nested too deep"));
  }

  #[test]
  fn ordinary_chains_parse() {
    assert!(parse_program(&format!("1{}", "+1".repeat(100))).is_ok());
    assert!(parse_program("a.b?.c[0](1).d ?? e || f && g").is_ok());
  }

  proptest! {
    #[test]
    fn parse_never_panics(source in "[a-z0-9 (){}\\[\\]=>+*?.:,;!`$\"-]{0,48}") {
      let _ = parse_program(&source);
    }
  }
}
