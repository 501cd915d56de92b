/*! Tokenizer. Template literal substitutions are lexed recursively. */

#![allow(missing_docs)]

use super::{Position, ScriptError, ScriptResult};

/// Deepest allowed nesting of template literals inside substitutions.
const MAX_TEMPLATE_NESTING: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
  LParen,
  RParen,
  LBracket,
  RBracket,
  LBrace,
  RBrace,
  Comma,
  Semi,
  Colon,
  Dot,
  QuestionDot,
  Question,
  QuestionQuestion,
  Arrow,
  Plus,
  Minus,
  Star,
  Slash,
  Percent,
  Bang,
  Assign,
  EqEq,
  EqEqEq,
  NotEq,
  NotEqEq,
  Lt,
  LtEq,
  Gt,
  GtEq,
  AndAnd,
  OrOr,
}

impl Punct {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::LParen => "(",
      Self::RParen => ")",
      Self::LBracket => "[",
      Self::RBracket => "]",
      Self::LBrace => "{",
      Self::RBrace => "}",
      Self::Comma => ",",
      Self::Semi => ";",
      Self::Colon => ":",
      Self::Dot => ".",
      Self::QuestionDot => "?.",
      Self::Question => "?",
      Self::QuestionQuestion => "??",
      Self::Arrow => "=>",
      Self::Plus => "+",
      Self::Minus => "-",
      Self::Star => "*",
      Self::Slash => "/",
      Self::Percent => "%",
      Self::Bang => "!",
      Self::Assign => "=",
      Self::EqEq => "==",
      Self::EqEqEq => "===",
      Self::NotEq => "!=",
      Self::NotEqEq => "!==",
      Self::Lt => "<",
      Self::LtEq => "<=",
      Self::Gt => ">",
      Self::GtEq => ">=",
      Self::AndAnd => "&&",
      Self::OrOr => "||",
    }
  }
}

/// Piece of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
  Text(String),
  /// Tokens of one `${...}` substitution, terminated by `Eof`.
  Expr(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
  Number(f64),
  String(String),
  Template(Vec<TemplateChunk>),
  Ident(String),
  Punct(Punct),
  Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  pub pos: Position,
}

/// Tokenize `source`. The last token is always `Eof`.
pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
  let mut lexer = Lexer::new(source);
  let mut tokens = Vec::new();
  loop {
    let token = lexer.next_token()?;
    let done = token.kind == TokenKind::Eof;
    tokens.push(token);
    if done {
      return Ok(tokens);
    }
  }
}

struct Lexer {
  chars: Vec<char>,
  idx: usize,
  pos: Position,
  templates: usize,
}

impl Lexer {
  fn new(source: &str) -> Self {
    Self {
      chars: source.chars().collect(),
      idx: 0,
      pos: Position::start(),
      templates: 0,
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.idx).copied()
  }

  fn peek_at(&self, ahead: usize) -> Option<char> {
    self.chars.get(self.idx + ahead).copied()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.idx += 1;
    self.pos.offset += c.len_utf8();
    if c == '\n' {
      self.pos.line += 1;
      self.pos.column = 1;
    } else {
      self.pos.column += 1;
    }
    Some(c)
  }

  fn eat(&mut self, expected: char) -> bool {
    if self.peek() == Some(expected) {
      self.bump();
      true
    } else {
      false
    }
  }

  fn skip_trivia(&mut self) -> ScriptResult<()> {
    loop {
      match (self.peek(), self.peek_at(1)) {
        (Some(c), _) if c.is_whitespace() => {
          self.bump();
        }
        (Some('/'), Some('/')) => {
          while self.peek().is_some_and(|c| c != '\n') {
            self.bump();
          }
        }
        (Some('/'), Some('*')) => {
          let start = self.pos;
          self.bump();
          self.bump();
          loop {
            match self.bump() {
              Some('*') if self.peek() == Some('/') => {
                self.bump();
                break;
              }
              Some(_) => {}
              None => return Err(ScriptError::syntax("unterminated comment", start)),
            }
          }
        }
        _ => return Ok(()),
      }
    }
  }

  fn next_token(&mut self) -> ScriptResult<Token> {
    self.skip_trivia()?;
    let pos = self.pos;
    let Some(c) = self.peek() else {
      return Ok(Token {
        kind: TokenKind::Eof,
        pos,
      });
    };

    let kind = if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
      TokenKind::Number(self.number(pos)?)
    } else if c == '"' || c == '\'' {
      self.bump();
      TokenKind::String(self.string(c, pos)?)
    } else if c == '`' {
      self.bump();
      TokenKind::Template(self.template(pos)?)
    } else if is_ident_start(c) {
      let mut name = String::new();
      while let Some(c) = self.peek().filter(|c| is_ident_continue(*c)) {
        name.push(c);
        self.bump();
      }
      TokenKind::Ident(name)
    } else {
      TokenKind::Punct(self.punct(pos)?)
    };
    Ok(Token { kind, pos })
  }

  fn punct(&mut self, pos: Position) -> ScriptResult<Punct> {
    let Some(c) = self.bump() else {
      return Err(ScriptError::syntax("unexpected end of input", pos));
    };
    let punct = match c {
      '(' => Punct::LParen,
      ')' => Punct::RParen,
      '[' => Punct::LBracket,
      ']' => Punct::RBracket,
      '{' => Punct::LBrace,
      '}' => Punct::RBrace,
      ',' => Punct::Comma,
      ';' => Punct::Semi,
      ':' => Punct::Colon,
      '.' => Punct::Dot,
      '+' => Punct::Plus,
      '-' => Punct::Minus,
      '*' => Punct::Star,
      '/' => Punct::Slash,
      '%' => Punct::Percent,
      '?' => {
        if self.eat('?') {
          Punct::QuestionQuestion
        } else if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
          self.bump();
          Punct::QuestionDot
        } else {
          Punct::Question
        }
      }
      '=' => {
        if self.eat('>') {
          Punct::Arrow
        } else if self.eat('=') {
          if self.eat('=') {
            Punct::EqEqEq
          } else {
            Punct::EqEq
          }
        } else {
          Punct::Assign
        }
      }
      '!' => {
        if self.eat('=') {
          if self.eat('=') {
            Punct::NotEqEq
          } else {
            Punct::NotEq
          }
        } else {
          Punct::Bang
        }
      }
      '<' => {
        if self.eat('=') {
          Punct::LtEq
        } else {
          Punct::Lt
        }
      }
      '>' => {
        if self.eat('=') {
          Punct::GtEq
        } else {
          Punct::Gt
        }
      }
      '&' if self.eat('&') => Punct::AndAnd,
      '|' if self.eat('|') => Punct::OrOr,
      other => return Err(ScriptError::syntax(format!("unexpected character '{other}'"), pos)),
    };
    Ok(punct)
  }

  #[allow(clippy::cast_precision_loss)]
  fn number(&mut self, pos: Position) -> ScriptResult<f64> {
    if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
      self.bump();
      self.bump();
      let mut digits = String::new();
      while let Some(c) = self.peek().filter(char::is_ascii_hexdigit) {
        digits.push(c);
        self.bump();
      }
      return u64::from_str_radix(&digits, 16)
        .map(|n| n as f64)
        .map_err(|_| ScriptError::syntax("invalid hex literal", pos));
    }

    let mut text = String::new();
    let digits = |lexer: &mut Self, text: &mut String| {
      while let Some(c) = lexer.peek().filter(|c| c.is_ascii_digit() || *c == '_') {
        if c != '_' {
          text.push(c);
        }
        lexer.bump();
      }
    };
    digits(self, &mut text);
    if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
      self.bump();
      text.push('.');
      digits(self, &mut text);
    }
    if matches!(self.peek(), Some('e' | 'E')) {
      let sign = self.peek_at(1).filter(|c| *c == '+' || *c == '-');
      let exponent_at = if sign.is_some() { 2 } else { 1 };
      if self.peek_at(exponent_at).is_some_and(|c| c.is_ascii_digit()) {
        text.push('e');
        self.bump();
        if let Some(sign) = sign {
          text.push(sign);
          self.bump();
        }
        digits(self, &mut text);
      }
    }
    if self.peek().is_some_and(is_ident_start) {
      return Err(ScriptError::syntax("identifier directly after number", self.pos));
    }
    text
      .parse::<f64>()
      .map_err(|_| ScriptError::syntax(format!("invalid number '{text}'"), pos))
  }

  fn escape(&mut self, start: Position) -> ScriptResult<char> {
    let Some(c) = self.bump() else {
      return Err(ScriptError::syntax("unterminated escape", start));
    };
    let decoded = match c {
      'n' => '\n',
      't' => '\t',
      'r' => '\r',
      '0' => '\0',
      'b' => '\u{8}',
      'f' => '\u{c}',
      'v' => '\u{b}',
      'u' => {
        let mut hex = String::new();
        if self.eat('{') {
          while let Some(c) = self.bump() {
            if c == '}' {
              break;
            }
            hex.push(c);
          }
        } else {
          for _ in 0..4 {
            if let Some(c) = self.bump() {
              hex.push(c);
            }
          }
        }
        u32::from_str_radix(&hex, 16)
          .ok()
          .and_then(char::from_u32)
          .ok_or_else(|| ScriptError::syntax(format!("invalid unicode escape '{hex}'"), start))?
      }
      other => other,
    };
    Ok(decoded)
  }

  fn string(&mut self, quote: char, start: Position) -> ScriptResult<String> {
    let mut out = String::new();
    loop {
      match self.bump() {
        Some(c) if c == quote => return Ok(out),
        Some('\\') => out.push(self.escape(start)?),
        Some('\n') | None => return Err(ScriptError::syntax("unterminated string", start)),
        Some(c) => out.push(c),
      }
    }
  }

  fn template(&mut self, start: Position) -> ScriptResult<Vec<TemplateChunk>> {
    if self.templates >= MAX_TEMPLATE_NESTING {
      return Err(ScriptError::syntax("template literals nested too deep", start));
    }
    self.templates += 1;
    let chunks = self.template_chunks(start);
    self.templates -= 1;
    chunks
  }

  fn template_chunks(&mut self, start: Position) -> ScriptResult<Vec<TemplateChunk>> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    loop {
      match self.bump() {
        Some('`') => break,
        Some('\\') => text.push(self.escape(start)?),
        Some('$') if self.peek() == Some('{') => {
          self.bump();
          if !text.is_empty() {
            chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
          }
          chunks.push(TemplateChunk::Expr(self.substitution(start)?));
        }
        Some(c) => text.push(c),
        None => return Err(ScriptError::syntax("unterminated template literal", start)),
      }
    }
    if !text.is_empty() {
      chunks.push(TemplateChunk::Text(text));
    }
    Ok(chunks)
  }

  /// Tokens up to the `}` closing a `${`. The brace itself is consumed.
  fn substitution(&mut self, start: Position) -> ScriptResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    loop {
      let token = self.next_token()?;
      match token.kind {
        TokenKind::Eof => return Err(ScriptError::syntax("unterminated template substitution", start)),
        TokenKind::Punct(Punct::LBrace) => depth += 1,
        TokenKind::Punct(Punct::RBrace) if depth == 0 => {
          tokens.push(Token {
            kind: TokenKind::Eof,
            pos: token.pos,
          });
          return Ok(tokens);
        }
        TokenKind::Punct(Punct::RBrace) => depth -= 1,
        _ => {}
      }
      tokens.push(token);
    }
  }
}

fn is_ident_start(c: char) -> bool {
  c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
  c.is_alphanumeric() || c == '_' || c == '$'
}
