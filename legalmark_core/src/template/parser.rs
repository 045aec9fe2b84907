use std::fmt;

use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

use super::helpers::is_helper;
use super::lexer::LexError;
use super::lexer::SpannedToken;
use super::lexer::Token;
use super::lexer::tokenize_expression;
use crate::metadata::path_segments;

/// A reference to a value: a metadata path, a loop variable such as `this` or
/// `@index`, optionally prefixed by `../` to reach an enclosing loop scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathRef {
	pub parents: usize,
	pub segments: Vec<String>,
}

impl PathRef {
	pub fn new(path: &str, parents: usize) -> Self {
		Self {
			parents,
			segments: path_segments(path).map(str::to_string).collect(),
		}
	}
}

impl fmt::Display for PathRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", "../".repeat(self.parents), self.segments.join("."))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
	Literal(Value),
	Path(PathRef),
	Call {
		name: String,
		args: Vec<Expr>,
	},
	Ternary {
		condition: Box<Expr>,
		then: Box<Expr>,
		otherwise: Box<Expr>,
	},
}

/// The helper-call notations used by one expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStyles {
	/// `helper(arg, arg)`.
	pub legacy: bool,
	/// `helper arg arg`.
	pub modern: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpression {
	pub expr: Expr,
	pub styles: CallStyles,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
	#[error("unexpected character at offset {0}")]
	Lex(usize),
	#[error("unexpected `{0}`")]
	UnexpectedToken(String),
	#[error("expression ended early")]
	UnexpectedEnd,
	#[error("the expression is empty")]
	Empty,
}

impl From<LexError> for ExpressionError {
	fn from(error: LexError) -> Self {
		Self::Lex(error.0)
	}
}

/// Parse the inside of a `{{ … }}` expression.
///
/// ```text
/// expression := call ( "?" expression ":" expression )?
/// call       := NAME "(" ( expression ( "," expression )* )? ")"   legacy
///             | NAME atom+                                          modern
///             | atom
/// atom       := literal | "../"* PATH | "(" expression ")"
/// ```
///
/// Only known helper names start a call. A legacy call needs the `(` directly
/// after the helper name; with a space in between the parenthesis opens a
/// sub-expression.
pub fn parse_expression(source: &str) -> Result<ParsedExpression, ExpressionError> {
	let tokens = tokenize_expression(source)?;
	if tokens.is_empty() {
		return Err(ExpressionError::Empty);
	}

	let mut parser = ExpressionParser {
		tokens,
		cursor: 0,
		styles: CallStyles::default(),
	};
	let expr = parser.parse_ternary()?;
	if let Some(extra) = parser.peek() {
		return Err(ExpressionError::UnexpectedToken(extra.to_string()));
	}

	Ok(ParsedExpression {
		expr,
		styles: parser.styles,
	})
}

struct ExpressionParser {
	tokens: Vec<SpannedToken>,
	cursor: usize,
	styles: CallStyles,
}

impl ExpressionParser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.cursor).map(|spanned| &spanned.token)
	}

	fn peek_at(&self, offset: usize) -> Option<&SpannedToken> {
		self.tokens.get(self.cursor + offset)
	}

	fn next(&mut self) -> Result<Token, ExpressionError> {
		let token = self
			.tokens
			.get(self.cursor)
			.map(|spanned| spanned.token.clone())
			.ok_or(ExpressionError::UnexpectedEnd)?;
		self.cursor += 1;
		Ok(token)
	}

	fn eat(&mut self, expected: &Token) -> bool {
		if self.peek() == Some(expected) {
			self.cursor += 1;
			return true;
		}
		false
	}

	fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
		match self.next()? {
			token if &token == expected => Ok(()),
			token => Err(ExpressionError::UnexpectedToken(token.to_string())),
		}
	}

	fn parse_ternary(&mut self) -> Result<Expr, ExpressionError> {
		let condition = self.parse_call()?;
		if !self.eat(&Token::Question) {
			return Ok(condition);
		}

		let then = self.parse_ternary()?;
		self.expect(&Token::Colon)?;
		let otherwise = self.parse_ternary()?;
		Ok(Expr::Ternary {
			condition: Box::new(condition),
			then: Box::new(then),
			otherwise: Box::new(otherwise),
		})
	}

	fn parse_call(&mut self) -> Result<Expr, ExpressionError> {
		let Some(SpannedToken {
			token: Token::Path(name),
			span,
		}) = self.peek_at(0)
		else {
			return self.parse_atom();
		};
		if !is_helper(name) {
			return self.parse_atom();
		}
		let name = name.clone();
		let name_end = span.end;

		match self.peek_at(1) {
			Some(next) if next.token == Token::ParenOpen && next.span.start == name_end => {
				self.cursor += 2;
				self.styles.legacy = true;
				let args = self.parse_legacy_arguments()?;
				Ok(Expr::Call { name, args })
			}
			Some(next) if starts_atom(&next.token) => {
				self.cursor += 1;
				self.styles.modern = true;
				let mut args = Vec::new();
				while self.peek().is_some_and(starts_atom) {
					args.push(self.parse_atom()?);
				}
				Ok(Expr::Call { name, args })
			}
			_ => self.parse_atom(),
		}
	}

	/// Arguments after the opening parenthesis, through the closing one.
	fn parse_legacy_arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
		let mut args = Vec::new();
		if self.eat(&Token::ParenClose) {
			return Ok(args);
		}

		loop {
			args.push(self.parse_ternary()?);
			match self.next()? {
				Token::Comma => {}
				Token::ParenClose => return Ok(args),
				token => return Err(ExpressionError::UnexpectedToken(token.to_string())),
			}
		}
	}

	fn parse_atom(&mut self) -> Result<Expr, ExpressionError> {
		match self.next()? {
			Token::String(value, _) => Ok(Expr::Literal(Value::String(value))),
			Token::Int(value) => Ok(Expr::Literal(Value::from(value))),
			Token::Float(value) => Ok(Expr::Literal(Number::from_f64(value).map_or(Value::Null, Value::Number))),
			Token::Bool(value) => Ok(Expr::Literal(Value::Bool(value))),
			Token::Null => Ok(Expr::Literal(Value::Null)),
			Token::Path(path) => Ok(Expr::Path(PathRef::new(&path, 0))),
			Token::Parent => {
				let mut parents = 1;
				while self.eat(&Token::Parent) {
					parents += 1;
				}
				match self.next()? {
					Token::Path(path) => Ok(Expr::Path(PathRef::new(&path, parents))),
					token => Err(ExpressionError::UnexpectedToken(token.to_string())),
				}
			}
			Token::ParenOpen => {
				let inner = self.parse_ternary()?;
				self.expect(&Token::ParenClose)?;
				Ok(inner)
			}
			token => Err(ExpressionError::UnexpectedToken(token.to_string())),
		}
	}
}

fn starts_atom(token: &Token) -> bool {
	matches!(
		token,
		Token::String(..)
			| Token::Int(_)
			| Token::Float(_)
			| Token::Bool(_)
			| Token::Null
			| Token::Path(_)
			| Token::Parent
			| Token::ParenOpen
	)
}
