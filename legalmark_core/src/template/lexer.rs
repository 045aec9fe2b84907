use std::fmt;
use std::ops::Range;

use logos::Logos;
use snailquote::unescape;

/// Raw tokens produced by logos for the inside of a `{{ … }}` expression.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
	#[token("(")]
	ParenOpen,
	#[token(")")]
	ParenClose,
	#[token(",")]
	Comma,
	#[token("?")]
	Question,
	#[token(":")]
	Colon,
	#[token("../")]
	Parent,
	#[regex(r#""([^"\\]|\\.)*""#)]
	DoubleQuoted,
	#[regex(r"'([^'\\]|\\.)*'")]
	SingleQuoted,
	#[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
	Number,
	#[regex(r"[A-Za-z_@$][A-Za-z0-9_\-$]*(\.[A-Za-z0-9_\-$]+)*")]
	Path,
}

/// A processed expression token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
	ParenOpen,
	ParenClose,
	Comma,
	Question,
	Colon,
	/// `../`, moving one loop scope outwards.
	Parent,
	/// A string literal with escapes resolved and the delimiter it used.
	String(String, u8),
	Int(i64),
	Float(f64),
	Bool(bool),
	Null,
	/// A dotted name: a field path, a loop variable or a helper name.
	Path(String),
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ParenOpen => write!(f, "("),
			Self::ParenClose => write!(f, ")"),
			Self::Comma => write!(f, ","),
			Self::Question => write!(f, "?"),
			Self::Colon => write!(f, ":"),
			Self::Parent => write!(f, "../"),
			Self::String(value, delimiter) => {
				let delimiter = char::from(*delimiter);
				write!(f, "{delimiter}{value}{delimiter}")
			}
			Self::Int(value) => write!(f, "{value}"),
			Self::Float(value) => write!(f, "{value}"),
			Self::Bool(value) => write!(f, "{value}"),
			Self::Null => write!(f, "null"),
			Self::Path(path) => write!(f, "{path}"),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
	pub token: Token,
	pub span: Range<usize>,
}

/// The byte offset of the first character that could not be tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexError(pub usize);

/// Tokenize the inside of an expression.
pub fn tokenize_expression(source: &str) -> Result<Vec<SpannedToken>, LexError> {
	let mut tokens = Vec::new();
	let mut lexer = RawToken::lexer(source);

	while let Some(result) = lexer.next() {
		let span = lexer.span();
		let slice = lexer.slice();
		let Ok(raw) = result else {
			return Err(LexError(span.start));
		};

		let token = match raw {
			RawToken::ParenOpen => Token::ParenOpen,
			RawToken::ParenClose => Token::ParenClose,
			RawToken::Comma => Token::Comma,
			RawToken::Question => Token::Question,
			RawToken::Colon => Token::Colon,
			RawToken::Parent => Token::Parent,
			RawToken::DoubleQuoted => process_string(slice, b'"').ok_or(LexError(span.start))?,
			RawToken::SingleQuoted => process_string(slice, b'\'').ok_or(LexError(span.start))?,
			RawToken::Number => process_number(slice).ok_or(LexError(span.start))?,
			RawToken::Path => {
				match slice {
					"true" => Token::Bool(true),
					"false" => Token::Bool(false),
					"null" | "undefined" => Token::Null,
					_ => Token::Path(slice.to_string()),
				}
			}
		};
		tokens.push(SpannedToken { token, span });
	}

	Ok(tokens)
}

/// Strip the quotes and resolve escapes when there are any.
fn process_string(slice: &str, delimiter: u8) -> Option<Token> {
	let inner = &slice[1..slice.len() - 1];
	let value = if inner.contains('\\') {
		unescape(inner).ok()?
	} else {
		inner.to_string()
	};
	Some(Token::String(value, delimiter))
}

fn process_number(slice: &str) -> Option<Token> {
	let is_float = slice.contains('.') || slice.contains('e') || slice.contains('E');
	if is_float {
		slice.parse::<f64>().ok().map(Token::Float)
	} else {
		slice.parse::<i64>().ok().map(Token::Int)
	}
}
