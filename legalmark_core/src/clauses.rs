//! Optional clauses: `[guarded text]{condition}`.
//!
//! The guarded text is kept when the condition holds and removed otherwise.
//! Conditions are a flat chain of leaves joined by `AND` / `OR`, evaluated
//! strictly left to right without precedence: `a OR b AND c` means
//! `(a OR b) AND c`.

use float_cmp::approx_eq;
use logos::Logos;
use serde_json::Value;
use snailquote::unescape;

use crate::metadata::Metadata;
use crate::metadata::display_value;
use crate::metadata::is_truthy;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum ConditionToken {
	#[token("AND")]
	#[token("and")]
	#[token("&&")]
	And,
	#[token("OR")]
	#[token("or")]
	#[token("||")]
	Or,
	#[token("=")]
	#[token("==")]
	Equals,
	#[token("!=")]
	NotEquals,
	#[regex(r#""([^"\\]|\\.)*""#)]
	#[regex(r"'([^'\\]|\\.)*'")]
	Quoted,
	#[regex(r"-?[0-9]+(\.[0-9]+)?")]
	Number,
	#[regex(r"[A-Za-z_@][A-Za-z0-9_\-]*(\.[A-Za-z0-9_\-]+)*")]
	Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
	And,
	Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
	Equal,
	NotEqual,
}

/// The right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
	Text(String),
	Number(f64),
	Bool(bool),
	Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
	/// A bare field reference, tested for truthiness.
	Field(String),
	Compare {
		field: String,
		comparison: Comparison,
		operand: Operand,
	},
	/// A leaf that could not be parsed. Always false.
	Malformed(String),
}

/// A parsed clause condition. An empty condition always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
	pub first: Option<Leaf>,
	pub rest: Vec<(Connective, Leaf)>,
}

impl Condition {
	pub fn parse(source: &str) -> Self {
		let mut tokens: Vec<(Result<ConditionToken, ()>, &str)> = Vec::new();
		let mut lexer = ConditionToken::lexer(source);
		while let Some(result) = lexer.next() {
			tokens.push((result, lexer.slice()));
		}

		if tokens.is_empty() {
			return Self {
				first: None,
				rest: Vec::new(),
			};
		}

		// Split the token stream on connectives; each run is one leaf.
		let mut leaves: Vec<Leaf> = Vec::new();
		let mut connectives: Vec<Connective> = Vec::new();
		let mut run: Vec<(Result<ConditionToken, ()>, &str)> = Vec::new();
		for (token, slice) in tokens {
			match token {
				Ok(ConditionToken::And) => {
					leaves.push(finish_run(&run));
					run.clear();
					connectives.push(Connective::And);
				}
				Ok(ConditionToken::Or) => {
					leaves.push(finish_run(&run));
					run.clear();
					connectives.push(Connective::Or);
				}
				token => run.push((token, slice)),
			}
		}
		leaves.push(finish_run(&run));

		let mut leaves = leaves.into_iter();
		let first = leaves.next();
		Self {
			first,
			rest: connectives.into_iter().zip(leaves).collect(),
		}
	}

	pub fn evaluate(&self, metadata: &Metadata) -> bool {
		let Some(first) = &self.first else {
			return true;
		};

		let mut result = first.evaluate(metadata);
		for (connective, leaf) in &self.rest {
			let value = leaf.evaluate(metadata);
			result = match connective {
				Connective::And => result && value,
				Connective::Or => result || value,
			};
		}
		result
	}
}

/// A run containing text the lexer rejects is malformed on its own; the
/// other leaves of the chain still count.
fn finish_run(run: &[(Result<ConditionToken, ()>, &str)]) -> Leaf {
	let tokens: Option<Vec<(ConditionToken, &str)>> = run
		.iter()
		.map(|(token, slice)| token.clone().ok().map(|token| (token, *slice)))
		.collect();

	match tokens {
		Some(tokens) => parse_leaf(&tokens),
		None => {
			let leaf = run.iter().map(|(_, slice)| *slice).collect::<Vec<_>>().join(" ");
			tracing::warn!(leaf, "unreadable clause condition evaluates to false");
			Leaf::Malformed(leaf)
		}
	}
}

fn parse_leaf(tokens: &[(ConditionToken, &str)]) -> Leaf {
	let describe = || {
		tokens
			.iter()
			.map(|(_, slice)| *slice)
			.collect::<Vec<_>>()
			.join(" ")
	};

	match tokens {
		[(ConditionToken::Word, field)] => Leaf::Field((*field).to_string()),
		[(ConditionToken::Word, field), (op, _), (operand_token, operand)]
			if matches!(op, ConditionToken::Equals | ConditionToken::NotEquals) =>
		{
			let Some(operand) = parse_operand(operand_token, operand) else {
				return Leaf::Malformed(describe());
			};
			Leaf::Compare {
				field: (*field).to_string(),
				comparison: if *op == ConditionToken::Equals {
					Comparison::Equal
				} else {
					Comparison::NotEqual
				},
				operand,
			}
		}
		_ => {
			tracing::warn!(leaf = %describe(), "malformed clause condition evaluates to false");
			Leaf::Malformed(describe())
		}
	}
}

fn parse_operand(token: &ConditionToken, slice: &str) -> Option<Operand> {
	match token {
		ConditionToken::Quoted => {
			let inner = &slice[1..slice.len() - 1];
			let text = if inner.contains('\\') {
				unescape(inner).ok()?
			} else {
				inner.to_string()
			};
			Some(Operand::Text(text))
		}
		ConditionToken::Number => slice.parse().ok().map(Operand::Number),
		ConditionToken::Word => {
			Some(match slice {
				"true" => Operand::Bool(true),
				"false" => Operand::Bool(false),
				"null" => Operand::Null,
				_ => Operand::Text(slice.to_string()),
			})
		}
		_ => None,
	}
}

impl Leaf {
	pub fn evaluate(&self, metadata: &Metadata) -> bool {
		match self {
			Self::Field(field) => is_truthy(metadata.lookup(field)),
			Self::Compare {
				field,
				comparison,
				operand,
			} => {
				let equal = loosely_equal(metadata.lookup(field), operand);
				match comparison {
					Comparison::Equal => equal,
					Comparison::NotEqual => !equal,
				}
			}
			Self::Malformed(_) => false,
		}
	}
}

/// Compare a metadata value with a literal operand, coercing between text,
/// numbers and booleans.
fn loosely_equal(value: Option<&Value>, operand: &Operand) -> bool {
	let Some(value) = value else {
		return matches!(operand, Operand::Null);
	};

	match operand {
		Operand::Null => value.is_null(),
		Operand::Bool(expected) => {
			match value {
				Value::Bool(actual) => actual == expected,
				Value::String(text) => text == &expected.to_string(),
				_ => false,
			}
		}
		Operand::Number(expected) => {
			let actual = match value {
				Value::Number(number) => number.as_f64(),
				Value::String(text) => text.trim().parse::<f64>().ok(),
				_ => None,
			};
			actual.is_some_and(|actual| approx_eq!(f64, actual, *expected, ulps = 2))
		}
		Operand::Text(expected) => display_value(value).is_some_and(|text| &text == expected),
	}
}

/// Resolve every optional clause in `content`.
pub fn process_clauses(content: &str, metadata: &Metadata) -> String {
	let mut output = String::with_capacity(content.len());
	let mut rest = content;

	while let Some(open) = rest.find('[') {
		output.push_str(&rest[..open]);
		let candidate = &rest[open..];

		match find_clause(candidate) {
			Some(span) => {
				let condition = Condition::parse(span.condition);
				if condition.evaluate(metadata) {
					output.push_str(&process_clauses(span.text, metadata));
				} else {
					tracing::debug!(condition = span.condition, "optional clause excluded");
				}
				rest = &candidate[span.len..];
			}
			None => {
				output.push('[');
				rest = &candidate[1..];
			}
		}
	}
	output.push_str(rest);

	output
}

struct ClauseSpan<'a> {
	text: &'a str,
	condition: &'a str,
	/// Byte length of the whole `[...]{...}` span.
	len: usize,
}

/// Match a clause starting at the `[` that begins `source`. Brackets inside
/// the guarded text nest; the condition may not contain braces.
fn find_clause(source: &str) -> Option<ClauseSpan<'_>> {
	let mut depth = 0usize;
	let mut close = None;
	for (index, byte) in source.bytes().enumerate() {
		match byte {
			b'[' => depth += 1,
			b']' => {
				depth -= 1;
				if depth == 0 {
					close = Some(index);
					break;
				}
			}
			_ => {}
		}
	}

	let close = close?;
	let after = &source[close + 1..];
	if !after.starts_with('{') || after.starts_with("{{") {
		return None;
	}

	let end = after.find(['}', '\n', '['])?;
	if after.as_bytes()[end] != b'}' {
		return None;
	}

	Some(ClauseSpan {
		text: &source[1..close],
		condition: &after[1..end],
		len: close + 1 + end + 1,
	})
}
