use std::fmt;

use crate::LegalError;
use crate::LegalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
	Each,
	If,
	Unless,
}

impl BlockKind {
	fn from_name(name: &str) -> Option<Self> {
		match name {
			"each" => Some(Self::Each),
			"if" => Some(Self::If),
			"unless" => Some(Self::Unless),
			_ => None,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::Each => "each",
			Self::If => "if",
			Self::Unless => "unless",
		}
	}
}

impl fmt::Display for BlockKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// What a single `{{ … }}` tag does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag<'a> {
	Open { kind: BlockKind, argument: &'a str },
	Else,
	Close(&'a str),
	Comment,
	Expression(&'a str),
}

/// Classify a tag from its full `{{ … }}` text.
pub fn classify_tag(raw: &str) -> Tag<'_> {
	let inner = raw
		.strip_prefix("{{")
		.and_then(|rest| rest.strip_suffix("}}"))
		.unwrap_or(raw)
		.trim();

	if inner.starts_with('!') {
		return Tag::Comment;
	}
	if inner == "else" {
		return Tag::Else;
	}
	if let Some(name) = inner.strip_prefix('/') {
		return Tag::Close(name.trim());
	}
	if let Some(opening) = inner.strip_prefix('#') {
		let (name, argument) = opening
			.split_once(char::is_whitespace)
			.unwrap_or((opening, ""));
		if let Some(kind) = BlockKind::from_name(name) {
			return Tag::Open {
				kind,
				argument: argument.trim(),
			};
		}
	}
	Tag::Expression(inner)
}

/// Split `content` into alternating plain and `{{ … }}` segments. The flag is
/// true for tag segments. An unterminated `{{` is plain text.
pub fn split_expressions(content: &str) -> Vec<(&str, bool)> {
	let mut segments = Vec::new();
	let mut rest = content;

	while let Some(open) = rest.find("{{") {
		let Some(close) = rest[open + 2..].find("}}") else {
			break;
		};
		let end = open + 2 + close + 2;
		if open > 0 {
			segments.push((&rest[..open], false));
		}
		segments.push((&rest[open..end], true));
		rest = &rest[end..];
	}
	if !rest.is_empty() {
		segments.push((rest, false));
	}

	segments
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
	Text(&'a str),
	/// `raw` is the whole tag, `source` the expression inside it.
	Expression { raw: &'a str, source: &'a str },
	Block(Block<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<'a> {
	pub kind: BlockKind,
	pub argument: &'a str,
	pub opening: &'a str,
	pub body: Vec<Node<'a>>,
	/// Nodes after `{{else}}`.
	pub otherwise: Vec<Node<'a>>,
}

struct OpenBlock<'a> {
	block: Block<'a>,
	in_else: bool,
}

impl<'a> OpenBlock<'a> {
	fn push(&mut self, node: Node<'a>) {
		if self.in_else {
			self.block.otherwise.push(node);
		} else {
			self.block.body.push(node);
		}
	}
}

fn push_node<'a>(root: &mut Vec<Node<'a>>, stack: &mut [OpenBlock<'a>], node: Node<'a>) {
	match stack.last_mut() {
		Some(open) => open.push(node),
		None => root.push(node),
	}
}

/// Build the block tree for `content`. Comments are dropped. A closing tag or
/// `{{else}}` outside any block is kept as text.
pub fn parse_template(content: &str) -> LegalResult<Vec<Node<'_>>> {
	let mut root: Vec<Node<'_>> = Vec::new();
	let mut stack: Vec<OpenBlock<'_>> = Vec::new();

	for (segment, is_tag) in split_expressions(content) {
		if !is_tag {
			push_node(&mut root, &mut stack, Node::Text(segment));
			continue;
		}

		match classify_tag(segment) {
			Tag::Comment => {}
			Tag::Expression(source) => {
				push_node(&mut root, &mut stack, Node::Expression {
					raw: segment,
					source,
				});
			}
			Tag::Open { kind, argument } => {
				stack.push(OpenBlock {
					block: Block {
						kind,
						argument,
						opening: segment,
						body: Vec::new(),
						otherwise: Vec::new(),
					},
					in_else: false,
				});
			}
			Tag::Else => {
				match stack.last_mut() {
					Some(open) if !open.in_else => open.in_else = true,
					_ => push_node(&mut root, &mut stack, Node::Text(segment)),
				}
			}
			Tag::Close(name) => {
				let Some(open) = stack.pop() else {
					tracing::warn!(tag = segment, "closing tag without an open block");
					root.push(Node::Text(segment));
					continue;
				};
				if open.block.kind.name() != name {
					return Err(LegalError::MismatchedBlock {
						expected: open.block.kind.to_string(),
						found: segment.to_string(),
					});
				}
				push_node(&mut root, &mut stack, Node::Block(open.block));
			}
		}
	}

	if let Some(open) = stack.pop() {
		return Err(LegalError::UnclosedBlock {
			kind: open.block.kind.to_string(),
			opening: open.block.opening.to_string(),
		});
	}

	Ok(root)
}
