//! The `{{ … }}` template language.
//!
//! Two pipeline stages share this module. [`expand_blocks`] renders the
//! `{{#each}}`, `{{#if}}` and `{{#unless}}` blocks together with every
//! expression inside them. [`render_expressions`] then evaluates the
//! remaining top-level expressions.
//!
//! Helpers can be called as `helper(a, b)` (legacy) or `helper a b`; a single
//! document must stick to one notation, see [`detect_helper_syntax`].

mod blocks;
mod engine;
mod helpers;
mod lexer;
mod parser;

use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

pub use self::blocks::BlockKind;
pub use self::blocks::Node;
pub use self::blocks::Tag;
pub use self::blocks::classify_tag;
pub use self::blocks::parse_template;
pub(crate) use self::blocks::split_expressions;
pub use self::engine::MAX_RESOLVE_DEPTH;
use self::engine::Renderer;
pub use self::helpers::HELPER_NAMES;
pub use self::helpers::HelperContext;
pub use self::helpers::HelperError;
pub use self::helpers::call_helper;
pub use self::helpers::number_to_words;
pub use self::lexer::Token;
pub use self::lexer::tokenize_expression;
pub use self::parser::CallStyles;
pub use self::parser::Expr;
pub use self::parser::ExpressionError;
pub use self::parser::PathRef;
pub use self::parser::parse_expression;
use crate::LegalError;
use crate::LegalResult;
use crate::dates::Locale;
use crate::metadata::Metadata;

/// Default budget for evaluating one document's templates.
pub const DEFAULT_TEMPLATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one template pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
	pub today: NaiveDate,
	pub locale: Locale,
	pub date_format: String,
	pub track_fields: bool,
	pub timeout: Duration,
}

impl TemplateContext {
	fn helpers(&self) -> HelperContext {
		HelperContext {
			today: self.today,
			locale: self.locale,
			date_format: self.date_format.clone(),
		}
	}
}

/// The helper-call notation a document uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HelperSyntax {
	/// No helper calls at all.
	#[default]
	None,
	/// `helper(a, b)`.
	Legacy,
	/// `helper a b`.
	Modern,
}

/// Find the helper notation used by `content`. Mixing both notations in one
/// document is an error.
pub fn detect_helper_syntax(content: &str) -> LegalResult<HelperSyntax> {
	let mut legacy: Option<&str> = None;
	let mut modern: Option<&str> = None;

	for (segment, is_tag) in split_expressions(content) {
		if !is_tag {
			continue;
		}
		let source = match classify_tag(segment) {
			Tag::Expression(source) => source,
			Tag::Open { argument, .. } => argument,
			_ => continue,
		};
		let Ok(parsed) = parse_expression(source) else {
			continue;
		};
		if parsed.styles.legacy {
			legacy.get_or_insert(segment);
		}
		if parsed.styles.modern {
			modern.get_or_insert(segment);
		}
	}

	match (legacy, modern) {
		(Some(legacy), Some(modern)) => {
			Err(LegalError::MixedHelperSyntax {
				legacy: legacy.to_string(),
				modern: modern.to_string(),
			})
		}
		(Some(_), None) => Ok(HelperSyntax::Legacy),
		(None, Some(_)) => Ok(HelperSyntax::Modern),
		(None, None) => Ok(HelperSyntax::None),
	}
}

/// Render every block in `content`. Top-level expressions outside blocks are
/// kept as written for [`render_expressions`].
pub fn expand_blocks(content: &str, metadata: &Metadata, context: &TemplateContext) -> LegalResult<String> {
	if !content.contains("{{") {
		return Ok(content.to_string());
	}

	let nodes = parse_template(content)?;
	let root = metadata.to_value();
	let renderer = Renderer::new(&root, context.helpers(), context.track_fields, context.timeout);
	let mut frames = renderer.root_frames();
	let mut resolving = HashSet::new();
	let mut output = String::with_capacity(content.len());

	for node in &nodes {
		match node {
			Node::Text(text) => output.push_str(text),
			Node::Expression { raw, .. } => output.push_str(raw),
			Node::Block(block) => {
				renderer.render_block(block, &mut frames, &mut resolving, true, &mut output)?;
			}
		}
	}

	Ok(output)
}

/// Evaluate the top-level `{{ … }}` expressions in `content`. Block tags that
/// survive to this point are left alone.
pub fn render_expressions(content: &str, metadata: &Metadata, context: &TemplateContext) -> LegalResult<String> {
	if !content.contains("{{") {
		return Ok(content.to_string());
	}

	let root = metadata.to_value();
	let renderer = Renderer::new(&root, context.helpers(), context.track_fields, context.timeout);
	let frames = renderer.root_frames();
	let mut output = String::with_capacity(content.len());

	for (segment, is_tag) in split_expressions(content) {
		if !is_tag {
			output.push_str(segment);
			continue;
		}
		match classify_tag(segment) {
			Tag::Expression(source) => {
				let mut resolving = HashSet::new();
				output.push_str(&renderer.render_expression(segment, source, &frames, &mut resolving, true)?);
			}
			Tag::Comment => {}
			_ => output.push_str(segment),
		}
	}

	Ok(output)
}
