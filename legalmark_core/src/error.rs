use std::fmt::Display;

use miette::Diagnostic;
use thiserror::Error;

/// The stages of the document pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
	Metadata,
	ForceCommands,
	Imports,
	Clauses,
	CrossReferences,
	Loops,
	Expressions,
	Headers,
	FieldTracking,
}

impl Stage {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Metadata => "metadata",
			Self::ForceCommands => "force-commands",
			Self::Imports => "imports",
			Self::Clauses => "clauses",
			Self::CrossReferences => "cross-references",
			Self::Loops => "loops",
			Self::Expressions => "expressions",
			Self::Headers => "headers",
			Self::FieldTracking => "field-tracking",
		}
	}
}

impl Display for Stage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum LegalError {
	#[error("{stage} stage failed at `{excerpt}`: {source}")]
	#[diagnostic(code(legalmark::stage))]
	Stage {
		stage: Stage,
		excerpt: String,
		#[source]
		source: Box<LegalError>,
	},

	#[error("failed to parse front matter: {reason}")]
	#[diagnostic(
		code(legalmark::metadata_parse),
		help("front matter must be a YAML mapping fenced by `---` lines")
	)]
	MetadataParse { reason: String, snippet: String },

	#[error("failed to parse options: {0}")]
	#[diagnostic(code(legalmark::config_parse))]
	ConfigParse(String),

	#[error("imported resource `{path}` was not found")]
	#[diagnostic(
		code(legalmark::import_not_found),
		help("check the `@import` path; it is resolved relative to the importing document")
	)]
	ImportNotFound { path: String },

	#[error("failed to read imported resource `{path}`: {reason}")]
	#[diagnostic(code(legalmark::import_read))]
	ImportRead { path: String, reason: String },

	#[error("circular import: {chain}")]
	#[diagnostic(
		code(legalmark::import_cycle),
		help("remove one of the `@import` directives forming the cycle")
	)]
	ImportCycle { path: String, chain: String },

	#[error("imports nested deeper than {limit} levels at `{path}`")]
	#[diagnostic(code(legalmark::import_depth))]
	ImportDepthExceeded { path: String, limit: usize },

	#[error("metadata merge exceeded its {budget_ms}ms budget at `{path}`")]
	#[diagnostic(
		code(legalmark::merge_timeout),
		help("the imported front matter is too large or too deeply nested")
	)]
	MergeTimeout { path: String, budget_ms: u128 },

	#[error("metadata nested deeper than {limit} levels at `{path}`")]
	#[diagnostic(code(legalmark::metadata_too_deep))]
	MetadataTooDeep { path: String, limit: usize },

	#[error("template evaluation exceeded its {budget_ms}ms budget at `{expression}`")]
	#[diagnostic(
		code(legalmark::template_timeout),
		help("look for metadata values that reference each other")
	)]
	TemplateTimeout {
		expression: String,
		budget_ms: u128,
	},

	#[error("document mixes legacy helper calls (`{legacy}`) with space-separated calls (`{modern}`)")]
	#[diagnostic(
		code(legalmark::mixed_helper_syntax),
		help("rewrite `helper(a, b)` calls as `helper a b`, or the other way round")
	)]
	MixedHelperSyntax { legacy: String, modern: String },

	#[error("missing closing tag for `#{kind}` block: `{opening}`")]
	#[diagnostic(code(legalmark::unclosed_block), help("add `{{{{/{kind}}}}}` to close this block"))]
	UnclosedBlock { kind: String, opening: String },

	#[error("`{found}` closes a `#{expected}` block")]
	#[diagnostic(code(legalmark::mismatched_block))]
	MismatchedBlock { expected: String, found: String },
}

impl LegalError {
	/// The offending path, key or expression for this error.
	pub fn excerpt(&self) -> &str {
		match self {
			Self::Stage { excerpt, .. } => excerpt,
			Self::MetadataParse { snippet, .. } => snippet,
			Self::ConfigParse(reason) => reason,
			Self::ImportNotFound { path }
			| Self::ImportRead { path, .. }
			| Self::ImportCycle { path, .. }
			| Self::ImportDepthExceeded { path, .. }
			| Self::MergeTimeout { path, .. }
			| Self::MetadataTooDeep { path, .. } => path,
			Self::TemplateTimeout { expression, .. } => expression,
			Self::MixedHelperSyntax { legacy, .. } => legacy,
			Self::UnclosedBlock { opening, .. } => opening,
			Self::MismatchedBlock { found, .. } => found,
		}
	}

	/// Wrap this error with the stage that produced it. Errors that already
	/// carry a stage are returned unchanged.
	pub fn in_stage(self, stage: Stage) -> Self {
		if matches!(self, Self::Stage { .. }) {
			return self;
		}

		Self::Stage {
			stage,
			excerpt: truncate_excerpt(self.excerpt()),
			source: Box::new(self),
		}
	}

	/// The pipeline stage attached to this error, if any.
	pub fn stage(&self) -> Option<Stage> {
		match self {
			Self::Stage { stage, .. } => Some(*stage),
			_ => None,
		}
	}
}

const MAX_EXCERPT_CHARS: usize = 80;

fn truncate_excerpt(excerpt: &str) -> String {
	if excerpt.chars().count() <= MAX_EXCERPT_CHARS {
		return excerpt.to_string();
	}

	let mut short: String = excerpt.chars().take(MAX_EXCERPT_CHARS).collect();
	short.push('…');
	short
}

pub type LegalResult<T> = Result<T, LegalError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
