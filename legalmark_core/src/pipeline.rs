use serde::Serialize;

use crate::LegalResult;
use crate::Stage;
use crate::clauses::process_clauses;
use crate::config::ForceDirective;
use crate::config::ProcessOptions;
use crate::dates::today_in;
use crate::headers::HeaderOptions;
use crate::headers::number_headers;
use crate::imports::ImportReport;
use crate::imports::NoResources;
use crate::imports::ResourceReader;
use crate::imports::resolve_imports;
use crate::metadata::Metadata;
use crate::metadata::parse_front_matter;
use crate::references::ReferenceContext;
use crate::references::process_references;
use crate::template::HelperSyntax;
use crate::template::TemplateContext;
use crate::template::detect_helper_syntax;
use crate::template::expand_blocks;
use crate::template::render_expressions;
use crate::tracking::FieldReport;
use crate::tracking::annotate_fields;

static NO_RESOURCES: NoResources = NoResources;

/// The output of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessedDocument {
	/// The fully resolved body, without front matter.
	pub content: String,
	/// Document metadata after merging imports.
	pub metadata: Metadata,
	/// Problems that were recovered from.
	pub warnings: Vec<String>,
	/// One report per imported resource, in merge order.
	pub imports: Vec<ImportReport>,
	/// Tracked fields; empty unless field tracking is enabled.
	pub fields: FieldReport,
	pub helper_syntax: HelperSyntax,
}

/// Runs every stage over one document at a time. A pipeline holds no state
/// between runs and can be shared.
pub struct Pipeline<'r> {
	options: ProcessOptions,
	reader: &'r dyn ResourceReader,
}

impl Pipeline<'static> {
	/// A pipeline without any importable resources.
	pub fn new(options: ProcessOptions) -> Self {
		Self {
			options,
			reader: &NO_RESOURCES,
		}
	}
}

impl<'r> Pipeline<'r> {
	pub fn with_reader(options: ProcessOptions, reader: &'r dyn ResourceReader) -> Self {
		Self { options, reader }
	}

	pub fn options(&self) -> &ProcessOptions {
		&self.options
	}

	/// Process `text` through every enabled stage in order. The first stage
	/// failure aborts the run.
	pub fn process(&self, text: &str) -> LegalResult<ProcessedDocument> {
		let parsed = run_stage(Stage::Metadata, || parse_front_matter(text, self.options.strict_metadata))?;
		let mut metadata = parsed.metadata;
		let mut content = parsed.body;
		let mut warnings = parsed.warnings;

		let options = match ForceDirective::from_metadata(&metadata) {
			Some(directive) => {
				tracing::debug!(stage = %Stage::ForceCommands, accepted = directive.flags.len(), "applying force directive");
				warnings.extend(
					directive
						.rejected
						.iter()
						.map(|flag| format!("force directive flag `{flag}` is not allowed")),
				);
				directive.apply(&self.options)
			}
			None => self.options.clone(),
		};
		let skip = &options.skip;

		let mut imports = Vec::new();
		if enabled(skip.skips(Stage::Imports), Stage::Imports) {
			let resolved = run_stage(Stage::Imports, || {
				resolve_imports(&content, &metadata, self.reader, &options.import_options())
			})?;
			content = resolved.content;
			metadata = resolved.metadata;
			imports = resolved.reports;
			warnings.extend(resolved.warnings);
		}

		if enabled(skip.skips(Stage::Clauses), Stage::Clauses) {
			content = process_clauses(&content, &metadata);
		}

		let today = options
			.today
			.unwrap_or_else(|| today_in(metadata.get_str("timezone")));
		let references = ReferenceContext::from_metadata(&metadata, today, options.enable_field_tracking);
		if enabled(skip.skips(Stage::CrossReferences), Stage::CrossReferences) {
			content = process_references(&content, &metadata, &references);
		}

		let helper_syntax = run_stage(Stage::Loops, || detect_helper_syntax(&content))?;
		let template = TemplateContext {
			today,
			locale: references.locale,
			date_format: references.date_format.clone(),
			track_fields: options.enable_field_tracking,
			timeout: options.template_timeout(),
		};
		if enabled(skip.skips(Stage::Loops), Stage::Loops) {
			content = run_stage(Stage::Loops, || expand_blocks(&content, &metadata, &template))?;
		}
		if enabled(skip.skips(Stage::Expressions), Stage::Expressions) {
			content = run_stage(Stage::Expressions, || render_expressions(&content, &metadata, &template))?;
		}

		if enabled(skip.skips(Stage::Headers), Stage::Headers) {
			let header_options = HeaderOptions::from_metadata(&metadata, options.no_reset, options.no_indent);
			content = number_headers(&content, &header_options);
		}

		let mut fields = FieldReport::default();
		if options.enable_field_tracking {
			(content, fields) = annotate_fields(&content);
			tracing::debug!(stage = %Stage::FieldTracking, tracked = fields.fields.len(), "annotated fields");
		}

		Ok(ProcessedDocument {
			content,
			metadata,
			warnings,
			imports,
			fields,
			helper_syntax,
		})
	}
}

/// Process `text` with `options` and no importable resources.
pub fn process_document(text: &str, options: &ProcessOptions) -> LegalResult<ProcessedDocument> {
	Pipeline::new(options.clone()).process(text)
}

fn run_stage<T>(stage: Stage, action: impl FnOnce() -> LegalResult<T>) -> LegalResult<T> {
	action().map_err(|error| error.in_stage(stage))
}

fn enabled(skipped: bool, stage: Stage) -> bool {
	if skipped {
		tracing::debug!(%stage, "stage skipped");
	} else {
		tracing::debug!(%stage, "running stage");
	}
	!skipped
}
