//! `@import` directives.
//!
//! An import directive sits on its own line and names another resource:
//!
//! ```text
//! @import clauses/confidentiality.md
//! @import "shared/signature block.md"
//! ```
//!
//! The directive line is replaced by the imported body. Imported front matter
//! is merged into the importing document, where the importer always wins.
//! Names resolve relative to the importing resource, and the core never reads
//! files itself: every resource comes from a [`ResourceReader`].

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::LegalError;
use crate::LegalResult;
use crate::merge::MergeOptions;
use crate::merge::MergeStats;
use crate::merge::merge_metadata;
use crate::metadata::Metadata;
use crate::metadata::parse_front_matter;

pub const DEFAULT_MAX_IMPORT_DEPTH: usize = 10;

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"^[ \t]*@import[ \t]+(?:"(?P<double>[^"]+)"|'(?P<single>[^']+)'|(?P<bare>\S+))[ \t]*$"#)
		.expect("static import pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
	#[error("resource not found")]
	NotFound,
	#[error("{0}")]
	Failed(String),
}

/// The host capability for reading named resources.
pub trait ResourceReader {
	fn read_resource(&self, name: &str) -> Result<String, ResourceError>;
}

impl<F> ResourceReader for F
where
	F: Fn(&str) -> Result<String, ResourceError>,
{
	fn read_resource(&self, name: &str) -> Result<String, ResourceError> {
		self(name)
	}
}

/// Resources held in memory, keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
	resources: HashMap<String, String>,
}

impl MemoryResources {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(mut self, name: &str, text: impl Into<String>) -> Self {
		self.insert(name, text);
		self
	}

	pub fn insert(&mut self, name: &str, text: impl Into<String>) {
		self.resources.insert(resolve_name(None, name), text.into());
	}
}

impl ResourceReader for MemoryResources {
	fn read_resource(&self, name: &str) -> Result<String, ResourceError> {
		self.resources.get(name).cloned().ok_or(ResourceError::NotFound)
	}
}

/// A reader with no resources. Every import fails as not found.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResources;

impl ResourceReader for NoResources {
	fn read_resource(&self, _name: &str) -> Result<String, ResourceError> {
		Err(ResourceError::NotFound)
	}
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
	/// Merge imported front matter into the importer.
	pub merge_metadata: bool,
	pub max_depth: usize,
	pub merge: MergeOptions,
	/// Fail on malformed front matter in imported resources.
	pub strict_metadata: bool,
}

impl Default for ImportOptions {
	fn default() -> Self {
		Self {
			merge_metadata: true,
			max_depth: DEFAULT_MAX_IMPORT_DEPTH,
			merge: MergeOptions::default(),
			strict_metadata: false,
		}
	}
}

/// What happened to one imported resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
	/// The normalized resource name.
	pub path: String,
	/// The resource containing the directive, `None` for the root document.
	pub importer: Option<String>,
	pub stats: MergeStats,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedImports {
	pub content: String,
	pub metadata: Metadata,
	/// Reports in merge order: nested imports come before their importer.
	pub reports: Vec<ImportReport>,
	pub warnings: Vec<String>,
}

/// Inline every import in `content` and merge the imported metadata into
/// `metadata`.
pub fn resolve_imports(
	content: &str,
	metadata: &Metadata,
	reader: &dyn ResourceReader,
	options: &ImportOptions,
) -> LegalResult<ResolvedImports> {
	let mut resolver = Resolver {
		reader,
		options,
		reports: Vec::new(),
		warnings: Vec::new(),
	};
	let mut chain = Vec::new();
	let (content, metadata) = resolver.expand(content, metadata.clone(), None, &mut chain)?;

	Ok(ResolvedImports {
		content,
		metadata,
		reports: resolver.reports,
		warnings: resolver.warnings,
	})
}

struct Resolver<'r> {
	reader: &'r dyn ResourceReader,
	options: &'r ImportOptions,
	reports: Vec<ImportReport>,
	warnings: Vec<String>,
}

impl Resolver<'_> {
	/// Expand the directives in one resource. `chain` holds the resources
	/// currently being expanded, outermost first.
	fn expand(
		&mut self,
		content: &str,
		mut metadata: Metadata,
		importer: Option<&str>,
		chain: &mut Vec<String>,
	) -> LegalResult<(String, Metadata)> {
		let mut output = String::with_capacity(content.len());
		let mut fence: Option<&str> = None;

		for line in content.split_inclusive('\n') {
			let text = line.trim_end_matches(['\n', '\r']);
			let ending = &line[text.len()..];
			let trimmed = text.trim_start();

			if let Some(marker) = fence {
				if trimmed.starts_with(marker) {
					fence = None;
				}
				output.push_str(line);
				continue;
			}
			if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
				fence = Some(&trimmed[..3]);
				output.push_str(line);
				continue;
			}

			let Some(name) = import_name(text) else {
				output.push_str(line);
				continue;
			};

			let path = resolve_name(importer, name);
			let (body, child_metadata) = self.import(&path, chain)?;

			let stats = if self.options.merge_metadata {
				let outcome = merge_metadata(&metadata, &child_metadata, &self.options.merge)?;
				metadata = outcome.metadata;
				outcome.stats
			} else {
				MergeStats::default()
			};
			tracing::debug!(
				path = %path,
				added = stats.added_count(),
				conflicts = stats.conflict_count(),
				filtered = stats.filtered_count(),
				"import resolved"
			);
			self.reports.push(ImportReport {
				path,
				importer: importer.map(str::to_string),
				stats,
			});

			output.push_str(&body);
			if !body.is_empty() && !body.ends_with('\n') {
				output.push_str(ending);
			}
		}

		Ok((output, metadata))
	}

	/// Read, parse and expand one imported resource.
	fn import(&mut self, path: &str, chain: &mut Vec<String>) -> LegalResult<(String, Metadata)> {
		if chain.iter().any(|active| active == path) {
			let mut cycle = chain.clone();
			cycle.push(path.to_string());
			return Err(LegalError::ImportCycle {
				path: path.to_string(),
				chain: cycle.join(" -> "),
			});
		}
		if chain.len() >= self.options.max_depth {
			return Err(LegalError::ImportDepthExceeded {
				path: path.to_string(),
				limit: self.options.max_depth,
			});
		}

		let text = self.reader.read_resource(path).map_err(|error| {
			match error {
				ResourceError::NotFound => LegalError::ImportNotFound { path: path.to_string() },
				ResourceError::Failed(reason) => {
					LegalError::ImportRead {
						path: path.to_string(),
						reason,
					}
				}
			}
		})?;

		let parsed = parse_front_matter(&text, self.options.strict_metadata)?;
		self.warnings
			.extend(parsed.warnings.into_iter().map(|warning| format!("{path}: {warning}")));

		chain.push(path.to_string());
		let expanded = self.expand(&parsed.body, parsed.metadata, Some(path), chain);
		chain.pop();
		expanded
	}
}

fn import_name(line: &str) -> Option<&str> {
	let captures = IMPORT_LINE.captures(line)?;
	captures
		.name("double")
		.or_else(|| captures.name("single"))
		.or_else(|| captures.name("bare"))
		.map(|name| name.as_str())
}

/// Resolve `name` against the directory of `importer`, collapsing `.` and
/// `..` segments. A leading `/` resolves from the root.
pub fn resolve_name(importer: Option<&str>, name: &str) -> String {
	let base = if name.starts_with('/') {
		""
	} else {
		importer
			.and_then(|importer| importer.rsplit_once('/'))
			.map_or("", |(directory, _)| directory)
	};

	let mut segments: Vec<&str> = Vec::new();
	for segment in base.split('/').chain(name.split('/')) {
		match segment {
			"" | "." => {}
			".." => {
				segments.pop();
			}
			segment => segments.push(segment),
		}
	}
	segments.join("/")
}
