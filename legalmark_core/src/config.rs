use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::LegalError;
use crate::LegalResult;
use crate::Stage;
use crate::imports::DEFAULT_MAX_IMPORT_DEPTH;
use crate::imports::ImportOptions;
use crate::merge::MergeOptions;
use crate::metadata::Metadata;

/// Metadata keys that carry a force directive.
pub const FORCE_DIRECTIVE_KEYS: [&str; 3] = ["force_commands", "force-commands", "forcecommands"];

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Stages the host can switch off. Metadata parsing and field tracking always
/// run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SkipStages {
	pub imports: bool,
	pub clauses: bool,
	pub cross_references: bool,
	pub loops: bool,
	pub expressions: bool,
	pub headers: bool,
}

impl SkipStages {
	pub fn skips(&self, stage: Stage) -> bool {
		match stage {
			Stage::Imports => self.imports,
			Stage::Clauses => self.clauses,
			Stage::CrossReferences => self.cross_references,
			Stage::Loops => self.loops,
			Stage::Expressions => self.expressions,
			Stage::Headers => self.headers,
			Stage::Metadata | Stage::ForceCommands | Stage::FieldTracking => false,
		}
	}
}

/// Host configuration for processing one document.
///
/// ```toml
/// no-reset = false
/// no-indent = false
/// enable-field-tracking = true
/// strict-metadata = false
/// max-import-depth = 10
/// today = "2026-01-31"
///
/// [skip]
/// headers = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProcessOptions {
	pub skip: SkipStages,
	/// Never reset deeper header counters.
	pub no_reset: bool,
	/// Never indent numbered headers.
	pub no_indent: bool,
	/// Wrap substituted values in field-tracking spans.
	pub enable_field_tracking: bool,
	/// Fail on malformed front matter instead of recovering.
	pub strict_metadata: bool,
	/// Merge imported front matter into the importing document.
	pub merge_import_metadata: bool,
	/// Record type conflicts while merging imported front matter.
	pub validate_import_types: bool,
	pub max_import_depth: usize,
	pub merge_timeout_ms: u64,
	pub template_timeout_ms: u64,
	/// Fixed date for `@today`. Defaults to the current date in the document's
	/// timezone.
	pub today: Option<NaiveDate>,
}

impl Default for ProcessOptions {
	fn default() -> Self {
		Self {
			skip: SkipStages::default(),
			no_reset: false,
			no_indent: false,
			enable_field_tracking: false,
			strict_metadata: false,
			merge_import_metadata: true,
			validate_import_types: true,
			max_import_depth: DEFAULT_MAX_IMPORT_DEPTH,
			merge_timeout_ms: DEFAULT_TIMEOUT_MS,
			template_timeout_ms: DEFAULT_TIMEOUT_MS,
			today: None,
		}
	}
}

impl ProcessOptions {
	/// Load options from TOML text.
	pub fn from_toml_str(text: &str) -> LegalResult<Self> {
		toml::from_str(text).map_err(|e| LegalError::ConfigParse(e.to_string()))
	}

	pub fn merge_options(&self) -> MergeOptions {
		MergeOptions {
			filter_reserved: true,
			validate_types: self.validate_import_types,
			timeout: Duration::from_millis(self.merge_timeout_ms),
		}
	}

	pub fn import_options(&self) -> ImportOptions {
		ImportOptions {
			merge_metadata: self.merge_import_metadata,
			max_depth: self.max_import_depth,
			merge: self.merge_options(),
			strict_metadata: self.strict_metadata,
		}
	}

	pub fn template_timeout(&self) -> Duration {
		Duration::from_millis(self.template_timeout_ms)
	}
}

/// A flag a document may force on (or off) through its force directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForcedFlag {
	NoReset,
	NoIndent,
	FieldTracking,
	StrictMetadata,
}

impl ForcedFlag {
	/// Accepts `--no-reset`, `no_reset`, `highlight`, … Anything that is not on
	/// the allow-list yields `None`.
	pub fn from_name(name: &str) -> Option<Self> {
		let name = name.trim_start_matches('-').to_ascii_lowercase().replace('_', "-");
		match name.as_str() {
			"no-reset" => Some(Self::NoReset),
			"no-indent" => Some(Self::NoIndent),
			"highlight" | "enable-field-tracking" => Some(Self::FieldTracking),
			"strict" | "strict-metadata" => Some(Self::StrictMetadata),
			_ => None,
		}
	}
}

/// The validated content of a document's force directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceDirective {
	pub flags: Vec<(ForcedFlag, bool)>,
	/// Flags that were dropped, as written in the document.
	pub rejected: Vec<String>,
}

impl ForceDirective {
	/// Read the directive from the first force key present in `metadata`.
	pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
		metadata.get_any(&FORCE_DIRECTIVE_KEYS).map(Self::parse)
	}

	/// Parse a flag string such as `"--no-reset --highlight"` or a mapping
	/// such as `{ no-reset: true }`.
	pub fn parse(value: &Value) -> Self {
		let mut directive = Self::default();
		match value {
			Value::String(text) => {
				let mut tokens = text.split_whitespace().peekable();
				while let Some(token) = tokens.next() {
					let (name, inline_value) = token.split_once('=').unwrap_or((token, ""));
					match ForcedFlag::from_name(name) {
						Some(flag) if inline_value.is_empty() => directive.flags.push((flag, true)),
						_ => {
							let mut rejected = token.to_string();
							// A flag's separate value goes with it.
							if let Some(value) = tokens.next_if(|next| !next.starts_with('-')) {
								rejected.push(' ');
								rejected.push_str(value);
							}
							directive.rejected.push(rejected);
						}
					}
				}
			}
			Value::Object(map) => {
				for (key, value) in map {
					match (ForcedFlag::from_name(key), value) {
						(Some(flag), Value::Bool(enabled)) => directive.flags.push((flag, *enabled)),
						_ => directive.rejected.push(key.clone()),
					}
				}
			}
			other => directive.rejected.push(other.to_string()),
		}

		for rejected in &directive.rejected {
			tracing::warn!(flag = %rejected, "force directive flag is not allowed; ignoring it");
		}
		directive
	}

	/// The host options with this directive applied. The document wins for
	/// every accepted flag.
	pub fn apply(&self, options: &ProcessOptions) -> ProcessOptions {
		let mut options = options.clone();
		for (flag, enabled) in &self.flags {
			match flag {
				ForcedFlag::NoReset => options.no_reset = *enabled,
				ForcedFlag::NoIndent => options.no_indent = *enabled,
				ForcedFlag::FieldTracking => options.enable_field_tracking = *enabled,
				ForcedFlag::StrictMetadata => options.strict_metadata = *enabled,
			}
		}
		options
	}
}
