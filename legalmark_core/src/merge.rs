//! Frontmatter merging for imported documents.
//!
//! Both sides are flattened to dot-joined leaf paths. The destination keeps
//! every leaf it already has; source leaves are added only when they neither
//! collide with a destination leaf nor change the shape of the destination
//! tree. Arrays and empty mappings are always atomic leaves.

use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::LegalError;
use crate::LegalResult;
use crate::metadata::Metadata;
use crate::metadata::ValueKind;

/// Keys that control structure, output or security-relevant behaviour. They
/// are never imported from nested documents. Matching ignores case.
pub const RESERVED_FIELDS: [&str; 22] = [
	"level-one",
	"level-two",
	"level-three",
	"level-four",
	"level-five",
	"level-indent",
	"no-reset",
	"no-indent",
	"meta-yaml-output",
	"meta-json-output",
	"meta-output-path",
	"meta-include-fields",
	"output-path",
	"force_commands",
	"force-commands",
	"forcecommands",
	"commands",
	"locale",
	"timezone",
	"pipeline",
	"pipeline-config",
	"pipeline_config",
];

/// Nesting limit for flattening. Deeper structures are rejected.
pub const MAX_METADATA_DEPTH: usize = 64;

/// Default wall-clock budget for one merge call.
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn is_reserved_field(key: &str) -> bool {
	RESERVED_FIELDS
		.iter()
		.any(|reserved| reserved.eq_ignore_ascii_case(key))
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
	/// Strip [`RESERVED_FIELDS`] from the source before merging.
	pub filter_reserved: bool,
	/// Record a [`TypeConflict`] when a colliding leaf changes type in a way
	/// that cannot be coerced.
	pub validate_types: bool,
	pub timeout: Duration,
}

impl Default for MergeOptions {
	fn default() -> Self {
		Self {
			filter_reserved: true,
			validate_types: true,
			timeout: DEFAULT_MERGE_TIMEOUT,
		}
	}
}

/// A same-path collision between values of incompatible types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeConflict {
	pub path: String,
	pub existing: ValueKind,
	pub incoming: ValueKind,
}

/// Summary of one merge call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
	/// Source leaf paths copied into the destination.
	pub added: Vec<String>,
	/// Source leaf paths discarded because the destination already defines
	/// them or would change shape.
	pub conflicts: Vec<String>,
	/// Reserved source keys that were stripped.
	pub filtered: Vec<String>,
	pub type_conflicts: Vec<TypeConflict>,
}

impl MergeStats {
	pub fn added_count(&self) -> usize {
		self.added.len()
	}

	pub fn conflict_count(&self) -> usize {
		self.conflicts.len()
	}

	pub fn filtered_count(&self) -> usize {
		self.filtered.len()
	}

	pub fn has_type_conflicts(&self) -> bool {
		!self.type_conflicts.is_empty()
	}
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
	pub metadata: Metadata,
	pub stats: MergeStats,
}

/// Merge `source` into `destination`. The destination always wins.
pub fn merge_metadata(
	destination: &Metadata,
	source: &Metadata,
	options: &MergeOptions,
) -> LegalResult<MergeOutcome> {
	let deadline = Budget::start(options.timeout);
	let mut stats = MergeStats::default();

	let mut source = source.clone();
	if options.filter_reserved {
		source.retain(|key, _| {
			if is_reserved_field(key) {
				stats.filtered.push(key.clone());
				false
			} else {
				true
			}
		});
	}

	let destination_flat = flatten_with_budget(destination, &deadline)?;
	let source_flat = flatten_with_budget(&source, &deadline)?;

	// Every proper prefix of a destination leaf is an interior node.
	let mut interior: HashSet<String> = HashSet::new();
	for path in destination_flat.keys() {
		interior.extend(proper_prefixes(path).into_iter().map(str::to_string));
	}

	let mut merged = destination_flat.clone();
	for (path, value) in source_flat {
		deadline.check(&path)?;

		if let Some(existing) = destination_flat.get(&path) {
			if options.validate_types && !types_compatible(existing, &value) {
				let conflict = TypeConflict {
					path: path.clone(),
					existing: ValueKind::of(existing),
					incoming: ValueKind::of(&value),
				};
				tracing::warn!(
					path = %conflict.path,
					existing = %conflict.existing,
					incoming = %conflict.incoming,
					"imported field has an incompatible type"
				);
				stats.type_conflicts.push(conflict);
			}
			stats.conflicts.push(path);
			continue;
		}

		let deeper_in_destination = interior.contains(&path);
		let shallower_in_destination = proper_prefixes(&path)
			.into_iter()
			.any(|prefix| destination_flat.contains_key(prefix));
		if deeper_in_destination || shallower_in_destination {
			tracing::debug!(%path, "imported field conflicts with the document structure");
			stats.conflicts.push(path);
			continue;
		}

		stats.added.push(path.clone());
		merged.insert(path, value);
	}

	Ok(MergeOutcome {
		metadata: unflatten(&merged),
		stats,
	})
}

/// String/number and string/boolean collisions coerce safely; `null` is
/// compatible with everything.
fn types_compatible(existing: &Value, incoming: &Value) -> bool {
	let pair = (ValueKind::of(existing), ValueKind::of(incoming));
	if pair.0 == pair.1 {
		return true;
	}

	matches!(
		pair,
		(ValueKind::Null, _)
			| (_, ValueKind::Null)
			| (ValueKind::String, ValueKind::Number | ValueKind::Boolean)
			| (ValueKind::Number | ValueKind::Boolean, ValueKind::String)
	)
}

struct Budget {
	started: Instant,
	limit: Duration,
}

impl Budget {
	fn start(limit: Duration) -> Self {
		Self {
			started: Instant::now(),
			limit,
		}
	}

	fn check(&self, path: &str) -> LegalResult<()> {
		if self.started.elapsed() >= self.limit {
			return Err(LegalError::MergeTimeout {
				path: path.to_string(),
				budget_ms: self.limit.as_millis(),
			});
		}
		Ok(())
	}
}

/// Flatten metadata into dot-joined leaf paths.
///
/// Literal `.` and `\` inside keys are escaped with a backslash so that
/// [`unflatten`] restores the original keys.
pub fn flatten(metadata: &Metadata) -> LegalResult<Map<String, Value>> {
	flatten_with_budget(metadata, &Budget::start(DEFAULT_MERGE_TIMEOUT))
}

fn flatten_with_budget(metadata: &Metadata, budget: &Budget) -> LegalResult<Map<String, Value>> {
	let mut flat = Map::new();
	for (key, value) in metadata.iter() {
		flatten_into(&escape_segment(key), value, 1, budget, &mut flat)?;
	}
	Ok(flat)
}

fn flatten_into(
	path: &str,
	value: &Value,
	depth: usize,
	budget: &Budget,
	flat: &mut Map<String, Value>,
) -> LegalResult<()> {
	budget.check(path)?;
	if depth > MAX_METADATA_DEPTH {
		return Err(LegalError::MetadataTooDeep {
			path: path.to_string(),
			limit: MAX_METADATA_DEPTH,
		});
	}

	match value {
		Value::Object(map) if !map.is_empty() => {
			for (key, child) in map {
				let child_path = format!("{path}.{}", escape_segment(key));
				flatten_into(&child_path, child, depth + 1, budget, flat)?;
			}
		}
		_ => {
			flat.insert(path.to_string(), value.clone());
		}
	}

	Ok(())
}

/// Rebuild nested metadata from dot-joined leaf paths. A leaf that would
/// overwrite an existing scalar or nest inside one is dropped; the first
/// writer wins.
pub fn unflatten(flat: &Map<String, Value>) -> Metadata {
	let mut root = Map::new();

	'leaves: for (path, value) in flat {
		let segments = split_path(path);
		let Some((last, parents)) = segments.split_last() else {
			continue;
		};

		let mut node = &mut root;
		for segment in parents {
			let entry = node
				.entry(segment.clone())
				.or_insert_with(|| Value::Object(Map::new()));
			match entry {
				Value::Object(map) => node = map,
				_ => continue 'leaves,
			}
		}

		if !node.contains_key(last) {
			node.insert(last.clone(), value.clone());
		}
	}

	Metadata::from(root)
}

fn escape_segment(key: &str) -> String {
	if !key.contains(['.', '\\']) {
		return key.to_string();
	}
	key.replace('\\', "\\\\").replace('.', "\\.")
}

fn split_path(path: &str) -> Vec<String> {
	let mut segments = Vec::new();
	let mut current = String::new();
	let mut chars = path.chars();
	while let Some(ch) = chars.next() {
		match ch {
			'\\' => {
				if let Some(escaped) = chars.next() {
					current.push(escaped);
				}
			}
			'.' => segments.push(std::mem::take(&mut current)),
			_ => current.push(ch),
		}
	}
	segments.push(current);
	segments
}

/// Whether the byte at `index` is preceded by an odd number of backslashes.
fn is_escaped(path: &str, index: usize) -> bool {
	let backslashes = path.as_bytes()[..index]
		.iter()
		.rev()
		.take_while(|byte| **byte == b'\\')
		.count();
	backslashes % 2 == 1
}

fn proper_prefixes(path: &str) -> Vec<&str> {
	path.match_indices('.')
		.filter(|(index, _)| !is_escaped(path, *index))
		.map(|(index, _)| &path[..index])
		.collect()
}
