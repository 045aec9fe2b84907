use derive_more::Deref;
use derive_more::DerefMut;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;

use crate::LegalError;
use crate::LegalResult;

/// Document metadata parsed from the front matter block.
///
/// Keys keep their declaration order and are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Deref, DerefMut, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn into_inner(self) -> Map<String, Value> {
		self.0
	}

	/// Look up a dotted path such as `client.address.city` or `parties.0`.
	pub fn lookup(&self, path: &str) -> Option<&Value> {
		let mut segments = path_segments(path);
		let first = segments.next()?;
		let mut current = self.0.get(first)?;
		for segment in segments {
			current = child(current, segment)?;
		}
		Some(current)
	}

	/// Look up a key and return it when it is a non-empty string.
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.0
			.get(key)
			.and_then(Value::as_str)
			.filter(|value| !value.is_empty())
	}

	/// Look up the first of several alternative spellings of a key.
	pub fn get_any<'a>(&'a self, keys: &[&str]) -> Option<&'a Value> {
		keys.iter().find_map(|key| self.0.get(*key))
	}

	/// The whole mapping as a JSON object value.
	pub fn to_value(&self) -> Value {
		Value::Object(self.0.clone())
	}
}

impl From<Map<String, Value>> for Metadata {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}

/// Split a dotted lookup path into its segments. Empty segments are skipped
/// so `a..b` behaves like `a.b`.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
	path.split('.').filter(|segment| !segment.is_empty())
}

/// Step into `value` by one path segment. Arrays accept numeric segments.
pub fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
	match value {
		Value::Object(map) => map.get(segment),
		Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
		_ => None,
	}
}

/// Resolve a dotted path against an arbitrary value.
pub fn lookup_value<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
	path_segments(path).try_fold(root, child)
}

/// Loose truthiness: `null`, a missing value, `""`, `0` and `false` are falsy.
/// Everything else is truthy, including empty arrays and empty mappings.
pub fn is_truthy(value: Option<&Value>) -> bool {
	match value {
		None | Some(Value::Null) => false,
		Some(Value::Bool(flag)) => *flag,
		Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
		Some(Value::String(text)) => !text.is_empty(),
		Some(Value::Array(_) | Value::Object(_)) => true,
	}
}

/// Render a value as document text. Mappings have no textual form.
pub fn display_value(value: &Value) -> Option<String> {
	match value {
		Value::Null => Some(String::new()),
		Value::Bool(flag) => Some(flag.to_string()),
		Value::Number(number) => Some(display_number(number)),
		Value::String(text) => Some(text.clone()),
		Value::Array(items) => {
			let parts: Option<Vec<String>> = items.iter().map(display_value).collect();
			parts.map(|parts| parts.join(", "))
		}
		Value::Object(_) => None,
	}
}

fn display_number(number: &Number) -> String {
	if let Some(int) = number.as_i64() {
		return int.to_string();
	}
	if let Some(int) = number.as_u64() {
		return int.to_string();
	}
	match number.as_f64() {
		Some(float) if float.fract() == 0.0 && float.abs() < 1e15 => format!("{float:.0}"),
		Some(float) => float.to_string(),
		None => number.to_string(),
	}
}

/// The result of splitting and parsing a document's front matter.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
	pub metadata: Metadata,
	/// The document text following the front matter block.
	pub body: String,
	/// Problems that were recovered from in lenient mode.
	pub warnings: Vec<String>,
}

/// Locate the `---` fenced front matter at the very start of `text`.
///
/// Returns the raw YAML and the body after the closing fence. `Ok(None)` means
/// the document has no front matter. `Err` carries the unterminated block.
fn split_front_matter(text: &str) -> Result<Option<(&str, &str)>, &str> {
	let text = text.strip_prefix('\u{feff}').unwrap_or(text);
	let Some(rest) = strip_fence_line(text) else {
		return Ok(None);
	};

	let mut offset = 0;
	for line in rest.split_inclusive('\n') {
		let trimmed = line.trim_end_matches(['\r', '\n']);
		if trimmed == "---" || trimmed == "..." {
			let yaml = &rest[..offset];
			let body = &rest[offset + line.len()..];
			return Ok(Some((yaml, body)));
		}
		offset += line.len();
	}

	Err(rest)
}

fn strip_fence_line(text: &str) -> Option<&str> {
	let rest = text.strip_prefix("---")?;
	let rest = rest.trim_start_matches([' ', '\t']);
	rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

/// Parse the front matter block of `text`.
///
/// In strict mode any malformed front matter is an error. Otherwise the parser
/// keeps every top-level entry it can still read and records a warning for
/// each one it has to drop.
pub fn parse_front_matter(text: &str, strict: bool) -> LegalResult<ParsedDocument> {
	let (yaml, body) = match split_front_matter(text) {
		Ok(Some(parts)) => parts,
		Ok(None) => {
			return Ok(ParsedDocument {
				body: text.to_string(),
				..ParsedDocument::default()
			});
		}
		Err(unterminated) => {
			let snippet = first_line(unterminated);
			if strict {
				return Err(LegalError::MetadataParse {
					reason: "front matter is missing its closing `---`".into(),
					snippet,
				});
			}
			tracing::warn!("front matter is not terminated; treating it as body text");
			return Ok(ParsedDocument {
				body: text.to_string(),
				warnings: vec!["front matter is missing its closing `---`".into()],
				..ParsedDocument::default()
			});
		}
	};

	let body = body.to_string();
	match parse_yaml_mapping(yaml) {
		Ok(metadata) => {
			Ok(ParsedDocument {
				metadata,
				body,
				warnings: Vec::new(),
			})
		}
		Err(reason) if strict => {
			Err(LegalError::MetadataParse {
				reason,
				snippet: first_line(yaml),
			})
		}
		Err(reason) => {
			tracing::warn!(%reason, "recovering partial front matter");
			let (metadata, mut warnings) = recover_entries(yaml);
			warnings.insert(0, format!("malformed front matter: {reason}"));
			Ok(ParsedDocument {
				metadata,
				body,
				warnings,
			})
		}
	}
}

fn first_line(text: &str) -> String {
	text.lines()
		.find(|line| !line.trim().is_empty())
		.unwrap_or_default()
		.trim()
		.to_string()
}

fn parse_yaml_mapping(yaml: &str) -> Result<Metadata, String> {
	if yaml.trim().is_empty() {
		return Ok(Metadata::new());
	}

	let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(yaml).map_err(|e| e.to_string())?;
	match yaml_to_json(value) {
		Value::Object(map) => Ok(Metadata(map)),
		Value::Null => Ok(Metadata::new()),
		other => Err(format!("expected a mapping, found {}", ValueKind::of(&other))),
	}
}

/// Parse each top-level entry on its own, keeping those that are valid.
fn recover_entries(yaml: &str) -> (Metadata, Vec<String>) {
	let mut chunks: Vec<String> = Vec::new();
	for line in yaml.lines() {
		let starts_entry = !line.is_empty() && !line.starts_with([' ', '\t', '-', '#']);
		if starts_entry || chunks.is_empty() {
			chunks.push(String::new());
		}
		if let Some(chunk) = chunks.last_mut() {
			chunk.push_str(line);
			chunk.push('\n');
		}
	}

	let mut metadata = Metadata::new();
	let mut warnings = Vec::new();
	for chunk in chunks {
		if chunk.trim().is_empty() {
			continue;
		}
		match parse_yaml_mapping(&chunk) {
			Ok(entries) => metadata.extend(entries.into_inner()),
			Err(reason) => {
				let entry = first_line(&chunk);
				warnings.push(format!("dropped front matter entry `{entry}`: {reason}"));
			}
		}
	}

	(metadata, warnings)
}

/// Convert a YAML value into the JSON value model used for metadata. Scalar
/// mapping keys are stringified; tags are discarded.
pub fn yaml_to_json(value: serde_yaml_ng::Value) -> Value {
	use serde_yaml_ng::Value as Yaml;

	match value {
		Yaml::Null => Value::Null,
		Yaml::Bool(flag) => Value::Bool(flag),
		Yaml::Number(number) => {
			if let Some(int) = number.as_i64() {
				Value::from(int)
			} else if let Some(int) = number.as_u64() {
				Value::from(int)
			} else {
				number
					.as_f64()
					.and_then(Number::from_f64)
					.map_or(Value::Null, Value::Number)
			}
		}
		Yaml::String(text) => Value::String(text),
		Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
		Yaml::Mapping(mapping) => {
			let mut map = Map::new();
			for (key, value) in mapping {
				let key = match key {
					Yaml::String(key) => key,
					Yaml::Bool(flag) => flag.to_string(),
					Yaml::Number(number) => number.to_string(),
					Yaml::Null => "null".to_string(),
					other => {
						tracing::warn!(?other, "skipping front matter entry with a complex key");
						continue;
					}
				};
				map.insert(key, yaml_to_json(value));
			}
			Value::Object(map)
		}
		Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
	}
}

/// The coarse type of a metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
	Null,
	Boolean,
	Number,
	String,
	Sequence,
	Mapping,
}

impl ValueKind {
	pub fn of(value: &Value) -> Self {
		match value {
			Value::Null => Self::Null,
			Value::Bool(_) => Self::Boolean,
			Value::Number(_) => Self::Number,
			Value::String(_) => Self::String,
			Value::Array(_) => Self::Sequence,
			Value::Object(_) => Self::Mapping,
		}
	}
}

impl std::fmt::Display for ValueKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Null => "null",
			Self::Boolean => "boolean",
			Self::Number => "number",
			Self::String => "string",
			Self::Sequence => "sequence",
			Self::Mapping => "mapping",
		};
		f.write_str(name)
	}
}
