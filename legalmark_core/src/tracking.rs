//! Field tracking markers.
//!
//! While tracking is enabled, substitution stages wrap each value in
//! private-use marker characters that record the field path and how it was
//! resolved. The final pipeline stage turns the markers into HTML spans and
//! builds a [`FieldReport`].

use serde::Serialize;

const OPEN: char = '\u{e000}';
const SEPARATOR: char = '\u{e001}';
const CLOSE: char = '\u{e002}';

/// How a tracked field was filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldStatus {
	/// Substituted directly from metadata.
	Resolved,
	/// Produced by a helper call or a conditional expression.
	Computed,
	/// Referenced but not defined.
	Missing,
}

impl FieldStatus {
	pub fn css_class(self) -> &'static str {
		match self {
			Self::Resolved => "imported-value",
			Self::Computed => "highlight",
			Self::Missing => "missing-value",
		}
	}

	fn code(self) -> char {
		match self {
			Self::Resolved => 'r',
			Self::Computed => 'c',
			Self::Missing => 'm',
		}
	}

	fn from_code(code: char) -> Option<Self> {
		match code {
			'r' => Some(Self::Resolved),
			'c' => Some(Self::Computed),
			'm' => Some(Self::Missing),
			_ => None,
		}
	}
}

/// Wrap `text` in tracking markers for `field`.
pub fn mark_field(status: FieldStatus, field: &str, text: &str) -> String {
	let field = strip_markers(field);
	let text = strip_markers(text);
	format!("{OPEN}{}{field}{SEPARATOR}{text}{CLOSE}", status.code())
}

/// The marked placeholder for a field that could not be resolved.
pub fn mark_missing(field: &str) -> String {
	mark_field(FieldStatus::Missing, field, &format!("[[{field}]]"))
}

/// Remove every tracking marker, keeping the wrapped text.
pub fn strip_markers(text: &str) -> String {
	if !text.contains(OPEN) {
		return text.to_string();
	}

	let mut output = String::with_capacity(text.len());
	let mut chars = text.chars();
	while let Some(ch) = chars.next() {
		match ch {
			OPEN => {
				for header in chars.by_ref() {
					if header == SEPARATOR {
						break;
					}
				}
			}
			CLOSE => {}
			_ => output.push(ch),
		}
	}
	output
}

/// One field seen while annotating a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedField {
	pub name: String,
	pub status: FieldStatus,
	pub occurrences: usize,
}

/// Every tracked field, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldReport {
	pub fields: Vec<TrackedField>,
}

impl FieldReport {
	fn record(&mut self, name: &str, status: FieldStatus) {
		if let Some(field) = self
			.fields
			.iter_mut()
			.find(|field| field.name == name && field.status == status)
		{
			field.occurrences += 1;
			return;
		}

		self.fields.push(TrackedField {
			name: name.to_string(),
			status,
			occurrences: 1,
		});
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	/// Names of fields with the given status.
	pub fn with_status(&self, status: FieldStatus) -> Vec<&str> {
		self.fields
			.iter()
			.filter(|field| field.status == status)
			.map(|field| field.name.as_str())
			.collect()
	}
}

/// Replace tracking markers with annotated spans.
pub fn annotate_fields(content: &str) -> (String, FieldReport) {
	let mut report = FieldReport::default();
	if !content.contains(OPEN) {
		return (content.to_string(), report);
	}

	let mut output = String::with_capacity(content.len() + 64);
	let mut rest = content;
	while let Some(start) = rest.find(OPEN) {
		output.push_str(&rest[..start]);
		let marked = &rest[start + OPEN.len_utf8()..];

		let parsed = marked.find(CLOSE).and_then(|close| {
			let body = &marked[..close];
			let mut chars = body.chars();
			let status = FieldStatus::from_code(chars.next()?)?;
			let (field, text) = chars.as_str().split_once(SEPARATOR)?;
			Some((status, field, text, close))
		});

		let Some((status, field, text, close)) = parsed else {
			rest = marked;
			continue;
		};

		report.record(field, status);
		output.push_str(&format!(
			r#"<span class="legal-field {}" data-field="{}">{text}</span>"#,
			status.css_class(),
			escape_attribute(field)
		));
		rest = &marked[close + CLOSE.len_utf8()..];
	}
	output.push_str(rest);

	(output, report)
}

fn escape_attribute(value: &str) -> String {
	value
		.replace('&', "&amp;")
		.replace('"', "&quot;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
}
