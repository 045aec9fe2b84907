use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Captures;
use regex::Regex;

use crate::dates::ISO_FORMAT;
use crate::dates::Locale;
use crate::dates::format_date;
use crate::metadata::Metadata;
use crate::metadata::display_value;
use crate::template::split_expressions;
use crate::tracking::FieldStatus;
use crate::tracking::mark_field;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\|(?P<key>[A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\|")
		.expect("static reference pattern compiles")
});

static TODAY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"@today\b(?:\[(?P<format>[^\]\n]*)\])?")
		.expect("static date pattern compiles")
});

/// Metadata keys for the document's default date format.
pub const DATE_FORMAT_KEYS: [&str; 2] = ["date-format", "date_format"];

/// Settings for one cross-reference pass.
#[derive(Debug, Clone)]
pub struct ReferenceContext {
	pub today: NaiveDate,
	pub locale: Locale,
	/// The document-level format used when `@today` has no inline format.
	pub date_format: String,
	pub track_fields: bool,
}

impl ReferenceContext {
	pub fn from_metadata(metadata: &Metadata, today: NaiveDate, track_fields: bool) -> Self {
		let date_format = DATE_FORMAT_KEYS
			.iter()
			.find_map(|key| metadata.get_str(key))
			.unwrap_or(ISO_FORMAT)
			.to_string();
		let locale = metadata
			.get_str("locale")
			.map(Locale::from_tag)
			.unwrap_or_default();

		Self {
			today,
			locale,
			date_format,
			track_fields,
		}
	}
}

/// Replace `|key|` references and `@today` tokens. Text inside `{{ … }}`
/// expressions is left for the template engine.
pub fn process_references(content: &str, metadata: &Metadata, context: &ReferenceContext) -> String {
	let mut output = String::with_capacity(content.len());
	for (segment, is_expression) in split_expressions(content) {
		if is_expression {
			output.push_str(segment);
		} else {
			let with_dates = replace_today(segment, context);
			output.push_str(&replace_references(&with_dates, metadata, context));
		}
	}
	output
}

fn replace_today(text: &str, context: &ReferenceContext) -> String {
	TODAY
		.replace_all(text, |captures: &Captures<'_>| {
			let format = captures
				.name("format")
				.map(|m| m.as_str().trim())
				.filter(|format| !format.is_empty())
				.unwrap_or(&context.date_format);
			format_date(context.today, format, context.locale)
		})
		.into_owned()
}

fn replace_references(text: &str, metadata: &Metadata, context: &ReferenceContext) -> String {
	REFERENCE
		.replace_all(text, |captures: &Captures<'_>| {
			let original = &captures[0];
			let key = &captures["key"];
			let Some(value) = metadata.lookup(key).and_then(display_value) else {
				tracing::debug!(key, "unresolved cross-reference");
				return original.to_string();
			};

			if context.track_fields {
				mark_field(FieldStatus::Resolved, key, &value)
			} else {
				value
			}
		})
		.into_owned()
}
