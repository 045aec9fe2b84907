use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use serde_json::json;

use crate::Metadata;
use crate::MemoryResources;
use crate::ProcessOptions;
use crate::dates::Locale;
use crate::dates::ISO_FORMAT;
use crate::template::TemplateContext;

/// Friday, 16 October 2026.
pub fn fixed_today() -> NaiveDate {
	NaiveDate::from_ymd_opt(2026, 10, 16).unwrap_or_default()
}

/// Build metadata from a `json!` object literal.
pub fn metadata(value: Value) -> Metadata {
	match value {
		Value::Object(map) => Metadata::from(map),
		other => panic!("metadata fixtures must be objects, got {other}"),
	}
}

pub fn contract_metadata() -> Metadata {
	metadata(json!({
		"client": { "name": "Acme Ltd", "city": "Lagos" },
		"provider": "Beta LLC",
		"effective_date": "2026-03-01",
		"amount": 1234.5,
		"premium": true,
		"parties": ["Acme", "Beta"],
		"items": [
			{ "name": "A", "price": 1 },
			{ "name": "B", "price": 2 },
		],
	}))
}

pub fn options() -> ProcessOptions {
	ProcessOptions {
		today: Some(fixed_today()),
		..ProcessOptions::default()
	}
}

pub fn tracking_options() -> ProcessOptions {
	ProcessOptions {
		enable_field_tracking: true,
		..options()
	}
}

pub fn template_context() -> TemplateContext {
	TemplateContext {
		today: fixed_today(),
		locale: Locale::En,
		date_format: ISO_FORMAT.to_string(),
		track_fields: false,
		timeout: Duration::from_secs(5),
	}
}

pub fn tracking_context() -> TemplateContext {
	TemplateContext {
		track_fields: true,
		..template_context()
	}
}

/// A master agreement importing a clause that imports a signature block.
pub fn contract_resources() -> MemoryResources {
	MemoryResources::new()
		.with(
			"clauses/confidentiality.md",
			"---\nterm: 2 years\nprovider: Other Corp\nlevel-one: \"Part %n\"\n---\nll. Confidentiality\n\nThe \
			 obligations last {{ term }}.\n@import ../shared/signature.md\n",
		)
		.with(
			"shared/signature.md",
			"---\nsignatory: Jane Doe\n---\nSigned by {{ signatory }}.\n",
		)
}
