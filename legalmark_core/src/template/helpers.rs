//! Built-in template helpers.
//!
//! Every helper takes already-evaluated arguments and returns a new value.
//! Failures are reported as [`HelperError`]; the engine then leaves the
//! expression untouched.

use chrono::NaiveDate;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

use crate::dates;
use crate::dates::Locale;
use crate::metadata::display_value;

/// Every helper the engine knows, by the name used in templates.
pub const HELPER_NAMES: [&str; 33] = [
	"addYears",
	"addMonths",
	"addDays",
	"formatDate",
	"formatCurrency",
	"formatInteger",
	"formatPercent",
	"round",
	"numberToWords",
	"upper",
	"lower",
	"capitalize",
	"capitalizeWords",
	"titleCase",
	"kebabCase",
	"snakeCase",
	"camelCase",
	"pascalCase",
	"trim",
	"truncate",
	"initials",
	"concat",
	"replace",
	"join",
	"pluralize",
	"default",
	"add",
	"subtract",
	"multiply",
	"divide",
	"eq",
	"not",
	"today",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HelperError {
	#[error("unknown helper `{0}`")]
	Unknown(String),
	#[error("`{name}` expects {expected} argument(s) but received {received}")]
	Arity {
		name: String,
		expected: String,
		received: usize,
	},
	#[error("`{name}` argument {position}: {reason}")]
	InvalidArgument {
		name: String,
		position: usize,
		reason: String,
	},
}

/// Document-wide settings visible to helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperContext {
	pub today: NaiveDate,
	pub locale: Locale,
	/// Format used by `formatDate` without an explicit format.
	pub date_format: String,
}

pub fn is_helper(name: &str) -> bool {
	HELPER_NAMES.contains(&name)
}

/// Whether the helper receives `null` for undefined arguments instead of
/// leaving the whole expression unresolved.
pub fn accepts_missing(name: &str) -> bool {
	matches!(name, "default" | "eq" | "not")
}

/// Call the helper `name`.
pub fn call_helper(name: &str, values: &[Value], context: &HelperContext) -> Result<Value, HelperError> {
	let args = Args { name, values };
	match name {
		"addYears" => shift_date(&args, dates::add_years),
		"addMonths" => shift_date(&args, dates::add_months),
		"addDays" => shift_date(&args, dates::add_days),
		"formatDate" => {
			args.arity(1, 2)?;
			let date = args.date(0)?;
			let format = args.optional_string(1).unwrap_or_else(|| context.date_format.clone());
			Ok(Value::String(dates::format_date(date, &format, context.locale)))
		}
		"formatCurrency" => {
			args.arity(1, 3)?;
			let amount = args.number(0)?;
			let currency = args.optional_string(1).unwrap_or_else(|| "USD".to_string());
			let decimals = args.optional_count(2)?.unwrap_or(2);
			Ok(Value::String(format_currency(amount, &currency, decimals)))
		}
		"formatInteger" => {
			args.arity(1, 2)?;
			let number = args.number(0)?;
			let separator = args.optional_string(1).unwrap_or_else(|| ",".to_string());
			Ok(Value::String(format_grouped(number, 0, &separator)))
		}
		"formatPercent" => {
			args.arity(1, 2)?;
			let ratio = args.number(0)?;
			let decimals = args.optional_count(1)?.unwrap_or(0);
			Ok(Value::String(format!(
				"{}%",
				format_grouped(ratio * 100.0, decimals, ",")
			)))
		}
		"round" => {
			args.arity(1, 2)?;
			let number = args.number(0)?;
			let decimals = args.optional_count(1)?.unwrap_or(0);
			let factor = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
			Ok(number_value((number * factor).round() / factor))
		}
		"numberToWords" => {
			args.arity(1, 1)?;
			let number = args.number(0)?;
			if number.fract() != 0.0 || number.abs() >= 1e15 {
				return Err(args.invalid(0, "expected a whole number below one quadrillion"));
			}
			Ok(Value::String(number_to_words(number as i64)))
		}
		"upper" => map_text(&args, |text| text.to_uppercase()),
		"lower" => map_text(&args, |text| text.to_lowercase()),
		"capitalize" => map_text(&args, capitalize),
		"capitalizeWords" | "titleCase" => map_text(&args, title_case),
		"kebabCase" => map_text(&args, |text| split_words(text).join("-").to_lowercase()),
		"snakeCase" => map_text(&args, |text| split_words(text).join("_").to_lowercase()),
		"camelCase" => map_text(&args, camel_case),
		"pascalCase" => {
			map_text(&args, |text| {
				split_words(text)
					.iter()
					.map(|word| capitalize(&word.to_lowercase()))
					.collect()
			})
		}
		"trim" => map_text(&args, |text| text.trim().to_string()),
		"initials" => {
			map_text(&args, |text| {
				text.split_whitespace()
					.filter_map(|word| word.chars().find(|ch| ch.is_alphabetic()))
					.flat_map(char::to_uppercase)
					.collect()
			})
		}
		"truncate" => {
			args.arity(2, 3)?;
			let text = args.string(0)?;
			let limit = args.count(1)?;
			let suffix = args.optional_string(2).unwrap_or_else(|| "...".to_string());
			if text.chars().count() <= limit {
				return Ok(Value::String(text));
			}
			let mut short: String = text.chars().take(limit).collect();
			short.push_str(&suffix);
			Ok(Value::String(short))
		}
		"concat" => {
			args.arity(1, usize::MAX)?;
			let parts = (0..values.len())
				.map(|position| args.string(position))
				.collect::<Result<Vec<_>, _>>()?;
			Ok(Value::String(parts.concat()))
		}
		"replace" => {
			args.arity(3, 3)?;
			let text = args.string(0)?;
			let from = args.string(1)?;
			if from.is_empty() {
				return Err(args.invalid(1, "the search text is empty"));
			}
			Ok(Value::String(text.replace(&from, &args.string(2)?)))
		}
		"join" => {
			args.arity(1, 2)?;
			let separator = args.optional_string(1).unwrap_or_else(|| ", ".to_string());
			match &values[0] {
				Value::Array(items) => {
					let parts: Option<Vec<String>> = items.iter().map(display_value).collect();
					parts
						.map(|parts| Value::String(parts.join(&separator)))
						.ok_or_else(|| args.invalid(0, "items must be scalar"))
				}
				_ => Ok(Value::String(args.string(0)?)),
			}
		}
		"pluralize" => {
			args.arity(2, 3)?;
			let word = args.string(0)?;
			let count = args.number(1)?;
			if (count - 1.0).abs() < f64::EPSILON {
				return Ok(Value::String(word));
			}
			let plural = args.optional_string(2).unwrap_or_else(|| pluralize(&word));
			Ok(Value::String(plural))
		}
		"default" => {
			args.arity(2, 2)?;
			let value = &values[0];
			let empty = value.is_null() || value.as_str().is_some_and(str::is_empty);
			Ok(if empty { values[1].clone() } else { value.clone() })
		}
		"add" => arithmetic(&args, |a, b| Some(a + b)),
		"subtract" => arithmetic(&args, |a, b| Some(a - b)),
		"multiply" => arithmetic(&args, |a, b| Some(a * b)),
		"divide" => arithmetic(&args, |a, b| (b != 0.0).then(|| a / b)),
		"eq" => {
			args.arity(2, 2)?;
			Ok(Value::Bool(values[0] == values[1] || display_value(&values[0]) == display_value(&values[1])))
		}
		"not" => {
			args.arity(1, 1)?;
			Ok(Value::Bool(!crate::metadata::is_truthy(Some(&values[0]))))
		}
		"today" => {
			args.arity(0, 1)?;
			match args.optional_string(0) {
				Some(format) => Ok(Value::String(dates::format_date(context.today, &format, context.locale))),
				None => Ok(dates::date_value(context.today)),
			}
		}
		_ => Err(HelperError::Unknown(name.to_string())),
	}
}

struct Args<'a> {
	name: &'a str,
	values: &'a [Value],
}

impl Args<'_> {
	fn arity(&self, min: usize, max: usize) -> Result<(), HelperError> {
		let received = self.values.len();
		if (min..=max).contains(&received) {
			return Ok(());
		}
		let expected = match (min, max) {
			(min, max) if min == max => min.to_string(),
			(min, usize::MAX) => format!("at least {min}"),
			(min, max) => format!("{min} to {max}"),
		};
		Err(HelperError::Arity {
			name: self.name.to_string(),
			expected,
			received,
		})
	}

	fn invalid(&self, position: usize, reason: &str) -> HelperError {
		HelperError::InvalidArgument {
			name: self.name.to_string(),
			position: position + 1,
			reason: reason.to_string(),
		}
	}

	fn string(&self, position: usize) -> Result<String, HelperError> {
		self.values
			.get(position)
			.and_then(display_value)
			.ok_or_else(|| self.invalid(position, "expected text"))
	}

	fn optional_string(&self, position: usize) -> Option<String> {
		self.values
			.get(position)
			.filter(|value| !value.is_null())
			.and_then(display_value)
	}

	fn number(&self, position: usize) -> Result<f64, HelperError> {
		let number = match self.values.get(position) {
			Some(Value::Number(number)) => number.as_f64(),
			Some(Value::String(text)) => {
				let cleaned: String = text.chars().filter(|ch| !matches!(ch, ',' | '_' | ' ')).collect();
				cleaned.parse::<f64>().ok()
			}
			_ => None,
		};
		number
			.filter(|number| number.is_finite())
			.ok_or_else(|| self.invalid(position, "expected a number"))
	}

	fn count(&self, position: usize) -> Result<usize, HelperError> {
		let number = self.number(position)?;
		if number < 0.0 || number.fract() != 0.0 {
			return Err(self.invalid(position, "expected a non-negative whole number"));
		}
		Ok(number as usize)
	}

	fn optional_count(&self, position: usize) -> Result<Option<usize>, HelperError> {
		match self.values.get(position) {
			None | Some(Value::Null) => Ok(None),
			Some(_) => self.count(position).map(Some),
		}
	}

	fn date(&self, position: usize) -> Result<NaiveDate, HelperError> {
		self.values
			.get(position)
			.and_then(dates::parse_date)
			.ok_or_else(|| self.invalid(position, "expected a date such as 2024-01-31"))
	}
}

fn shift_date(args: &Args<'_>, shift: fn(NaiveDate, i64) -> Option<NaiveDate>) -> Result<Value, HelperError> {
	args.arity(2, 2)?;
	let date = args.date(0)?;
	let amount = args.number(1)?;
	if amount.fract() != 0.0 {
		return Err(args.invalid(1, "expected a whole number"));
	}
	shift(date, amount as i64)
		.map(dates::date_value)
		.ok_or_else(|| args.invalid(1, "the resulting date is out of range"))
}

fn map_text(args: &Args<'_>, transform: impl Fn(&str) -> String) -> Result<Value, HelperError> {
	args.arity(1, 1)?;
	Ok(Value::String(transform(&args.string(0)?)))
}

fn arithmetic(args: &Args<'_>, operation: impl Fn(f64, f64) -> Option<f64>) -> Result<Value, HelperError> {
	args.arity(2, 2)?;
	operation(args.number(0)?, args.number(1)?)
		.filter(|result| result.is_finite())
		.map(number_value)
		.ok_or_else(|| args.invalid(1, "the result is not a finite number"))
}

/// Whole results become integers so they render without a decimal point.
fn number_value(number: f64) -> Value {
	if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
		return Value::from(number as i64);
	}
	Number::from_f64(number).map_or(Value::Null, Value::Number)
}

/// Render with a fixed number of decimals and a thousands separator.
fn format_grouped(number: f64, decimals: usize, separator: &str) -> String {
	let fixed = format!("{:.*}", decimals, number.abs());
	let (whole, fraction) = fixed.split_once('.').unwrap_or((&fixed, ""));

	let mut grouped = String::with_capacity(whole.len() + whole.len() / 3 * separator.len());
	for (index, digit) in whole.chars().enumerate() {
		if index > 0 && (whole.len() - index) % 3 == 0 {
			grouped.push_str(separator);
		}
		grouped.push(digit);
	}

	let mut output = String::new();
	if number < 0.0 && fixed.chars().any(|ch| ch.is_ascii_digit() && ch != '0') {
		output.push('-');
	}
	output.push_str(&grouped);
	if !fraction.is_empty() {
		output.push('.');
		output.push_str(fraction);
	}
	output
}

fn format_currency(amount: f64, currency: &str, decimals: usize) -> String {
	let symbol = match currency.to_ascii_uppercase().as_str() {
		"USD" | "CAD" | "AUD" => "$",
		"EUR" => "€",
		"GBP" => "£",
		"JPY" => "¥",
		_ => "",
	};
	let digits = format_grouped(amount.abs(), decimals, ",");
	let sign = if amount < 0.0 { "-" } else { "" };
	if symbol.is_empty() {
		format!("{sign}{digits} {}", currency.to_ascii_uppercase())
	} else {
		format!("{sign}{symbol}{digits}")
	}
}

const ONES: [&str; 20] = [
	"zero",
	"one",
	"two",
	"three",
	"four",
	"five",
	"six",
	"seven",
	"eight",
	"nine",
	"ten",
	"eleven",
	"twelve",
	"thirteen",
	"fourteen",
	"fifteen",
	"sixteen",
	"seventeen",
	"eighteen",
	"nineteen",
];

const TENS: [&str; 10] = [
	"", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 6] = [
	(1_000_000_000_000_000_000, "quintillion"),
	(1_000_000_000_000_000, "quadrillion"),
	(1_000_000_000_000, "trillion"),
	(1_000_000_000, "billion"),
	(1_000_000, "million"),
	(1_000, "thousand"),
];

/// `1250` → `one thousand two hundred fifty`. Covers the whole `i64` range.
pub fn number_to_words(number: i64) -> String {
	let words = magnitude_words(number.unsigned_abs());
	if number < 0 {
		format!("minus {words}")
	} else {
		words
	}
}

fn magnitude_words(number: u64) -> String {
	if number == 0 {
		return ONES[0].to_string();
	}

	let mut words = Vec::new();
	let mut rest = number;
	for (scale, name) in SCALES {
		if rest >= scale {
			words.push(format!("{} {name}", below_thousand(rest / scale)));
			rest %= scale;
		}
	}
	if rest > 0 {
		words.push(below_thousand(rest));
	}
	words.join(" ")
}

/// `number` must be below one thousand.
fn below_thousand(number: u64) -> String {
	let hundreds = number / 100;
	let rest = number % 100;
	let mut words = Vec::new();
	if hundreds > 0 {
		words.push(format!("{} hundred", below_hundred(hundreds)));
	}
	if rest > 0 {
		words.push(below_hundred(rest));
	}
	words.join(" ")
}

fn below_hundred(number: u64) -> String {
	let number = number as usize;
	if number < 20 {
		return ONES[number].to_string();
	}
	match number % 10 {
		0 => TENS[number / 10].to_string(),
		ones => format!("{}-{}", TENS[number / 10], ONES[ones]),
	}
}

fn capitalize(text: &str) -> String {
	let mut chars = text.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

fn title_case(text: &str) -> String {
	text.split(' ')
		.map(|word| capitalize(&word.to_lowercase()))
		.collect::<Vec<_>>()
		.join(" ")
}

fn camel_case(text: &str) -> String {
	split_words(text)
		.iter()
		.enumerate()
		.map(|(index, word)| {
			let lower = word.to_lowercase();
			if index == 0 { lower } else { capitalize(&lower) }
		})
		.collect()
}

/// Split on punctuation, whitespace and lower-to-upper case changes.
fn split_words(text: &str) -> Vec<String> {
	let mut words = Vec::new();
	let mut current = String::new();
	let mut previous_lower = false;

	for ch in text.chars() {
		if !ch.is_alphanumeric() {
			if !current.is_empty() {
				words.push(std::mem::take(&mut current));
			}
			previous_lower = false;
			continue;
		}
		if ch.is_uppercase() && previous_lower && !current.is_empty() {
			words.push(std::mem::take(&mut current));
		}
		previous_lower = ch.is_lowercase() || ch.is_numeric();
		current.push(ch);
	}
	if !current.is_empty() {
		words.push(current);
	}

	words
}

fn pluralize(word: &str) -> String {
	let lower = word.to_lowercase();
	let vowel_y = ["ay", "ey", "oy", "uy"].iter().any(|suffix| lower.ends_with(suffix));
	if lower.ends_with('y') && !vowel_y {
		return format!("{}ies", &word[..word.len() - 1]);
	}
	if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
		return format!("{word}es");
	}
	format!("{word}s")
}
