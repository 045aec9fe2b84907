use chrono::DateTime;
use chrono::Datelike;
use chrono::Days;
use chrono::FixedOffset;
use chrono::Months;
use chrono::NaiveDate;
use chrono::Utc;
use serde_json::Value;

/// Format used when nothing else is configured or a format is unusable.
pub const ISO_FORMAT: &str = "YYYY-MM-DD";

/// Languages with month and weekday names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
	#[default]
	En,
	Es,
	Fr,
	De,
}

impl Locale {
	/// Parse a locale tag such as `en`, `es-ES` or `fr_CA`. Unknown languages
	/// fall back to English.
	pub fn from_tag(tag: &str) -> Self {
		let language = tag
			.split(['-', '_'])
			.next()
			.unwrap_or_default()
			.to_ascii_lowercase();
		match language.as_str() {
			"es" => Self::Es,
			"fr" => Self::Fr,
			"de" => Self::De,
			_ => Self::En,
		}
	}

	fn month_name(self, month0: usize) -> &'static str {
		const EN: [&str; 12] = [
			"January",
			"February",
			"March",
			"April",
			"May",
			"June",
			"July",
			"August",
			"September",
			"October",
			"November",
			"December",
		];
		const ES: [&str; 12] = [
			"enero",
			"febrero",
			"marzo",
			"abril",
			"mayo",
			"junio",
			"julio",
			"agosto",
			"septiembre",
			"octubre",
			"noviembre",
			"diciembre",
		];
		const FR: [&str; 12] = [
			"janvier",
			"février",
			"mars",
			"avril",
			"mai",
			"juin",
			"juillet",
			"août",
			"septembre",
			"octobre",
			"novembre",
			"décembre",
		];
		const DE: [&str; 12] = [
			"Januar",
			"Februar",
			"März",
			"April",
			"Mai",
			"Juni",
			"Juli",
			"August",
			"September",
			"Oktober",
			"November",
			"Dezember",
		];
		let names = match self {
			Self::En => &EN,
			Self::Es => &ES,
			Self::Fr => &FR,
			Self::De => &DE,
		};
		names[month0 % 12]
	}

	fn weekday_name(self, from_monday: usize) -> &'static str {
		const EN: [&str; 7] = [
			"Monday",
			"Tuesday",
			"Wednesday",
			"Thursday",
			"Friday",
			"Saturday",
			"Sunday",
		];
		const ES: [&str; 7] = [
			"lunes",
			"martes",
			"miércoles",
			"jueves",
			"viernes",
			"sábado",
			"domingo",
		];
		const FR: [&str; 7] = [
			"lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche",
		];
		const DE: [&str; 7] = [
			"Montag",
			"Dienstag",
			"Mittwoch",
			"Donnerstag",
			"Freitag",
			"Samstag",
			"Sonntag",
		];
		let names = match self {
			Self::En => &EN,
			Self::Es => &ES,
			Self::Fr => &FR,
			Self::De => &DE,
		};
		names[from_monday % 7]
	}

	fn ordinal(self, day: u32) -> String {
		match self {
			Self::En => english_ordinal(day),
			Self::Es => format!("{day}º"),
			Self::Fr if day == 1 => "1er".to_string(),
			Self::Fr => format!("{day}e"),
			Self::De => format!("{day}."),
		}
	}
}

/// `1st`, `2nd`, `3rd`, `4th`, `11th`, `21st`, …
pub fn english_ordinal(n: u32) -> String {
	let suffix = match (n % 10, n % 100) {
		(_, 11..=13) => "th",
		(1, _) => "st",
		(2, _) => "nd",
		(3, _) => "rd",
		_ => "th",
	};
	format!("{n}{suffix}")
}

/// Expand a named preset into its token format.
pub fn preset_format(name: &str) -> Option<&'static str> {
	let format = match name.to_ascii_lowercase().as_str() {
		"iso" => ISO_FORMAT,
		"us" => "MM/DD/YYYY",
		"eu" | "european" => "DD/MM/YYYY",
		"long" => "MMMM D, YYYY",
		"medium" => "MMM D, YYYY",
		"short" => "MM/DD/YY",
		"full" => "dddd, MMMM D, YYYY",
		"legal" => "Do [day of] MMMM, YYYY",
		_ => return None,
	};
	Some(format)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateToken {
	Year4,
	Year2,
	MonthName,
	MonthShort,
	Month2,
	Month,
	Ordinal,
	Day2,
	Day,
	WeekdayName,
	WeekdayShort,
}

// Longest tokens first so `MMMM` wins over `MM`.
const DATE_TOKENS: [(&str, DateToken); 11] = [
	("YYYY", DateToken::Year4),
	("MMMM", DateToken::MonthName),
	("dddd", DateToken::WeekdayName),
	("MMM", DateToken::MonthShort),
	("ddd", DateToken::WeekdayShort),
	("YY", DateToken::Year2),
	("MM", DateToken::Month2),
	("Do", DateToken::Ordinal),
	("DD", DateToken::Day2),
	("M", DateToken::Month),
	("D", DateToken::Day),
];

enum FormatPart<'a> {
	Literal(&'a str),
	Token(DateToken),
}

/// Split a format into literal text and date tokens. `[...]` escapes text.
/// Returns `None` when the format contains no recognised token.
fn tokenize_format(format: &str) -> Option<Vec<FormatPart<'_>>> {
	let mut parts = Vec::new();
	let mut rest = format;
	let mut literal_start: Option<&str> = None;
	let mut found_token = false;

	while !rest.is_empty() {
		if let Some(escaped) = rest.strip_prefix('[') {
			if let Some(end) = escaped.find(']') {
				flush_literal(&mut parts, &mut literal_start, rest);
				parts.push(FormatPart::Literal(&escaped[..end]));
				rest = &escaped[end + 1..];
				continue;
			}
		}

		if let Some((pattern, token)) = DATE_TOKENS.iter().find(|(p, _)| rest.starts_with(p)) {
			flush_literal(&mut parts, &mut literal_start, rest);
			parts.push(FormatPart::Token(*token));
			found_token = true;
			rest = &rest[pattern.len()..];
			continue;
		}

		if literal_start.is_none() {
			literal_start = Some(rest);
		}
		let width = rest.chars().next().map_or(1, char::len_utf8);
		rest = &rest[width..];
	}
	flush_literal(&mut parts, &mut literal_start, rest);

	found_token.then_some(parts)
}

fn flush_literal<'a>(parts: &mut Vec<FormatPart<'a>>, start: &mut Option<&'a str>, rest: &'a str) {
	if let Some(start) = start.take() {
		let len = start.len() - rest.len();
		parts.push(FormatPart::Literal(&start[..len]));
	}
}

/// Format `date` with a preset name or a token format. Formats without any
/// recognised token fall back to ISO.
pub fn format_date(date: NaiveDate, format: &str, locale: Locale) -> String {
	let format = preset_format(format).unwrap_or(format);
	let parts = tokenize_format(format)
		.or_else(|| tokenize_format(ISO_FORMAT))
		.unwrap_or_default();

	let mut output = String::new();
	for part in parts {
		match part {
			FormatPart::Literal(text) => output.push_str(text),
			FormatPart::Token(token) => output.push_str(&render_token(date, token, locale)),
		}
	}
	output
}

fn render_token(date: NaiveDate, token: DateToken, locale: Locale) -> String {
	let month0 = date.month0() as usize;
	let weekday = date.weekday().num_days_from_monday() as usize;
	match token {
		DateToken::Year4 => format!("{:04}", date.year()),
		DateToken::Year2 => format!("{:02}", date.year().rem_euclid(100)),
		DateToken::MonthName => locale.month_name(month0).to_string(),
		DateToken::MonthShort => locale.month_name(month0).chars().take(3).collect(),
		DateToken::Month2 => format!("{:02}", date.month()),
		DateToken::Month => date.month().to_string(),
		DateToken::Ordinal => locale.ordinal(date.day()),
		DateToken::Day2 => format!("{:02}", date.day()),
		DateToken::Day => date.day().to_string(),
		DateToken::WeekdayName => locale.weekday_name(weekday).to_string(),
		DateToken::WeekdayShort => locale.weekday_name(weekday).chars().take(3).collect(),
	}
}

/// Read a date from a metadata value. Accepts `YYYY-MM-DD`, `YYYY/MM/DD`,
/// RFC 3339 timestamps and ISO date-times.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
	let text = value.as_str()?.trim();
	if text.is_empty() {
		return None;
	}

	for format in ["%Y-%m-%d", "%Y/%m/%d"] {
		if let Ok(date) = NaiveDate::parse_from_str(text, format) {
			return Some(date);
		}
	}
	if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
		return Some(timestamp.date_naive());
	}
	text.get(..10)
		.and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// The metadata representation of a computed date.
pub fn date_value(date: NaiveDate) -> Value {
	Value::String(date.format("%Y-%m-%d").to_string())
}

pub fn add_years(date: NaiveDate, years: i64) -> Option<NaiveDate> {
	add_months(date, years.checked_mul(12)?)
}

/// Add calendar months, clamping to the end of shorter months.
pub fn add_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
	let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
	if months >= 0 {
		date.checked_add_months(magnitude)
	} else {
		date.checked_sub_months(magnitude)
	}
}

pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
	let magnitude = Days::new(days.unsigned_abs());
	if days >= 0 {
		date.checked_add_days(magnitude)
	} else {
		date.checked_sub_days(magnitude)
	}
}

/// Parse `UTC`, `Z`, `GMT` or a fixed offset like `+02:00`, `-0500`.
pub fn parse_offset(timezone: &str) -> Option<FixedOffset> {
	let tz = timezone.trim();
	if ["utc", "z", "gmt"].contains(&tz.to_ascii_lowercase().as_str()) {
		return FixedOffset::east_opt(0);
	}

	let tz = tz
		.strip_prefix("UTC")
		.or_else(|| tz.strip_prefix("GMT"))
		.unwrap_or(tz);
	let (sign, digits) = match tz.as_bytes().first()? {
		b'+' => (1, &tz[1..]),
		b'-' => (-1, &tz[1..]),
		_ => return None,
	};
	let digits: String = digits.chars().filter(|ch| *ch != ':').collect();
	if !digits.chars().all(|ch| ch.is_ascii_digit()) {
		return None;
	}
	let (hours, minutes) = match digits.len() {
		1 | 2 => (digits.parse::<i32>().ok()?, 0),
		4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
		_ => return None,
	};
	FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// The current date in `timezone`. Unknown zones fall back to UTC.
pub fn today_in(timezone: Option<&str>) -> NaiveDate {
	let now = Utc::now();
	let offset = timezone.and_then(|tz| {
		let offset = parse_offset(tz);
		if offset.is_none() {
			tracing::warn!(timezone = tz, "unsupported timezone; using UTC");
		}
		offset
	});
	match offset {
		Some(offset) => now.with_timezone(&offset).date_naive(),
		None => now.date_naive(),
	}
}
