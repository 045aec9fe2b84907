//! Hierarchical header numbering.
//!
//! Header lines start with a level marker followed by a `.` delimiter, in one
//! of two notations:
//!
//! ```text
//! l. First level        l1. First level
//! ll. Second level      l2. Second level
//! lllll. Fifth level    l5. Fifth level
//! ```
//!
//! Each marker is replaced by the level's rendered label. Level formats accept
//! these placeholders:
//!
//! - `%n`: the primary counter (the level's own counter for levels 1–3, the
//!   level-three counter for levels 4 and 5).
//! - `%c` / `%C`: the secondary counter as lower/upper-case letters (own
//!   counter for levels 1–4, the level-four counter for level 5).
//! - `%r` / `%R`: the level's own counter as lower/upper-case roman numerals.
//! - `%l1` … `%l5`: any level's counter as a number.
//! - `%%`: a literal `%`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::metadata::Metadata;

pub const LEVELS: usize = 5;

/// Formats used for levels without a custom format.
pub const DEFAULT_LEVEL_FORMATS: [&str; LEVELS] =
	["Article %n.", "Section %n.", "(%n)", "(%n%c)", "(%n%c%r)"];

/// Metadata keys holding the per-level formats.
pub const LEVEL_FORMAT_KEYS: [&str; LEVELS] = [
	"level-one",
	"level-two",
	"level-three",
	"level-four",
	"level-five",
];

pub const DEFAULT_INDENT_STEP: usize = 2;

static HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[ \t]*(?P<marker>l{1,5}|l[1-5])\.(?:[ \t]+(?P<text>.*?))?[ \t]*$")
		.expect("static header pattern compiles")
});

/// Convert a counter to letters: `1 → a`, `26 → z`, `27 → aa`. Zero renders
/// as an empty string.
pub fn to_alphabetic(mut n: u32) -> String {
	let mut letters = Vec::new();
	while n > 0 {
		n -= 1;
		letters.push(char::from(b'a' + (n % 26) as u8));
		n /= 26;
	}
	letters.iter().rev().collect()
}

/// Convert a counter to lower-case roman numerals. Zero renders as an empty
/// string.
pub fn to_roman(mut n: u32) -> String {
	const NUMERALS: [(u32, &str); 13] = [
		(1000, "m"),
		(900, "cm"),
		(500, "d"),
		(400, "cd"),
		(100, "c"),
		(90, "xc"),
		(50, "l"),
		(40, "xl"),
		(10, "x"),
		(9, "ix"),
		(5, "v"),
		(4, "iv"),
		(1, "i"),
	];

	let mut output = String::new();
	for (value, numeral) in NUMERALS {
		while n >= value {
			output.push_str(numeral);
			n -= value;
		}
	}
	output
}

/// Per-document header configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderOptions {
	pub formats: [String; LEVELS],
	/// Spaces of indentation per level below the first.
	pub indent_step: usize,
	/// Disable resetting deeper counters for every level.
	pub no_reset: bool,
	/// Disable indentation for every level.
	pub no_indent: bool,
	/// Levels whose counters never reset, even when resetting is enabled.
	pub reset_exempt: [bool; LEVELS],
	/// Levels that are never indented.
	pub indent_exempt: [bool; LEVELS],
}

impl Default for HeaderOptions {
	fn default() -> Self {
		Self {
			formats: DEFAULT_LEVEL_FORMATS.map(String::from),
			indent_step: DEFAULT_INDENT_STEP,
			no_reset: false,
			no_indent: false,
			reset_exempt: [false; LEVELS],
			indent_exempt: [false; LEVELS],
		}
	}
}

impl HeaderOptions {
	/// Read `level-one` … `level-five`, `level-indent`, `no-reset` and
	/// `no-indent` from metadata on top of the host's flags.
	pub fn from_metadata(metadata: &Metadata, no_reset: bool, no_indent: bool) -> Self {
		let mut options = Self {
			no_reset,
			no_indent,
			..Self::default()
		};

		for (level, key) in LEVEL_FORMAT_KEYS.iter().enumerate() {
			if let Some(format) = metadata.get_str(key) {
				options.formats[level] = format.to_string();
			}
		}

		if let Some(step) = metadata.get("level-indent").and_then(Value::as_f64) {
			if step >= 0.0 {
				options.indent_step = step.round() as usize;
			}
		}

		match metadata.get("no-reset") {
			Some(Value::Bool(flag)) => options.no_reset |= *flag,
			Some(levels) => options.reset_exempt = parse_level_list(levels),
			None => {}
		}
		match metadata.get("no-indent") {
			Some(Value::Bool(flag)) => options.no_indent |= *flag,
			Some(levels) => options.indent_exempt = parse_level_list(levels),
			None => {}
		}

		options
	}
}

/// Parse `"l., ll."`, `"l1, l2"` or a sequence of such markers.
fn parse_level_list(value: &Value) -> [bool; LEVELS] {
	let mut levels = [false; LEVELS];
	let markers: Vec<String> = match value {
		Value::String(text) => text.split([',', ' ']).map(str::to_string).collect(),
		Value::Array(items) => items.iter().filter_map(|item| item.as_str().map(str::to_string)).collect(),
		_ => Vec::new(),
	};

	for marker in markers {
		if let Some(level) = marker_level(marker.trim().trim_end_matches('.')) {
			levels[level - 1] = true;
		}
	}
	levels
}

/// `l` → 1, `lll` → 3, `l4` → 4.
fn marker_level(marker: &str) -> Option<usize> {
	if marker.is_empty() {
		return None;
	}
	if let Some(digit) = marker.strip_prefix('l').and_then(|rest| rest.parse::<usize>().ok()) {
		return (1..=LEVELS).contains(&digit).then_some(digit);
	}
	(marker.len() <= LEVELS && marker.bytes().all(|b| b == b'l')).then_some(marker.len())
}

/// One counter per header level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NumberingState {
	counters: [u32; LEVELS],
}

impl NumberingState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Count a header at `level` (1-based). Deeper counters are zeroed first
	/// unless `reset` is false or the deeper level is exempt.
	pub fn advance(&mut self, level: usize, reset: bool, exempt: &[bool; LEVELS]) {
		let index = level.clamp(1, LEVELS) - 1;
		if reset {
			for deeper in index + 1..LEVELS {
				if !exempt[deeper] {
					self.counters[deeper] = 0;
				}
			}
		}
		self.counters[index] = self.counters[index].saturating_add(1);
	}

	/// The counter for `level` (1-based).
	pub fn counter(&self, level: usize) -> u32 {
		self.counters[level.clamp(1, LEVELS) - 1]
	}

	/// Render `format` for a header at `level`.
	pub fn render(&self, format: &str, level: usize) -> String {
		let primary = self.counter(level.min(3));
		let secondary = self.counter(level.min(4));
		let own = self.counter(level);

		let mut output = String::with_capacity(format.len() + 8);
		let mut chars = format.chars().peekable();
		while let Some(ch) = chars.next() {
			if ch != '%' {
				output.push(ch);
				continue;
			}

			match chars.peek().copied() {
				Some('n') => output.push_str(&primary.to_string()),
				Some('c') => output.push_str(&to_alphabetic(secondary)),
				Some('C') => output.push_str(&to_alphabetic(secondary).to_uppercase()),
				Some('r') => output.push_str(&to_roman(own)),
				Some('R') => output.push_str(&to_roman(own).to_uppercase()),
				Some('%') => output.push('%'),
				Some('l') => {
					chars.next();
					match chars.peek().and_then(|d| d.to_digit(10)) {
						Some(digit @ 1..=5) => {
							output.push_str(&self.counter(digit as usize).to_string());
						}
						_ => {
							output.push_str("%l");
							continue;
						}
					}
				}
				_ => {
					output.push('%');
					continue;
				}
			}
			chars.next();
		}

		output
	}
}

/// Replace every header marker in `content` with its numbered label.
///
/// Lines inside fenced code blocks are left alone, as are marker lines without
/// the `.` delimiter.
pub fn number_headers(content: &str, options: &HeaderOptions) -> String {
	let mut state = NumberingState::new();
	let mut output = String::with_capacity(content.len());
	let mut fence: Option<&str> = None;

	for line in content.split_inclusive('\n') {
		let (text, ending) = split_line_ending(line);
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

		let Some(captures) = HEADER_LINE.captures(text) else {
			output.push_str(line);
			continue;
		};
		let Some(level) = captures
			.name("marker")
			.and_then(|marker| marker_level(marker.as_str()))
		else {
			output.push_str(line);
			continue;
		};

		state.advance(level, !options.no_reset, &options.reset_exempt);
		let label = state.render(&options.formats[level - 1], level);
		let title = captures.name("text").map_or("", |m| m.as_str());

		if !options.no_indent && !options.indent_exempt[level - 1] {
			output.push_str(&" ".repeat((level - 1) * options.indent_step));
		}
		output.push_str(&label);
		if !title.is_empty() {
			if !label.is_empty() {
				output.push(' ');
			}
			output.push_str(title);
		}
		output.push_str(ending);
	}

	output
}

fn split_line_ending(line: &str) -> (&str, &str) {
	let text = line.trim_end_matches(['\n', '\r']);
	(text, &line[text.len()..])
}
