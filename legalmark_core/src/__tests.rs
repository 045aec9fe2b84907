use float_cmp::approx_eq;
use rstest::rstest;
use serde_json::Value;
use serde_json::json;
use similar_asserts::assert_eq;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;
use crate::clauses::Condition;
use crate::clauses::Leaf;
use crate::clauses::Operand;
use crate::clauses::process_clauses;
use crate::dates::Locale;
use crate::dates::format_date;
use crate::dates::parse_offset;
use crate::headers::HeaderOptions;
use crate::headers::number_headers;
use crate::headers::to_alphabetic;
use crate::headers::to_roman;
use crate::imports::ImportOptions;
use crate::imports::resolve_imports;
use crate::imports::resolve_name;
use crate::merge::flatten;
use crate::merge::unflatten;
use crate::metadata::ValueKind;
use crate::metadata::is_truthy;
use crate::metadata::parse_front_matter;
use crate::references::ReferenceContext;
use crate::references::process_references;
use crate::template::TemplateContext;
use crate::template::detect_helper_syntax;
use crate::template::expand_blocks;
use crate::template::number_to_words;
use crate::template::render_expressions;
use crate::tracking::annotate_fields;
use crate::tracking::mark_field;
use crate::tracking::strip_markers;

fn render(template: &str, metadata: &Metadata) -> LegalResult<String> {
	let context = template_context();
	let expanded = expand_blocks(template, metadata, &context)?;
	render_expressions(&expanded, metadata, &context)
}

fn number(content: &str, metadata: &Metadata) -> String {
	number_headers(content, &HeaderOptions::from_metadata(metadata, false, false))
}

// --- metadata ---

#[test]
fn parses_front_matter_in_declaration_order() -> LegalResult<()> {
	let parsed = parse_front_matter(
		"---\ntitle: NDA\nparties:\n  - Acme\n  - Beta\n1: numeric key\n---\nBody\n",
		true,
	)?;

	let keys: Vec<&str> = parsed.metadata.keys().map(String::as_str).collect();
	assert_eq!(keys, vec!["title", "parties", "1"]);
	assert_eq!(parsed.metadata.lookup("parties.1"), Some(&json!("Beta")));
	assert_eq!(parsed.body, "Body\n");
	assert!(parsed.warnings.is_empty());

	Ok(())
}

#[test]
fn document_without_front_matter_is_all_body() -> LegalResult<()> {
	let parsed = parse_front_matter("l. Heading\n---\n", true)?;
	assert!(parsed.metadata.is_empty());
	assert_eq!(parsed.body, "l. Heading\n---\n");

	Ok(())
}

#[test]
fn malformed_front_matter_recovers_entries_in_lenient_mode() -> LegalResult<()> {
	let text = "---\ntitle: NDA\nbad: [unclosed\ncount: 3\n---\nBody\n";

	let parsed = parse_front_matter(text, false)?;
	assert_eq!(parsed.metadata.get("title"), Some(&json!("NDA")));
	assert_eq!(parsed.metadata.get("count"), Some(&json!(3)));
	assert!(!parsed.metadata.contains_key("bad"));
	assert_eq!(parsed.warnings.len(), 2);
	assert_eq!(parsed.body, "Body\n");

	let error = parse_front_matter(text, true).unwrap_err();
	assert!(matches!(error, LegalError::MetadataParse { .. }));

	Ok(())
}

#[test]
fn unterminated_front_matter_depends_on_strictness() -> LegalResult<()> {
	let text = "---\ntitle: NDA\nBody\n";

	let parsed = parse_front_matter(text, false)?;
	assert!(parsed.metadata.is_empty());
	assert_eq!(parsed.body, text);
	assert_eq!(parsed.warnings.len(), 1);

	let error = parse_front_matter(text, true).unwrap_err();
	assert_eq!(error.excerpt(), "title: NDA");

	Ok(())
}

#[rstest]
#[case::boolean_true(json!(true), true)]
#[case::boolean_false(json!(false), false)]
#[case::one(json!(1), true)]
#[case::zero(json!(0), false)]
#[case::empty_string(json!(""), false)]
#[case::text(json!("x"), true)]
#[case::null(Value::Null, false)]
#[case::empty_sequence(json!([]), true)]
#[case::sequence(json!([1]), true)]
fn truthiness_table(#[case] value: Value, #[case] expected: bool) {
	let metadata = metadata(json!({ "flag": value }));
	assert_eq!(is_truthy(metadata.get("flag")), expected);

	let rendered = process_clauses("[kept]{flag}", &metadata);
	assert_eq!(rendered, if expected { "kept" } else { "" });
}

#[test]
fn undefined_fields_are_falsy() {
	assert!(!is_truthy(None));
	assert_eq!(process_clauses("[kept]{missing}", &Metadata::new()), "");
}

// --- merge ---

#[test]
fn destination_wins_on_direct_conflicts() -> LegalResult<()> {
	let destination = metadata(json!({ "a": 1 }));
	let source = metadata(json!({ "a": 2, "b": 3 }));

	let outcome = merge_metadata(&destination, &source, &MergeOptions::default())?;
	assert_eq!(outcome.metadata, metadata(json!({ "a": 1, "b": 3 })));
	assert_eq!(outcome.stats.added_count(), 1);
	assert_eq!(outcome.stats.conflict_count(), 1);
	assert_eq!(outcome.stats.filtered_count(), 0);

	Ok(())
}

#[test]
fn reserved_fields_are_never_imported() -> LegalResult<()> {
	let destination = metadata(json!({ "title": "Host" }));
	let source = metadata(json!({
		"level-one": "Part %n",
		"Force-Commands": "--no-reset",
		"TimeZone": "+01:00",
		"clause": "kept",
	}));

	let outcome = merge_metadata(&destination, &source, &MergeOptions::default())?;
	assert_eq!(outcome.metadata, metadata(json!({ "title": "Host", "clause": "kept" })));
	assert_eq!(outcome.stats.filtered, vec!["level-one", "Force-Commands", "TimeZone"]);

	Ok(())
}

#[rstest]
#[case::source_is_shallower(json!({ "a": { "b": 1 } }), json!({ "a": 2 }))]
#[case::source_is_deeper(json!({ "a": 1 }), json!({ "a": { "b": 2 } }))]
fn structural_conflicts_are_discarded(#[case] destination: Value, #[case] source: Value) -> LegalResult<()> {
	let destination = metadata(destination);
	let outcome = merge_metadata(&destination, &metadata(source), &MergeOptions::default())?;

	assert_eq!(outcome.metadata, destination);
	assert_eq!(outcome.stats.conflict_count(), 1);
	assert_eq!(outcome.stats.added_count(), 0);

	Ok(())
}

#[test]
fn nested_leaves_merge_next_to_existing_ones() -> LegalResult<()> {
	let destination = metadata(json!({ "client": { "name": "Acme" } }));
	let source = metadata(json!({ "client": { "name": "Other", "city": "Lagos" } }));

	let outcome = merge_metadata(&destination, &source, &MergeOptions::default())?;
	assert_eq!(
		outcome.metadata,
		metadata(json!({ "client": { "name": "Acme", "city": "Lagos" } }))
	);
	assert_eq!(outcome.stats.added, vec!["client.city"]);
	assert_eq!(outcome.stats.conflicts, vec!["client.name"]);

	Ok(())
}

#[test]
fn incompatible_types_are_reported() -> LegalResult<()> {
	let destination = metadata(json!({ "term": "two years", "count": "5" }));
	let source = metadata(json!({ "term": ["2", "years"], "count": 5 }));

	let outcome = merge_metadata(&destination, &source, &MergeOptions::default())?;
	assert!(outcome.stats.has_type_conflicts());
	assert_eq!(outcome.stats.type_conflicts.len(), 1);
	let conflict = &outcome.stats.type_conflicts[0];
	assert_eq!(conflict.path, "term");
	assert_eq!(conflict.existing, ValueKind::String);
	assert_eq!(conflict.incoming, ValueKind::Sequence);

	let unchecked = MergeOptions {
		validate_types: false,
		..MergeOptions::default()
	};
	let outcome = merge_metadata(&destination, &source, &unchecked)?;
	assert!(!outcome.stats.has_type_conflicts());

	Ok(())
}

#[test]
fn merge_fails_when_the_budget_is_spent() {
	let options = MergeOptions {
		timeout: std::time::Duration::ZERO,
		..MergeOptions::default()
	};
	let error = merge_metadata(&metadata(json!({ "a": 1 })), &metadata(json!({ "b": 2 })), &options)
		.unwrap_err();
	assert!(matches!(error, LegalError::MergeTimeout { .. }));
}

#[rstest]
#[case::flat(json!({ "a": 1, "b": "two" }))]
#[case::nested(json!({ "client": { "name": "Acme", "address": { "city": "Lagos" } } }))]
#[case::arrays_are_atomic(json!({ "parties": [{ "name": "A" }, { "name": "B" }], "tags": [] }))]
#[case::empty_mapping(json!({ "a": {}, "b": { "c": {} } }))]
#[case::dotted_keys(json!({ "v1.2": { "a.b": true }, "back\\slash": null }))]
fn flatten_round_trips(#[case] value: Value) -> LegalResult<()> {
	let original = metadata(value);
	assert_eq!(unflatten(&flatten(&original)?), original);

	Ok(())
}

#[test]
fn flatten_keeps_arrays_whole() -> LegalResult<()> {
	let flat = flatten(&metadata(json!({ "a": { "b": [1, { "c": 2 }] } })))?;
	let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
	assert_eq!(keys, vec!["a.b"]);

	Ok(())
}

// --- headers ---

#[rstest]
#[case(0, "", "")]
#[case(1, "a", "i")]
#[case(4, "d", "iv")]
#[case(9, "i", "ix")]
#[case(14, "n", "xiv")]
#[case(26, "z", "xxvi")]
#[case(27, "aa", "xxvii")]
#[case(1994, "bxr", "mcmxciv")]
fn counter_conversions(#[case] value: u32, #[case] alphabetic: &str, #[case] roman: &str) {
	assert_eq!(to_alphabetic(value), alphabetic);
	assert_eq!(to_roman(value), roman);
}

#[test]
fn same_level_headers_number_consecutively() {
	let output = number("l. A\nl. B\nl. C\n", &Metadata::new());
	assert_eq!(output, "Article 1. A\nArticle 2. B\nArticle 3. C\n");
}

#[test]
fn deeper_counters_reset_under_a_new_parent() {
	let input = "l. A\nll. B\nl. C\nll. D\n";

	let output = number_headers(input, &HeaderOptions::default());
	assert_eq!(
		output,
		"Article 1. A\n  Section 1. B\nArticle 2. C\n  Section 1. D\n"
	);

	let no_reset = HeaderOptions {
		no_reset: true,
		..HeaderOptions::default()
	};
	let output = number_headers(input, &no_reset);
	assert_eq!(
		output,
		"Article 1. A\n  Section 1. B\nArticle 2. C\n  Section 2. D\n"
	);
}

#[test]
fn reset_exemptions_apply_per_level() {
	let output = number(
		"l. A\nll. B\nl. C\nll. D\n",
		&metadata(json!({ "no-reset": "ll." })),
	);
	assert_eq!(
		output,
		"Article 1. A\n  Section 1. B\nArticle 2. C\n  Section 2. D\n"
	);
}

#[test]
fn all_five_levels_use_default_formats() {
	let output = number(
		"l. A\nll. B\nlll. C\nllll. D\nlllll. E\nlllll. F\n",
		&Metadata::new(),
	);
	assert_eq!(
		output,
		"Article 1. A\n  Section 1. B\n    (1) C\n      (1a) D\n        (1ai) E\n        (1aii) F\n"
	);
}

#[test]
fn digit_markers_match_repeated_markers() {
	let output = number("l1. A\nl2. B\nl2. C\n", &Metadata::new());
	assert_eq!(output, "Article 1. A\n  Section 1. B\n  Section 2. C\n");
}

#[test]
fn skipped_levels_do_not_error() {
	let output = number("l. A\nlll. C\n", &Metadata::new());
	assert_eq!(output, "Article 1. A\n    (1) C\n");
}

#[test]
fn custom_formats_and_indentation_come_from_metadata() {
	let formats = metadata(json!({
		"level-one": "Chapter %R:",
		"level-two": "%l1.%n",
		"no-indent": true,
	}));
	let output = number("l. A\nll. B\nll. C\nl. D\nll. E", &formats);
	assert_eq!(output, "Chapter I: A\n1.1 B\n1.2 C\nChapter II: D\n2.1 E");

	let stepped = metadata(json!({ "level-indent": 4 }));
	assert_eq!(number("l. A\nll. B\n", &stepped), "Article 1. A\n    Section 1. B\n");

	let flat = metadata(json!({ "level-indent": 0 }));
	assert_eq!(number("l. A\nll. B\n", &flat), "Article 1. A\nSection 1. B\n");
}

#[test]
fn non_headers_are_left_alone() {
	let input = "l Missing delimiter\n```\nl. Inside a fence\n```\nl. Real\r\n";
	let output = number(input, &Metadata::new());
	assert_eq!(
		output,
		"l Missing delimiter\n```\nl. Inside a fence\n```\nArticle 1. Real\r\n"
	);
}

// --- clauses ---

#[rstest]
#[case::equality(r#"[Delaware law]{jurisdiction = "Delaware"}"#, "Delaware law")]
#[case::double_equals("[Delaware law]{jurisdiction == Delaware}", "Delaware law")]
#[case::inequality(r#"[Foreign law]{jurisdiction != "Delaware"}"#, "")]
#[case::dotted_path("[Lagos office]{client.city = 'Lagos'}", "Lagos office")]
#[case::number_coercion("[Two parties]{count = 2}", "Two parties")]
#[case::flat_left_to_right("[X]{premium OR missing AND missing}", "")]
#[case::symbols("[X]{premium && count = 2 || missing}", "X")]
#[case::empty_condition("[Always]{}", "Always")]
#[case::malformed_leaf("[X]{premium =} after", " after")]
#[case::unreadable_leaf("[X]{premium OR count > 1}", "X")]
#[case::unreadable_leaf_is_false("[X]{count > 1 OR missing}", "")]
#[case::nested("[Outer [inner]{missing} end]{premium}", "Outer  end")]
#[case::template_link("[see]{{ reference }}", "[see]{{ reference }}")]
#[case::plain_brackets("[not a clause] (text)", "[not a clause] (text)")]
fn clause_evaluation(#[case] input: &str, #[case] expected: &str) {
	let metadata = metadata(json!({
		"jurisdiction": "Delaware",
		"client": { "city": "Lagos" },
		"count": "2",
		"premium": true,
	}));
	assert_eq!(process_clauses(input, &metadata), expected);
}

#[test]
fn clause_operands_are_typed() {
	let condition = Condition::parse("amount = 2.5");
	let Some(Leaf::Compare {
		operand: Operand::Number(amount),
		..
	}) = &condition.first
	else {
		panic!("expected a numeric comparison, got {condition:?}");
	};
	assert!(approx_eq!(f64, *amount, 2.5, ulps = 2));

	let metadata = metadata(json!({ "amount": 2.5 }));
	assert!(condition.evaluate(&metadata));
}

// --- cross-references and dates ---

#[rstest]
#[case::reference("Between |client.name| and |provider|.", "Between Acme Ltd and Beta LLC.")]
#[case::unresolved("Signed by |signatory|.", "Signed by |signatory|.")]
#[case::sequence("Parties: |parties|", "Parties: Acme, Beta")]
#[case::today("Dated @today.", "Dated 2026-10-16.")]
#[case::today_preset("Dated @today[legal].", "Dated 16th day of October, 2026.")]
#[case::today_tokens("@today[DD/MM/YYYY]", "16/10/2026")]
#[case::today_full("@today[full]", "Friday, October 16, 2026")]
#[case::unknown_format("@today[nonsense]", "2026-10-16")]
#[case::inside_expression("|provider| {{ |provider| }}", "Beta LLC {{ |provider| }}")]
fn cross_references(#[case] input: &str, #[case] expected: &str) {
	let metadata = contract_metadata();
	let context = ReferenceContext::from_metadata(&metadata, fixed_today(), false);
	assert_eq!(process_references(input, &metadata, &context), expected);
}

#[test]
fn document_date_format_and_locale_apply_to_today() {
	let metadata = metadata(json!({ "date-format": "long", "locale": "es-ES" }));
	let context = ReferenceContext::from_metadata(&metadata, fixed_today(), false);
	assert_eq!(process_references("@today", &metadata, &context), "octubre 16, 2026");
	assert_eq!(
		process_references("@today[US]", &metadata, &context),
		"10/16/2026"
	);
}

#[rstest]
#[case(Locale::En, "Do MMM YY", "16th Oct 26")]
#[case(Locale::Fr, "dddd D MMMM YYYY", "vendredi 16 octobre 2026")]
#[case(Locale::De, "Do MMMM", "16. Oktober")]
#[case(Locale::En, "[Day] D [of] M", "Day 16 of 10")]
fn date_formats(#[case] locale: Locale, #[case] format: &str, #[case] expected: &str) {
	assert_eq!(format_date(fixed_today(), format, locale), expected);
}

#[rstest]
#[case("UTC", Some(0))]
#[case("Z", Some(0))]
#[case("+02:00", Some(7200))]
#[case("-0530", Some(-19_800))]
#[case("Mars/Olympus", None)]
fn timezone_offsets(#[case] timezone: &str, #[case] seconds: Option<i32>) {
	assert_eq!(
		parse_offset(timezone).map(|offset| offset.local_minus_utc()),
		seconds
	);
}

// --- template engine ---

#[test]
fn loop_renders_each_item_in_order() -> LegalResult<()> {
	let template = "{{#each items}}{{name}}: {{price}}{{/each}}";
	assert_eq!(render(template, &contract_metadata())?, "A: 1B: 2");

	Ok(())
}

#[rstest]
#[case::without_else("{{#each items}}x{{/each}}", "")]
#[case::with_else("{{#each items}}x{{else}}none{{/each}}", "none")]
fn empty_loops(#[case] template: &str, #[case] expected: &str) -> LegalResult<()> {
	assert_eq!(render(template, &metadata(json!({ "items": [] })))?, expected);
	assert_eq!(render(template, &Metadata::new())?, expected);

	Ok(())
}

#[test]
fn loop_variables() -> LegalResult<()> {
	let metadata = metadata(json!({
		"names": ["a", "b", "c"],
		"fees": { "setup": 100, "monthly": 20 },
	}));

	let template = "{{#each names}}{{@index}}{{this}}{{#if @first}}F{{/if}}{{#if @last}}L{{/if}};{{/each}}";
	assert_eq!(render(template, &metadata)?, "0aF;1b;2cL;");

	let template = "{{#each fees}}{{@key}}={{this}} {{/each}}";
	assert_eq!(render(template, &metadata)?, "setup=100 monthly=20 ");

	Ok(())
}

#[test]
fn nested_loops_reach_outer_scopes() -> LegalResult<()> {
	let metadata = metadata(json!({
		"company": "Acme",
		"parties": [
			{ "name": "X", "roles": ["buyer", "payer"] },
			{ "name": "Y", "roles": ["seller"] },
		],
	}));
	let template = "{{#each parties}}{{#each roles}}{{../name}} as {{this}} for {{company}}; {{/each}}{{/each}}";

	assert_eq!(
		render(template, &metadata)?,
		"X as buyer for Acme; X as payer for Acme; Y as seller for Acme; "
	);

	Ok(())
}

#[rstest]
#[case::if_true("{{#if premium}}P{{else}}S{{/if}}", "P")]
#[case::if_false("{{#if missing}}P{{else}}S{{/if}}", "S")]
#[case::unless("{{#unless premium}}S{{else}}P{{/unless}}", "P")]
#[case::empty_sequence_is_truthy("{{#if empty}}yes{{/if}}", "yes")]
#[case::helper_condition("{{#if eq provider \"Beta LLC\"}}beta{{/if}}", "beta")]
#[case::comment("a{{! internal note }}b{{!-- longer note --}}c", "abc")]
fn conditionals(#[case] template: &str, #[case] expected: &str) -> LegalResult<()> {
	let mut metadata = contract_metadata();
	metadata.insert("empty".into(), json!([]));
	assert_eq!(render(template, &metadata)?, expected);

	Ok(())
}

#[rstest]
#[case::upper("{{ upper client.name }}", "ACME LTD")]
#[case::lower("{{ lower provider }}", "beta llc")]
#[case::capitalize("{{ capitalize \"acme\" }}", "Acme")]
#[case::title_case("{{ titleCase \"the BIG deal\" }}", "The Big Deal")]
#[case::kebab_case("{{ kebabCase \"Master Services Agreement\" }}", "master-services-agreement")]
#[case::snake_case("{{ snakeCase \"effectiveDate\" }}", "effective_date")]
#[case::camel_case("{{ camelCase \"governing law\" }}", "governingLaw")]
#[case::pascal_case("{{ pascalCase \"governing law\" }}", "GoverningLaw")]
#[case::initials("{{ initials \"Jane Q Public\" }}", "JQP")]
#[case::truncate("{{ truncate \"Confidential\" 6 }}", "Confid...")]
#[case::concat("{{ concat \"A\" \"-\" 1 }}", "A-1")]
#[case::trim("{{ trim \"  x  \" }}", "x")]
#[case::replace("{{ replace \"a-b-c\" \"-\" \"/\" }}", "a/b/c")]
#[case::join("{{ join parties \" & \" }}", "Acme & Beta")]
#[case::pluralize_many("{{ pluralize \"party\" 2 }}", "parties")]
#[case::pluralize_one("{{ pluralize \"party\" 1 }}", "party")]
#[case::default_missing("{{ default nickname \"n/a\" }}", "n/a")]
#[case::add("{{ add 2 3 }}", "5")]
#[case::subtract("{{ subtract 10 2.5 }}", "7.5")]
#[case::multiply("{{ multiply amount 2 }}", "2469")]
#[case::divide("{{ divide 10 4 }}", "2.5")]
#[case::round("{{ round 3.14159 2 }}", "3.14")]
#[case::currency("{{ formatCurrency amount }}", "$1,234.50")]
#[case::currency_code("{{ formatCurrency 1234.56 \"EUR\" 0 }}", "€1,235")]
#[case::currency_unknown("{{ formatCurrency 5 \"NGN\" }}", "5.00 NGN")]
#[case::integer("{{ formatInteger 1234567 }}", "1,234,567")]
#[case::percent("{{ formatPercent 0.125 1 }}", "12.5%")]
#[case::words("{{ numberToWords 1250 }}", "one thousand two hundred fifty")]
#[case::words_hyphen("{{ numberToWords 42 }}", "forty-two")]
#[case::format_date("{{ formatDate effective_date \"legal\" }}", "1st day of March, 2026")]
#[case::add_years("{{ addYears effective_date 2 }}", "2028-03-01")]
#[case::add_months_clamps("{{ addMonths \"2026-01-31\" 1 }}", "2026-02-28")]
#[case::add_days("{{ addDays effective_date -1 }}", "2026-02-28")]
#[case::today("{{ formatDate @today \"long\" }}", "October 16, 2026")]
#[case::ternary("{{ premium ? \"Gold\" : \"Standard\" }}", "Gold")]
#[case::ternary_missing("{{ missing ? \"Gold\" : \"Standard\" }}", "Standard")]
#[case::subexpression("{{ upper (concat \"a\" \"b\") }}", "AB")]
#[case::array_index("{{ items.1.name }}", "B")]
#[case::legacy_call("{{ upper(provider) }}", "BETA LLC")]
#[case::legacy_nested("{{ formatDate(addDays(effective_date, 10), \"YYYY-MM-DD\") }}", "2026-03-11")]
fn helpers(#[case] template: &str, #[case] expected: &str) -> LegalResult<()> {
	assert_eq!(render(template, &contract_metadata())?, expected);

	Ok(())
}

#[test]
fn number_words_cover_the_whole_range() {
	assert_eq!(number_to_words(0), "zero");
	assert_eq!(number_to_words(-1_000_000), "minus one million");
	assert_eq!(
		number_to_words(i64::MAX),
		"nine quintillion two hundred twenty-three quadrillion three hundred seventy-two trillion thirty-six \
		 billion eight hundred fifty-four million seven hundred seventy-five thousand eight hundred seven"
	);
	assert_eq!(
		number_to_words(i64::MIN),
		"minus nine quintillion two hundred twenty-three quadrillion three hundred seventy-two trillion \
		 thirty-six billion eight hundred fifty-four million seven hundred seventy-five thousand eight \
		 hundred eight"
	);
}

#[rstest]
#[case::undefined_variable("Hello {{ missing }}!")]
#[case::undefined_argument("{{ upper missing }}")]
#[case::division_by_zero("{{ divide 1 0 }}")]
#[case::bad_date("{{ formatDate provider }}")]
#[case::wrong_arity("{{ upper \"a\" \"b\" }}")]
#[case::mapping_value("{{ client }}")]
#[case::unparseable("{{ client.name ) }}")]
fn unresolvable_expressions_stay_as_written(#[case] template: &str) -> LegalResult<()> {
	assert_eq!(render(template, &contract_metadata())?, template);

	Ok(())
}

#[test]
fn values_containing_templates_are_expanded() -> LegalResult<()> {
	let metadata = metadata(json!({
		"first": "Jane",
		"last": "Doe",
		"full": "{{ first }} {{ last }}",
		"greeting": "Dear {{ full }}",
		"alias": "{{ first }}",
	}));
	assert_eq!(render("{{ greeting }}", &metadata)?, "Dear Jane Doe");
	assert_eq!(render("{{ upper alias }}", &metadata)?, "JANE");
	assert_eq!(render("{{ last ? full : \"n/a\" }}", &metadata)?, "Jane Doe");
	assert_eq!(render("{{#if alias}}{{ lower greeting }}{{/if}}", &metadata)?, "dear jane doe");

	Ok(())
}

#[rstest]
#[case::direct(json!({ "a": "{{ a }}" }), "{{ a }}")]
#[case::mutual(json!({ "a": "x {{ b }}", "b": "y {{ a }}" }), "x y {{ a }}")]
#[case::through_helper(json!({ "a": "{{ upper a }}" }), "{{ upper a }}")]
#[case::helper_cycle(json!({ "a": "{{ upper b }}", "b": "{{ lower a }}" }), "{{ upper b }}")]
fn self_referential_values_terminate(#[case] value: Value, #[case] expected: &str) -> LegalResult<()> {
	assert_eq!(render("{{ a }}", &metadata(value))?, expected);

	Ok(())
}

#[test]
fn malformed_blocks_are_errors() {
	let error = render("{{#each items}}open", &contract_metadata()).unwrap_err();
	assert!(matches!(error, LegalError::UnclosedBlock { .. }));

	let error = render("{{#if premium}}x{{/each}}", &contract_metadata()).unwrap_err();
	assert!(matches!(error, LegalError::MismatchedBlock { .. }));

	assert_eq!(render("stray {{/if}}", &Metadata::new()).ok().as_deref(), Some("stray {{/if}}"));
}

#[test]
fn template_budget_is_enforced() {
	let context = TemplateContext {
		timeout: std::time::Duration::ZERO,
		..template_context()
	};
	let error = render_expressions("{{ provider }}", &contract_metadata(), &context).unwrap_err();
	assert!(matches!(error, LegalError::TemplateTimeout { .. }));
	assert_eq!(error.excerpt(), "provider");

	let error = expand_blocks("{{#each items}}x{{/each}}", &contract_metadata(), &context).unwrap_err();
	assert_eq!(error.excerpt(), "{{#each items}}");
}

#[rstest]
#[case::none("{{ provider }} |x|", HelperSyntax::None)]
#[case::legacy("{{ upper(provider) }} {{ lower(provider) }}", HelperSyntax::Legacy)]
#[case::modern("{{ upper provider }} {{#if eq a b}}{{/if}}", HelperSyntax::Modern)]
fn helper_syntax_detection(#[case] content: &str, #[case] expected: HelperSyntax) -> LegalResult<()> {
	assert_eq!(detect_helper_syntax(content)?, expected);

	Ok(())
}

#[test]
fn mixing_helper_syntaxes_is_an_error() {
	let error = detect_helper_syntax("{{ upper(provider) }} and {{ lower provider }}").unwrap_err();
	let LegalError::MixedHelperSyntax { legacy, modern } = error else {
		panic!("expected a mixed syntax error");
	};
	assert_eq!(legacy, "{{ upper(provider) }}");
	assert_eq!(modern, "{{ lower provider }}");
}

// --- field tracking ---

#[test]
fn tracked_values_are_annotated() -> LegalResult<()> {
	let metadata = metadata(json!({ "client": "Acme" }));
	let rendered = render_expressions(
		"{{ client }} {{ upper client }} {{ missing }}",
		&metadata,
		&tracking_context(),
	)?;
	let (annotated, report) = annotate_fields(&rendered);

	insta::assert_snapshot!(annotated, @r#"<span class="legal-field imported-value" data-field="client">Acme</span> <span class="legal-field highlight" data-field="upper client">ACME</span> <span class="legal-field missing-value" data-field="missing">[[missing]]</span>"#);
	assert_eq!(report.with_status(FieldStatus::Resolved), vec!["client"]);
	assert_eq!(report.with_status(FieldStatus::Computed), vec!["upper client"]);
	assert_eq!(report.with_status(FieldStatus::Missing), vec!["missing"]);

	Ok(())
}

#[test]
fn markers_strip_and_escape_cleanly() {
	let marked = mark_field(FieldStatus::Resolved, "a\"b", "value");
	assert_eq!(strip_markers(&marked), "value");

	let (annotated, _) = annotate_fields(&marked);
	assert_eq!(
		annotated,
		r#"<span class="legal-field imported-value" data-field="a&quot;b">value</span>"#
	);
}

// --- imports ---

#[test]
fn imports_are_inlined_and_merged_bottom_up() -> LegalResult<()> {
	let host = metadata(json!({ "provider": "Beta LLC" }));
	let resolved = resolve_imports(
		"Intro\n@import clauses/confidentiality.md\nEnd\n",
		&host,
		&contract_resources(),
		&ImportOptions::default(),
	)?;

	assert_eq!(
		resolved.content,
		"Intro\nll. Confidentiality\n\nThe obligations last {{ term }}.\nSigned by {{ signatory }}.\nEnd\n"
	);
	assert_eq!(
		resolved.metadata,
		metadata(json!({ "provider": "Beta LLC", "term": "2 years", "signatory": "Jane Doe" }))
	);

	let paths: Vec<&str> = resolved.reports.iter().map(|report| report.path.as_str()).collect();
	assert_eq!(paths, vec!["shared/signature.md", "clauses/confidentiality.md"]);

	let outer = &resolved.reports[1].stats;
	assert_eq!(outer.added, vec!["term", "signatory"]);
	assert_eq!(outer.conflicts, vec!["provider"]);
	assert_eq!(outer.filtered, vec!["level-one"]);

	Ok(())
}

#[rstest]
#[case(None, "a.md", "a.md")]
#[case(Some("clauses/nda.md"), "shared/sig.md", "clauses/shared/sig.md")]
#[case(Some("clauses/nda.md"), "../common.md", "common.md")]
#[case(Some("clauses/nda.md"), "/root.md", "root.md")]
#[case(Some("a/b/c.md"), "./d/../e.md", "a/b/e.md")]
fn import_names_resolve_relative_to_the_importer(
	#[case] importer: Option<&str>,
	#[case] name: &str,
	#[case] expected: &str,
) {
	assert_eq!(resolve_name(importer, name), expected);
}

#[test]
fn import_cycles_are_detected() {
	let resources = MemoryResources::new()
		.with("a.md", "@import b.md\n")
		.with("b.md", "@import \"a.md\"\n");
	let error = resolve_imports("@import a.md\n", &Metadata::new(), &resources, &ImportOptions::default())
		.unwrap_err();

	let LegalError::ImportCycle { chain, .. } = error else {
		panic!("expected an import cycle");
	};
	assert_eq!(chain, "a.md -> b.md -> a.md");
}

#[test]
fn import_depth_is_limited() {
	let resources = MemoryResources::new()
		.with("a.md", "@import b.md\n")
		.with("b.md", "leaf\n");
	let options = ImportOptions {
		max_depth: 1,
		..ImportOptions::default()
	};
	let error = resolve_imports("@import a.md\n", &Metadata::new(), &resources, &options).unwrap_err();
	assert!(matches!(error, LegalError::ImportDepthExceeded { limit: 1, .. }));
}

#[test]
fn closures_can_serve_resources() -> LegalResult<()> {
	let reader = |name: &str| {
		match name {
			"greeting.md" => Ok("Hello\n".to_string()),
			"broken.md" => Err(ResourceError::Failed("permission denied".into())),
			_ => Err(ResourceError::NotFound),
		}
	};

	let resolved = resolve_imports("@import 'greeting.md'\n", &Metadata::new(), &reader, &ImportOptions::default())?;
	assert_eq!(resolved.content, "Hello\n");

	let error = resolve_imports("@import broken.md", &Metadata::new(), &reader, &ImportOptions::default())
		.unwrap_err();
	assert!(matches!(error, LegalError::ImportRead { .. }));

	Ok(())
}

#[test]
fn import_directives_in_code_fences_are_ignored() -> LegalResult<()> {
	let content = "```\n@import a.md\n```\n";
	let resolved = resolve_imports(content, &Metadata::new(), &NoResources, &ImportOptions::default())?;
	assert_eq!(resolved.content, content);

	Ok(())
}

// --- configuration ---

#[test]
fn options_load_from_toml() -> LegalResult<()> {
	let options = ProcessOptions::from_toml_str(
		"no-reset = true\nenable-field-tracking = true\ntoday = \"2026-01-31\"\n\n[skip]\nheaders = true\n",
	)?;

	assert!(options.no_reset);
	assert!(options.enable_field_tracking);
	assert!(options.skip.skips(Stage::Headers));
	assert!(!options.skip.skips(Stage::Clauses));
	assert_eq!(options.today, chrono::NaiveDate::from_ymd_opt(2026, 1, 31));
	assert_eq!(options.max_import_depth, 10);

	let error = ProcessOptions::from_toml_str("no-reset = \"maybe\"").unwrap_err();
	assert!(matches!(error, LegalError::ConfigParse(_)));

	Ok(())
}

#[rstest]
#[case::flag_string(
	json!("--no-reset --output-path /tmp/x --highlight"),
	vec![(ForcedFlag::NoReset, true), (ForcedFlag::FieldTracking, true)],
	vec!["--output-path /tmp/x"],
)]
#[case::inline_value(json!("--no-indent --css=evil.css"), vec![(ForcedFlag::NoIndent, true)], vec!["--css=evil.css"])]
#[case::mapping(
	json!({ "no-reset": true, "strict": false, "output-path": "/tmp" }),
	vec![(ForcedFlag::NoReset, true), (ForcedFlag::StrictMetadata, false)],
	vec!["output-path"],
)]
fn force_directives_are_validated(
	#[case] value: Value,
	#[case] flags: Vec<(ForcedFlag, bool)>,
	#[case] rejected: Vec<&str>,
) {
	let directive = ForceDirective::parse(&value);
	assert_eq!(directive.flags, flags);
	assert_eq!(directive.rejected, rejected);
}

#[test]
#[traced_test]
fn force_directive_overrides_host_options() -> LegalResult<()> {
	let text = "---\nforce_commands: --no-reset --export-pdf\n---\nl. A\nll. B\nl. C\nll. D\n";
	let document = process_document(text, &options())?;

	assert_eq!(
		document.content,
		"Article 1. A\n  Section 1. B\nArticle 2. C\n  Section 2. D\n"
	);
	assert_eq!(document.warnings, vec!["force directive flag `--export-pdf` is not allowed"]);
	assert!(logs_contain("force directive flag is not allowed"));

	Ok(())
}

// --- pipeline ---

const AGREEMENT: &str = "---
title: Master Services Agreement
provider: Beta LLC
client:
  name: Acme Ltd
premium: true
fees:
  - item: Setup
    amount: 1500
  - item: Support
    amount: 250.5
---
l. Parties

This agreement is between |client.name| and {{ provider }}, dated @today[legal].

[Premium support is included.]{premium}[Standard support applies.]{premium = false}

l. Fees

{{#each fees}}- {{item}}: {{formatCurrency amount}}
{{/each}}
@import clauses/confidentiality.md
";

#[test]
fn pipeline_resolves_a_complete_agreement() -> LegalResult<()> {
	let resources = contract_resources();
	let document = Pipeline::with_reader(options(), &resources).process(AGREEMENT)?;

	assert_eq!(
		document.content,
		"Article 1. Parties

This agreement is between Acme Ltd and Beta LLC, dated 16th day of October, 2026.

Premium support is included.

Article 2. Fees

- Setup: $1,500.00
- Support: $250.50

  Section 1. Confidentiality

The obligations last 2 years.
Signed by Jane Doe.
"
	);
	assert_eq!(document.helper_syntax, HelperSyntax::Modern);
	assert_eq!(document.imports.len(), 2);
	assert_eq!(document.metadata.lookup("signatory"), Some(&json!("Jane Doe")));
	assert!(document.metadata.get("level-one").is_none());
	assert!(document.fields.is_empty());

	Ok(())
}

#[test]
fn pipeline_output_is_idempotent() -> LegalResult<()> {
	let resources = contract_resources();
	let pipeline = Pipeline::with_reader(options(), &resources);

	let first = pipeline.process(AGREEMENT)?;
	let second = pipeline.process(&first.content)?;
	assert_eq!(second.content, first.content);

	let unresolved = pipeline.process("See |nothing| and {{ nothing }}.\n")?;
	assert_eq!(pipeline.process(&unresolved.content)?.content, unresolved.content);

	Ok(())
}

#[test]
fn pipeline_tracks_fields_across_stages() -> LegalResult<()> {
	let text = "---\nclient: Acme\n---\n|client| {{ upper client }} {{ missing }}\n";
	let document = process_document(text, &tracking_options())?;

	assert_eq!(
		document.content,
		"<span class=\"legal-field imported-value\" data-field=\"client\">Acme</span> <span \
		 class=\"legal-field highlight\" data-field=\"upper client\">ACME</span> <span class=\"legal-field \
		 missing-value\" data-field=\"missing\">[[missing]]</span>\n"
	);
	assert_eq!(document.fields.fields.len(), 3);

	let again = process_document(&document.content, &tracking_options())?;
	assert_eq!(again.content, document.content);

	Ok(())
}

#[test]
fn skipped_stages_leave_their_syntax() -> LegalResult<()> {
	let options = ProcessOptions {
		skip: SkipStages {
			headers: true,
			clauses: true,
			..SkipStages::default()
		},
		..options()
	};
	let document = process_document("---\nflag: false\n---\nl. Title\n[gone]{flag}\n", &options)?;
	assert_eq!(document.content, "l. Title\n[gone]{flag}\n");

	Ok(())
}

#[rstest]
#[case::missing_import("@import missing.md\n", Stage::Imports, "missing.md")]
#[case::unclosed_block("{{#if a}}open\n", Stage::Loops, "{{#if a}}")]
#[case::mixed_syntax("{{ upper(a) }} {{ lower a }}\n", Stage::Loops, "{{ upper(a) }}")]
#[case::bad_metadata("---\ntitle: [\n---\n", Stage::Metadata, "title: [")]
fn stage_failures_name_the_stage(
	#[case] text: &str,
	#[case] stage: Stage,
	#[case] excerpt: &str,
) {
	let options = ProcessOptions {
		strict_metadata: true,
		..options()
	};
	let error = process_document(text, &options).unwrap_err();

	assert_eq!(error.stage(), Some(stage));
	assert_eq!(error.excerpt(), excerpt);
}
