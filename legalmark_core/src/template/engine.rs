use std::borrow::Cow;
use std::cell::Cell;
use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;

use super::blocks::Block;
use super::blocks::BlockKind;
use super::blocks::Node;
use super::blocks::parse_template;
use super::helpers::HelperContext;
use super::helpers::HelperError;
use super::helpers::accepts_missing;
use super::helpers::call_helper;
use super::parser::Expr;
use super::parser::PathRef;
use super::parser::parse_expression;
use crate::LegalError;
use crate::LegalResult;
use crate::dates::date_value;
use crate::metadata::child;
use crate::metadata::display_value;
use crate::metadata::is_truthy;
use crate::tracking::FieldStatus;
use crate::tracking::mark_field;
use crate::tracking::mark_missing;

/// Nested variable expansion stops at this depth even without a cycle.
pub const MAX_RESOLVE_DEPTH: usize = 32;

/// One lexical scope. The root scope is the document metadata; each loop
/// iteration pushes a scope for the current item.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame<'v> {
	pub value: &'v Value,
	pub index: Option<usize>,
	pub key: Option<&'v str>,
	pub first: bool,
	pub last: bool,
}

impl<'v> Frame<'v> {
	pub fn root(value: &'v Value) -> Self {
		Self {
			value,
			index: None,
			key: None,
			first: false,
			last: false,
		}
	}
}

enum Evaluated<'v> {
	Value(Cow<'v, Value>),
	/// The path that could not be resolved.
	Missing(String),
	/// A variable that refers back to itself while being expanded.
	Cyclic,
	Failed(HelperError),
}

/// Renders template nodes against a metadata tree.
pub(crate) struct Renderer<'v> {
	root: &'v Value,
	helpers: HelperContext,
	track_fields: bool,
	started: Instant,
	budget: Duration,
	/// Cycles hit so far, so an argument can tell whether its own expansion
	/// ran into one.
	cycles: Cell<usize>,
}

impl<'v> Renderer<'v> {
	pub fn new(root: &'v Value, helpers: HelperContext, track_fields: bool, budget: Duration) -> Self {
		Self {
			root,
			helpers,
			track_fields,
			started: Instant::now(),
			budget,
			cycles: Cell::new(0),
		}
	}

	pub fn root_frames(&self) -> Vec<Frame<'v>> {
		vec![Frame::root(self.root)]
	}

	fn check_budget(&self, expression: &str) -> LegalResult<()> {
		if self.started.elapsed() >= self.budget {
			return Err(LegalError::TemplateTimeout {
				expression: expression.to_string(),
				budget_ms: self.budget.as_millis(),
			});
		}
		Ok(())
	}

	/// Render every node, evaluating expressions as well as blocks.
	pub fn render_nodes(
		&self,
		nodes: &[Node<'_>],
		frames: &mut Vec<Frame<'v>>,
		resolving: &mut HashSet<String>,
		track: bool,
		output: &mut String,
	) -> LegalResult<()> {
		for node in nodes {
			match node {
				Node::Text(text) => output.push_str(text),
				Node::Expression { raw, source } => {
					output.push_str(&self.render_expression(raw, source, frames, resolving, track)?);
				}
				Node::Block(block) => self.render_block(block, frames, resolving, track, output)?,
			}
		}
		Ok(())
	}

	pub fn render_block(
		&self,
		block: &Block<'_>,
		frames: &mut Vec<Frame<'v>>,
		resolving: &mut HashSet<String>,
		track: bool,
		output: &mut String,
	) -> LegalResult<()> {
		self.check_budget(block.opening)?;

		match block.kind {
			BlockKind::If | BlockKind::Unless => {
				let holds = self.condition_holds(block.argument, frames, resolving)?;
				let take_body = holds == (block.kind == BlockKind::If);
				let nodes = if take_body { &block.body } else { &block.otherwise };
				self.render_nodes(nodes, frames, resolving, track, output)
			}
			BlockKind::Each => {
				let Some(items) = self.iteration_source(block.argument, frames) else {
					return self.render_nodes(&block.otherwise, frames, resolving, track, output);
				};

				let count = items.len();
				for (index, (key, value)) in items.into_iter().enumerate() {
					frames.push(Frame {
						value,
						index: Some(index),
						key,
						first: index == 0,
						last: index + 1 == count,
					});
					let rendered = self.render_nodes(&block.body, frames, resolving, track, output);
					frames.pop();
					rendered?;
				}
				Ok(())
			}
		}
	}

	/// The items of a sequence or the entries of a mapping. Empty and
	/// non-iterable values yield `None`.
	fn iteration_source(&self, argument: &str, frames: &[Frame<'v>]) -> Option<Vec<(Option<&'v str>, &'v Value)>> {
		let path = match parse_expression(argument).map(|parsed| parsed.expr) {
			Ok(Expr::Path(path)) => path,
			_ => {
				tracing::warn!(argument, "`#each` needs a field path");
				return None;
			}
		};

		let Some(Cow::Borrowed(value)) = self.resolve_path(&path, frames) else {
			tracing::debug!(path = %path, "`#each` source is undefined");
			return None;
		};

		let items: Vec<(Option<&'v str>, &'v Value)> = match value {
			Value::Array(items) => items.iter().map(|item| (None, item)).collect(),
			Value::Object(map) => map.iter().map(|(key, item)| (Some(key.as_str()), item)).collect(),
			_ => Vec::new(),
		};
		(!items.is_empty()).then_some(items)
	}

	fn condition_holds(&self, argument: &str, frames: &[Frame<'v>], resolving: &mut HashSet<String>) -> LegalResult<bool> {
		let expr = match parse_expression(argument) {
			Ok(parsed) => parsed.expr,
			Err(error) => {
				tracing::warn!(argument, %error, "unreadable block condition evaluates to false");
				return Ok(false);
			}
		};

		Ok(match self.evaluate(&expr, frames, resolving)? {
			Evaluated::Value(value) => is_truthy(Some(&value)),
			Evaluated::Missing(_) | Evaluated::Cyclic => false,
			Evaluated::Failed(error) => {
				tracing::warn!(argument, %error, "block condition failed; treating it as false");
				false
			}
		})
	}

	/// Render a single `{{ … }}` tag. Anything that cannot be evaluated keeps
	/// its original text, or becomes a missing-field marker when tracking.
	pub fn render_expression(
		&self,
		raw: &str,
		source: &str,
		frames: &[Frame<'v>],
		resolving: &mut HashSet<String>,
		track: bool,
	) -> LegalResult<String> {
		self.check_budget(source)?;
		let track = track && self.track_fields;

		let parsed = match parse_expression(source) {
			Ok(parsed) => parsed,
			Err(error) => {
				tracing::warn!(expression = source, %error, "leaving unparseable expression as written");
				return Ok(raw.to_string());
			}
		};

		match &parsed.expr {
			Expr::Path(path) => self.render_path(raw, path, frames, resolving, track),
			Expr::Literal(value) => Ok(display_value(value).unwrap_or_else(|| raw.to_string())),
			expr => {
				match self.evaluate(expr, frames, resolving)? {
					Evaluated::Value(value) => {
						let Some(text) = display_value(&value) else {
							return Ok(raw.to_string());
						};
						Ok(if track {
							mark_field(FieldStatus::Computed, source.trim(), &text)
						} else {
							text
						})
					}
					Evaluated::Missing(path) => Ok(if track { mark_missing(&path) } else { raw.to_string() }),
					Evaluated::Cyclic => Ok(raw.to_string()),
					Evaluated::Failed(error) => {
						tracing::warn!(expression = source, %error, "helper failed; leaving expression as written");
						Ok(raw.to_string())
					}
				}
			}
		}
	}

	fn render_path(
		&self,
		raw: &str,
		path: &PathRef,
		frames: &[Frame<'v>],
		resolving: &mut HashSet<String>,
		track: bool,
	) -> LegalResult<String> {
		let key = path.to_string();
		let Some(value) = self.resolve_path(path, frames) else {
			return Ok(if track { mark_missing(&key) } else { raw.to_string() });
		};
		let Some(mut text) = display_value(&value) else {
			tracing::debug!(path = %key, "mapping values have no textual form");
			return Ok(raw.to_string());
		};

		if text.contains("{{") {
			let Some(nested) = self.expand_value(&key, &text, frames, resolving)? else {
				return Ok(raw.to_string());
			};
			text = nested;
		}

		Ok(if track {
			mark_field(FieldStatus::Resolved, &key, &text)
		} else {
			text
		})
	}

	/// Expand the templates inside the value of `key`. `None` means the value
	/// refers back to a variable that is already being expanded.
	fn expand_value(
		&self,
		key: &str,
		text: &str,
		frames: &[Frame<'v>],
		resolving: &mut HashSet<String>,
	) -> LegalResult<Option<String>> {
		if resolving.contains(key) || resolving.len() >= MAX_RESOLVE_DEPTH {
			tracing::warn!(variable = key, "self-referential variable left unresolved");
			self.cycles.set(self.cycles.get() + 1);
			return Ok(None);
		}
		resolving.insert(key.to_string());
		let nested = self.render_nested(text, frames, resolving);
		resolving.remove(key);
		nested.map(Some)
	}

	/// Expand template syntax found inside a substituted value. Nested values
	/// are never tracked.
	fn render_nested(&self, text: &str, frames: &[Frame<'v>], resolving: &mut HashSet<String>) -> LegalResult<String> {
		let nodes = match parse_template(text) {
			Ok(nodes) => nodes,
			Err(error) => {
				tracing::warn!(%error, "value contains malformed template syntax");
				return Ok(text.to_string());
			}
		};

		let mut frames = frames.to_vec();
		let mut output = String::with_capacity(text.len());
		self.render_nodes(&nodes, &mut frames, resolving, false, &mut output)?;
		Ok(output)
	}

	/// Evaluate a helper call, ternary or argument. Only budget overruns are
	/// errors; everything else is reported through [`Evaluated`].
	fn evaluate(&self, expr: &Expr, frames: &[Frame<'v>], resolving: &mut HashSet<String>) -> LegalResult<Evaluated<'v>> {
		match expr {
			Expr::Literal(value) => Ok(Evaluated::Value(Cow::Owned(value.clone()))),
			Expr::Path(path) => {
				let Some(value) = self.resolve_path(path, frames) else {
					return Ok(Evaluated::Missing(path.to_string()));
				};
				let template = match value.as_ref() {
					Value::String(text) if text.contains("{{") => Some(text.clone()),
					_ => None,
				};
				let Some(template) = template else {
					return Ok(Evaluated::Value(value));
				};

				// Helpers must not see text left raw by a cycle further down.
				let cycles = self.cycles.get();
				Ok(match self.expand_value(&path.to_string(), &template, frames, resolving)? {
					Some(expanded) if self.cycles.get() == cycles => {
						Evaluated::Value(Cow::Owned(Value::String(expanded)))
					}
					_ => Evaluated::Cyclic,
				})
			}
			Expr::Call { name, args } => {
				let mut values = Vec::with_capacity(args.len());
				for arg in args {
					match self.evaluate(arg, frames, resolving)? {
						Evaluated::Value(value) => values.push(value.into_owned()),
						Evaluated::Missing(_) if accepts_missing(name) => values.push(Value::Null),
						other => return Ok(other),
					}
				}
				Ok(match call_helper(name, &values, &self.helpers) {
					Ok(value) => Evaluated::Value(Cow::Owned(value)),
					Err(error) => Evaluated::Failed(error),
				})
			}
			Expr::Ternary {
				condition,
				then,
				otherwise,
			} => {
				let holds = match self.evaluate(condition, frames, resolving)? {
					Evaluated::Value(value) => is_truthy(Some(&value)),
					Evaluated::Missing(_) => false,
					other => return Ok(other),
				};
				self.evaluate(if holds { then } else { otherwise }, frames, resolving)
			}
		}
	}

	/// Resolve a path in the innermost scope, falling back to enclosing scopes
	/// for plain field names. `../` starts the search that many scopes out.
	fn resolve_path(&self, path: &PathRef, frames: &[Frame<'v>]) -> Option<Cow<'v, Value>> {
		let start = frames.len().checked_sub(path.parents + 1)?;
		let frame = frames[start];
		let (first, rest) = path.segments.split_first()?;

		match first.as_str() {
			"this" => descend(frame.value, rest).map(Cow::Borrowed),
			"@index" => frame.index.map(|index| Cow::Owned(Value::from(index))),
			"@first" => frame.index.map(|_| Cow::Owned(Value::Bool(frame.first))),
			"@last" => frame.index.map(|_| Cow::Owned(Value::Bool(frame.last))),
			"@key" => frame.key.map(|key| Cow::Owned(Value::String(key.to_string()))),
			"@today" => Some(Cow::Owned(date_value(self.helpers.today))),
			_ => {
				frames[..=start]
					.iter()
					.rev()
					.find_map(|scope| descend(scope.value, &path.segments))
					.map(Cow::Borrowed)
			}
		}
	}
}

fn descend<'v>(value: &'v Value, segments: &[String]) -> Option<&'v Value> {
	segments.iter().try_fold(value, |current, segment| child(current, segment))
}
