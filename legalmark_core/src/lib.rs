//! `legalmark_core` processes legal documents written in an extended markdown:
//! YAML front matter, `@import` directives, optional clauses, cross-references,
//! `{{ … }}` templates and numbered headers. Every directive is resolved and
//! the result is handed back as plain markdown for an external renderer.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Document text
//!   → Metadata (front matter → ordered metadata map)
//!   → Force directive (validated document overrides of the host options)
//!   → Imports (inline `@import` resources, merge their front matter)
//!   → Clauses (`[text]{condition}` kept or removed)
//!   → Cross-references (`|key|` and `@today[format]`)
//!   → Loops (`{{#each}}`, `{{#if}}`, `{{#unless}}` blocks)
//!   → Expressions (remaining `{{ … }}` variables and helper calls)
//!   → Headers (`l.` / `ll.` / `l3.` markers → `Article 1.`, `Section 1.`, …)
//!   → Field tracking (optional `<span class="legal-field …">` annotations)
//! ```
//!
//! Each stage consumes the complete output of the previous one. A failing
//! stage aborts the run with a [`LegalError::Stage`] naming the stage and the
//! offending excerpt.
//!
//! ## Modules
//!
//! - [`metadata`]: front matter parsing, path lookup and truthiness.
//! - [`merge`]: flatten/unflatten and the import merge policy.
//! - [`imports`]: `@import` resolution through a host [`ResourceReader`].
//! - [`clauses`]: the optional clause evaluator.
//! - [`references`]: cross-references and `@today`.
//! - [`template`]: the expression language, blocks and helpers.
//! - [`headers`]: the header numbering state machine.
//! - [`tracking`]: field tracking markers and the [`FieldReport`].
//! - [`config`]: [`ProcessOptions`] and force directives.
//!
//! ## Quick Start
//!
//! ```rust
//! use legalmark_core::ProcessOptions;
//! use legalmark_core::process_document;
//!
//! let text = "---\nparty: Acme Ltd\n---\nl. Parties\n\nThis agreement binds {{ party }}.\n";
//! let document = process_document(text, &ProcessOptions::default()).unwrap();
//!
//! assert_eq!(document.content, "Article 1. Parties\n\nThis agreement binds Acme Ltd.\n");
//! ```

pub use config::*;
pub use error::*;
pub use imports::ImportOptions;
pub use imports::ImportReport;
pub use imports::MemoryResources;
pub use imports::NoResources;
pub use imports::ResourceError;
pub use imports::ResourceReader;
pub use merge::MergeOptions;
pub use merge::MergeOutcome;
pub use merge::MergeStats;
pub use merge::merge_metadata;
pub use metadata::Metadata;
pub use pipeline::*;
pub use template::HelperSyntax;
pub use tracking::FieldReport;
pub use tracking::FieldStatus;

pub mod clauses;
pub mod config;
pub mod dates;
#[allow(unused_assignments)]
mod error;
pub mod headers;
pub mod imports;
pub mod merge;
pub mod metadata;
mod pipeline;
pub mod references;
pub mod template;
pub mod tracking;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
