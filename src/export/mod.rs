// This module holds the exporter proper: everything that turns an IR module into container
// tables. The translator drives one attempt and the inline/out-of-band retry; sub-graph
// building, operator encoding (native builtins, control flow, flex passthrough, generic
// custom ops and the extension dialect), tensor records, and the model-level metadata and
// signature tables each live in their own file as `impl Translator` blocks or free encoders.
// The static catalog of native ops and the declarative option-table encoder sit beside them.

//! Module export.
//!
//! The entry points are [`export_model`] and [`export_with_session`].

pub mod catalog;
pub mod extension;
pub mod metadata;
pub mod operator;
pub mod options;
pub mod subgraph;
pub mod tensor;
pub mod translator;

pub use catalog::StaticCatalog;
pub use translator::{export_model, export_with_session};
