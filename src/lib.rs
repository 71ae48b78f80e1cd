//! flatgraph - export dataflow graphs to a FlatBuffer model container.
//!
//! flatgraph takes an in-memory dataflow IR (functions made of typed values and
//! operation nodes in single-block regions) and serializes it into the TFLite
//! style container identified by `TFL3`: sub-graphs, tensors, operators,
//! deduplicated constant buffers, operator codes, metadata and signature defs.
//! Models too large for the 2 GiB inline layout are re-exported with constant
//! data stored after the container.
//!
//! # Primary Usage
//!
//! ```ignore
//! use flatgraph::{export_model, Collaborators, ExportConfig};
//!
//! let bytes = export_model(&module, &ExportConfig::default(), &Collaborators::default())?;
//! let model = flatgraph::container::Model::parse(&bytes)?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - the dataflow IR and its builder
//! - [`core`] - errors, configuration, session, collaborators, analysis
//! - [`export`] - sub-graph, operator, tensor and model table encoders
//! - [`container`] - byte layout: schema slots, buffers, option blobs, patches, reader

pub mod container;
pub mod core;
pub mod export;
pub mod ir;

pub use core::{
    // Configuration and collaborators
    Collaborators, ExportConfig,
    // Errors
    ExportError, ExportResult,
    // Session management
    ExportSession, SessionStats,
};
pub use export::{export_model, export_with_session};
pub use ir::{Module, ModuleBuilder};
