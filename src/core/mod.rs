// This module serves as the hub for the exporter's core infrastructure, the pieces shared by
// every encoder regardless of which op or container table it produces. It organizes error
// handling (the ExportError enum and the soft diagnostics buckets), the caller-facing export
// configuration, session management (arena-interned names and export statistics that live
// across the inline attempt and the out-of-band restart), the collaborator traits through
// which the exporter consults op catalogs, foreign-op knowledge, version resolution and
// delegate checks, the region analysis that finds uses and control edges, and the naming and
// tensor index bookkeeping that gives every value a stable identity.

//! Core exporter infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - Hard failures as `ExportError` variants
//! - Soft per-op failures gathered in `Diagnostics` and reported once
//!
//! ## Configuration (`config`)
//! - Representation strategy switches and layout options
//!
//! ## Session Management (`session`)
//! - Arena-interned tensor names using `bumpalo`
//! - Export statistics across attempts
//!
//! ## Collaborators (`adaptor`)
//! - Op catalog, foreign ops, stateful operands, versions, delegates
//!
//! ## Analysis (`analyzer`, `value_assignment`)
//! - Use lists, control edges and control-node unwrapping
//! - Unique tensor names and per sub-graph tensor indices

pub mod adaptor;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod session;
pub mod value_assignment;

pub use adaptor::{
    BaselineVersions,
    Collaborators,
    DefaultForeignOps,
    DelegateChecker,
    EncodedOptions,
    ForeignOpAdaptor,
    ForeignOpDescriptor,
    GpuCompatibility,
    OpCatalog,
    RecurrentStateOperands,
    StatefulOperands,
    VersionResolver,
};

pub use analyzer::{RegionAnalysis, UseMap};

pub use config::ExportConfig;

pub use error::{
    Diagnostics,
    ExportError,
    ExportResult,
};

pub use session::{ExportSession, SessionStats};

pub use value_assignment::{NameMapper, TensorIndexMap};
