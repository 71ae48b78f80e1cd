// This module groups everything that knows the byte-level layout of the model container: the
// schema slot constants and enum codes, the buffer table with its inline and out-of-band
// layouts, the FlexBuffer option blobs, the named in-place patches applied after the
// container is finished, and the bounds-checked reader used by the post passes, the CLI and
// the tests. The exporter in `export` builds tables through the FlatBufferBuilder aliases
// declared here.

//! Byte-level layout of the model container.
//!
//! # Key Components
//!
//! - **schema**: vtable slots and enum codes
//! - **buffers**: buffer table, deduplication and out-of-band payloads
//! - **flex**: schemaless option blobs
//! - **patch**: in-place patches of a finished container
//! - **reader**: read-only view of a finished container

pub mod buffers;
pub mod flex;
pub mod patch;
pub mod reader;
pub mod schema;

use flatbuffers::{FlatBufferBuilder, TableFinishedWIPOffset, Vector, WIPOffset};

/// Builder used for every container.
pub type Fbb = FlatBufferBuilder<'static>;

/// A finished table inside the builder.
pub type TableOffset = WIPOffset<TableFinishedWIPOffset>;

/// A byte vector inside the builder.
pub type ByteVector = WIPOffset<Vector<'static, u8>>;

pub use buffers::{BufferLayout, BufferTable, DeferredOptions};
pub use patch::Patch;
pub use reader::Model;
