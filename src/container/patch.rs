// This module implements the named in-place patches applied to a finished container. The
// builder writes every patchable field physically (version 0 for builtin opcodes, offset and
// size placeholders of 1 for out-of-band buffers and custom options, a 16-byte zeroed
// min_runtime_version payload), so a patch never changes the layout: it walks the container
// with the bounds-checked reader to the target field, checks the field is present and of the
// expected width, and overwrites the scalar bytes. Applying a patch twice leaves the same
// bytes as applying it once. A missing field is an ExportError::Patch naming the target.

use super::reader::{Scalar, TableRef};
use super::schema::vt;
use crate::core::error::{ExportError, ExportResult};

/// Name of the metadata entry holding the minimum runtime version.
pub const MIN_RUNTIME_VERSION_KEY: &str = "min_runtime_version";

/// Width of the min runtime version payload.
pub const MIN_RUNTIME_VERSION_SIZE: usize = 16;

/// A single in-place modification of a finished container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Location of an out-of-band buffer payload.
    BufferLocation { buffer: usize, offset: u64, size: u64 },
    /// Location of out-of-band custom options of one operator.
    LargeCustomOptions { subgraph: usize, operator: usize, offset: u64, size: u64 },
    /// Resolved version of an operator code.
    OperatorCodeVersion { opcode: usize, version: i32 },
    /// Minimum runtime version string, zero padded.
    MinRuntimeVersion { value: String },
}

impl Patch {
    fn target(&self) -> String {
        match self {
            Patch::BufferLocation { buffer, .. } => format!("buffer {}", buffer),
            Patch::LargeCustomOptions { subgraph, operator, .. } => {
                format!("custom options of operator {} in subgraph {}", operator, subgraph)
            }
            Patch::OperatorCodeVersion { opcode, .. } => format!("version of opcode {}", opcode),
            Patch::MinRuntimeVersion { .. } => MIN_RUNTIME_VERSION_KEY.to_string(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> ExportError {
        ExportError::Patch { target: self.target(), reason: reason.into() }
    }

    /// Apply the patch to `bytes`.
    pub fn apply(&self, bytes: &mut [u8]) -> ExportResult<()> {
        let writes = self.locate(bytes)?;
        for (pos, value) in writes {
            let end = pos + value.len();
            let dst = bytes
                .get_mut(pos..end)
                .ok_or_else(|| self.error(format!("write at {} past end", pos)))?;
            dst.copy_from_slice(&value);
        }
        log::trace!("applied patch to {}", self.target());
        Ok(())
    }

    /// Byte writes this patch performs, as (absolute position, bytes).
    fn locate(&self, bytes: &[u8]) -> ExportResult<Vec<(usize, Vec<u8>)>> {
        let root = TableRef::root(bytes)?;
        match self {
            Patch::BufferLocation { buffer, offset, size } => {
                let table = nth_table(&root, vt::model::BUFFERS, *buffer)
                    .map_err(|e| self.error(e.to_string()))?;
                Ok(vec![
                    self.scalar_write(&table, vt::buffer::OFFSET, *offset)?,
                    self.scalar_write(&table, vt::buffer::SIZE, *size)?,
                ])
            }
            Patch::LargeCustomOptions { subgraph, operator, offset, size } => {
                let table = nth_table(&root, vt::model::SUBGRAPHS, *subgraph)
                    .and_then(|sg| nth_table(&sg, vt::sub_graph::OPERATORS, *operator))
                    .map_err(|e| self.error(e.to_string()))?;
                Ok(vec![
                    self.scalar_write(&table, vt::operator::LARGE_CUSTOM_OPTIONS_OFFSET, *offset)?,
                    self.scalar_write(&table, vt::operator::LARGE_CUSTOM_OPTIONS_SIZE, *size)?,
                ])
            }
            Patch::OperatorCodeVersion { opcode, version } => {
                let table = nth_table(&root, vt::model::OPERATOR_CODES, *opcode)
                    .map_err(|e| self.error(e.to_string()))?;
                Ok(vec![self.scalar_write(&table, vt::operator_code::VERSION, *version)?])
            }
            Patch::MinRuntimeVersion { value } => {
                let mut buffer_index = None;
                for entry in root.tables(vt::model::METADATA)? {
                    if entry.string(vt::metadata::NAME)? == Some(MIN_RUNTIME_VERSION_KEY) {
                        buffer_index = Some(entry.scalar(vt::metadata::BUFFER, 0u32)? as usize);
                        break;
                    }
                }
                let buffer_index =
                    buffer_index.ok_or_else(|| self.error("metadata entry not found"))?;
                let table = nth_table(&root, vt::model::BUFFERS, buffer_index)
                    .map_err(|e| self.error(e.to_string()))?;
                let data = table
                    .vector(vt::buffer::DATA)?
                    .ok_or_else(|| self.error("placeholder buffer has no data"))?;
                let mut payload = value.as_bytes().to_vec();
                payload.resize(data.len(), 0);
                Ok(vec![(data.start(), payload)])
            }
        }
    }

    fn scalar_write<T: Scalar>(
        &self,
        table: &TableRef<'_>,
        slot: flatbuffers::VOffsetT,
        value: T,
    ) -> ExportResult<(usize, Vec<u8>)> {
        let pos = table
            .field_pos(slot)?
            .ok_or_else(|| self.error(format!("field at slot {} is not present", slot)))?;
        Ok((pos, value.to_le_vec()))
    }
}

fn nth_table<'a>(table: &TableRef<'a>, slot: flatbuffers::VOffsetT, index: usize) -> ExportResult<TableRef<'a>> {
    let vector = table.vector(slot)?.ok_or_else(|| ExportError::Container {
        reason: format!("vector at slot {} is missing", slot),
    })?;
    vector.table_at(index)
}

/// Apply patches in order.
pub fn apply_all(bytes: &mut [u8], patches: &[Patch]) -> ExportResult<()> {
    for patch in patches {
        patch.apply(bytes)?;
    }
    Ok(())
}
