// This module assembles the model-level tables once every sub-graph is built. Metadata entries
// are stored as buffers inside the container, whatever the buffer layout: the module's
// `tfl.metadata` strings, a zeroed 16-byte `min_runtime_version` placeholder patched after
// finalization, the `buffer_location` marker of the out-of-band layout, caller entries cut
// or zero-padded to 16 bytes, and the serialized control edges when any sub-graph has one.
// Signature defs map saved-model index paths of entry functions to tensor indices; an entry
// function whose names do not line up with its arguments and results gets no signature def
// and a warning instead of an error.

use std::collections::BTreeMap;

use super::translator::Translator;
use crate::container::patch::{MIN_RUNTIME_VERSION_KEY, MIN_RUNTIME_VERSION_SIZE};
use crate::container::schema::{vt, SCHEMA_VERSION};
use crate::container::{flex, BufferLayout, TableOffset};
use crate::core::error::{ExportError, ExportResult};
use crate::ir::{attr, names, Attribute, Function};

/// Metadata key marking the out-of-band layout.
pub const BUFFER_LOCATION_KEY: &str = "buffer_location";

/// Value of the `buffer_location` entry.
pub const OUTSIDE_CONTAINER: &str = "outside flatbuffers";

/// Metadata key of the serialized control edges.
pub const CONTROL_DEPENDENCIES_KEY: &str = "model_control_dependencies";

/// Description used when the module has none.
pub const DEFAULT_DESCRIPTION: &str = "MLIR Converted.";

/// One signature def before it is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SignatureDefData {
    /// Index path -> tensor name, sorted by path.
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub signature_key: String,
    pub subgraph_index: u32,
}

/// First string of every `key` array in `attrs`.
fn first_strings(attrs: &[Vec<(String, Attribute)>], key: &str) -> Vec<String> {
    attrs
        .iter()
        .filter_map(|entries| attr::lookup(entries, key))
        .filter_map(|value| value.as_array().and_then(|items| items.first()))
        .filter_map(Attribute::as_str)
        .map(str::to_string)
        .collect()
}

fn pad_field(value: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = value.bytes().take(MIN_RUNTIME_VERSION_SIZE).collect();
    bytes.resize(MIN_RUNTIME_VERSION_SIZE, 0);
    bytes
}

impl<'m, 's, 'arena> Translator<'m, 's, 'arena> {
    /// Build the root table. `functions` are the functions in sub-graph order.
    pub(crate) fn build_model_table(
        &mut self,
        functions: &[(&'m Function, String)],
        subgraphs: Vec<TableOffset>,
    ) -> ExportResult<TableOffset> {
        let module = self.module;
        let description = module
            .attr(names::MODULE_DESCRIPTION)
            .and_then(Attribute::as_str)
            .unwrap_or(DEFAULT_DESCRIPTION);

        let metadata = self.build_metadata()?;
        let signature_defs = self.build_signature_defs(functions);

        let opcodes = self.opcodes.finish(&mut self.fbb);
        let buffers = self.buffers.finish(&mut self.fbb);
        let fbb = &mut self.fbb;
        let opcodes = fbb.create_vector(&opcodes);
        let subgraphs = fbb.create_vector(&subgraphs);
        let description = fbb.create_string(description);
        let buffers = fbb.create_vector(&buffers);
        let metadata = fbb.create_vector(&metadata);
        let signature_defs = fbb.create_vector(&signature_defs);

        let start = fbb.start_table();
        fbb.push_slot::<u32>(vt::model::VERSION, SCHEMA_VERSION, 0);
        fbb.push_slot_always(vt::model::OPERATOR_CODES, opcodes);
        fbb.push_slot_always(vt::model::SUBGRAPHS, subgraphs);
        fbb.push_slot_always(vt::model::DESCRIPTION, description);
        fbb.push_slot_always(vt::model::BUFFERS, buffers);
        fbb.push_slot_always(vt::model::METADATA, metadata);
        fbb.push_slot_always(vt::model::SIGNATURE_DEFS, signature_defs);
        Ok(fbb.end_table(start))
    }

    fn build_metadata(&mut self) -> ExportResult<Vec<TableOffset>> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        if let Some(value) = self.module.attr(names::MODULE_METADATA) {
            let dict = value.as_dict().ok_or_else(|| ExportError::InvalidMetadata {
                reason: format!("{} must be a dictionary", names::MODULE_METADATA),
            })?;
            for (key, value) in dict {
                let content = value.as_str().ok_or_else(|| ExportError::InvalidMetadata {
                    reason: format!(
                        "all values in {}'s dictionary key-value pairs should be strings, '{}' is {}",
                        names::MODULE_METADATA,
                        key,
                        value.kind()
                    ),
                })?;
                entries.push((key.clone(), content.as_bytes().to_vec()));
            }
        }

        // Patched once the op versions are known.
        entries.push((MIN_RUNTIME_VERSION_KEY.to_string(), vec![0; MIN_RUNTIME_VERSION_SIZE]));
        if self.buffers.layout() == BufferLayout::OutOfBand {
            entries.push((BUFFER_LOCATION_KEY.to_string(), OUTSIDE_CONTAINER.as_bytes().to_vec()));
        }
        for (key, value) in &self.config.metadata {
            entries.push((key.clone(), pad_field(value)));
        }
        if self.control_edges.iter().any(|edges| !edges.is_empty()) {
            entries.push((CONTROL_DEPENDENCIES_KEY.to_string(), flex::control_dependencies(&self.control_edges)));
        }

        let mut tables = Vec::with_capacity(entries.len());
        for (name, payload) in entries {
            let buffer = self.buffers.allocate_inline(&mut self.fbb, &payload);
            let name = self.fbb.create_string(&name);
            let start = self.fbb.start_table();
            self.fbb.push_slot_always(vt::metadata::NAME, name);
            self.fbb.push_slot::<u32>(vt::metadata::BUFFER, buffer, 0);
            tables.push(self.fbb.end_table(start));
        }
        Ok(tables)
    }

    fn build_signature_defs(&mut self, functions: &[(&'m Function, String)]) -> Vec<TableOffset> {
        let mut defs = Vec::new();
        for (index, (function, _)) in functions.iter().enumerate() {
            if !function.is_entry() {
                continue;
            }
            if let Some(def) = self.signature_def(function, index as u32) {
                defs.push(def);
            }
        }
        log::debug!("built {} signature defs", defs.len());
        defs.iter().map(|def| self.write_signature_def(def)).collect()
    }

    /// Signature of an entry function exported as sub-graph `subgraph_index`.
    pub(crate) fn signature_def(&mut self, function: &Function, subgraph_index: u32) -> Option<SignatureDefData> {
        let module = self.module;
        let sig_inputs = first_strings(&function.arg_attributes, names::INDEX_PATH);
        let sig_outputs = first_strings(&function.result_attributes, names::INDEX_PATH);
        if sig_inputs.is_empty() && sig_outputs.is_empty() {
            return None;
        }

        let Some(entry) = function.entry_function_attr() else {
            log::warn!("'{}': failed to get entry function attr", function.name);
            return None;
        };
        let split = |key: &str| -> Vec<String> {
            attr::lookup(entry, key)
                .and_then(Attribute::as_str)
                .map(|s| s.split(',').filter(|n| !n.is_empty()).map(str::to_string).collect())
                .unwrap_or_default()
        };
        let input_names = split("inputs");
        let output_names = split("outputs");

        let block = module.entry_block(function.body)?;
        if input_names.len() != block.arguments.len() {
            log::warn!("'{}': entry function input names do not match the arguments", function.name);
            return None;
        }
        let terminator = module.terminator(function.body)?;
        if output_names.len() != terminator.operands.len() {
            log::warn!(
                "'{}': output names ({}) != terminator operands ({})",
                function.name,
                output_names.len(),
                terminator.operands.len()
            );
            return None;
        }
        if input_names.len() != sig_inputs.len() || output_names.len() != sig_outputs.len() {
            log::warn!(
                "'{}': mismatch between signature def inputs/outputs and function arguments",
                function.name
            );
            return None;
        }
        let signature_key = function
            .attr(names::EXPORTED_NAMES)
            .and_then(Attribute::as_array)
            .and_then(|names| names.first())
            .and_then(Attribute::as_str);
        let Some(signature_key) = signature_key else {
            log::error!("'{}': empty exported names for entry function", function.name);
            return None;
        };

        let mut def = SignatureDefData {
            signature_key: signature_key.to_string(),
            subgraph_index,
            ..SignatureDefData::default()
        };
        for (path, &arg) in sig_inputs.iter().zip(&block.arguments) {
            def.inputs.insert(path.clone(), self.names.value_name(module, arg).to_string());
        }
        // Names of the returned values, not the outputs list: deduplication may have renamed them.
        for (path, &value) in sig_outputs.iter().zip(&terminator.operands) {
            def.outputs.insert(path.clone(), self.names.value_name(module, value).to_string());
        }
        Some(def)
    }

    fn write_signature_def(&mut self, def: &SignatureDefData) -> TableOffset {
        let subgraph = def.subgraph_index as usize;
        let inputs = self.tensor_maps(subgraph, &def.inputs);
        let outputs = self.tensor_maps(subgraph, &def.outputs);
        let fbb = &mut self.fbb;
        let inputs = fbb.create_vector(&inputs);
        let outputs = fbb.create_vector(&outputs);
        let key = fbb.create_string(&def.signature_key);
        let start = fbb.start_table();
        fbb.push_slot_always(vt::signature_def::INPUTS, inputs);
        fbb.push_slot_always(vt::signature_def::OUTPUTS, outputs);
        fbb.push_slot_always(vt::signature_def::SIGNATURE_KEY, key);
        fbb.push_slot::<u32>(vt::signature_def::SUBGRAPH_INDEX, def.subgraph_index, 0);
        fbb.end_table(start)
    }

    fn tensor_maps(&mut self, subgraph: usize, items: &BTreeMap<String, String>) -> Vec<TableOffset> {
        let mut maps = Vec::with_capacity(items.len());
        for (path, tensor) in items {
            let index = self.tensor_indices.get(subgraph, tensor).unwrap_or_else(|| {
                log::warn!("signature tensor '{}' not found in sub-graph {}", tensor, subgraph);
                0
            });
            let name = self.fbb.create_string(path);
            let start = self.fbb.start_table();
            self.fbb.push_slot_always(vt::tensor_map::NAME, name);
            self.fbb.push_slot::<u32>(vt::tensor_map::TENSOR_INDEX, index as u32, 0);
            maps.push(self.fbb.end_table(start));
        }
        maps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_field() {
        assert_eq!(pad_field("1.14.0"), b"1.14.0\0\0\0\0\0\0\0\0\0\0".to_vec());
        assert_eq!(pad_field("a-very-long-metadata-value").len(), 16);
        assert_eq!(&pad_field("a-very-long-metadata-value")[..], b"a-very-long-meta");
    }

    #[test]
    fn test_first_strings() {
        let attrs = vec![
            vec![("tf_saved_model.index_path".to_string(), Attribute::strs(&["x", "ignored"]))],
            vec![],
            vec![("tf_saved_model.index_path".to_string(), Attribute::Array(vec![]))],
            vec![("tf_saved_model.index_path".to_string(), Attribute::strs(&["y"]))],
        ];
        assert_eq!(first_strings(&attrs, names::INDEX_PATH), vec!["x", "y"]);
    }
}
