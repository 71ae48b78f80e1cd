// This module builds one sub-graph record from a single-block region. Block arguments become
// the sub-graph inputs, named from the entry function's input list when it has one and
// `arg<i>` otherwise. Every node result gets a tensor; constants get a buffer slot holding
// their payload (shared between identical constants unless the constant is returned), all
// other tensors an empty slot. Statistics nodes are folded into the calibration range of the
// tensor they observe and never become operators. Recurrent ops get their intermediate
// tensors from type attributes. Operand lookups go through the per sub-graph tensor map;
// an operand with no tensor (an optional input) is -1. Control edges recorded by the region
// analysis are translated from block positions to operator indices.

use hashbrown::HashMap;

use super::operator::OperatorIo;
use super::tensor::{build_tensor, build_tensor_from_type, Calibration, TensorSpec};
use super::translator::Translator;
use crate::container::schema::vt;
use crate::container::TableOffset;
use crate::core::analyzer::{data_operands, RegionAnalysis};
use crate::core::error::{ExportError, ExportResult};
use crate::ir::{names, Attribute, ElementsAttr, ElementsData, Function, Operation, RegionId, ValueId};

/// Type attributes of the recurrent ops that describe intermediate tensors.
const LSTM_INTERMEDIATES: [&str; 5] = [
    "input_to_input_intermediate",
    "input_to_forget_intermediate",
    "input_to_cell_intermediate",
    "input_to_output_intermediate",
    "effective_hidden_scale_intermediate",
];

/// Payload attribute of a constant op.
fn constant_payload(op: &Operation) -> Option<&ElementsAttr> {
    if !names::is_constant(&op.name) {
        return None;
    }
    let key = if names::is_sparse_constant(&op.name) { "compressed_data" } else { "value" };
    op.attr(key).and_then(Attribute::as_elements)
}

fn payload_size(value: &ElementsAttr) -> usize {
    match &value.data {
        ElementsData::Raw(bytes) => bytes.len(),
        ElementsData::Strings(items) => items.iter().map(Vec::len).sum(),
    }
}

/// Tensor index of every value of the sub-graph being built.
type LocalTensors = HashMap<ValueId, i32>;

impl<'m, 's, 'arena> Translator<'m, 's, 'arena> {
    /// Build the sub-graph `name` at `index`. `Ok(None)` means at least one op
    /// could not be encoded; the reason is in the diagnostics.
    pub(crate) fn build_subgraph(
        &mut self,
        name: &str,
        region: RegionId,
        index: usize,
        function: Option<&'m Function>,
    ) -> ExportResult<Option<TableOffset>> {
        let module = self.module;
        let analysis = RegionAnalysis::new(module, region, name)?;
        self.session.set_current_subgraph(name);
        let has_inputs = function.is_some_and(|f| self.names.seed_entry_function(module, f));

        let mut tensors: Vec<TableOffset> = Vec::new();
        let mut local = LocalTensors::new();

        for (i, &arg) in analysis.arguments.iter().enumerate() {
            let tensor_name = if has_inputs {
                self.names.value_name(module, arg)
            } else {
                self.session.intern_str(&format!("arg{}", i))
            };
            self.add_tensor(&mut tensors, &mut local, index, arg, tensor_name, None)?;
        }

        let mut operators: Vec<TableOffset> = Vec::new();
        let mut operator_at: HashMap<usize, i32> = HashMap::new();
        let mut failed = false;

        for node in &analysis.nodes {
            let op = node.op;
            if op.name == names::STATS {
                continue;
            }

            let mut intermediates = Vec::new();
            if matches!(op.name.as_str(), "tfl.lstm" | "tfl.unidirectional_sequence_lstm") {
                for key in LSTM_INTERMEDIATES {
                    let Some(ty) = op.attr(key).and_then(Attribute::as_type) else {
                        continue;
                    };
                    let tensor_name = self.names.unique_name(key);
                    if let Some(table) = build_tensor_from_type(&mut self.fbb, tensor_name, ty)? {
                        intermediates.push(tensors.len() as i32);
                        tensors.push(table);
                        self.session.record_tensor();
                    }
                }
            }

            for &result in &node.results {
                let tensor_name = if op.name == "tfl.numeric_verify" && !op.operands.is_empty() {
                    let observed = op.operands[0];
                    let observed_name = self.names.value_name(module, observed);
                    let observed_index = self.operand_index(&local, observed);
                    self.session
                        .intern_str(&format!("NumericVerify/{}:{}", observed_name, observed_index))
                } else {
                    self.names.value_name(module, result)
                };
                self.add_tensor(&mut tensors, &mut local, index, result, tensor_name, Some(op))?;
            }
            if self.buffers.needs_out_of_band() {
                log::debug!("'{}': stopping early, constants need the out-of-band layout", name);
                return Ok(None);
            }

            if names::is_constant(&op.name) {
                continue;
            }

            let inputs = data_operands(module, op)
                .into_iter()
                .map(|v| self.operand_index(&local, v))
                .collect();
            let outputs = node.results.iter().map(|&v| self.operand_index(&local, v)).collect();
            let encoded = if op.name == names::CUSTOM_TF {
                op.regions
                    .first()
                    .and_then(|&r| module.entry_block(r))
                    .and_then(|b| b.operations.first())
                    .map_or(op, |&id| module.op(id))
            } else {
                op
            };

            let io = OperatorIo { inputs, outputs, intermediates, subgraph: index, position: operators.len() };
            match self.build_operator(encoded, io)? {
                Some(table) => {
                    operator_at.insert(node.position, operators.len() as i32);
                    operators.push(table);
                    self.session.record_operator(&encoded.name);
                }
                None => failed = true,
            }
        }

        if failed {
            return Ok(None);
        }

        let inputs: Vec<i32> = analysis.arguments.iter().map(|&v| self.operand_index(&local, v)).collect();
        let outputs: Vec<i32> = analysis.outputs.iter().map(|&v| self.operand_index(&local, v)).collect();

        let mut edges = Vec::with_capacity(analysis.control_edges.len());
        for &(from, to) in &analysis.control_edges {
            match (operator_at.get(&from), operator_at.get(&to)) {
                (Some(&producer), Some(&consumer)) => edges.push((producer, consumer)),
                _ => {
                    return Err(ExportError::DanglingControlEdge { subgraph: name.to_string(), from, to });
                }
            }
        }
        if self.control_edges.len() <= index {
            self.control_edges.resize(index + 1, Vec::new());
        }
        self.control_edges[index] = edges;

        let operator_count = operators.len();
        let tensor_count = tensors.len();
        let fbb = &mut self.fbb;
        let tensors = fbb.create_vector(&tensors);
        let inputs = fbb.create_vector(&inputs);
        let outputs = fbb.create_vector(&outputs);
        let operators = fbb.create_vector(&operators);
        let subgraph_name = fbb.create_string(name);
        let start = fbb.start_table();
        fbb.push_slot_always(vt::sub_graph::TENSORS, tensors);
        fbb.push_slot_always(vt::sub_graph::INPUTS, inputs);
        fbb.push_slot_always(vt::sub_graph::OUTPUTS, outputs);
        fbb.push_slot_always(vt::sub_graph::OPERATORS, operators);
        fbb.push_slot_always(vt::sub_graph::NAME, subgraph_name);
        let table = fbb.end_table(start);

        self.session.record_subgraph(name, operator_count);
        log::info!(
            "built sub-graph '{}' (index {}): {} tensors, {} operators",
            name,
            index,
            tensor_count,
            operator_count
        );
        Ok(Some(table))
    }

    fn add_tensor(
        &mut self,
        tensors: &mut Vec<TableOffset>,
        local: &mut LocalTensors,
        subgraph: usize,
        value: ValueId,
        name: &str,
        defining: Option<&'m Operation>,
    ) -> ExportResult<()> {
        let module = self.module;
        let Some(ty) = module.value(value).ty.as_tensor() else {
            return Ok(());
        };
        let index = tensors.len() as i32;
        local.insert(value, index);
        self.tensor_indices.insert(subgraph, name, index);

        let calibration = self
            .uses
            .single_stats_user(module, value)
            .and_then(|stats| Calibration::from_stats(module.op(stats)));

        let buffer = match defining.and_then(constant_payload) {
            Some(payload) => {
                let dedup = !self.uses.is_returned(module, value);
                let (slot, reused) = self.buffers.allocate_constant(&mut self.fbb, payload, dedup);
                if reused {
                    self.session.record_dedup_hit();
                } else {
                    self.session.record_buffer(payload_size(payload));
                }
                slot
            }
            None => self.buffers.empty_slot(),
        };

        // Presence marks the tensor, whatever the value.
        let marked_variable = defining.is_some_and(|op| op.has_attr(names::IS_VARIABLE));
        let stateful_use = self.uses.uses(value).iter().any(|u| {
            self.collaborators
                .stateful
                .stateful_operands(module.op(u.op))
                .contains(&u.operand)
        });

        let spec = TensorSpec {
            name,
            ty,
            buffer,
            is_variable: marked_variable || stateful_use,
            constant: defining.filter(|op| names::is_constant(&op.name)),
            calibration,
        };
        let table = build_tensor(&mut self.fbb, &spec)?;
        tensors.push(table);
        self.session.record_tensor();
        Ok(())
    }

    /// Tensor index of an operand in the sub-graph being built, -1 for absent values.
    fn operand_index(&self, local: &LocalTensors, value: ValueId) -> i32 {
        let module = self.module;
        if module.value(value).ty.is_none() {
            return -1;
        }
        // Statistics nodes are transparent.
        let value = match module.defining_op(value).map(|id| module.op(id)) {
            Some(stats) if stats.name == names::STATS && !stats.operands.is_empty() => stats.operands[0],
            _ => value,
        };
        match local.get(&value) {
            Some(&index) => index,
            None => {
                log::warn!(
                    "{}: operand {:?} has no tensor in this sub-graph",
                    self.session.current_subgraph().unwrap_or_default(),
                    value
                );
                -1
            }
        }
    }
}
