// This module implements the analyses the exporter runs before encoding. UseMap records, for
// every value of a module, the operations that consume it and at which operand position,
// including uses inside nested regions; the encoders use it to decide whether a constant is
// returned from its sub-graph (and so must not be deduplicated), whether a value feeds a
// statistics pseudo-node, and whether a use is a stateful operand. RegionAnalysis walks one
// single-block region in node order: it rejects multi-block regions, finds the control-node
// wrappers and turns their control-token uses into (producer, consumer) edges keyed by node
// position, and resolves each node to the operation that is actually encoded (the wrapped op
// of a control node) together with the results users refer to.

use hashbrown::HashMap;

use super::error::{ExportError, ExportResult};
use crate::ir::{names, Module, OpId, Operation, RegionId, Type, ValueId};

/// One use of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub op: OpId,
    pub operand: usize,
}

/// Users of every value in a module.
#[derive(Debug, Default)]
pub struct UseMap {
    uses: HashMap<ValueId, Vec<Use>>,
}

impl UseMap {
    pub fn build(module: &Module) -> Self {
        let mut uses: HashMap<ValueId, Vec<Use>> = HashMap::new();
        for id in module.op_ids() {
            for (operand, value) in module.op(id).operands.iter().enumerate() {
                uses.entry(*value).or_default().push(Use { op: id, operand });
            }
        }
        Self { uses }
    }

    pub fn uses(&self, value: ValueId) -> &[Use] {
        self.uses.get(&value).map_or(&[], Vec::as_slice)
    }

    /// Value is an operand of a `func.return`.
    pub fn is_returned(&self, module: &Module, value: ValueId) -> bool {
        self.uses(value).iter().any(|u| module.op(u.op).name == names::RETURN)
    }

    /// Statistics node consuming `value`, when it is the only user.
    pub fn single_stats_user(&self, module: &Module, value: ValueId) -> Option<OpId> {
        match self.uses(value) {
            [only] if module.op(only.op).name == names::STATS => Some(only.op),
            _ => None,
        }
    }
}

/// One node of a region as the encoder sees it.
#[derive(Debug, Clone)]
pub struct Node<'m> {
    /// Position of the node in its block.
    pub position: usize,
    /// Id of the node in the block (the wrapper for control nodes).
    pub id: OpId,
    /// Operation to encode.
    pub op: &'m Operation,
    /// Results users refer to, without control tokens.
    pub results: Vec<ValueId>,
}

/// Node order and control edges of one region.
#[derive(Debug)]
pub struct RegionAnalysis<'m> {
    pub arguments: Vec<ValueId>,
    pub nodes: Vec<Node<'m>>,
    /// Control edges as (producer position, consumer position).
    pub control_edges: Vec<(usize, usize)>,
    /// Operands of the terminator.
    pub outputs: Vec<ValueId>,
}

impl<'m> RegionAnalysis<'m> {
    /// Analyze `region`; `owner` names it in errors.
    pub fn new(module: &'m Module, region: RegionId, owner: &str) -> ExportResult<Self> {
        let blocks = &module.region(region).blocks;
        if blocks.len() != 1 {
            return Err(ExportError::MultiBlockRegion {
                function: owner.to_string(),
                blocks: blocks.len(),
            });
        }
        let block = &blocks[0];

        // -------- locate control nodes ---------
        let mut control_positions: HashMap<OpId, usize> = HashMap::new();
        for (position, &id) in block.operations.iter().enumerate() {
            if module.op(id).name == names::CONTROL_NODE {
                control_positions.insert(id, position);
            }
        }

        // -------- extract edges and unwrap ---------
        let mut control_edges = Vec::new();
        let mut nodes = Vec::with_capacity(block.operations.len());
        let mut outputs = Vec::new();
        for (position, &id) in block.operations.iter().enumerate() {
            let op = module.op(id);
            if names::is_terminator(&op.name) {
                outputs = op.operands.clone();
                break;
            }
            if op.name != names::CONTROL_NODE {
                nodes.push(Node { position, id, op, results: op.results.clone() });
                continue;
            }

            // Consumers of the token are the later control nodes that wait on this one.
            let mut data_results = Vec::with_capacity(op.results.len());
            for &result in &op.results {
                if module.value(result).ty == Type::Control {
                    for other in block.operations.iter().skip(position + 1) {
                        if module.op(*other).operands.contains(&result) {
                            if let Some(&consumer) = control_positions.get(other) {
                                control_edges.push((position, consumer));
                            }
                        }
                    }
                } else {
                    data_results.push(result);
                }
            }
            let inner = op
                .regions
                .first()
                .and_then(|r| module.entry_block(*r))
                .and_then(|b| b.operations.first())
                .map(|&inner| module.op(inner))
                .ok_or_else(|| ExportError::InvalidAttribute {
                    op: op.name.clone(),
                    reason: "control node without a wrapped operation".into(),
                })?;
            nodes.push(Node { position, id, op: inner, results: data_results });
        }

        Ok(Self { arguments: block.arguments.clone(), nodes, control_edges, outputs })
    }
}

/// Operands of `op` that are real data values (control tokens removed).
pub fn data_operands(module: &Module, op: &Operation) -> Vec<ValueId> {
    op.operands
        .iter()
        .copied()
        .filter(|&v| module.value(v).ty != Type::Control)
        .collect()
}
