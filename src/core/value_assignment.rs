// This module assigns the names and tensor indices that identify values in the container.
// NameMapper hands out one unique, arena-interned name per IR value: the value's own name
// when it has one, names seeded from a function's `tf.entry_function` inputs/outputs lists,
// or a name derived from the defining op; clashes are resolved by appending `_1`, `_2`, ...
// Names are unique across the whole export so signature defs and debugging tools can refer
// to tensors unambiguously. TensorIndexMap remembers, per sub-graph, which tensor index each
// name received; signature defs look tensors up through it.

//! Tensor naming and per sub-graph tensor indices.

use hashbrown::{HashMap, HashSet};

use super::session::ExportSession;
use crate::ir::{names, Attribute, Function, Module, ValueDef, ValueId};

/// Unique names for values.
pub struct NameMapper<'s, 'arena> {
    session: &'s ExportSession<'arena>,
    assigned: HashMap<ValueId, &'arena str>,
    used: HashSet<&'arena str>,
    counters: HashMap<String, u32>,
}

impl<'s, 'arena> NameMapper<'s, 'arena> {
    pub fn new(session: &'s ExportSession<'arena>) -> Self {
        Self {
            session,
            assigned: HashMap::new(),
            used: HashSet::new(),
            counters: HashMap::new(),
        }
    }

    /// Fresh name starting with `base`.
    pub fn unique_name(&mut self, base: &str) -> &'arena str {
        let base = if base.is_empty() { "tensor" } else { base };
        if !self.used.contains(base) {
            let name = self.session.intern_str(base);
            self.used.insert(name);
            return name;
        }
        let counter = self.counters.entry(base.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", base, counter);
            if !self.used.contains(candidate.as_str()) {
                let name = self.session.intern_str(&candidate);
                self.used.insert(name);
                return name;
            }
        }
    }

    /// Give `value` a name before it is first requested.
    pub fn seed(&mut self, value: ValueId, base: &str) -> &'arena str {
        if let Some(&name) = self.assigned.get(&value) {
            return name;
        }
        let name = self.unique_name(base);
        self.assigned.insert(value, name);
        name
    }

    /// Name of `value`, assigning one on first request.
    pub fn value_name(&mut self, module: &Module, value: ValueId) -> &'arena str {
        if let Some(&name) = self.assigned.get(&value) {
            return name;
        }
        let v = module.value(value);
        let base = match (&v.name, v.def) {
            (Some(name), _) => name.clone(),
            (None, ValueDef::OpResult { op, index }) => {
                let op = module.op(op);
                if index == 0 {
                    op.name.clone()
                } else {
                    format!("{}:{}", op.name, index)
                }
            }
            (None, ValueDef::BlockArgument { index, .. }) => format!("arg{}", index),
        };
        self.seed(value, &base)
    }

    /// Seed argument and result names from `tf.entry_function`.
    /// Returns true when the function names its inputs.
    pub fn seed_entry_function(&mut self, module: &Module, function: &Function) -> bool {
        let Some(entry) = function.entry_function_attr() else {
            return false;
        };
        let split = |key: &str| -> Vec<String> {
            crate::ir::attr::lookup(entry, key)
                .and_then(Attribute::as_str)
                .map(|s| s.split(',').filter(|n| !n.is_empty()).map(str::to_string).collect())
                .unwrap_or_default()
        };
        let Some(block) = module.entry_block(function.body) else {
            return false;
        };

        let inputs = split("inputs");
        let has_inputs = !inputs.is_empty();
        if has_inputs {
            if inputs.len() != block.arguments.len() {
                log::warn!(
                    "'{}': number of input arguments ({}) does not match the number of input names ({})",
                    function.name,
                    block.arguments.len(),
                    inputs.len()
                );
            } else {
                for (&arg, name) in block.arguments.iter().zip(&inputs) {
                    self.seed(arg, name);
                }
            }
        }

        let outputs = split("outputs");
        if !outputs.is_empty() {
            if let Some(terminator) = block.operations.last().map(|&op| module.op(op)) {
                if names::is_terminator(&terminator.name) && terminator.operands.len() == outputs.len() {
                    for (&value, name) in terminator.operands.iter().zip(&outputs) {
                        self.seed(value, name);
                    }
                } else {
                    log::warn!(
                        "'{}': number of return values does not match the number of output names ({})",
                        function.name,
                        outputs.len()
                    );
                }
            }
        }
        has_inputs
    }
}

/// Tensor index of every named tensor, per sub-graph.
#[derive(Debug, Default)]
pub struct TensorIndexMap {
    subgraphs: HashMap<usize, HashMap<String, i32>>,
}

impl TensorIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subgraph: usize, name: &str, index: i32) {
        self.subgraphs.entry(subgraph).or_default().insert(name.to_string(), index);
    }

    pub fn get(&self, subgraph: usize, name: &str) -> Option<i32> {
        self.subgraphs.get(&subgraph)?.get(name).copied()
    }
}
