// This module defines the in-memory dataflow IR that the exporter consumes. A Module owns flat
// arenas of values, operations and regions addressed by small u32 ids, plus the list of named
// functions and module-level attributes. Each function body is a region; regions hold blocks
// (the exporter requires exactly one per region) made of block arguments and an ordered list
// of operations ending in a terminator. Operations carry a `<dialect>.<name>` identity,
// ordered operands and results, an insertion-ordered attribute list and nested regions for
// control-flow style ops. The IR is read-only once built; the ModuleBuilder in `builder` is
// the only way to construct it. Well-known op names and attribute keys used across the
// exporter live in `names`.

//! Dataflow IR consumed by the exporter.
//!
//! The IR is stored in flat vectors indexed by [`ValueId`], [`OpId`] and
//! [`RegionId`]. Nothing in the exporter mutates a module; use
//! [`ModuleBuilder`] to create one.

pub mod attr;
pub mod builder;
pub mod types;

pub use attr::{Attribute, DimMetadata, ElementsAttr, ElementsData, SparsityAttr};
pub use builder::{FunctionHandle, ModuleBuilder, OpSpec};
pub use types::{ElementType, IntType, QuantType, Shape, TensorType, Type};

/// Index of a value in the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of an operation in the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// Index of a region in the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    BlockArgument { region: RegionId, index: u32 },
    OpResult { op: OpId, index: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub ty: Type,
    /// Optional human-readable name (e.g. from a source location).
    pub name: Option<String>,
    pub def: ValueDef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    pub attributes: Vec<(String, Attribute)>,
    pub regions: Vec<RegionId>,
}

impl Operation {
    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        attr::lookup(&self.attributes, key)
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attr(key).is_some()
    }

    /// Dialect prefix of the op name (`tfl` for `tfl.add`).
    pub fn dialect(&self) -> &str {
        self.name.split_once('.').map_or("", |(d, _)| d)
    }

    /// Op name without the dialect prefix.
    pub fn short_name(&self) -> &str {
        self.name.split_once('.').map_or(self.name.as_str(), |(_, n)| n)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub arguments: Vec<ValueId>,
    pub operations: Vec<OpId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub body: RegionId,
    pub attributes: Vec<(String, Attribute)>,
    pub arg_attributes: Vec<Vec<(String, Attribute)>>,
    pub result_attributes: Vec<Vec<(String, Attribute)>>,
}

impl Function {
    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        attr::lookup(&self.attributes, key)
    }

    /// Non-empty `tf.entry_function` dictionary, if present.
    pub fn entry_function_attr(&self) -> Option<&[(String, Attribute)]> {
        self.attr(names::ENTRY_FUNCTION)
            .and_then(Attribute::as_dict)
            .filter(|entries| !entries.is_empty())
    }

    pub fn is_entry(&self) -> bool {
        self.entry_function_attr().is_some()
    }
}

/// A complete module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub attributes: Vec<(String, Attribute)>,
    pub functions: Vec<Function>,
    pub(crate) values: Vec<Value>,
    pub(crate) ops: Vec<Operation>,
    pub(crate) regions: Vec<Region>,
}

impl Module {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.0 as usize]
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.0 as usize]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        attr::lookup(&self.attributes, key)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// All operation ids in arena order.
    pub fn op_ids(&self) -> impl Iterator<Item = OpId> + '_ {
        (0..self.ops.len() as u32).map(OpId)
    }

    /// Operation defining `value`, if it is not a block argument.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.value(value).def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArgument { .. } => None,
        }
    }

    /// First block of a region.
    pub fn entry_block(&self, region: RegionId) -> Option<&Block> {
        self.region(region).blocks.first()
    }

    /// Terminator of the region's first block, if the block ends in one.
    pub fn terminator(&self, region: RegionId) -> Option<&Operation> {
        let block = self.entry_block(region)?;
        let last = self.op(*block.operations.last()?);
        names::is_terminator(&last.name).then_some(last)
    }
}

/// Op names and attribute keys with meaning to the exporter.
pub mod names {
    pub const ENTRY_FUNCTION: &str = "tf.entry_function";
    pub const EXPORTED_NAMES: &str = "tf_saved_model.exported_names";
    pub const INDEX_PATH: &str = "tf_saved_model.index_path";
    pub const MODULE_DESCRIPTION: &str = "tfl.description";
    pub const MODULE_METADATA: &str = "tfl.metadata";
    pub const IS_VARIABLE: &str = "tfl.is_variable";

    pub const RETURN: &str = "func.return";
    pub const CALL: &str = "func.call";
    pub const YIELD: &str = "tfl.yield";
    pub const EXTENSION_RETURN: &str = "stablehlo.return";

    pub const CONTROL_NODE: &str = "tfl.control_node";
    pub const CUSTOM_TF: &str = "tfl.custom_tf";
    pub const STATS: &str = "quantfork.stats";
    pub const NO_VALUE: &str = "tfl.no_value";

    pub const CONSTANT_OPS: &[&str] = &[
        "arith.constant",
        "tf.Const",
        "tfl.pseudo_const",
        "tfl.pseudo_qconst",
        "tfl.pseudo_sparse_const",
        "tfl.pseudo_sparse_qconst",
        NO_VALUE,
        "stablehlo.constant",
    ];

    pub fn is_terminator(name: &str) -> bool {
        matches!(name, RETURN | YIELD | EXTENSION_RETURN)
    }

    pub fn is_constant(name: &str) -> bool {
        CONSTANT_OPS.contains(&name)
    }

    pub fn is_sparse_constant(name: &str) -> bool {
        matches!(name, "tfl.pseudo_sparse_const" | "tfl.pseudo_sparse_qconst")
    }
}
