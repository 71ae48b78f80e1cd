// This module provides ModuleBuilder, the programmatic constructor for the dataflow IR. Functions
// are created with their argument types; nested regions (loop bodies, reduction bodies,
// control-node payloads) are created detached and attached to an operation through OpSpec.
// Operations are appended to the last block of a region in declaration order, which is also
// the order the exporter encodes them in. OpSpec is a small by-value description of one
// operation (name, operands, result types, attributes, regions) so that building never holds
// borrows into the module under construction.

use super::attr::{Attribute, ElementsAttr};
use super::types::Type;
use super::{Block, Function, Module, OpId, Operation, Region, RegionId, Value, ValueDef, ValueId};

/// Description of one operation to append.
#[derive(Debug, Clone, Default)]
pub struct OpSpec {
    name: String,
    operands: Vec<ValueId>,
    results: Vec<(Type, Option<String>)>,
    attributes: Vec<(String, Attribute)>,
    regions: Vec<RegionId>,
}

impl OpSpec {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    pub fn operand(mut self, value: ValueId) -> Self {
        self.operands.push(value);
        self
    }

    pub fn operands(mut self, values: impl IntoIterator<Item = ValueId>) -> Self {
        self.operands.extend(values);
        self
    }

    pub fn result(mut self, ty: Type) -> Self {
        self.results.push((ty, None));
        self
    }

    pub fn named_result(mut self, ty: Type, name: &str) -> Self {
        self.results.push((ty, Some(name.to_string())));
        self
    }

    pub fn attr(mut self, key: &str, value: Attribute) -> Self {
        self.attributes.push((key.to_string(), value));
        self
    }

    pub fn region(mut self, region: RegionId) -> Self {
        self.regions.push(region);
        self
    }
}

/// Handle to a function under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionHandle {
    pub index: usize,
    pub body: RegionId,
}

/// Incremental module constructor.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module_attr(&mut self, key: &str, value: Attribute) -> &mut Self {
        self.module.attributes.push((key.to_string(), value));
        self
    }

    /// Create a function with a single-block body taking `args`.
    pub fn function(&mut self, name: &str, args: Vec<Type>) -> FunctionHandle {
        let arg_count = args.len();
        let body = self.region(args);
        self.module.functions.push(Function {
            name: name.to_string(),
            body,
            attributes: Vec::new(),
            arg_attributes: vec![Vec::new(); arg_count],
            result_attributes: Vec::new(),
        });
        FunctionHandle { index: self.module.functions.len() - 1, body }
    }

    pub fn function_attr(&mut self, f: FunctionHandle, key: &str, value: Attribute) -> &mut Self {
        self.module.functions[f.index].attributes.push((key.to_string(), value));
        self
    }

    pub fn arg_attr(&mut self, f: FunctionHandle, arg: usize, key: &str, value: Attribute) -> &mut Self {
        let attrs = &mut self.module.functions[f.index].arg_attributes;
        if attrs.len() <= arg {
            attrs.resize(arg + 1, Vec::new());
        }
        attrs[arg].push((key.to_string(), value));
        self
    }

    pub fn result_attr(&mut self, f: FunctionHandle, result: usize, key: &str, value: Attribute) -> &mut Self {
        let attrs = &mut self.module.functions[f.index].result_attributes;
        if attrs.len() <= result {
            attrs.resize(result + 1, Vec::new());
        }
        attrs[result].push((key.to_string(), value));
        self
    }

    /// Argument `index` of a function body.
    pub fn arg(&self, f: FunctionHandle, index: usize) -> ValueId {
        self.region_arg(f.body, index)
    }

    /// Create a detached region whose first block takes `args`.
    pub fn region(&mut self, args: Vec<Type>) -> RegionId {
        let region = RegionId(self.module.regions.len() as u32);
        let mut block = Block::default();
        for (index, ty) in args.into_iter().enumerate() {
            block.arguments.push(self.new_value(
                ty,
                None,
                ValueDef::BlockArgument { region, index: index as u32 },
            ));
        }
        self.module.regions.push(Region { blocks: vec![block] });
        region
    }

    pub fn region_arg(&self, region: RegionId, index: usize) -> ValueId {
        self.module.regions[region.0 as usize].blocks[0].arguments[index]
    }

    /// Append an empty block to a region. Later ops go into the new block.
    pub fn add_block(&mut self, region: RegionId) -> &mut Self {
        self.module.regions[region.0 as usize].blocks.push(Block::default());
        self
    }

    /// Append an operation to the last block of `region`.
    pub fn push(&mut self, region: RegionId, spec: OpSpec) -> OpId {
        let id = OpId(self.module.ops.len() as u32);
        let results = spec
            .results
            .into_iter()
            .enumerate()
            .map(|(index, (ty, name))| {
                self.new_value(ty, name, ValueDef::OpResult { op: id, index: index as u32 })
            })
            .collect();
        self.module.ops.push(Operation {
            name: spec.name,
            operands: spec.operands,
            results,
            attributes: spec.attributes,
            regions: spec.regions,
        });
        if let Some(block) = self.module.regions[region.0 as usize].blocks.last_mut() {
            block.operations.push(id);
        }
        id
    }

    /// Append an operation and return its first result.
    pub fn push_value(&mut self, region: RegionId, spec: OpSpec) -> ValueId {
        let op = self.push(region, spec);
        self.result(op, 0)
    }

    pub fn result(&self, op: OpId, index: usize) -> ValueId {
        self.module.ops[op.0 as usize].results[index]
    }

    /// Append a `tfl.pseudo_const` holding `value`.
    pub fn constant(&mut self, region: RegionId, value: ElementsAttr) -> ValueId {
        let ty = Type::Tensor(value.ty.clone());
        self.push_value(
            region,
            OpSpec::new("tfl.pseudo_const").result(ty).attr("value", Attribute::Elements(value)),
        )
    }

    /// Append a `func.return` of `values`.
    pub fn ret(&mut self, region: RegionId, values: &[ValueId]) -> OpId {
        self.push(region, OpSpec::new(super::names::RETURN).operands(values.iter().copied()))
    }

    pub fn set_value_name(&mut self, value: ValueId, name: &str) -> &mut Self {
        self.module.values[value.0 as usize].name = Some(name.to_string());
        self
    }

    pub fn finish(self) -> Module {
        self.module
    }

    fn new_value(&mut self, ty: Type, name: Option<String>, def: ValueDef) -> ValueId {
        let id = ValueId(self.module.values.len() as u32);
        self.module.values.push(Value { ty, name, def });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ElementType;

    #[test]
    fn test_build_simple_function() {
        let mut mb = ModuleBuilder::new();
        let f32x2 = Type::tensor(ElementType::F32, &[2]);
        let main = mb.function("main", vec![f32x2.clone(), f32x2.clone()]);
        let a = mb.arg(main, 0);
        let b = mb.arg(main, 1);
        let sum = mb.push_value(main.body, OpSpec::new("tfl.add").operands([a, b]).result(f32x2));
        mb.ret(main.body, &[sum]);
        let module = mb.finish();

        let block = module.entry_block(main.body).unwrap();
        assert_eq!(block.arguments.len(), 2);
        assert_eq!(block.operations.len(), 2);
        let add = module.op(block.operations[0]);
        assert_eq!(add.dialect(), "tfl");
        assert_eq!(add.short_name(), "add");
        assert_eq!(module.defining_op(sum), Some(block.operations[0]));
        assert_eq!(module.defining_op(a), None);
        assert_eq!(module.terminator(main.body).map(|t| t.name.as_str()), Some("func.return"));
    }
}
