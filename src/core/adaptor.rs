// This module defines the collaborator traits through which the exporter consults knowledge it
// does not own. OpCatalog maps native op names to builtin codes and encodes their option
// tables. ForeignOpAdaptor decides which foreign ops may travel through the flex path, turns
// a foreign op into a descriptor (op name plus attributes) and serializes that descriptor.
// StatefulOperands names the operand positions of an op that refer to variable tensors.
// VersionResolver picks the version of every operator code and the minimum runtime version
// once the container is finished. DelegateChecker verifies a finished container against a
// hardware backend. Every trait ships a default implementation so the exporter works
// standalone; Collaborators bundles one of each and is what the translator receives.

//! Collaborator traits consulted by the exporter.
//!
//! The exporter makes a few assumptions about its collaborators:
//! - Catalog lookups are pure; the same op always maps to the same code.
//! - Option encoders only write option tables into the builder they are given.
//! - Descriptor serialization is deterministic, so two exports of the same
//!   module produce identical bytes.
//! - Version resolution and delegate checks only read the finished container.

use std::collections::BTreeSet;

use flatbuffers::{UnionWIPOffset, WIPOffset};
use flexbuffers::Builder;

use super::error::{ExportError, ExportResult};
use crate::container::reader;
use crate::container::schema::{builtin_op, tensor_type};
use crate::container::Fbb;
use crate::ir::{Attribute, Module, Operation};

/// Options table produced by a catalog encoder.
#[derive(Clone, Copy)]
pub struct EncodedOptions {
    /// Tag of the options union.
    pub union_type: u8,
    pub table: WIPOffset<UnionWIPOffset>,
}

impl std::fmt::Debug for EncodedOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedOptions")
            .field("union_type", &self.union_type)
            .field("table", &self.table.value())
            .finish()
    }
}

/// Native op catalog.
pub trait OpCatalog {
    /// Builtin code of a native op, `None` when the op is not in the catalog.
    fn builtin_code(&self, op_name: &str) -> Option<i32>;

    /// Encode the builtin options of `op`. `Ok(None)` means the op has no options.
    fn encode_options(&self, op: &Operation, fbb: &mut Fbb) -> ExportResult<Option<EncodedOptions>>;
}

/// Foreign op in portable form.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignOpDescriptor {
    /// Name of the node in the graph.
    pub name: String,
    /// Op type without dialect prefix (`MatMul` for `tf.MatMul`).
    pub op: String,
    pub attrs: Vec<(String, Attribute)>,
}

/// Knowledge about the foreign framework's ops.
pub trait ForeignOpAdaptor {
    /// Op is on the built-in flex allow-list.
    fn is_allowlisted(&self, op: &str) -> bool;

    /// Op has a registered kernel in the foreign runtime.
    fn is_registered(&self, op: &str) -> bool;

    /// Descriptor of `op`, named `name`.
    fn descriptor(&self, _module: &Module, op: &Operation, name: &str) -> ExportResult<ForeignOpDescriptor> {
        Ok(ForeignOpDescriptor {
            name: name.to_string(),
            op: op.short_name().to_string(),
            attrs: op
                .attributes
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .cloned()
                .collect(),
        })
    }

    /// Serialized form carried in flex op options.
    fn serialize_descriptor(&self, descriptor: &ForeignOpDescriptor) -> ExportResult<Vec<u8>> {
        let mut builder = Builder::default();
        let mut map = builder.start_map();
        map.push("name", descriptor.name.as_str());
        map.push("op", descriptor.op.as_str());
        {
            let mut attrs = map.start_map("attr");
            for (key, value) in &descriptor.attrs {
                match value {
                    Attribute::Bool(b) => attrs.push(key, *b),
                    Attribute::Int(v) => attrs.push(key, *v),
                    Attribute::Float(v) => attrs.push(key, *v),
                    Attribute::Str(s) | Attribute::Symbol(s) => attrs.push(key, s.as_str()),
                    other => attrs.push(key, other.to_string().as_str()),
                }
            }
            attrs.end_map();
        }
        map.end_map();
        Ok(builder.take_buffer())
    }
}

/// Foreign ops that are never exported through the flex path.
pub const NEVER_FLEX: [&str; 2] = ["PartitionedCall", "StatefulPartitionedCall"];

/// Built-in flex allow-list.
const DEFAULT_ALLOWLIST: &[&str] = &[
    "Abs",
    "Add",
    "AddN",
    "AddV2",
    "All",
    "Any",
    "ArgMax",
    "ArgMin",
    "Assert",
    "AudioSpectrogram",
    "AvgPool",
    "BatchMatMul",
    "BatchMatMulV2",
    "BiasAdd",
    "Bitcast",
    "BroadcastTo",
    "Cast",
    "Ceil",
    "ConcatV2",
    "Conv2D",
    "Cos",
    "Cumsum",
    "DepthwiseConv2dNative",
    "Einsum",
    "Equal",
    "Erf",
    "Exp",
    "ExpandDims",
    "Fill",
    "Floor",
    "FloorDiv",
    "FloorMod",
    "GatherV2",
    "Greater",
    "HashTableV2",
    "Identity",
    "Less",
    "Log",
    "LogicalAnd",
    "LookupTableFindV2",
    "LookupTableImportV2",
    "LookupTableSizeV2",
    "MatMul",
    "Max",
    "MaxPool",
    "Maximum",
    "Mean",
    "Min",
    "Minimum",
    "Mul",
    "Neg",
    "NonMaxSuppressionV4",
    "OneHot",
    "Pack",
    "Pad",
    "Pow",
    "Prod",
    "Range",
    "RealDiv",
    "Relu",
    "Relu6",
    "Reshape",
    "ResizeBilinear",
    "Rsqrt",
    "Select",
    "SelectV2",
    "Shape",
    "Sigmoid",
    "Sin",
    "Size",
    "Slice",
    "Softmax",
    "Split",
    "Sqrt",
    "Square",
    "Squeeze",
    "StridedSlice",
    "Sub",
    "Sum",
    "Tanh",
    "Tile",
    "TopKV2",
    "Transpose",
    "Unpack",
    "Where",
    "ZerosLike",
];

/// Default foreign op knowledge.
#[derive(Debug, Clone, Default)]
pub struct DefaultForeignOps {
    /// Registered ops; `None` treats every op as registered.
    pub registered: Option<BTreeSet<String>>,
}

impl DefaultForeignOps {
    pub fn with_registered<I, S>(ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { registered: Some(ops.into_iter().map(Into::into).collect()) }
    }
}

impl ForeignOpAdaptor for DefaultForeignOps {
    fn is_allowlisted(&self, op: &str) -> bool {
        !NEVER_FLEX.contains(&op) && DEFAULT_ALLOWLIST.binary_search(&op).is_ok()
    }

    fn is_registered(&self, op: &str) -> bool {
        if NEVER_FLEX.contains(&op) {
            return false;
        }
        self.registered.as_ref().map_or(true, |ops| ops.contains(op))
    }
}

/// Operand positions that refer to variable (stateful) tensors.
pub trait StatefulOperands {
    fn stateful_operands(&self, op: &Operation) -> Vec<usize>;
}

/// Stateful operands of the recurrent native ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrentStateOperands;

impl StatefulOperands for RecurrentStateOperands {
    fn stateful_operands(&self, op: &Operation) -> Vec<usize> {
        match op.name.as_str() {
            "tfl.lstm" | "tfl.unidirectional_sequence_lstm" => vec![18, 19],
            "tfl.unidirectional_sequence_rnn" | "tfl.svdf" => vec![4],
            "tfl.bidirectional_sequence_lstm" => vec![35, 36, 37, 38],
            _ => Vec::new(),
        }
    }
}

/// Resolves operator code versions of a finished container.
pub trait VersionResolver {
    /// Version of builtin opcode `opcode_index`.
    fn operator_version(&self, model: &reader::Model<'_>, opcode_index: usize) -> i32;

    /// Minimum runtime able to execute the model.
    fn min_runtime_version(&self, model: &reader::Model<'_>) -> String;
}

/// Version 1 for every op.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineVersions;

impl VersionResolver for BaselineVersions {
    fn operator_version(&self, _model: &reader::Model<'_>, _opcode_index: usize) -> i32 {
        1
    }

    fn min_runtime_version(&self, _model: &reader::Model<'_>) -> String {
        "1.5.0".to_string()
    }
}

/// Hardware backend compatibility check.
pub trait DelegateChecker {
    /// Backend name as given in `supported_backends`.
    fn backend(&self) -> &str;

    /// Incompatible ops as (op name, reason).
    fn check(&self, model: &reader::Model<'_>) -> Vec<(String, String)>;
}

/// Coarse GPU delegate rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuCompatibility;

const GPU_TENSOR_TYPES: [i8; 6] = [
    tensor_type::FLOAT32,
    tensor_type::FLOAT16,
    tensor_type::INT32,
    tensor_type::INT8,
    tensor_type::UINT8,
    tensor_type::BOOL,
];

impl DelegateChecker for GpuCompatibility {
    fn backend(&self) -> &str {
        "GPU"
    }

    fn check(&self, model: &reader::Model<'_>) -> Vec<(String, String)> {
        let mut issues = Vec::new();
        for subgraph in &model.subgraphs {
            for op in &subgraph.operators {
                let Some(code) = model.operator_codes.get(op.opcode_index as usize) else {
                    continue;
                };
                let name = code.display_name();
                if code.is_custom() {
                    issues.push((name, "custom ops are not supported".to_string()));
                    continue;
                }
                if code.builtin_code >= builtin_op::FIRST_EXTENSION {
                    issues.push((name, "extension ops are not supported".to_string()));
                    continue;
                }
                let bad_type = op
                    .inputs
                    .iter()
                    .chain(&op.outputs)
                    .filter(|&&t| t >= 0)
                    .filter_map(|&t| subgraph.tensors.get(t as usize))
                    .find(|t| !GPU_TENSOR_TYPES.contains(&t.ty));
                if let Some(tensor) = bad_type {
                    issues.push((
                        name,
                        format!(
                            "tensor '{}' has unsupported type {}",
                            tensor.name,
                            tensor_type::name(tensor.ty)
                        ),
                    ));
                }
            }
        }
        issues
    }
}

/// One implementation of every collaborator.
pub struct Collaborators {
    pub catalog: Box<dyn OpCatalog>,
    pub foreign_ops: Box<dyn ForeignOpAdaptor>,
    pub stateful: Box<dyn StatefulOperands>,
    pub versions: Box<dyn VersionResolver>,
    pub delegates: Vec<Box<dyn DelegateChecker>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            catalog: Box::new(crate::export::catalog::StaticCatalog::new()),
            foreign_ops: Box::new(DefaultForeignOps::default()),
            stateful: Box::new(RecurrentStateOperands),
            versions: Box::new(BaselineVersions),
            delegates: vec![Box::new(GpuCompatibility)],
        }
    }
}

impl Collaborators {
    pub fn with_foreign_ops(mut self, adaptor: impl ForeignOpAdaptor + 'static) -> Self {
        self.foreign_ops = Box::new(adaptor);
        self
    }

    pub fn with_versions(mut self, resolver: impl VersionResolver + 'static) -> Self {
        self.versions = Box::new(resolver);
        self
    }

    pub fn with_delegate(mut self, checker: impl DelegateChecker + 'static) -> Self {
        self.delegates.push(Box::new(checker));
        self
    }

    /// Run the checkers whose backend is listed in `backends`.
    pub fn check_delegates(
        &self,
        model: &reader::Model<'_>,
        backends: &BTreeSet<String>,
    ) -> Vec<(String, Vec<(String, String)>)> {
        self.delegates
            .iter()
            .filter(|checker| backends.contains(checker.backend()))
            .map(|checker| (checker.backend().to_string(), checker.check(model)))
            .filter(|(_, issues)| !issues.is_empty())
            .collect()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("delegates", &self.delegates.iter().map(|d| d.backend().to_string()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Error for an attribute an option encoder cannot use.
pub fn invalid_attribute(op: &Operation, key: &str, expected: &str) -> ExportError {
    ExportError::InvalidAttribute {
        op: op.name.clone(),
        reason: match op.attr(key) {
            Some(value) => format!("attribute '{}' must be {}, got {}", key, expected, value.kind()),
            None => format!("missing required attribute '{}' ({})", key, expected),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, ModuleBuilder, OpSpec, Type};

    #[test]
    fn test_allowlist_is_sorted() {
        let mut sorted = DEFAULT_ALLOWLIST.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, DEFAULT_ALLOWLIST);
    }

    #[test]
    fn test_default_foreign_ops() {
        let ops = DefaultForeignOps::default();
        assert!(ops.is_allowlisted("MatMul"));
        assert!(!ops.is_allowlisted("CustomThing"));
        assert!(ops.is_registered("CustomThing"));
        assert!(!ops.is_registered("PartitionedCall"));

        let limited = DefaultForeignOps::with_registered(["MatMul"]);
        assert!(limited.is_registered("MatMul"));
        assert!(!limited.is_registered("CustomThing"));
    }

    #[test]
    fn test_descriptor_drops_private_attrs() {
        let mut b = ModuleBuilder::new();
        let f = b.function("main", vec![]);
        let op = b.push(
            f.body,
            OpSpec::new("tf.CustomThing")
                .result(Type::tensor(ElementType::F32, &[1]))
                .attr("k", Attribute::Int(5))
                .attr("_class", Attribute::str("loc")),
        );
        let module = b.finish();
        let desc = DefaultForeignOps::default()
            .descriptor(&module, module.op(op), "thing")
            .unwrap();
        assert_eq!(desc.op, "CustomThing");
        assert_eq!(desc.name, "thing");
        assert_eq!(desc.attrs, vec![("k".to_string(), Attribute::Int(5))]);

        let bytes = DefaultForeignOps::default().serialize_descriptor(&desc).unwrap();
        let map = flexbuffers::Reader::get_root(bytes.as_slice()).unwrap().as_map();
        assert_eq!(map.idx("op").as_str(), "CustomThing");
        assert_eq!(map.idx("attr").as_map().idx("k").as_i64(), 5);
    }

    #[test]
    fn test_stateful_operands() {
        let op = Operation {
            name: "tfl.svdf".into(),
            operands: vec![],
            results: vec![],
            attributes: vec![],
            regions: vec![],
        };
        assert_eq!(RecurrentStateOperands.stateful_operands(&op), vec![4]);
    }
}
