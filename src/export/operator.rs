// This module encodes operator records. Every op is classified once into a NodeKind; the
// kind decides which representation strategy is used: a native catalog op with its option
// table, one of the bespoke native ops (numeric verify, user custom op, if, while, call_once),
// an extension-dialect op (see `extension`), or a foreign op that travels either as a flex op
// carrying its serialized descriptor or as a generic custom op carrying its attributes. Ops
// that cannot be represented under the current configuration are recorded in the
// diagnostics and reported after the whole module has been scanned. The OpcodeTable assigns
// opcode indices in first-use order; builtin versions start at 0 and are patched once the
// container is finished.

use hashbrown::HashMap;

use crate::container::flex;
use crate::container::schema::{builtin_op, builtin_options, vt};
use crate::container::buffers::PLACEHOLDER;
use crate::container::{BufferLayout, ByteVector, DeferredOptions, Fbb, TableOffset};
use crate::core::adaptor::{invalid_attribute, EncodedOptions, NEVER_FLEX};
use crate::core::error::{Diagnostics, ExportError, ExportResult};
use crate::export::options::OptionsSpec;
use crate::export::tensor::type_code;
use crate::export::translator::Translator;
use crate::ir::{names, Attribute, Module, Operation, RegionId, ValueId};

const IF_OPTIONS: OptionsSpec = OptionsSpec { union_type: builtin_options::IF, fields: &[] };
const WHILE_OPTIONS: OptionsSpec = OptionsSpec { union_type: builtin_options::WHILE, fields: &[] };
const CALL_ONCE_OPTIONS: OptionsSpec = OptionsSpec { union_type: builtin_options::CALL_ONCE, fields: &[] };

/// How an op is represented in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    NumericVerify,
    UserCustom,
    NativeIf,
    NativeWhile,
    CallOnce,
    Native,
    Extension,
    ForeignIf,
    Foreign,
    Unregistered,
}

impl NodeKind {
    pub fn of(op: &Operation) -> Self {
        match op.name.as_str() {
            "tfl.numeric_verify" => NodeKind::NumericVerify,
            "tfl.custom" => NodeKind::UserCustom,
            "tfl.if" => NodeKind::NativeIf,
            "tfl.while" => NodeKind::NativeWhile,
            "tfl.call_once" => NodeKind::CallOnce,
            "tf.If" => NodeKind::ForeignIf,
            _ => match op.dialect() {
                "tfl" => NodeKind::Native,
                "stablehlo" => NodeKind::Extension,
                "tf" => NodeKind::Foreign,
                _ => NodeKind::Unregistered,
            },
        }
    }

    /// Kinds that need native builtin emission.
    pub fn is_native(self) -> bool {
        matches!(
            self,
            NodeKind::NumericVerify
                | NodeKind::UserCustom
                | NodeKind::NativeIf
                | NodeKind::NativeWhile
                | NodeKind::CallOnce
                | NodeKind::Native
        )
    }
}

#[derive(Debug, Clone)]
struct OpcodeEntry {
    builtin_code: i32,
    custom_code: Option<String>,
}

/// Operator codes in first-use order.
#[derive(Debug, Default)]
pub struct OpcodeTable {
    index: HashMap<String, u32>,
    entries: Vec<OpcodeEntry>,
}

impl OpcodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_or_insert(&mut self, key: &str, entry: OpcodeEntry) -> u32 {
        if let Some(&index) = self.index.get(key) {
            return index;
        }
        let index = self.entries.len() as u32;
        log::debug!("opcode {} -> '{}'", index, key);
        self.entries.push(entry);
        self.index.insert(key.to_string(), index);
        index
    }

    /// Index of a builtin opcode registered under `key`.
    pub fn builtin(&mut self, key: &str, code: i32) -> u32 {
        self.get_or_insert(key, OpcodeEntry { builtin_code: code, custom_code: None })
    }

    /// Index of the custom opcode named `custom_code`.
    pub fn custom(&mut self, custom_code: &str) -> u32 {
        self.get_or_insert(
            custom_code,
            OpcodeEntry { builtin_code: builtin_op::CUSTOM, custom_code: Some(custom_code.to_string()) },
        )
    }

    /// Indices of the builtin opcodes, whose versions are patched later.
    pub fn builtin_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.custom_code.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn finish(&self, fbb: &mut Fbb) -> Vec<TableOffset> {
        self.entries
            .iter()
            .map(|entry| {
                let custom_code = entry.custom_code.as_deref().map(|c| fbb.create_string(c));
                let deprecated = entry.builtin_code.min(builtin_op::PLACEHOLDER_FOR_GREATER_OP_CODES) as i8;
                let start = fbb.start_table();
                fbb.push_slot::<i8>(vt::operator_code::DEPRECATED_BUILTIN_CODE, deprecated, 0);
                match custom_code {
                    Some(code) => {
                        fbb.push_slot_always(vt::operator_code::CUSTOM_CODE, code);
                        fbb.push_slot::<i32>(vt::operator_code::VERSION, 1, 1);
                    }
                    None => fbb.push_slot_always::<i32>(vt::operator_code::VERSION, 0),
                }
                fbb.push_slot::<i32>(vt::operator_code::BUILTIN_CODE, entry.builtin_code, 0);
                fbb.end_table(start)
            })
            .collect()
    }
}

/// Tensor indices and location of the operator being encoded.
#[derive(Debug, Clone, Default)]
pub struct OperatorIo {
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub intermediates: Vec<i32>,
    pub subgraph: usize,
    pub position: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CustomOptions {
    None,
    Inline(ByteVector),
    /// Stored behind the container; the record carries placeholders.
    OutOfBand,
}

/// Everything an operator record holds besides its tensor lists.
pub(crate) struct OperatorParts {
    pub opcode_index: u32,
    pub builtin_options: Option<EncodedOptions>,
    pub builtin_options_2: Option<EncodedOptions>,
    pub custom_options: CustomOptions,
}

impl OperatorParts {
    pub fn new(opcode_index: u32) -> Self {
        Self {
            opcode_index,
            builtin_options: None,
            builtin_options_2: None,
            custom_options: CustomOptions::None,
        }
    }

    pub fn with_options(mut self, options: Option<EncodedOptions>) -> Self {
        self.builtin_options = options;
        self
    }

    pub fn with_options_2(mut self, options: EncodedOptions) -> Self {
        self.builtin_options_2 = Some(options);
        self
    }

    pub fn with_custom(mut self, options: CustomOptions) -> Self {
        self.custom_options = options;
        self
    }

    fn emit(self, fbb: &mut Fbb, io: &OperatorIo) -> TableOffset {
        use vt::operator as op;
        let inputs = fbb.create_vector(&io.inputs);
        let outputs = fbb.create_vector(&io.outputs);
        let intermediates = (!io.intermediates.is_empty()).then(|| fbb.create_vector(&io.intermediates));

        let start = fbb.start_table();
        fbb.push_slot::<u32>(op::OPCODE_INDEX, self.opcode_index, 0);
        fbb.push_slot_always(op::INPUTS, inputs);
        fbb.push_slot_always(op::OUTPUTS, outputs);
        if let Some(options) = self.builtin_options {
            fbb.push_slot::<u8>(op::BUILTIN_OPTIONS_TYPE, options.union_type, 0);
            fbb.push_slot_always(op::BUILTIN_OPTIONS, options.table);
        }
        match self.custom_options {
            CustomOptions::None => {}
            CustomOptions::Inline(bytes) => fbb.push_slot_always(op::CUSTOM_OPTIONS, bytes),
            CustomOptions::OutOfBand => {
                fbb.push_slot_always::<u64>(op::LARGE_CUSTOM_OPTIONS_OFFSET, PLACEHOLDER);
                fbb.push_slot_always::<u64>(op::LARGE_CUSTOM_OPTIONS_SIZE, PLACEHOLDER);
            }
        }
        if let Some(intermediates) = intermediates {
            fbb.push_slot_always(op::INTERMEDIATES, intermediates);
        }
        if let Some(options) = self.builtin_options_2 {
            fbb.push_slot::<u8>(op::BUILTIN_OPTIONS_2_TYPE, options.union_type, 0);
            fbb.push_slot_always(op::BUILTIN_OPTIONS_2, options.table);
        }
        fbb.end_table(start)
    }
}

/// `tf.Foo(tensor<2xf32>) -> (tensor<2xf32>)`, used in diagnostics.
pub fn describe(module: &Module, op: &Operation) -> String {
    let types = |values: &[ValueId]| {
        values
            .iter()
            .map(|&v| module.value(v).ty.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{}({}) -> ({})", op.name, types(&op.operands), types(&op.results))
}

impl<'m, 's, 'arena> Translator<'m, 's, 'arena> {
    /// Encode `op`. `Ok(None)` means the op could not be represented and the
    /// reason was recorded in the diagnostics.
    pub(crate) fn build_operator(&mut self, op: &'m Operation, mut io: OperatorIo) -> ExportResult<Option<TableOffset>> {
        let kind = NodeKind::of(op);
        log::debug!("encoding '{}' as {:?}", op.name, kind);
        let parts = match self.encode_operator(op, kind, &mut io) {
            Ok(parts) => parts,
            Err(ExportError::InvalidAttribute { op, reason }) => {
                self.diags.op_error(&op, reason);
                None
            }
            Err(e) => return Err(e),
        };
        Ok(parts.map(|parts| parts.emit(&mut self.fbb, &io)))
    }

    fn encode_operator(&mut self, op: &'m Operation, kind: NodeKind, io: &mut OperatorIo) -> ExportResult<Option<OperatorParts>> {
        if kind.is_native() && !self.config.builtin_enabled() {
            self.diags.op_error(&op.name, "is a TFLite builtin op but builtin emission is not enabled");
            return Ok(None);
        }
        match kind {
            NodeKind::NumericVerify => self.encode_numeric_verify(op).map(Some),
            NodeKind::UserCustom => self.encode_user_custom(op, io).map(Some),
            NodeKind::NativeIf => {
                let opcode = self.opcodes.builtin(&op.name, builtin_op::IF);
                let options = self.branch_options(op, IF_OPTIONS, &[(0, "then_branch"), (1, "else_branch")])?;
                Ok(Some(OperatorParts::new(opcode).with_options(Some(options))))
            }
            NodeKind::ForeignIf => {
                let opcode = self.opcodes.builtin("if", builtin_op::IF);
                let options = self.branch_options(op, IF_OPTIONS, &[(0, "then_branch"), (1, "else_branch")])?;
                Ok(Some(OperatorParts::new(opcode).with_options(Some(options))))
            }
            NodeKind::CallOnce => {
                let opcode = self.opcodes.builtin("call_once", builtin_op::CALL_ONCE);
                let options = self.branch_options(op, CALL_ONCE_OPTIONS, &[(0, "session_init_function")])?;
                Ok(Some(OperatorParts::new(opcode).with_options(Some(options))))
            }
            NodeKind::NativeWhile => self.encode_while(op).map(Some),
            NodeKind::Native => self.encode_native(op, io),
            NodeKind::Extension => self.encode_extension(op),
            NodeKind::Foreign => self.encode_foreign(op),
            NodeKind::Unregistered => {
                let message = format!("dialect '{}' is not registered", op.dialect());
                self.diags.op_error(&op.name, message);
                Ok(None)
            }
        }
    }

    /// Sub-graph index of the function named by symbol attribute `key`.
    pub(crate) fn subgraph_of(&self, op: &Operation, key: &str) -> ExportResult<i32> {
        let symbol = op
            .attr(key)
            .and_then(Attribute::as_symbol)
            .ok_or_else(|| invalid_attribute(op, key, "a function symbol"))?;
        self.subgraph_indices.get(symbol).copied().ok_or_else(|| ExportError::InvalidAttribute {
            op: op.name.clone(),
            reason: format!("attribute '{}' names unknown function '{}'", key, symbol),
        })
    }

    fn branch_options(&mut self, op: &Operation, spec: OptionsSpec, branches: &[(u16, &str)]) -> ExportResult<EncodedOptions> {
        let mut extra = Vec::with_capacity(branches.len());
        for &(field, key) in branches {
            extra.push((field, self.subgraph_of(op, key)?));
        }
        spec.encode(op, &mut self.fbb, &extra)
    }

    fn encode_native(&mut self, op: &Operation, io: &mut OperatorIo) -> ExportResult<Option<OperatorParts>> {
        let Some(code) = self.collaborators.catalog.builtin_code(&op.name) else {
            self.diags.op_error(&op.name, "is not a supported TFLite op");
            return Ok(None);
        };
        // Old runtimes only know the three-input form.
        if code == builtin_op::TRANSPOSE_CONV && io.inputs.len() == 4 && io.inputs[3] == -1 {
            io.inputs.pop();
        }
        let opcode = self.opcodes.builtin(&op.name, code);
        let options = self.collaborators.catalog.encode_options(op, &mut self.fbb)?;
        Ok(Some(OperatorParts::new(opcode).with_options(options)))
    }

    fn encode_numeric_verify(&mut self, op: &Operation) -> ExportResult<OperatorParts> {
        let tolerance = match op.attr("tolerance") {
            None => 0.0,
            Some(attr) => attr
                .as_f64()
                .ok_or_else(|| invalid_attribute(op, "tolerance", "a float"))? as f32,
        };
        let log_if_failed = op.attr("log_if_failed").and_then(Attribute::as_bool).unwrap_or(false);
        let payload = flex::numeric_verify_options(tolerance, log_if_failed);
        let opcode = self.opcodes.custom("NumericVerify");
        let bytes = self.fbb.create_vector(&payload);
        Ok(OperatorParts::new(opcode).with_custom(CustomOptions::Inline(bytes)))
    }

    fn encode_user_custom(&mut self, op: &Operation, io: &OperatorIo) -> ExportResult<OperatorParts> {
        let custom_code = op
            .attr("custom_code")
            .and_then(Attribute::as_str)
            .ok_or_else(|| invalid_attribute(op, "custom_code", "a string"))?;
        let payload: &[u8] = match op.attr("custom_option") {
            None => &[],
            Some(Attribute::Bytes(bytes)) => bytes,
            Some(_) => return Err(invalid_attribute(op, "custom_option", "a byte string")),
        };
        let opcode = self.opcodes.custom(custom_code);

        let custom = match self.buffers.layout() {
            BufferLayout::OutOfBand => {
                self.buffers.defer_custom_options(DeferredOptions {
                    subgraph: io.subgraph,
                    operator: io.position,
                    payload: payload.to_vec(),
                    alignment: self.config.custom_option_alignment.unwrap_or(1),
                });
                CustomOptions::OutOfBand
            }
            BufferLayout::Inline if !self.buffers.fits_inline(&self.fbb, payload.len()) => {
                log::debug!("custom options of '{}' exceed the inline ceiling", custom_code);
                self.buffers.flag_out_of_band();
                CustomOptions::None
            }
            BufferLayout::Inline => CustomOptions::Inline(self.aligned_bytes(payload)),
        };
        Ok(OperatorParts::new(opcode).with_custom(custom))
    }

    /// Byte vector whose data starts on `custom_option_alignment` once the
    /// container is finished and realigned.
    fn aligned_bytes(&mut self, payload: &[u8]) -> ByteVector {
        if let Some(alignment) = self.config.custom_option_alignment {
            let used = self.fbb.unfinished_data().len();
            let pad = (alignment - (used + payload.len()) % alignment) % alignment;
            for _ in 0..pad {
                self.fbb.push(0u8);
            }
            self.realign = Some(self.realign.map_or(alignment, |a| a.max(alignment)));
        }
        self.fbb.create_vector(payload)
    }

    fn encode_while(&mut self, op: &Operation) -> ExportResult<OperatorParts> {
        if op.operands.len() != op.results.len() {
            return Err(ExportError::InvalidAttribute {
                op: op.name.clone(),
                reason: "number of operands and results don't match, only canonical While supported".into(),
            });
        }
        let module = self.module;
        let call_index = |region: Option<&RegionId>| -> Option<i32> {
            let block = module.entry_block(*region?)?;
            if block.operations.len() != 2 {
                return None;
            }
            let call = module.op(block.operations[0]);
            if call.name != names::CALL {
                return None;
            }
            let callee = call.attr("callee").and_then(Attribute::as_symbol)?;
            self.subgraph_indices.get(callee).copied()
        };
        let (Some(cond), Some(body)) = (call_index(op.regions.first()), call_index(op.regions.get(1))) else {
            return Err(ExportError::WhileNotSingleCall { op: op.name.clone() });
        };
        let opcode = self.opcodes.builtin("while", builtin_op::WHILE);
        let options = WHILE_OPTIONS.encode(op, &mut self.fbb, &[(0, cond), (1, body)])?;
        Ok(OperatorParts::new(opcode).with_options(Some(options)))
    }

    fn encode_foreign(&mut self, op: &'m Operation) -> ExportResult<Option<OperatorParts>> {
        let module = self.module;
        let node_name = match op.results.first() {
            Some(&result) => self.names.value_name(module, result).to_string(),
            None => op.short_name().to_string(),
        };
        let foreign = &*self.collaborators.foreign_ops;
        let descriptor = foreign.descriptor(module, op, &node_name)?;
        let description = describe(module, op);
        let op_type = descriptor.op.clone();

        let touches_resource = op.operands.iter().chain(&op.results).any(|&v| module.value(v).ty.is_resource());
        if touches_resource {
            Diagnostics::record(&mut self.diags.resource_ops, &op_type, description.clone());
        }

        let flex_allowed = !NEVER_FLEX.contains(&op_type.as_str())
            && (foreign.is_allowlisted(&op_type)
                || self.config.allowlisted_foreign_op_names.contains(&op_type)
                || (self.config.allow_all_foreign_ops && foreign.is_registered(&op_type)));

        if flex_allowed && self.config.flex_enabled() {
            let serialized = foreign.serialize_descriptor(&descriptor)?;
            let payload = flex::flex_options(&op_type, &serialized);
            let flex_name = format!("Flex{}", op_type);
            let opcode = self.opcodes.custom(&flex_name);
            let bytes = self.fbb.create_vector(&payload);
            Diagnostics::record(&mut self.diags.flex_ops, &flex_name, description);
            return Ok(Some(OperatorParts::new(opcode).with_custom(CustomOptions::Inline(bytes))));
        }
        if self.config.custom_enabled() {
            let payload = flex::attribute_map(&op.name, &descriptor.attrs, |ty| {
                ty.as_tensor().and_then(|t| type_code(&t.element))
            });
            let opcode = self.opcodes.custom(&op_type);
            let bytes = self.fbb.create_vector(&payload);
            Diagnostics::record(&mut self.diags.custom_ops, &op_type, description);
            return Ok(Some(OperatorParts::new(opcode).with_custom(CustomOptions::Inline(bytes))));
        }
        if flex_allowed {
            Diagnostics::record(&mut self.diags.failed_flex_ops, &op_type, description);
        } else {
            Diagnostics::record(&mut self.diags.failed_custom_ops, &op_type, description);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::reader::TableRef;
    use flatbuffers::FlatBufferBuilder;

    fn op(name: &str) -> Operation {
        Operation {
            name: name.into(),
            operands: vec![],
            results: vec![],
            attributes: vec![],
            regions: vec![],
        }
    }

    #[test]
    fn test_node_kinds() {
        assert_eq!(NodeKind::of(&op("tfl.add")), NodeKind::Native);
        assert_eq!(NodeKind::of(&op("tfl.custom")), NodeKind::UserCustom);
        assert_eq!(NodeKind::of(&op("tf.If")), NodeKind::ForeignIf);
        assert_eq!(NodeKind::of(&op("tf.MatMul")), NodeKind::Foreign);
        assert_eq!(NodeKind::of(&op("stablehlo.add")), NodeKind::Extension);
        assert_eq!(NodeKind::of(&op("mhlo.add")), NodeKind::Unregistered);
        assert!(NodeKind::CallOnce.is_native());
        assert!(!NodeKind::ForeignIf.is_native());
    }

    #[test]
    fn test_opcode_first_use_order() {
        let mut table = OpcodeTable::new();
        assert_eq!(table.builtin("tfl.mul", builtin_op::MUL), 0);
        assert_eq!(table.custom("FlexMatMul"), 1);
        assert_eq!(table.builtin("tfl.add", builtin_op::ADD), 2);
        assert_eq!(table.builtin("tfl.mul", builtin_op::MUL), 0);
        assert_eq!(table.builtin("stablehlo.add", builtin_op::STABLEHLO_ADD), 3);
        assert_eq!(table.len(), 4);
        assert_eq!(table.builtin_indices(), vec![0, 2, 3]);

        let mut fbb: Fbb = FlatBufferBuilder::with_capacity(256);
        let codes = table.finish(&mut fbb);
        let codes = fbb.create_vector(&codes);
        let start = fbb.start_table();
        fbb.push_slot_always(vt::model::OPERATOR_CODES, codes);
        let root = fbb.end_table(start);
        fbb.finish_minimal(root);
        let bytes = fbb.finished_data().to_vec();

        let codes = TableRef::root(&bytes).unwrap().tables(vt::model::OPERATOR_CODES).unwrap();
        let custom = &codes[1];
        assert_eq!(custom.string(vt::operator_code::CUSTOM_CODE).unwrap(), Some("FlexMatMul"));
        assert_eq!(custom.scalar(vt::operator_code::VERSION, 1i32).unwrap(), 1);
        // Builtin versions are physically present so they can be patched.
        assert!(codes[0].field_pos(vt::operator_code::VERSION).unwrap().is_some());
        assert_eq!(codes[0].scalar(vt::operator_code::VERSION, 1i32).unwrap(), 0);
        let hlo = &codes[3];
        assert_eq!(hlo.scalar(vt::operator_code::DEPRECATED_BUILTIN_CODE, 0i8).unwrap(), 127);
        assert_eq!(hlo.scalar(vt::operator_code::BUILTIN_CODE, 0i32).unwrap(), builtin_op::STABLEHLO_ADD);
    }
}
