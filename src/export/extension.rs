// This module encodes extension-dialect (stablehlo) ops. A handful of ops have runtime kernels
// and are always serialized; the rest of the structural set is only written when the
// configuration asks for it. Options go into the second options union. Ops with nested
// regions (scatter, reduce_window, reduce, sort, while) turn every region into a fresh
// sub-graph appended after the function sub-graphs; its index is reserved before the region
// is built so nested regions get later indices, and the sub-graph is named after the
// builtin operator plus that index. Custom calls carry their target, backend config and a
// flexbuffer map of their remaining bool and string attributes.

use super::operator::OperatorParts;
use super::options::{Field, Kind, OptionsSpec};
use super::translator::Translator;
use crate::container::flex;
use crate::container::schema::{builtin_op as code, builtin_options_2 as tag, slot, stablehlo};
use crate::core::adaptor::EncodedOptions;
use crate::core::error::{ExportError, ExportResult};
use crate::ir::{Attribute, Operation, RegionId};

/// One serializable extension op.
struct ExtensionOp {
    name: &'static str,
    code: i32,
    options: Option<OptionsSpec>,
    /// Option field receiving the sub-graph index of each region, in region order.
    regions: &'static [u16],
    /// Has a runtime kernel; serialized regardless of configuration.
    kernel: bool,
}

const fn plain(name: &'static str, code: i32, kernel: bool) -> ExtensionOp {
    ExtensionOp { name, code, options: None, regions: &[], kernel }
}

const fn with(name: &'static str, code: i32, union_type: u8, fields: &'static [Field], kernel: bool) -> ExtensionOp {
    ExtensionOp { name, code, options: Some(OptionsSpec { union_type, fields }), regions: &[], kernel }
}

const fn nested(
    name: &'static str,
    code: i32,
    union_type: u8,
    fields: &'static [Field],
    regions: &'static [u16],
    kernel: bool,
) -> ExtensionOp {
    ExtensionOp { name, code, options: Some(OptionsSpec { union_type, fields }), regions, kernel }
}

const CUSTOM_CALL: &str = "stablehlo.custom_call";

// -------- option layouts ---------

const SCATTER: &[Field] = &[
    Field::new(0, "indices_are_sorted", Kind::Bool(false)),
    Field::new(1, "update_window_dims", Kind::I64List),
    Field::new(2, "inserted_window_dims", Kind::I64List),
    Field::new(3, "scatter_dims_to_operand_dims", Kind::I64List),
    Field::new(4, "index_vector_dim", Kind::I64(0)),
    Field::new(5, "unique_indices", Kind::Bool(false)),
];

const GATHER: &[Field] = &[
    Field::new(0, "offset_dims", Kind::I64List),
    Field::new(1, "collapsed_slice_dims", Kind::I64List),
    Field::new(2, "start_index_map", Kind::I64List),
    Field::new(3, "index_vector_dim", Kind::I64(0)),
    Field::new(4, "slice_sizes", Kind::I64List),
    Field::new(5, "indices_are_sorted", Kind::Bool(false)),
];

const REDUCE_WINDOW: &[Field] = &[
    Field::new(0, "window_dimensions", Kind::I64List),
    Field::new(1, "window_strides", Kind::I64List),
    Field::new(2, "base_dilations", Kind::I64List),
    Field::new(3, "window_dilations", Kind::I64List),
    Field::new(4, "padding", Kind::I64List),
];

const PAD: &[Field] = &[
    Field::new(0, "edge_padding_low", Kind::I64List),
    Field::new(1, "edge_padding_high", Kind::I64List),
    Field::new(2, "interior_padding", Kind::I64List),
];

const RNG_BIT_GENERATOR: &[Field] = &[Field::new(0, "rng_algorithm", Kind::Enum8(stablehlo::rng_algorithm, 0))];

const IOTA: &[Field] = &[Field::new(0, "iota_dimension", Kind::I64(0))];

const DYNAMIC_SLICE: &[Field] = &[Field::new(0, "slice_sizes", Kind::I64List)];

const COMPARE: &[Field] = &[
    Field::new(0, "comparison_direction", Kind::Enum32(stablehlo::comparison_direction, 0)),
    Field::new(1, "compare_type", Kind::Enum32(stablehlo::comparison_type, 0)),
];

const CONCATENATE: &[Field] = &[Field::new(0, "dimension", Kind::I64(0))];

const SLICE: &[Field] = &[
    Field::new(0, "start_indices", Kind::I64List),
    Field::new(1, "limit_indices", Kind::I64List),
    Field::new(2, "strides", Kind::I64List),
];

const CONVOLUTION: &[Field] = &[
    Field::new(0, "window_strides", Kind::I64List),
    Field::new(1, "padding", Kind::I64List),
    Field::new(2, "lhs_dilation", Kind::I64List),
    Field::new(3, "rhs_dilation", Kind::I64List),
    Field::new(4, "window_reversal", Kind::BoolList),
    Field::new(5, "input_batch_dimension", Kind::I64(0)),
    Field::new(6, "input_feature_dimension", Kind::I64(0)),
    Field::new(7, "input_spatial_dimensions", Kind::I64List),
    Field::new(8, "kernel_input_feature_dimension", Kind::I64(0)),
    Field::new(9, "kernel_output_feature_dimension", Kind::I64(0)),
    Field::new(10, "kernel_spatial_dimensions", Kind::I64List),
    Field::new(11, "output_batch_dimension", Kind::I64(0)),
    Field::new(12, "output_feature_dimension", Kind::I64(0)),
    Field::new(13, "output_spatial_dimensions", Kind::I64List),
    Field::new(14, "feature_group_count", Kind::I64(0)),
    Field::new(15, "batch_group_count", Kind::I64(0)),
    Field::new(16, "precision_config", Kind::Enum32List(stablehlo::precision)),
];

const BROADCAST_IN_DIM: &[Field] = &[Field::new(0, "broadcast_dimensions", Kind::I64List)];

const REDUCE: &[Field] = &[Field::new(0, "dimensions", Kind::I64List)];

const DOT_GENERAL: &[Field] = &[
    Field::new(0, "lhs_batching_dimensions", Kind::I64List),
    Field::new(1, "rhs_batching_dimensions", Kind::I64List),
    Field::new(2, "lhs_contracting_dimensions", Kind::I64List),
    Field::new(3, "rhs_contracting_dimensions", Kind::I64List),
    Field::new(4, "precision_config", Kind::Enum32List(stablehlo::precision)),
];

const SORT: &[Field] = &[
    Field::new(0, "dimension", Kind::I64(0)),
    Field::new(1, "is_stable", Kind::Bool(false)),
];

const TRANSPOSE: &[Field] = &[Field::new(0, "permutation", Kind::I64List)];

const EXTENSION_OPS: &[ExtensionOp] = &[
    plain("stablehlo.add", code::STABLEHLO_ADD, true),
    plain("stablehlo.multiply", code::STABLEHLO_MULTIPLY, true),
    plain("stablehlo.maximum", code::STABLEHLO_MAXIMUM, true),
    plain("stablehlo.minimum", code::STABLEHLO_MINIMUM, true),
    nested("stablehlo.scatter", code::STABLEHLO_SCATTER, tag::SCATTER, SCATTER, &[6], true),
    with("stablehlo.rng_bit_generator", code::STABLEHLO_RNG_BIT_GENERATOR, tag::RNG_BIT_GENERATOR, RNG_BIT_GENERATOR, true),
    with("stablehlo.gather", code::STABLEHLO_GATHER, tag::GATHER, GATHER, true),
    nested("stablehlo.reduce_window", code::STABLEHLO_REDUCE_WINDOW, tag::REDUCE_WINDOW, REDUCE_WINDOW, &[5], true),
    with("stablehlo.pad", code::STABLEHLO_PAD, tag::PAD, PAD, true),
    plain("stablehlo.logistic", code::STABLEHLO_LOGISTIC, false),
    plain("stablehlo.divide", code::STABLEHLO_DIVIDE, false),
    plain("stablehlo.reshape", code::STABLEHLO_RESHAPE, false),
    plain("stablehlo.clamp", code::STABLEHLO_CLAMP, false),
    plain("stablehlo.abs", code::STABLEHLO_ABS, false),
    plain("stablehlo.and", code::STABLEHLO_AND, false),
    plain("stablehlo.cosine", code::STABLEHLO_COSINE, false),
    plain("stablehlo.exponential", code::STABLEHLO_EXPONENTIAL, false),
    plain("stablehlo.floor", code::STABLEHLO_FLOOR, false),
    plain("stablehlo.log", code::STABLEHLO_LOG, false),
    plain("stablehlo.negate", code::STABLEHLO_NEGATE, false),
    plain("stablehlo.or", code::STABLEHLO_OR, false),
    plain("stablehlo.power", code::STABLEHLO_POWER, false),
    plain("stablehlo.remainder", code::STABLEHLO_REMAINDER, false),
    plain("stablehlo.rsqrt", code::STABLEHLO_RSQRT, false),
    plain("stablehlo.select", code::STABLEHLO_SELECT, false),
    plain("stablehlo.subtract", code::STABLEHLO_SUBTRACT, false),
    plain("stablehlo.tanh", code::STABLEHLO_TANH, false),
    plain("stablehlo.convert", code::STABLEHLO_CONVERT, false),
    plain("stablehlo.dynamic_update_slice", code::STABLEHLO_DYNAMIC_UPDATE_SLICE, false),
    with("stablehlo.iota", code::STABLEHLO_IOTA, tag::IOTA, IOTA, false),
    with("stablehlo.dynamic_slice", code::STABLEHLO_DYNAMIC_SLICE, tag::DYNAMIC_SLICE, DYNAMIC_SLICE, false),
    with("stablehlo.compare", code::STABLEHLO_COMPARE, tag::COMPARE, COMPARE, false),
    with("stablehlo.concatenate", code::STABLEHLO_CONCATENATE, tag::CONCATENATE, CONCATENATE, false),
    with("stablehlo.slice", code::STABLEHLO_SLICE, tag::SLICE, SLICE, false),
    with("stablehlo.convolution", code::STABLEHLO_CONVOLUTION, tag::CONVOLUTION, CONVOLUTION, false),
    with("stablehlo.broadcast_in_dim", code::STABLEHLO_BROADCAST_IN_DIM, tag::BROADCAST_IN_DIM, BROADCAST_IN_DIM, false),
    plain(CUSTOM_CALL, code::STABLEHLO_CUSTOM_CALL, false),
    nested("stablehlo.reduce", code::STABLEHLO_REDUCE, tag::REDUCE, REDUCE, &[1], false),
    with("stablehlo.dot_general", code::STABLEHLO_DOT_GENERAL, tag::DOT_GENERAL, DOT_GENERAL, false),
    nested("stablehlo.sort", code::STABLEHLO_SORT, tag::SORT, SORT, &[2], false),
    nested("stablehlo.while", code::STABLEHLO_WHILE, tag::WHILE, &[], &[0, 1], false),
    with("stablehlo.transpose", code::STABLEHLO_TRANSPOSE, tag::TRANSPOSE, TRANSPOSE, false),
];

fn lookup(name: &str) -> Option<&'static ExtensionOp> {
    EXTENSION_OPS.iter().find(|e| e.name == name)
}

impl<'m, 's, 'arena> Translator<'m, 's, 'arena> {
    pub(crate) fn encode_extension(&mut self, op: &'m Operation) -> ExportResult<Option<OperatorParts>> {
        let Some(ext) = lookup(&op.name).filter(|e| e.kernel || self.config.serialize_extension_ops) else {
            self.diags.op_error(&op.name, "is not part of the stablehlo support yet.");
            return Ok(None);
        };
        if op.regions.len() < ext.regions.len() {
            return Err(ExportError::InvalidAttribute {
                op: op.name.clone(),
                reason: format!("expected {} regions, found {}", ext.regions.len(), op.regions.len()),
            });
        }

        let opcode = self.opcodes.builtin(&op.name, ext.code);
        let mut extra = Vec::with_capacity(ext.regions.len());
        for (&field, &region) in ext.regions.iter().zip(&op.regions) {
            match self.build_region_subgraph(op, region)? {
                Some(index) => extra.push((field, index)),
                None => return Ok(None),
            }
        }

        let parts = OperatorParts::new(opcode);
        if op.name == CUSTOM_CALL {
            let options = self.custom_call_options(op);
            return Ok(Some(parts.with_options_2(options)));
        }
        match ext.options {
            Some(spec) => {
                let options = spec.encode(op, &mut self.fbb, &extra)?;
                Ok(Some(parts.with_options_2(options)))
            }
            None => Ok(Some(parts)),
        }
    }

    /// Build `region` of `op` as a new sub-graph and return its index.
    fn build_region_subgraph(&mut self, op: &Operation, region: RegionId) -> ExportResult<Option<i32>> {
        let index = self.subgraphs.len();
        let name = format!("STABLEHLO_{}{}", op.short_name().to_uppercase(), index);
        self.subgraphs.push(None);
        let parent = self.session.current_subgraph();

        let built = self.build_subgraph(&name, region, index, None)?;
        if let Some(parent) = parent {
            self.session.set_current_subgraph(&parent);
        }
        match built {
            Some(table) => {
                self.subgraphs[index] = Some(table);
                self.subgraph_indices.insert(name, index as i32);
                Ok(Some(index as i32))
            }
            None => {
                log::error!("'{}': failed to build sub-graph '{}'", op.name, name);
                Ok(None)
            }
        }
    }

    fn custom_call_options(&mut self, op: &Operation) -> EncodedOptions {
        let text = |key: &str| op.attr(key).and_then(Attribute::as_str).unwrap_or("");
        let has_side_effect = op.attr("has_side_effect").and_then(Attribute::as_bool).unwrap_or(false);
        let blob = flex::custom_call_attributes(&op.attributes);

        let fbb = &mut self.fbb;
        let target = fbb.create_string(text("call_target_name"));
        let backend_config = fbb.create_string(text("backend_config"));
        let attributes = fbb.create_vector(&blob);
        let start = fbb.start_table();
        fbb.push_slot_always(slot(0), target);
        fbb.push_slot::<bool>(slot(1), has_side_effect, false);
        fbb.push_slot_always(slot(2), backend_config);
        fbb.push_slot_always(slot(5), attributes);
        let table = fbb.end_table(start);
        EncodedOptions { union_type: tag::CUSTOM_CALL, table: table.as_union_value() }
    }
}
