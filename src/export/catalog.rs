// This module implements StaticCatalog, the default OpCatalog. It knows the builtin code of
// every native `tfl.*` op the exporter supports and, for ops with an options table, the
// declarative layout of that table: which schema field each op attribute lands in, its kind
// and its schema default. Ops without options (elementwise math, comparisons, logical ops
// and the like) only map to their code. Control-flow ops (if, while, call_once) and user
// custom ops are listed for their codes; their options depend on sub-graph indices and are
// built by the operator encoder.

use hashbrown::HashMap;

use super::options::{Field, Kind, OptionsSpec};
use crate::container::schema::{activation, builtin_op as code, builtin_options as tag, padding};
use crate::container::Fbb;
use crate::core::adaptor::{EncodedOptions, OpCatalog};
use crate::core::error::ExportResult;
use crate::ir::Operation;

fn weights_format(name: &str) -> Option<i8> {
    match name {
        "DEFAULT" => Some(0),
        "SHUFFLED4x16INT8" => Some(1),
        _ => None,
    }
}

fn lstm_kernel_type(name: &str) -> Option<i8> {
    match name {
        "FULL" => Some(0),
        "BASIC" => Some(1),
        _ => None,
    }
}

const ACTIVATION: Kind = Kind::Enum8(activation::from_name, activation::NONE);
const PADDING: Kind = Kind::Enum8(padding::from_name, padding::SAME);
const FUSED: &str = "fused_activation_function";

const CONV_2D: OptionsSpec = OptionsSpec {
    union_type: tag::CONV_2D,
    fields: &[
        Field::new(0, "padding", PADDING),
        Field::new(1, "stride_w", Kind::I32(0)),
        Field::new(2, "stride_h", Kind::I32(0)),
        Field::new(3, FUSED, ACTIVATION),
        Field::new(4, "dilation_w_factor", Kind::I32(1)),
        Field::new(5, "dilation_h_factor", Kind::I32(1)),
    ],
};

const POOL_2D: OptionsSpec = OptionsSpec {
    union_type: tag::POOL_2D,
    fields: &[
        Field::new(0, "padding", PADDING),
        Field::new(1, "stride_w", Kind::I32(0)),
        Field::new(2, "stride_h", Kind::I32(0)),
        Field::new(3, "filter_width", Kind::I32(0)),
        Field::new(4, "filter_height", Kind::I32(0)),
        Field::new(5, FUSED, ACTIVATION),
    ],
};

const FULLY_CONNECTED: OptionsSpec = OptionsSpec {
    union_type: tag::FULLY_CONNECTED,
    fields: &[
        Field::new(0, FUSED, ACTIVATION),
        Field::new(1, "weights_format", Kind::Enum8(weights_format, 0)),
        Field::new(2, "keep_num_dims", Kind::Bool(false)),
        Field::new(3, "asymmetric_quantize_inputs", Kind::Bool(false)),
    ],
};

const SOFTMAX: OptionsSpec = OptionsSpec {
    union_type: tag::SOFTMAX,
    fields: &[Field::new(0, "beta", Kind::F32(0.0))],
};

const CONCATENATION: OptionsSpec = OptionsSpec {
    union_type: tag::CONCATENATION,
    fields: &[Field::new(0, "axis", Kind::I32(0)), Field::new(1, FUSED, ACTIVATION)],
};

const ADD: OptionsSpec = OptionsSpec {
    union_type: tag::ADD,
    fields: &[Field::new(0, FUSED, ACTIVATION), Field::new(1, "pot_scale_int16", Kind::Bool(true))],
};

const SUB: OptionsSpec = OptionsSpec {
    union_type: tag::SUB,
    fields: &[Field::new(0, FUSED, ACTIVATION), Field::new(1, "pot_scale_int16", Kind::Bool(true))],
};

const MUL: OptionsSpec = OptionsSpec {
    union_type: tag::MUL,
    fields: &[Field::new(0, FUSED, ACTIVATION)],
};

const DIV: OptionsSpec = OptionsSpec {
    union_type: tag::DIV,
    fields: &[Field::new(0, FUSED, ACTIVATION)],
};

const LSTM: OptionsSpec = OptionsSpec {
    union_type: tag::LSTM,
    fields: &[
        Field::new(0, FUSED, ACTIVATION),
        Field::new(1, "cell_clip", Kind::F32(0.0)),
        Field::new(2, "proj_clip", Kind::F32(0.0)),
        Field::new(3, "kernel_type", Kind::Enum8(lstm_kernel_type, 0)),
        Field::new(4, "asymmetric_quantize_inputs", Kind::Bool(false)),
    ],
};

const UNIDIRECTIONAL_SEQUENCE_LSTM: OptionsSpec = OptionsSpec {
    union_type: tag::UNIDIRECTIONAL_SEQUENCE_LSTM,
    fields: &[
        Field::new(0, FUSED, ACTIVATION),
        Field::new(1, "cell_clip", Kind::F32(0.0)),
        Field::new(2, "proj_clip", Kind::F32(0.0)),
        Field::new(3, "time_major", Kind::Bool(false)),
        Field::new(4, "asymmetric_quantize_inputs", Kind::Bool(false)),
        Field::new(5, "diagonal_recurrent_tensors", Kind::Bool(false)),
    ],
};

const RESHAPE: OptionsSpec = OptionsSpec {
    union_type: tag::RESHAPE,
    fields: &[Field::new(0, "new_shape", Kind::I32List)],
};

const GATHER: OptionsSpec = OptionsSpec {
    union_type: tag::GATHER,
    fields: &[Field::new(0, "axis", Kind::I32(0)), Field::new(1, "batch_dims", Kind::I32(0))],
};

const REDUCER: OptionsSpec = OptionsSpec {
    union_type: tag::REDUCER,
    fields: &[Field::new(0, "keep_dims", Kind::Bool(false))],
};

const TRANSPOSE_CONV: OptionsSpec = OptionsSpec {
    union_type: tag::TRANSPOSE_CONV,
    fields: &[
        Field::new(0, "padding", PADDING),
        Field::new(1, "stride_w", Kind::I32(0)),
        Field::new(2, "stride_h", Kind::I32(0)),
        Field::new(3, FUSED, ACTIVATION),
    ],
};

const PAD: OptionsSpec = OptionsSpec { union_type: tag::PAD, fields: &[] };
const TRANSPOSE: OptionsSpec = OptionsSpec { union_type: tag::TRANSPOSE, fields: &[] };

/// (op name, builtin code, options layout)
const ENTRIES: &[(&str, i32, Option<OptionsSpec>)] = &[
    ("tfl.abs", code::ABS, None),
    ("tfl.add", code::ADD, Some(ADD)),
    ("tfl.average_pool_2d", code::AVERAGE_POOL_2D, Some(POOL_2D)),
    ("tfl.broadcast_to", code::BROADCAST_TO, None),
    ("tfl.call_once", code::CALL_ONCE, None),
    ("tfl.ceil", code::CEIL, None),
    ("tfl.concatenation", code::CONCATENATION, Some(CONCATENATION)),
    ("tfl.conv_2d", code::CONV_2D, Some(CONV_2D)),
    ("tfl.cos", code::COS, None),
    ("tfl.custom", code::CUSTOM, None),
    ("tfl.dequantize", code::DEQUANTIZE, None),
    ("tfl.div", code::DIV, Some(DIV)),
    ("tfl.dynamic_update_slice", code::DYNAMIC_UPDATE_SLICE, None),
    ("tfl.elu", code::ELU, None),
    ("tfl.equal", code::EQUAL, None),
    ("tfl.exp", code::EXP, None),
    ("tfl.expand_dims", code::EXPAND_DIMS, None),
    ("tfl.fill", code::FILL, None),
    ("tfl.floor", code::FLOOR, None),
    ("tfl.floor_div", code::FLOOR_DIV, None),
    ("tfl.floor_mod", code::FLOOR_MOD, None),
    ("tfl.fully_connected", code::FULLY_CONNECTED, Some(FULLY_CONNECTED)),
    ("tfl.gather", code::GATHER, Some(GATHER)),
    ("tfl.greater", code::GREATER, None),
    ("tfl.greater_equal", code::GREATER_EQUAL, None),
    ("tfl.hard_swish", code::HARD_SWISH, None),
    ("tfl.if", code::IF, None),
    ("tfl.less", code::LESS, None),
    ("tfl.less_equal", code::LESS_EQUAL, None),
    ("tfl.log", code::LOG, None),
    ("tfl.logical_and", code::LOGICAL_AND, None),
    ("tfl.logical_not", code::LOGICAL_NOT, None),
    ("tfl.logical_or", code::LOGICAL_OR, None),
    ("tfl.logistic", code::LOGISTIC, None),
    ("tfl.lstm", code::LSTM, Some(LSTM)),
    ("tfl.max_pool_2d", code::MAX_POOL_2D, Some(POOL_2D)),
    ("tfl.maximum", code::MAXIMUM, None),
    ("tfl.mean", code::MEAN, Some(REDUCER)),
    ("tfl.minimum", code::MINIMUM, None),
    ("tfl.mul", code::MUL, Some(MUL)),
    ("tfl.neg", code::NEG, None),
    ("tfl.not_equal", code::NOT_EQUAL, None),
    ("tfl.pad", code::PAD, Some(PAD)),
    ("tfl.pow", code::POW, None),
    ("tfl.quantize", code::QUANTIZE, None),
    ("tfl.rank", code::RANK, None),
    ("tfl.reduce_max", code::REDUCE_MAX, Some(REDUCER)),
    ("tfl.reduce_min", code::REDUCE_MIN, Some(REDUCER)),
    ("tfl.reduce_prod", code::REDUCE_PROD, Some(REDUCER)),
    ("tfl.relu", code::RELU, None),
    ("tfl.relu6", code::RELU6, None),
    ("tfl.relu_n1_to_1", code::RELU_N1_TO_1, None),
    ("tfl.reshape", code::RESHAPE, Some(RESHAPE)),
    ("tfl.round", code::ROUND, None),
    ("tfl.rsqrt", code::RSQRT, None),
    ("tfl.select", code::SELECT, None),
    ("tfl.select_v2", code::SELECT_V2, None),
    ("tfl.sin", code::SIN, None),
    ("tfl.slice", code::SLICE, None),
    ("tfl.softmax", code::SOFTMAX, Some(SOFTMAX)),
    ("tfl.sqrt", code::SQRT, None),
    ("tfl.square", code::SQUARE, None),
    ("tfl.squared_difference", code::SQUARED_DIFFERENCE, None),
    ("tfl.sub", code::SUB, Some(SUB)),
    ("tfl.sum", code::SUM, Some(REDUCER)),
    ("tfl.tanh", code::TANH, None),
    ("tfl.tile", code::TILE, None),
    ("tfl.transpose", code::TRANSPOSE, Some(TRANSPOSE)),
    ("tfl.transpose_conv", code::TRANSPOSE_CONV, Some(TRANSPOSE_CONV)),
    ("tfl.unidirectional_sequence_lstm", code::UNIDIRECTIONAL_SEQUENCE_LSTM, Some(UNIDIRECTIONAL_SEQUENCE_LSTM)),
    ("tfl.where", code::WHERE, None),
    ("tfl.while", code::WHILE, None),
    ("tfl.zeros_like", code::ZEROS_LIKE, None),
];

/// Catalog of the native ops the exporter supports.
pub struct StaticCatalog {
    entries: HashMap<&'static str, (i32, Option<OptionsSpec>)>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            entries: ENTRIES.iter().map(|&(name, code, spec)| (name, (code, spec))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCatalog for StaticCatalog {
    fn builtin_code(&self, op_name: &str) -> Option<i32> {
        self.entries.get(op_name).map(|(code, _)| *code)
    }

    fn encode_options(&self, op: &Operation, fbb: &mut Fbb) -> ExportResult<Option<EncodedOptions>> {
        match self.entries.get(op.name.as_str()) {
            Some((_, Some(spec))) => spec.encode(op, fbb, &[]).map(Some),
            _ => Ok(None),
        }
    }
}
