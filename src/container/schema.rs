// This module holds the hand-written layout of the model container schema: the vtable slot of
// every table field the exporter writes or reads back, and the integer codes of the schema
// enums and unions (tensor element types, builtin operator codes, the two builtin options
// unions, sparse index vector kinds, dimension formats, activation and padding codes, and
// the extension-dialect option enums). There is no generated code; tables are built directly
// with FlatBufferBuilder::start_table/push_slot and read back by `reader`. A field's slot is
// 4 + 2 * field_id, following the order the fields are declared in the schema.

//! Slot offsets and enum codes of the model container schema.

/// File identifier of the container.
pub const FILE_IDENTIFIER: &str = "TFL3";

/// Schema version written into `Model.version`.
pub const SCHEMA_VERSION: u32 = 3;

/// Vtable slot of a field given its declaration index.
pub const fn slot(field_id: u16) -> flatbuffers::VOffsetT {
    4 + 2 * field_id
}

/// Vtable slots, one module per table.
pub mod vt {
    use super::slot;
    use flatbuffers::VOffsetT;

    pub mod model {
        use super::*;
        pub const VERSION: VOffsetT = slot(0);
        pub const OPERATOR_CODES: VOffsetT = slot(1);
        pub const SUBGRAPHS: VOffsetT = slot(2);
        pub const DESCRIPTION: VOffsetT = slot(3);
        pub const BUFFERS: VOffsetT = slot(4);
        pub const METADATA_BUFFER: VOffsetT = slot(5);
        pub const METADATA: VOffsetT = slot(6);
        pub const SIGNATURE_DEFS: VOffsetT = slot(7);
    }

    pub mod operator_code {
        use super::*;
        pub const DEPRECATED_BUILTIN_CODE: VOffsetT = slot(0);
        pub const CUSTOM_CODE: VOffsetT = slot(1);
        pub const VERSION: VOffsetT = slot(2);
        pub const BUILTIN_CODE: VOffsetT = slot(3);
    }

    pub mod sub_graph {
        use super::*;
        pub const TENSORS: VOffsetT = slot(0);
        pub const INPUTS: VOffsetT = slot(1);
        pub const OUTPUTS: VOffsetT = slot(2);
        pub const OPERATORS: VOffsetT = slot(3);
        pub const NAME: VOffsetT = slot(4);
    }

    pub mod tensor {
        use super::*;
        pub const SHAPE: VOffsetT = slot(0);
        pub const TYPE: VOffsetT = slot(1);
        pub const BUFFER: VOffsetT = slot(2);
        pub const NAME: VOffsetT = slot(3);
        pub const QUANTIZATION: VOffsetT = slot(4);
        pub const IS_VARIABLE: VOffsetT = slot(5);
        pub const SPARSITY: VOffsetT = slot(6);
        pub const SHAPE_SIGNATURE: VOffsetT = slot(7);
        pub const HAS_RANK: VOffsetT = slot(8);
        pub const VARIANT_TENSORS: VOffsetT = slot(9);
    }

    pub mod quantization {
        use super::*;
        pub const MIN: VOffsetT = slot(0);
        pub const MAX: VOffsetT = slot(1);
        pub const SCALE: VOffsetT = slot(2);
        pub const ZERO_POINT: VOffsetT = slot(3);
        pub const QUANTIZED_DIMENSION: VOffsetT = slot(6);
    }

    pub mod sparsity {
        use super::*;
        pub const TRAVERSAL_ORDER: VOffsetT = slot(0);
        pub const BLOCK_MAP: VOffsetT = slot(1);
        pub const DIM_METADATA: VOffsetT = slot(2);
    }

    pub mod dimension_metadata {
        use super::*;
        pub const FORMAT: VOffsetT = slot(0);
        pub const DENSE_SIZE: VOffsetT = slot(1);
        pub const ARRAY_SEGMENTS_TYPE: VOffsetT = slot(2);
        pub const ARRAY_SEGMENTS: VOffsetT = slot(3);
        pub const ARRAY_INDICES_TYPE: VOffsetT = slot(4);
        pub const ARRAY_INDICES: VOffsetT = slot(5);
    }

    /// `Int32Vector`, `Uint16Vector` and `Uint8Vector` share one layout.
    pub mod index_vector {
        use super::*;
        pub const VALUES: VOffsetT = slot(0);
    }

    pub mod variant_sub_type {
        use super::*;
        pub const SHAPE: VOffsetT = slot(0);
        pub const TYPE: VOffsetT = slot(1);
        pub const HAS_RANK: VOffsetT = slot(2);
    }

    pub mod operator {
        use super::*;
        pub const OPCODE_INDEX: VOffsetT = slot(0);
        pub const INPUTS: VOffsetT = slot(1);
        pub const OUTPUTS: VOffsetT = slot(2);
        pub const BUILTIN_OPTIONS_TYPE: VOffsetT = slot(3);
        pub const BUILTIN_OPTIONS: VOffsetT = slot(4);
        pub const CUSTOM_OPTIONS: VOffsetT = slot(5);
        pub const CUSTOM_OPTIONS_FORMAT: VOffsetT = slot(6);
        pub const MUTATING_VARIABLE_INPUTS: VOffsetT = slot(7);
        pub const INTERMEDIATES: VOffsetT = slot(8);
        pub const LARGE_CUSTOM_OPTIONS_OFFSET: VOffsetT = slot(9);
        pub const LARGE_CUSTOM_OPTIONS_SIZE: VOffsetT = slot(10);
        pub const BUILTIN_OPTIONS_2_TYPE: VOffsetT = slot(11);
        pub const BUILTIN_OPTIONS_2: VOffsetT = slot(12);
    }

    pub mod buffer {
        use super::*;
        pub const DATA: VOffsetT = slot(0);
        pub const OFFSET: VOffsetT = slot(1);
        pub const SIZE: VOffsetT = slot(2);
    }

    pub mod metadata {
        use super::*;
        pub const NAME: VOffsetT = slot(0);
        pub const BUFFER: VOffsetT = slot(1);
    }

    pub mod tensor_map {
        use super::*;
        pub const NAME: VOffsetT = slot(0);
        pub const TENSOR_INDEX: VOffsetT = slot(1);
    }

    pub mod signature_def {
        use super::*;
        pub const INPUTS: VOffsetT = slot(0);
        pub const OUTPUTS: VOffsetT = slot(1);
        pub const SIGNATURE_KEY: VOffsetT = slot(2);
        pub const SUBGRAPH_INDEX: VOffsetT = slot(4);
    }
}

/// `TensorType` enum.
pub mod tensor_type {
    pub const FLOAT32: i8 = 0;
    pub const FLOAT16: i8 = 1;
    pub const INT32: i8 = 2;
    pub const UINT8: i8 = 3;
    pub const INT64: i8 = 4;
    pub const STRING: i8 = 5;
    pub const BOOL: i8 = 6;
    pub const INT16: i8 = 7;
    pub const COMPLEX64: i8 = 8;
    pub const INT8: i8 = 9;
    pub const FLOAT64: i8 = 10;
    pub const COMPLEX128: i8 = 11;
    pub const UINT64: i8 = 12;
    pub const RESOURCE: i8 = 13;
    pub const VARIANT: i8 = 14;
    pub const UINT32: i8 = 15;
    pub const UINT16: i8 = 16;
    pub const INT4: i8 = 17;

    pub fn name(code: i8) -> &'static str {
        match code {
            FLOAT32 => "FLOAT32",
            FLOAT16 => "FLOAT16",
            INT32 => "INT32",
            UINT8 => "UINT8",
            INT64 => "INT64",
            STRING => "STRING",
            BOOL => "BOOL",
            INT16 => "INT16",
            COMPLEX64 => "COMPLEX64",
            INT8 => "INT8",
            FLOAT64 => "FLOAT64",
            COMPLEX128 => "COMPLEX128",
            UINT64 => "UINT64",
            RESOURCE => "RESOURCE",
            VARIANT => "VARIANT",
            UINT32 => "UINT32",
            UINT16 => "UINT16",
            INT4 => "INT4",
            _ => "UNKNOWN",
        }
    }
}

/// `BuiltinOperator` enum (the subset the exporter emits).
pub mod builtin_op {
    pub const ADD: i32 = 0;
    pub const AVERAGE_POOL_2D: i32 = 1;
    pub const CONCATENATION: i32 = 2;
    pub const CONV_2D: i32 = 3;
    pub const DEQUANTIZE: i32 = 6;
    pub const FLOOR: i32 = 8;
    pub const FULLY_CONNECTED: i32 = 9;
    pub const LOGISTIC: i32 = 14;
    pub const LSTM: i32 = 16;
    pub const MAX_POOL_2D: i32 = 17;
    pub const MUL: i32 = 18;
    pub const RELU: i32 = 19;
    pub const RELU_N1_TO_1: i32 = 20;
    pub const RELU6: i32 = 21;
    pub const RESHAPE: i32 = 22;
    pub const SOFTMAX: i32 = 25;
    pub const TANH: i32 = 28;
    pub const CUSTOM: i32 = 32;
    pub const PAD: i32 = 34;
    pub const GATHER: i32 = 36;
    pub const TRANSPOSE: i32 = 39;
    pub const MEAN: i32 = 40;
    pub const SUB: i32 = 41;
    pub const DIV: i32 = 42;
    pub const UNIDIRECTIONAL_SEQUENCE_LSTM: i32 = 44;
    pub const EXP: i32 = 47;
    pub const MAXIMUM: i32 = 55;
    pub const MINIMUM: i32 = 57;
    pub const LESS: i32 = 58;
    pub const NEG: i32 = 59;
    pub const GREATER: i32 = 61;
    pub const GREATER_EQUAL: i32 = 62;
    pub const LESS_EQUAL: i32 = 63;
    pub const SELECT: i32 = 64;
    pub const SLICE: i32 = 65;
    pub const SIN: i32 = 66;
    pub const TRANSPOSE_CONV: i32 = 67;
    pub const TILE: i32 = 69;
    pub const EXPAND_DIMS: i32 = 70;
    pub const EQUAL: i32 = 71;
    pub const NOT_EQUAL: i32 = 72;
    pub const LOG: i32 = 73;
    pub const SUM: i32 = 74;
    pub const SQRT: i32 = 75;
    pub const RSQRT: i32 = 76;
    pub const POW: i32 = 78;
    pub const REDUCE_PROD: i32 = 81;
    pub const REDUCE_MAX: i32 = 82;
    pub const LOGICAL_OR: i32 = 84;
    pub const LOGICAL_AND: i32 = 86;
    pub const LOGICAL_NOT: i32 = 87;
    pub const REDUCE_MIN: i32 = 89;
    pub const FLOOR_DIV: i32 = 90;
    pub const SQUARE: i32 = 92;
    pub const ZEROS_LIKE: i32 = 93;
    pub const FILL: i32 = 94;
    pub const FLOOR_MOD: i32 = 95;
    pub const SQUARED_DIFFERENCE: i32 = 99;
    pub const ABS: i32 = 101;
    pub const CEIL: i32 = 104;
    pub const COS: i32 = 108;
    pub const WHERE: i32 = 109;
    pub const RANK: i32 = 110;
    pub const ELU: i32 = 111;
    pub const QUANTIZE: i32 = 114;
    pub const ROUND: i32 = 116;
    pub const HARD_SWISH: i32 = 117;
    pub const IF: i32 = 118;
    pub const WHILE: i32 = 119;
    pub const SELECT_V2: i32 = 123;
    pub const CALL_ONCE: i32 = 129;
    pub const BROADCAST_TO: i32 = 130;
    pub const DYNAMIC_UPDATE_SLICE: i32 = 151;

    pub const STABLEHLO_LOGISTIC: i32 = 162;
    pub const STABLEHLO_ADD: i32 = 163;
    pub const STABLEHLO_DIVIDE: i32 = 164;
    pub const STABLEHLO_MULTIPLY: i32 = 165;
    pub const STABLEHLO_MAXIMUM: i32 = 166;
    pub const STABLEHLO_RESHAPE: i32 = 167;
    pub const STABLEHLO_CLAMP: i32 = 168;
    pub const STABLEHLO_CONCATENATE: i32 = 169;
    pub const STABLEHLO_BROADCAST_IN_DIM: i32 = 170;
    pub const STABLEHLO_CONVOLUTION: i32 = 171;
    pub const STABLEHLO_SLICE: i32 = 172;
    pub const STABLEHLO_CUSTOM_CALL: i32 = 173;
    pub const STABLEHLO_REDUCE: i32 = 174;
    pub const STABLEHLO_ABS: i32 = 175;
    pub const STABLEHLO_AND: i32 = 176;
    pub const STABLEHLO_COSINE: i32 = 177;
    pub const STABLEHLO_EXPONENTIAL: i32 = 178;
    pub const STABLEHLO_FLOOR: i32 = 179;
    pub const STABLEHLO_LOG: i32 = 180;
    pub const STABLEHLO_MINIMUM: i32 = 181;
    pub const STABLEHLO_NEGATE: i32 = 182;
    pub const STABLEHLO_OR: i32 = 183;
    pub const STABLEHLO_POWER: i32 = 184;
    pub const STABLEHLO_REMAINDER: i32 = 185;
    pub const STABLEHLO_RSQRT: i32 = 186;
    pub const STABLEHLO_SELECT: i32 = 187;
    pub const STABLEHLO_SUBTRACT: i32 = 188;
    pub const STABLEHLO_TANH: i32 = 189;
    pub const STABLEHLO_SCATTER: i32 = 190;
    pub const STABLEHLO_COMPARE: i32 = 191;
    pub const STABLEHLO_CONVERT: i32 = 192;
    pub const STABLEHLO_DYNAMIC_SLICE: i32 = 193;
    pub const STABLEHLO_DYNAMIC_UPDATE_SLICE: i32 = 194;
    pub const STABLEHLO_PAD: i32 = 195;
    pub const STABLEHLO_IOTA: i32 = 196;
    pub const STABLEHLO_DOT_GENERAL: i32 = 197;
    pub const STABLEHLO_REDUCE_WINDOW: i32 = 198;
    pub const STABLEHLO_SORT: i32 = 199;
    pub const STABLEHLO_WHILE: i32 = 200;
    pub const STABLEHLO_GATHER: i32 = 201;
    pub const STABLEHLO_TRANSPOSE: i32 = 202;
    pub const STABLEHLO_RNG_BIT_GENERATOR: i32 = 204;

    /// First code of the extension-dialect range.
    pub const FIRST_EXTENSION: i32 = STABLEHLO_LOGISTIC;

    /// Largest code that fits the deprecated one-byte field.
    pub const PLACEHOLDER_FOR_GREATER_OP_CODES: i32 = 127;
}

/// `BuiltinOptions` union tags.
pub mod builtin_options {
    pub const NONE: u8 = 0;
    pub const CONV_2D: u8 = 1;
    pub const POOL_2D: u8 = 5;
    pub const FULLY_CONNECTED: u8 = 8;
    pub const SOFTMAX: u8 = 9;
    pub const CONCATENATION: u8 = 10;
    pub const ADD: u8 = 11;
    pub const LSTM: u8 = 14;
    pub const RESHAPE: u8 = 17;
    pub const MUL: u8 = 21;
    pub const PAD: u8 = 22;
    pub const GATHER: u8 = 23;
    pub const TRANSPOSE: u8 = 26;
    pub const REDUCER: u8 = 27;
    pub const SUB: u8 = 28;
    pub const DIV: u8 = 29;
    pub const TRANSPOSE_CONV: u8 = 49;
    pub const UNIDIRECTIONAL_SEQUENCE_LSTM: u8 = 71;
    pub const IF: u8 = 92;
    pub const WHILE: u8 = 93;
    pub const CALL_ONCE: u8 = 103;
}

/// `BuiltinOptions2` union tags (extension dialect).
pub mod builtin_options_2 {
    pub const NONE: u8 = 0;
    pub const CONCATENATE: u8 = 1;
    pub const BROADCAST_IN_DIM: u8 = 2;
    pub const SLICE: u8 = 3;
    pub const CONVOLUTION: u8 = 4;
    pub const CUSTOM_CALL: u8 = 5;
    pub const REDUCE: u8 = 6;
    pub const SCATTER: u8 = 7;
    pub const COMPARE: u8 = 8;
    pub const DYNAMIC_SLICE: u8 = 9;
    pub const PAD: u8 = 10;
    pub const IOTA: u8 = 11;
    pub const DOT_GENERAL: u8 = 12;
    pub const REDUCE_WINDOW: u8 = 13;
    pub const SORT: u8 = 14;
    pub const WHILE: u8 = 15;
    pub const GATHER: u8 = 16;
    pub const TRANSPOSE: u8 = 17;
    pub const RNG_BIT_GENERATOR: u8 = 19;
}

/// `CustomOptionsFormat` enum.
pub const CUSTOM_OPTIONS_FORMAT_FLEXBUFFERS: i8 = 0;

/// `SparseIndexVector` union tags.
pub mod sparse_index_vector {
    pub const NONE: u8 = 0;
    pub const INT32: u8 = 1;
    pub const UINT16: u8 = 2;
    pub const UINT8: u8 = 3;
}

/// `DimensionType` enum.
pub mod dimension_type {
    pub const DENSE: i8 = 0;
    pub const SPARSE_CSR: i8 = 1;
}

/// `ActivationFunctionType` enum.
pub mod activation {
    pub const NONE: i8 = 0;
    pub const RELU: i8 = 1;
    pub const RELU_N1_TO_1: i8 = 2;
    pub const RELU6: i8 = 3;
    pub const TANH: i8 = 4;

    pub fn from_name(name: &str) -> Option<i8> {
        match name {
            "NONE" => Some(NONE),
            "RELU" => Some(RELU),
            "RELU_N1_TO_1" => Some(RELU_N1_TO_1),
            "RELU6" => Some(RELU6),
            "TANH" => Some(TANH),
            _ => None,
        }
    }
}

/// `Padding` enum.
pub mod padding {
    pub const SAME: i8 = 0;
    pub const VALID: i8 = 1;

    pub fn from_name(name: &str) -> Option<i8> {
        match name {
            "SAME" => Some(SAME),
            "VALID" => Some(VALID),
            _ => None,
        }
    }
}

/// Extension-dialect option enums.
pub mod stablehlo {
    pub fn comparison_direction(name: &str) -> Option<u32> {
        match name {
            "EQ" => Some(0),
            "NE" => Some(1),
            "GE" => Some(2),
            "GT" => Some(3),
            "LE" => Some(4),
            "LT" => Some(5),
            _ => None,
        }
    }

    pub fn comparison_type(name: &str) -> Option<u32> {
        match name {
            "NOTYPE" => Some(0),
            "FLOAT" => Some(1),
            "TOTALORDER" | "FLOAT_TOTAL_ORDER" => Some(2),
            "SIGNED" => Some(3),
            "UNSIGNED" => Some(4),
            _ => None,
        }
    }

    pub fn precision(name: &str) -> Option<u32> {
        match name {
            "DEFAULT" => Some(0),
            "HIGH" => Some(1),
            "HIGHEST" => Some(2),
            _ => None,
        }
    }

    pub fn rng_algorithm(name: &str) -> Option<i8> {
        match name {
            "DEFAULT" => Some(0),
            "PHILOX" => Some(1),
            "THREE_FRY" | "THREEFRY" => Some(2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_numbering() {
        assert_eq!(slot(0), 4);
        assert_eq!(vt::tensor::SHAPE_SIGNATURE, 18);
        assert_eq!(vt::operator::LARGE_CUSTOM_OPTIONS_SIZE, 24);
        assert_eq!(vt::model::SIGNATURE_DEFS, 18);
    }

    #[test]
    fn test_enum_lookups() {
        assert_eq!(activation::from_name("RELU6"), Some(activation::RELU6));
        assert_eq!(padding::from_name("VALID"), Some(padding::VALID));
        assert_eq!(stablehlo::comparison_direction("LT"), Some(5));
        assert_eq!(tensor_type::name(tensor_type::INT4), "INT4");
        assert_eq!(activation::from_name("GELU"), None);
    }
}
