// This module encodes tensor records. A tensor is described by its name, its IR tensor type,
// the buffer slot reserved for it, whether it is a variable and, for constants, the defining
// op (whose value attribute may carry a more precise shape than the result type and whose
// sparsity attribute describes a compressed layout). Static shapes are copied after a 32-bit
// range check; dynamic dimensions become 1 in the shape and -1 in the shape signature;
// unranked tensors have an empty shape and has_rank unset. Element types map onto the closed
// set of container type codes, quantized types through their storage type. Quantization
// tables carry the uniform scale and zero point (min/max left empty), the per-axis vectors,
// or calibration ranges taken from a statistics node. Variant element types carry at most one
// nested subtype. Recurrent-op intermediates are built from a bare type by
// build_tensor_from_type.

use flatbuffers::{UnionWIPOffset, WIPOffset};

use crate::container::schema::{dimension_type, sparse_index_vector, tensor_type, vt};
use crate::container::{Fbb, TableOffset};
use crate::core::error::{ExportError, ExportResult};
use crate::ir::{
    names,
    Attribute,
    DimMetadata,
    ElementType,
    ElementsData,
    IntType,
    Operation,
    QuantType,
    Shape,
    SparsityAttr,
    TensorType,
    Type,
};

/// Container code of an element type, `None` when it has no representation.
pub fn type_code(element: &ElementType) -> Option<i8> {
    use tensor_type::*;
    Some(match element {
        ElementType::F32 => FLOAT32,
        ElementType::F16 => FLOAT16,
        ElementType::F64 => FLOAT64,
        ElementType::BF16 => return None,
        ElementType::String => STRING,
        ElementType::Resource => RESOURCE,
        ElementType::Variant(_) => VARIANT,
        ElementType::Quint8 => UINT8,
        ElementType::Int { width, unsigned } => int_code(*width, *unsigned)?,
        ElementType::Complex(inner) => match **inner {
            ElementType::F32 => COMPLEX64,
            ElementType::F64 => COMPLEX128,
            _ => return None,
        },
        ElementType::Quant(QuantType::Uniform { storage, .. })
        | ElementType::Quant(QuantType::PerAxis { storage, .. }) => storage_code(*storage)?,
        ElementType::Quant(QuantType::Calibrated { expressed, .. }) => type_code(expressed)?,
    })
}

fn int_code(width: u32, unsigned: bool) -> Option<i8> {
    use tensor_type::*;
    match (width, unsigned) {
        (1, _) => Some(BOOL),
        (4, false) => Some(INT4),
        (8, false) => Some(INT8),
        (8, true) => Some(UINT8),
        (16, false) => Some(INT16),
        (16, true) => Some(UINT16),
        (32, false) => Some(INT32),
        (32, true) => Some(UINT32),
        (64, false) => Some(INT64),
        (64, true) => Some(UINT64),
        _ => None,
    }
}

// Unsigned storage only exists for 8 and 16 bits.
fn storage_code(storage: IntType) -> Option<i8> {
    use tensor_type::*;
    match (storage.width, storage.signed) {
        (4, true) => Some(INT4),
        (8, true) => Some(INT8),
        (8, false) => Some(UINT8),
        (16, true) => Some(INT16),
        (16, false) => Some(UINT16),
        (32, true) => Some(INT32),
        _ => None,
    }
}

/// Type code of a named value, failing for types without a code.
pub fn element_code(name: &str, element: &ElementType) -> ExportResult<i8> {
    type_code(element).ok_or_else(|| ExportError::UnsupportedType {
        value: name.to_string(),
        ty: element.to_string(),
    })
}

/// Calibration range recorded by a statistics node.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    pub quantized_dimension: i32,
}

impl Calibration {
    /// Range of a statistics node. `axis_stats` wins over `layer_stats`;
    /// entries alternate min, max.
    pub fn from_stats(op: &Operation) -> Option<Self> {
        let stats = op.attr("axis_stats").or_else(|| op.attr("layer_stats"))?;
        let values = float_values(stats)?;
        let (min, max) = values
            .chunks_exact(2)
            .map(|pair| (pair[0] as f32, pair[1] as f32))
            .unzip();
        let quantized_dimension = op
            .attr("axis")
            .and_then(Attribute::as_i64)
            .and_then(|axis| i32::try_from(axis).ok())
            .unwrap_or(0);
        Some(Self { min, max, quantized_dimension })
    }
}

fn float_values(attr: &Attribute) -> Option<Vec<f64>> {
    if let Some(values) = attr.as_f64_list() {
        return Some(values);
    }
    let elements = attr.as_elements()?;
    match (&elements.ty.element, &elements.data) {
        (ElementType::F32, ElementsData::Raw(bytes)) => Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
        ),
        _ => None,
    }
}

/// Everything needed to encode one tensor.
#[derive(Debug, Clone)]
pub struct TensorSpec<'a> {
    pub name: &'a str,
    pub ty: &'a TensorType,
    pub buffer: u32,
    pub is_variable: bool,
    /// Defining op when it is a constant.
    pub constant: Option<&'a Operation>,
    pub calibration: Option<Calibration>,
}

struct ShapeInfo {
    shape: Vec<i32>,
    signature: Option<Vec<i32>>,
    has_rank: bool,
}

fn checked_dims(name: &str, dims: &[i64]) -> ExportResult<Vec<i32>> {
    dims.iter()
        .map(|&d| i32::try_from(d).map_err(|_| ExportError::ShapeOutOfRange { value: name.to_string() }))
        .collect()
}

fn shape_info(spec: &TensorSpec<'_>) -> ExportResult<ShapeInfo> {
    if let Some(dims) = spec.ty.shape.static_dims() {
        return Ok(ShapeInfo { shape: checked_dims(spec.name, &dims)?, signature: None, has_rank: true });
    }
    // Constants know their exact shape from the stored value.
    let value_dims = spec
        .constant
        .and_then(|op| op.attr("value"))
        .and_then(Attribute::as_elements)
        .and_then(|value| value.ty.shape.static_dims());
    if let Some(dims) = value_dims {
        return Ok(ShapeInfo { shape: checked_dims(spec.name, &dims)?, signature: None, has_rank: true });
    }
    match &spec.ty.shape {
        Shape::Ranked(dims) => {
            let shape: Vec<i64> = dims.iter().map(|d| d.unwrap_or(1)).collect();
            let signature: Vec<i64> = dims.iter().map(|d| d.unwrap_or(-1)).collect();
            Ok(ShapeInfo {
                shape: checked_dims(spec.name, &shape)?,
                signature: Some(checked_dims(spec.name, &signature)?),
                has_rank: true,
            })
        }
        Shape::Unranked => Ok(ShapeInfo { shape: Vec::new(), signature: None, has_rank: false }),
    }
}

/// Encode a tensor record.
pub fn build_tensor(fbb: &mut Fbb, spec: &TensorSpec<'_>) -> ExportResult<TableOffset> {
    let code = element_code(spec.name, &spec.ty.element)?;
    let info = shape_info(spec)?;
    let variant = build_variant(fbb, spec.name, &spec.ty.element)?;
    let quantization = build_quantization(fbb, &spec.ty.element, spec.calibration.as_ref());
    let sparsity = spec
        .constant
        .filter(|op| names::is_sparse_constant(&op.name))
        .and_then(|op| op.attr("s_param"))
        .and_then(Attribute::as_sparsity)
        .map(|s| build_sparsity(fbb, s));

    let shape = fbb.create_vector(&info.shape);
    let signature = info.signature.as_ref().map(|s| fbb.create_vector(s));
    let name = fbb.create_string(spec.name);
    let buffer = if spec.is_variable { 0 } else { spec.buffer };

    log::trace!("tensor '{}': type {}, shape {:?}, buffer {}", spec.name, tensor_type::name(code), info.shape, buffer);

    let start = fbb.start_table();
    fbb.push_slot_always(vt::tensor::SHAPE, shape);
    fbb.push_slot::<i8>(vt::tensor::TYPE, code, 0);
    fbb.push_slot::<u32>(vt::tensor::BUFFER, buffer, 0);
    fbb.push_slot_always(vt::tensor::NAME, name);
    fbb.push_slot_always(vt::tensor::QUANTIZATION, quantization);
    fbb.push_slot::<bool>(vt::tensor::IS_VARIABLE, spec.is_variable, false);
    if let Some(sparsity) = sparsity {
        fbb.push_slot_always(vt::tensor::SPARSITY, sparsity);
    }
    if let Some(signature) = signature {
        fbb.push_slot_always(vt::tensor::SHAPE_SIGNATURE, signature);
    }
    fbb.push_slot::<bool>(vt::tensor::HAS_RANK, info.has_rank, false);
    if let Some(variant) = variant {
        fbb.push_slot_always(vt::tensor::VARIANT_TENSORS, variant);
    }
    Ok(fbb.end_table(start))
}

/// Encode a tensor that exists only as a type (recurrent-op intermediates).
/// Ranked tensors with dynamic dimensions yield `None`.
pub fn build_tensor_from_type(fbb: &mut Fbb, name: &str, ty: &Type) -> ExportResult<Option<TableOffset>> {
    let Some(tensor) = ty.as_tensor() else {
        return Ok(None);
    };
    let shape = match &tensor.shape {
        Shape::Unranked => Vec::new(),
        shape => match shape.static_dims() {
            Some(dims) => checked_dims(name, &dims)?,
            None => return Ok(None),
        },
    };
    let code = element_code(name, &tensor.element)?;
    let variant = build_variant(fbb, name, &tensor.element)?;

    let quantization = match &tensor.element {
        ElementType::Quant(QuantType::Uniform { scale, zero_point, .. }) => {
            let scale = fbb.create_vector(&[*scale as f32]);
            let zero_point = fbb.create_vector(&[*zero_point]);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::quantization::SCALE, scale);
            fbb.push_slot_always(vt::quantization::ZERO_POINT, zero_point);
            Some(fbb.end_table(start))
        }
        ElementType::Quant(QuantType::Calibrated { min, max, .. }) => {
            let min = fbb.create_vector(&[*min as f32]);
            let max = fbb.create_vector(&[*max as f32]);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::quantization::MIN, min);
            fbb.push_slot_always(vt::quantization::MAX, max);
            Some(fbb.end_table(start))
        }
        _ => None,
    };

    let shape = fbb.create_vector(&shape);
    let name_offset = fbb.create_string(name);
    let start = fbb.start_table();
    fbb.push_slot_always(vt::tensor::SHAPE, shape);
    fbb.push_slot::<i8>(vt::tensor::TYPE, code, 0);
    fbb.push_slot_always(vt::tensor::NAME, name_offset);
    if let Some(quantization) = quantization {
        fbb.push_slot_always(vt::tensor::QUANTIZATION, quantization);
    }
    fbb.push_slot::<bool>(vt::tensor::HAS_RANK, tensor.shape.has_rank(), false);
    if let Some(variant) = variant {
        fbb.push_slot_always(vt::tensor::VARIANT_TENSORS, variant);
    }
    Ok(Some(fbb.end_table(start)))
}

fn build_quantization(fbb: &mut Fbb, element: &ElementType, calibration: Option<&Calibration>) -> TableOffset {
    match (element, calibration) {
        (ElementType::Quant(QuantType::Uniform { scale, zero_point, .. }), _) => {
            let scale = fbb.create_vector(&[*scale as f32]);
            let zero_point = fbb.create_vector(&[*zero_point]);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::quantization::SCALE, scale);
            fbb.push_slot_always(vt::quantization::ZERO_POINT, zero_point);
            fbb.end_table(start)
        }
        (ElementType::Quant(QuantType::PerAxis { scales, zero_points, axis, .. }), _) => {
            let scales: Vec<f32> = scales.iter().map(|&s| s as f32).collect();
            let scale = fbb.create_vector(&scales);
            let zero_point = fbb.create_vector(zero_points);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::quantization::SCALE, scale);
            fbb.push_slot_always(vt::quantization::ZERO_POINT, zero_point);
            fbb.push_slot::<i32>(vt::quantization::QUANTIZED_DIMENSION, *axis, 0);
            fbb.end_table(start)
        }
        (_, Some(calibration)) => {
            let min = fbb.create_vector(&calibration.min);
            let max = fbb.create_vector(&calibration.max);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::quantization::MIN, min);
            fbb.push_slot_always(vt::quantization::MAX, max);
            fbb.push_slot::<i32>(vt::quantization::QUANTIZED_DIMENSION, calibration.quantized_dimension, 0);
            fbb.end_table(start)
        }
        _ => {
            let start = fbb.start_table();
            fbb.end_table(start)
        }
    }
}

type TableVector = WIPOffset<flatbuffers::Vector<'static, flatbuffers::ForwardsUOffset<flatbuffers::TableFinishedWIPOffset>>>;

fn build_variant(fbb: &mut Fbb, name: &str, element: &ElementType) -> ExportResult<Option<TableVector>> {
    let ElementType::Variant(subtypes) = element else {
        return Ok(None);
    };
    match subtypes.as_slice() {
        [] => Ok(None),
        [sub] => {
            let shape: Vec<i32> = match &sub.shape {
                Shape::Ranked(dims) => dims
                    .iter()
                    .map(|d| i32::try_from(d.unwrap_or(-1)))
                    .collect::<Result<_, _>>()
                    .map_err(|_| ExportError::ShapeOutOfRange { value: name.to_string() })?,
                Shape::Unranked => Vec::new(),
            };
            let code = element_code(name, &sub.element)?;
            let shape = fbb.create_vector(&shape);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::variant_sub_type::SHAPE, shape);
            fbb.push_slot::<i8>(vt::variant_sub_type::TYPE, code, 0);
            fbb.push_slot::<bool>(vt::variant_sub_type::HAS_RANK, sub.shape.has_rank(), false);
            let table = fbb.end_table(start);
            Ok(Some(fbb.create_vector(&[table])))
        }
        more => Err(ExportError::TooManyVariantSubtypes { value: name.to_string(), count: more.len() }),
    }
}

/// Narrowest index vector holding values up to `max`.
fn index_vector(fbb: &mut Fbb, values: &[i32], max: i32) -> (u8, WIPOffset<UnionWIPOffset>) {
    let (kind, data) = if max <= i32::from(u8::MAX) {
        let narrow: Vec<u8> = values.iter().map(|&v| v as u8).collect();
        (sparse_index_vector::UINT8, fbb.create_vector(&narrow).as_union_value())
    } else if max <= i32::from(u16::MAX) {
        let narrow: Vec<u16> = values.iter().map(|&v| v as u16).collect();
        (sparse_index_vector::UINT16, fbb.create_vector(&narrow).as_union_value())
    } else {
        (sparse_index_vector::INT32, fbb.create_vector(values).as_union_value())
    };
    let start = fbb.start_table();
    fbb.push_slot_always(vt::index_vector::VALUES, data);
    (kind, fbb.end_table(start).as_union_value())
}

fn build_sparsity(fbb: &mut Fbb, sparsity: &SparsityAttr) -> TableOffset {
    use vt::dimension_metadata as dm;
    let mut dims = Vec::with_capacity(sparsity.dim_metadata.len());
    for dim in &sparsity.dim_metadata {
        let table = match dim {
            DimMetadata::Dense { size } => {
                let start = fbb.start_table();
                fbb.push_slot::<i8>(dm::FORMAT, dimension_type::DENSE, dimension_type::DENSE);
                fbb.push_slot::<i32>(dm::DENSE_SIZE, *size, 0);
                fbb.end_table(start)
            }
            DimMetadata::Csr { segments, indices } => {
                // Segments are sorted, so the last one is the largest.
                let segments_max = segments.last().copied().unwrap_or(0);
                let indices_max = indices.iter().copied().max().unwrap_or(0);
                let (segments_type, segments) = index_vector(fbb, segments, segments_max);
                let (indices_type, indices) = index_vector(fbb, indices, indices_max);
                let start = fbb.start_table();
                fbb.push_slot::<i8>(dm::FORMAT, dimension_type::SPARSE_CSR, dimension_type::DENSE);
                fbb.push_slot::<u8>(dm::ARRAY_SEGMENTS_TYPE, segments_type, 0);
                fbb.push_slot_always(dm::ARRAY_SEGMENTS, segments);
                fbb.push_slot::<u8>(dm::ARRAY_INDICES_TYPE, indices_type, 0);
                fbb.push_slot_always(dm::ARRAY_INDICES, indices);
                fbb.end_table(start)
            }
        };
        dims.push(table);
    }
    let traversal_order = fbb.create_vector(&sparsity.traversal_order);
    let block_map = fbb.create_vector(&sparsity.block_map);
    let dims = fbb.create_vector(&dims);
    let start = fbb.start_table();
    fbb.push_slot_always(vt::sparsity::TRAVERSAL_ORDER, traversal_order);
    fbb.push_slot_always(vt::sparsity::BLOCK_MAP, block_map);
    fbb.push_slot_always(vt::sparsity::DIM_METADATA, dims);
    fbb.end_table(start)
}
