// This module provides a read-only, bounds-checked view of a finished model container. The
// low level is TableRef/VectorRef: a table position plus the backing bytes, with accessors
// that follow the vtable to a field, dereference uoffsets to nested tables, vectors and
// strings, and decode little-endian scalars. Every access is checked against the buffer so a
// truncated or corrupt file yields ExportError::Container instead of a panic. On top of that,
// Model::parse decodes the whole container eagerly into plain structs (operator codes,
// sub-graphs with tensors and operators, buffers, metadata, signature defs) that the post
// passes, the delegate checker, the CLI and the tests inspect. Options tables stay as
// TableRef so callers can read the fields they know about. Patches use field_pos to find the
// absolute byte position of a scalar they overwrite.

//! Bounds-checked reader for finished containers.

use flatbuffers::VOffsetT;

use super::schema::{self, vt};
use crate::core::error::{ExportError, ExportResult};

fn malformed(reason: impl Into<String>) -> ExportError {
    ExportError::Container { reason: reason.into() }
}

/// Little-endian scalar that can be read from and written to a container.
pub trait Scalar: Copy {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
    fn to_le_vec(self) -> Vec<u8>;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_le_bytes(raw)
                }

                fn to_le_vec(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl Scalar for bool {
    const SIZE: usize = 1;

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn to_le_vec(self) -> Vec<u8> {
        vec![self as u8]
    }
}

/// Read a scalar at an absolute position.
pub fn read_scalar<T: Scalar>(buf: &[u8], pos: usize) -> ExportResult<T> {
    let end = pos.checked_add(T::SIZE).ok_or_else(|| malformed("offset overflow"))?;
    buf.get(pos..end)
        .map(T::from_le)
        .ok_or_else(|| malformed(format!("read of {} bytes at {} past end {}", T::SIZE, pos, buf.len())))
}

fn deref(buf: &[u8], pos: usize) -> ExportResult<usize> {
    let offset = read_scalar::<u32>(buf, pos)? as usize;
    pos.checked_add(offset).ok_or_else(|| malformed("offset overflow"))
}

/// A table inside a container.
#[derive(Debug, Clone, Copy)]
pub struct TableRef<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TableRef<'a> {
    /// Root table of a finished container.
    pub fn root(buf: &'a [u8]) -> ExportResult<Self> {
        let pos = read_scalar::<u32>(buf, 0)? as usize;
        Ok(Self { buf, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn vtable(&self) -> ExportResult<(usize, usize)> {
        let soffset = read_scalar::<i32>(self.buf, self.pos)? as i64;
        let vtable = self.pos as i64 - soffset;
        if vtable < 0 {
            return Err(malformed(format!("vtable of table at {} is out of range", self.pos)));
        }
        let vtable = vtable as usize;
        let len = read_scalar::<u16>(self.buf, vtable)? as usize;
        Ok((vtable, len))
    }

    /// Absolute position of a field, `None` when the field is absent.
    pub fn field_pos(&self, slot: VOffsetT) -> ExportResult<Option<usize>> {
        let (vtable, len) = self.vtable()?;
        let slot = slot as usize;
        if slot + 2 > len {
            return Ok(None);
        }
        let offset = read_scalar::<u16>(self.buf, vtable + slot)? as usize;
        Ok((offset != 0).then_some(self.pos + offset))
    }

    pub fn scalar<T: Scalar>(&self, slot: VOffsetT, default: T) -> ExportResult<T> {
        match self.field_pos(slot)? {
            Some(pos) => read_scalar(self.buf, pos),
            None => Ok(default),
        }
    }

    fn indirect(&self, slot: VOffsetT) -> ExportResult<Option<usize>> {
        match self.field_pos(slot)? {
            Some(pos) => deref(self.buf, pos).map(Some),
            None => Ok(None),
        }
    }

    pub fn table(&self, slot: VOffsetT) -> ExportResult<Option<TableRef<'a>>> {
        Ok(self.indirect(slot)?.map(|pos| TableRef { buf: self.buf, pos }))
    }

    pub fn vector(&self, slot: VOffsetT) -> ExportResult<Option<VectorRef<'a>>> {
        match self.indirect(slot)? {
            Some(pos) => VectorRef::at(self.buf, pos).map(Some),
            None => Ok(None),
        }
    }

    pub fn string(&self, slot: VOffsetT) -> ExportResult<Option<&'a str>> {
        match self.vector(slot)? {
            Some(v) => v.as_str().map(Some),
            None => Ok(None),
        }
    }

    pub fn bytes(&self, slot: VOffsetT) -> ExportResult<Option<&'a [u8]>> {
        match self.vector(slot)? {
            Some(v) => v.as_bytes().map(Some),
            None => Ok(None),
        }
    }

    /// Scalar vector field; absent fields read as empty.
    pub fn scalars<T: Scalar>(&self, slot: VOffsetT) -> ExportResult<Vec<T>> {
        match self.vector(slot)? {
            Some(v) => (0..v.len()).map(|i| v.scalar_at::<T>(i)).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Table vector field; absent fields read as empty.
    pub fn tables(&self, slot: VOffsetT) -> ExportResult<Vec<TableRef<'a>>> {
        match self.vector(slot)? {
            Some(v) => (0..v.len()).map(|i| v.table_at(i)).collect(),
            None => Ok(Vec::new()),
        }
    }
}

/// A vector inside a container.
#[derive(Debug, Clone, Copy)]
pub struct VectorRef<'a> {
    buf: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> VectorRef<'a> {
    fn at(buf: &'a [u8], pos: usize) -> ExportResult<Self> {
        let len = read_scalar::<u32>(buf, pos)? as usize;
        Ok(Self { buf, start: pos + 4, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute position of the first element.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn scalar_at<T: Scalar>(&self, index: usize) -> ExportResult<T> {
        if index >= self.len {
            return Err(malformed(format!("vector index {} out of bounds ({})", index, self.len)));
        }
        read_scalar(self.buf, self.start + index * T::SIZE)
    }

    pub fn table_at(&self, index: usize) -> ExportResult<TableRef<'a>> {
        if index >= self.len {
            return Err(malformed(format!("vector index {} out of bounds ({})", index, self.len)));
        }
        let pos = deref(self.buf, self.start + index * 4)?;
        Ok(TableRef { buf: self.buf, pos })
    }

    pub fn as_bytes(&self) -> ExportResult<&'a [u8]> {
        self.buf
            .get(self.start..self.start + self.len)
            .ok_or_else(|| malformed(format!("byte vector at {} runs past the end", self.start)))
    }

    pub fn as_str(&self) -> ExportResult<&'a str> {
        std::str::from_utf8(self.as_bytes()?).map_err(|e| malformed(format!("bad string: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorCode {
    pub deprecated_builtin_code: i8,
    pub custom_code: Option<String>,
    pub version: i32,
    pub builtin_code: i32,
}

impl OperatorCode {
    pub fn is_custom(&self) -> bool {
        self.builtin_code == schema::builtin_op::CUSTOM
    }

    /// Custom code for custom ops, `#<code>` for builtins.
    pub fn display_name(&self) -> String {
        match &self.custom_code {
            Some(code) if self.is_custom() => code.clone(),
            _ => format!("#{}", self.builtin_code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quantization {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    pub scale: Vec<f32>,
    pub zero_point: Vec<i64>,
    pub quantized_dimension: i32,
}

impl Quantization {
    pub fn is_empty(&self) -> bool {
        self.min.is_empty() && self.max.is_empty() && self.scale.is_empty() && self.zero_point.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimensionMetadata {
    pub format: i8,
    pub dense_size: i32,
    pub segments_type: u8,
    pub segments: Vec<i32>,
    pub indices_type: u8,
    pub indices: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sparsity {
    pub traversal_order: Vec<i32>,
    pub block_map: Vec<i32>,
    pub dim_metadata: Vec<DimensionMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantSubType {
    pub shape: Vec<i32>,
    pub ty: i8,
    pub has_rank: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<i32>,
    pub ty: i8,
    pub buffer: u32,
    pub name: String,
    pub quantization: Option<Quantization>,
    pub is_variable: bool,
    pub sparsity: Option<Sparsity>,
    pub shape_signature: Option<Vec<i32>>,
    pub has_rank: bool,
    pub variant_tensors: Vec<VariantSubType>,
}

#[derive(Debug, Clone)]
pub struct Operator<'a> {
    pub opcode_index: u32,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub intermediates: Vec<i32>,
    pub builtin_options_type: u8,
    pub builtin_options: Option<TableRef<'a>>,
    pub custom_options: Option<&'a [u8]>,
    pub custom_options_format: i8,
    pub large_custom_options_offset: u64,
    pub large_custom_options_size: u64,
    pub builtin_options_2_type: u8,
    pub builtin_options_2: Option<TableRef<'a>>,
}

#[derive(Debug, Clone)]
pub struct SubGraph<'a> {
    pub tensors: Vec<Tensor>,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub operators: Vec<Operator<'a>>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer<'a> {
    pub data: Option<&'a [u8]>,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub buffer: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDef {
    pub inputs: Vec<(String, u32)>,
    pub outputs: Vec<(String, u32)>,
    pub signature_key: String,
    pub subgraph_index: u32,
}

/// Fully decoded container.
#[derive(Debug, Clone)]
pub struct Model<'a> {
    pub bytes: &'a [u8],
    pub version: u32,
    pub description: Option<String>,
    pub operator_codes: Vec<OperatorCode>,
    pub subgraphs: Vec<SubGraph<'a>>,
    pub buffers: Vec<Buffer<'a>>,
    pub metadata: Vec<Metadata>,
    pub signature_defs: Vec<SignatureDef>,
}

impl<'a> Model<'a> {
    /// Decode a finished container.
    pub fn parse(bytes: &'a [u8]) -> ExportResult<Self> {
        if bytes.len() < 8 {
            return Err(malformed(format!("{} bytes is too short for a container", bytes.len())));
        }
        if &bytes[4..8] != schema::FILE_IDENTIFIER.as_bytes() {
            return Err(malformed("missing TFL3 file identifier"));
        }
        let root = TableRef::root(bytes)?;

        let operator_codes = root
            .tables(vt::model::OPERATOR_CODES)?
            .iter()
            .map(parse_operator_code)
            .collect::<ExportResult<_>>()?;
        let subgraphs = root
            .tables(vt::model::SUBGRAPHS)?
            .iter()
            .map(parse_subgraph)
            .collect::<ExportResult<_>>()?;
        let buffers = root
            .tables(vt::model::BUFFERS)?
            .iter()
            .map(|t| -> ExportResult<Buffer<'a>> {
                Ok(Buffer {
                    data: t.bytes(vt::buffer::DATA)?,
                    offset: t.scalar(vt::buffer::OFFSET, 0u64)?,
                    size: t.scalar(vt::buffer::SIZE, 0u64)?,
                })
            })
            .collect::<ExportResult<_>>()?;
        let metadata = root
            .tables(vt::model::METADATA)?
            .iter()
            .map(|t| -> ExportResult<Metadata> {
                Ok(Metadata {
                    name: t.string(vt::metadata::NAME)?.unwrap_or_default().to_string(),
                    buffer: t.scalar(vt::metadata::BUFFER, 0u32)?,
                })
            })
            .collect::<ExportResult<_>>()?;
        let signature_defs = root
            .tables(vt::model::SIGNATURE_DEFS)?
            .iter()
            .map(parse_signature_def)
            .collect::<ExportResult<_>>()?;

        Ok(Self {
            bytes,
            version: root.scalar(vt::model::VERSION, 0u32)?,
            description: root.string(vt::model::DESCRIPTION)?.map(str::to_string),
            operator_codes,
            subgraphs,
            buffers,
            metadata,
            signature_defs,
        })
    }

    /// Payload of a buffer, resolving out-of-band locations.
    pub fn buffer_data(&self, index: usize) -> Option<&'a [u8]> {
        let buffer = self.buffers.get(index)?;
        if buffer.offset > 1 {
            let start = buffer.offset as usize;
            return self.bytes.get(start..start + buffer.size as usize);
        }
        buffer.data
    }

    /// Payload of a named metadata entry.
    pub fn metadata_bytes(&self, name: &str) -> Option<&'a [u8]> {
        let entry = self.metadata.iter().find(|m| m.name == name)?;
        self.buffer_data(entry.buffer as usize)
    }

    /// Opcode display names in table order.
    pub fn opcode_names(&self) -> Vec<String> {
        self.operator_codes.iter().map(OperatorCode::display_name).collect()
    }

    /// Custom options of an operator, resolving out-of-band locations.
    pub fn custom_options(&self, op: &Operator<'a>) -> Option<&'a [u8]> {
        if op.large_custom_options_offset > 1 {
            let start = op.large_custom_options_offset as usize;
            return self.bytes.get(start..start + op.large_custom_options_size as usize);
        }
        op.custom_options
    }
}

fn parse_operator_code(t: &TableRef<'_>) -> ExportResult<OperatorCode> {
    Ok(OperatorCode {
        deprecated_builtin_code: t.scalar(vt::operator_code::DEPRECATED_BUILTIN_CODE, 0i8)?,
        custom_code: t.string(vt::operator_code::CUSTOM_CODE)?.map(str::to_string),
        version: t.scalar(vt::operator_code::VERSION, 1i32)?,
        builtin_code: t.scalar(vt::operator_code::BUILTIN_CODE, 0i32)?,
    })
}

fn parse_subgraph<'a>(t: &TableRef<'a>) -> ExportResult<SubGraph<'a>> {
    Ok(SubGraph {
        tensors: t
            .tables(vt::sub_graph::TENSORS)?
            .iter()
            .map(parse_tensor)
            .collect::<ExportResult<_>>()?,
        inputs: t.scalars(vt::sub_graph::INPUTS)?,
        outputs: t.scalars(vt::sub_graph::OUTPUTS)?,
        operators: t
            .tables(vt::sub_graph::OPERATORS)?
            .iter()
            .map(parse_operator)
            .collect::<ExportResult<_>>()?,
        name: t.string(vt::sub_graph::NAME)?.map(str::to_string),
    })
}

fn parse_tensor(t: &TableRef<'_>) -> ExportResult<Tensor> {
    let quantization = match t.table(vt::tensor::QUANTIZATION)? {
        Some(q) => Some(Quantization {
            min: q.scalars(vt::quantization::MIN)?,
            max: q.scalars(vt::quantization::MAX)?,
            scale: q.scalars(vt::quantization::SCALE)?,
            zero_point: q.scalars(vt::quantization::ZERO_POINT)?,
            quantized_dimension: q.scalar(vt::quantization::QUANTIZED_DIMENSION, 0i32)?,
        }),
        None => None,
    };
    let sparsity = match t.table(vt::tensor::SPARSITY)? {
        Some(s) => Some(Sparsity {
            traversal_order: s.scalars(vt::sparsity::TRAVERSAL_ORDER)?,
            block_map: s.scalars(vt::sparsity::BLOCK_MAP)?,
            dim_metadata: s
                .tables(vt::sparsity::DIM_METADATA)?
                .iter()
                .map(parse_dimension_metadata)
                .collect::<ExportResult<_>>()?,
        }),
        None => None,
    };
    let shape_signature = match t.vector(vt::tensor::SHAPE_SIGNATURE)? {
        Some(_) => Some(t.scalars(vt::tensor::SHAPE_SIGNATURE)?),
        None => None,
    };
    let variant_tensors = t
        .tables(vt::tensor::VARIANT_TENSORS)?
        .iter()
        .map(|v| -> ExportResult<VariantSubType> {
            Ok(VariantSubType {
                shape: v.scalars(vt::variant_sub_type::SHAPE)?,
                ty: v.scalar(vt::variant_sub_type::TYPE, 0i8)?,
                has_rank: v.scalar(vt::variant_sub_type::HAS_RANK, false)?,
            })
        })
        .collect::<ExportResult<_>>()?;

    Ok(Tensor {
        shape: t.scalars(vt::tensor::SHAPE)?,
        ty: t.scalar(vt::tensor::TYPE, 0i8)?,
        buffer: t.scalar(vt::tensor::BUFFER, 0u32)?,
        name: t.string(vt::tensor::NAME)?.unwrap_or_default().to_string(),
        quantization,
        is_variable: t.scalar(vt::tensor::IS_VARIABLE, false)?,
        sparsity,
        shape_signature,
        has_rank: t.scalar(vt::tensor::HAS_RANK, false)?,
        variant_tensors,
    })
}

fn parse_index_vector(t: Option<TableRef<'_>>, kind: u8) -> ExportResult<Vec<i32>> {
    use schema::sparse_index_vector as siv;
    let Some(t) = t else {
        return Ok(Vec::new());
    };
    let slot = vt::index_vector::VALUES;
    Ok(match kind {
        siv::UINT8 => t.scalars::<u8>(slot)?.into_iter().map(i32::from).collect(),
        siv::UINT16 => t.scalars::<u16>(slot)?.into_iter().map(i32::from).collect(),
        siv::INT32 => t.scalars::<i32>(slot)?,
        _ => Vec::new(),
    })
}

fn parse_dimension_metadata(t: &TableRef<'_>) -> ExportResult<DimensionMetadata> {
    use vt::dimension_metadata as dm;
    let segments_type = t.scalar(dm::ARRAY_SEGMENTS_TYPE, 0u8)?;
    let indices_type = t.scalar(dm::ARRAY_INDICES_TYPE, 0u8)?;
    Ok(DimensionMetadata {
        format: t.scalar(dm::FORMAT, 0i8)?,
        dense_size: t.scalar(dm::DENSE_SIZE, 0i32)?,
        segments_type,
        segments: parse_index_vector(t.table(dm::ARRAY_SEGMENTS)?, segments_type)?,
        indices_type,
        indices: parse_index_vector(t.table(dm::ARRAY_INDICES)?, indices_type)?,
    })
}

fn parse_operator<'a>(t: &TableRef<'a>) -> ExportResult<Operator<'a>> {
    use vt::operator as op;
    Ok(Operator {
        opcode_index: t.scalar(op::OPCODE_INDEX, 0u32)?,
        inputs: t.scalars(op::INPUTS)?,
        outputs: t.scalars(op::OUTPUTS)?,
        intermediates: t.scalars(op::INTERMEDIATES)?,
        builtin_options_type: t.scalar(op::BUILTIN_OPTIONS_TYPE, 0u8)?,
        builtin_options: t.table(op::BUILTIN_OPTIONS)?,
        custom_options: t.bytes(op::CUSTOM_OPTIONS)?,
        custom_options_format: t.scalar(op::CUSTOM_OPTIONS_FORMAT, 0i8)?,
        large_custom_options_offset: t.scalar(op::LARGE_CUSTOM_OPTIONS_OFFSET, 0u64)?,
        large_custom_options_size: t.scalar(op::LARGE_CUSTOM_OPTIONS_SIZE, 0u64)?,
        builtin_options_2_type: t.scalar(op::BUILTIN_OPTIONS_2_TYPE, 0u8)?,
        builtin_options_2: t.table(op::BUILTIN_OPTIONS_2)?,
    })
}

fn parse_tensor_maps(t: &TableRef<'_>, slot: VOffsetT) -> ExportResult<Vec<(String, u32)>> {
    t.tables(slot)?
        .iter()
        .map(|m| -> ExportResult<(String, u32)> {
            Ok((
                m.string(vt::tensor_map::NAME)?.unwrap_or_default().to_string(),
                m.scalar(vt::tensor_map::TENSOR_INDEX, 0u32)?,
            ))
        })
        .collect()
}

fn parse_signature_def(t: &TableRef<'_>) -> ExportResult<SignatureDef> {
    Ok(SignatureDef {
        inputs: parse_tensor_maps(t, vt::signature_def::INPUTS)?,
        outputs: parse_tensor_maps(t, vt::signature_def::OUTPUTS)?,
        signature_key: t.string(vt::signature_def::SIGNATURE_KEY)?.unwrap_or_default().to_string(),
        subgraph_index: t.scalar(vt::signature_def::SUBGRAPH_INDEX, 0u32)?,
    })
}
