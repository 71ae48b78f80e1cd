// This module defines the type system of the dataflow IR consumed by the exporter. A value is
// either a ranked/unranked tensor of some element type, the unit "none" type that marks an
// omitted optional operand, or the control token produced by control-node wrappers. Element
// types cover floats, integers of arbitrary width and signedness (width 1 is boolean), complex
// numbers, strings, resource handles, variants carrying nested tensor subtypes, and the three
// flavours of quantized types (uniform per-tensor, uniform per-axis, calibrated range).
// Display impls render types in a compact textual form used in diagnostics.

use std::fmt;

/// Integer storage description used by quantized types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntType {
    pub width: u32,
    pub signed: bool,
}

impl IntType {
    pub const fn signed(width: u32) -> Self {
        Self { width, signed: true }
    }

    pub const fn unsigned(width: u32) -> Self {
        Self { width, signed: false }
    }
}

/// Quantized element types.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantType {
    /// One scale and zero point for the whole tensor.
    Uniform {
        storage: IntType,
        expressed: Box<ElementType>,
        scale: f64,
        zero_point: i64,
    },
    /// One scale and zero point per slice along `axis`.
    PerAxis {
        storage: IntType,
        expressed: Box<ElementType>,
        scales: Vec<f64>,
        zero_points: Vec<i64>,
        axis: i32,
    },
    /// Only a rough numeric range, recorded by calibration.
    Calibrated {
        expressed: Box<ElementType>,
        min: f64,
        max: f64,
    },
}

/// Element type of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    F16,
    BF16,
    F32,
    F64,
    /// Integer of the given width. Width 1 is a boolean.
    Int { width: u32, unsigned: bool },
    Complex(Box<ElementType>),
    String,
    Resource,
    /// Legacy unsigned 8-bit quantized type of the foreign framework.
    Quint8,
    /// Opaque container with optional nested tensor subtypes.
    Variant(Vec<TensorType>),
    Quant(QuantType),
}

impl ElementType {
    pub const BOOL: ElementType = ElementType::Int { width: 1, unsigned: false };

    pub const fn int(width: u32) -> Self {
        ElementType::Int { width, unsigned: false }
    }

    pub const fn uint(width: u32) -> Self {
        ElementType::Int { width, unsigned: true }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, ElementType::Resource)
    }
}

/// Shape of a tensor. `None` entries are dynamic dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Unranked,
    Ranked(Vec<Option<i64>>),
}

impl Shape {
    /// Fully static shape from concrete dimensions.
    pub fn fixed(dims: &[i64]) -> Self {
        Shape::Ranked(dims.iter().map(|&d| Some(d)).collect())
    }

    pub fn scalar() -> Self {
        Shape::Ranked(Vec::new())
    }

    pub fn has_rank(&self) -> bool {
        matches!(self, Shape::Ranked(_))
    }

    pub fn is_static(&self) -> bool {
        match self {
            Shape::Ranked(dims) => dims.iter().all(Option::is_some),
            Shape::Unranked => false,
        }
    }

    /// Concrete dimensions if the shape is fully static.
    pub fn static_dims(&self) -> Option<Vec<i64>> {
        match self {
            Shape::Ranked(dims) => dims.iter().copied().collect(),
            Shape::Unranked => None,
        }
    }

    /// Number of elements of a static shape.
    pub fn num_elements(&self) -> Option<i64> {
        self.static_dims().map(|dims| dims.iter().product())
    }
}

/// A tensor type: element type plus shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorType {
    pub element: ElementType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(element: ElementType, shape: Shape) -> Self {
        Self { element, shape }
    }

    pub fn fixed(element: ElementType, dims: &[i64]) -> Self {
        Self::new(element, Shape::fixed(dims))
    }

    pub fn unranked(element: ElementType) -> Self {
        Self::new(element, Shape::Unranked)
    }
}

/// Type of an SSA value.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Tensor(TensorType),
    /// Marks an omitted optional operand. Never becomes a tensor.
    None,
    /// Ordering token produced by control-node wrappers.
    Control,
}

impl Type {
    pub fn tensor(element: ElementType, dims: &[i64]) -> Self {
        Type::Tensor(TensorType::fixed(element, dims))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Type::None)
    }

    /// True when the element type (if any) is a resource handle.
    pub fn is_resource(&self) -> bool {
        self.as_tensor().is_some_and(|t| t.element.is_resource())
    }
}

impl From<TensorType> for Type {
    fn from(t: TensorType) -> Self {
        Type::Tensor(t)
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.signed { "i" } else { "u" }, self.width)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::F16 => write!(f, "f16"),
            ElementType::BF16 => write!(f, "bf16"),
            ElementType::F32 => write!(f, "f32"),
            ElementType::F64 => write!(f, "f64"),
            ElementType::Int { width, unsigned } => {
                write!(f, "{}{}", if *unsigned { "ui" } else { "i" }, width)
            }
            ElementType::Complex(inner) => write!(f, "complex<{inner}>"),
            ElementType::String => write!(f, "string"),
            ElementType::Resource => write!(f, "resource"),
            ElementType::Quint8 => write!(f, "quint8"),
            ElementType::Variant(subtypes) => {
                write!(f, "variant")?;
                if !subtypes.is_empty() {
                    write!(f, "<")?;
                    for (i, t) in subtypes.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{t}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            ElementType::Quant(QuantType::Uniform { storage, expressed, scale, zero_point }) => {
                write!(f, "quant.uniform<{storage}:{expressed}, {scale}:{zero_point}>")
            }
            ElementType::Quant(QuantType::PerAxis { storage, expressed, axis, scales, .. }) => {
                write!(f, "quant.uniform<{storage}:{expressed}:{axis}, {} scales>", scales.len())
            }
            ElementType::Quant(QuantType::Calibrated { expressed, min, max }) => {
                write!(f, "quant.calibrated<{expressed}<{min}:{max}>>")
            }
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        match &self.shape {
            Shape::Unranked => write!(f, "*x")?,
            Shape::Ranked(dims) => {
                for dim in dims {
                    match dim {
                        Some(d) => write!(f, "{d}x")?,
                        None => write!(f, "?x")?,
                    }
                }
            }
        }
        write!(f, "{}>", self.element)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(t) => write!(f, "{t}"),
            Type::None => write!(f, "none"),
            Type::Control => write!(f, "!tfl.control"),
        }
    }
}
