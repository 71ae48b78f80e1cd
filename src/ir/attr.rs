// This module defines the static attribute values attached to operations, functions and
// modules. Besides scalars, strings, arrays and dictionaries, two payload-carrying attributes
// matter to the exporter: ElementsAttr holds the raw little-endian contents of a constant
// tensor (or the element strings of a string tensor) together with its static type, and
// SparsityAttr describes the traversal order, block map and per-dimension dense/CSR layout of
// a compressed sparse constant. ElementsAttr implements Eq and Hash structurally so it can
// key the constant deduplication table. Display renders attributes for diagnostics, eliding
// large constant payloads.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::types::{ElementType, TensorType, Type};

/// Contents of a constant tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementsData {
    /// Packed little-endian element bytes. 4-bit integers use one byte per element.
    Raw(Vec<u8>),
    /// One entry per element of a string tensor.
    Strings(Vec<Vec<u8>>),
}

/// Constant tensor attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementsAttr {
    pub ty: TensorType,
    pub data: ElementsData,
}

impl ElementsAttr {
    pub fn raw(ty: TensorType, bytes: Vec<u8>) -> Self {
        Self { ty, data: ElementsData::Raw(bytes) }
    }

    pub fn from_f32(dims: &[i64], values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::raw(TensorType::fixed(ElementType::F32, dims), bytes)
    }

    pub fn from_i32(dims: &[i64], values: &[i32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::raw(TensorType::fixed(ElementType::int(32), dims), bytes)
    }

    pub fn from_i8(dims: &[i64], values: &[i8]) -> Self {
        let bytes = values.iter().map(|&v| v as u8).collect();
        Self::raw(TensorType::fixed(ElementType::int(8), dims), bytes)
    }

    pub fn strings(dims: &[i64], values: &[&str]) -> Self {
        Self {
            ty: TensorType::fixed(ElementType::String, dims),
            data: ElementsData::Strings(values.iter().map(|s| s.as_bytes().to_vec()).collect()),
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        match &self.data {
            ElementsData::Strings(items) => items.len(),
            ElementsData::Raw(bytes) => self
                .ty
                .shape
                .num_elements()
                .map(|n| n as usize)
                .unwrap_or(bytes.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Eq for ElementsAttr {}

impl Hash for ElementsAttr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.shape.hash(state);
        self.ty.element.to_string().hash(state);
        match &self.data {
            ElementsData::Raw(bytes) => bytes.hash(state),
            ElementsData::Strings(items) => items.hash(state),
        }
    }
}

/// Per-dimension layout of a sparse constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimMetadata {
    Dense { size: i32 },
    Csr { segments: Vec<i32>, indices: Vec<i32> },
}

/// Sparsity description of a compressed constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityAttr {
    pub traversal_order: Vec<i32>,
    pub block_map: Vec<i32>,
    pub dim_metadata: Vec<DimMetadata>,
}

/// Static attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Opaque byte string (pre-serialized custom options).
    Bytes(Vec<u8>),
    Type(Type),
    Array(Vec<Attribute>),
    Dict(Vec<(String, Attribute)>),
    Elements(ElementsAttr),
    Sparsity(SparsityAttr),
    /// Reference to a function by name.
    Symbol(String),
}

impl Attribute {
    pub fn str(s: &str) -> Self {
        Attribute::Str(s.to_string())
    }

    pub fn ints(values: &[i64]) -> Self {
        Attribute::Array(values.iter().map(|&v| Attribute::Int(v)).collect())
    }

    pub fn floats(values: &[f64]) -> Self {
        Attribute::Array(values.iter().map(|&v| Attribute::Float(v)).collect())
    }

    pub fn strs(values: &[&str]) -> Self {
        Attribute::Array(values.iter().map(|v| Attribute::str(v)).collect())
    }

    pub fn dict(entries: &[(&str, Attribute)]) -> Self {
        Attribute::Dict(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Attribute::Float(v) => Some(*v),
            Attribute::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Attribute::Symbol(s) | Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, Attribute)]> {
        match self {
            Attribute::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&ElementsAttr> {
        match self {
            Attribute::Elements(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_sparsity(&self) -> Option<&SparsityAttr> {
        match self {
            Attribute::Sparsity(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self {
            Attribute::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Integer list; `None` when any element is not an integer.
    pub fn as_i64_list(&self) -> Option<Vec<i64>> {
        self.as_array()?.iter().map(Attribute::as_i64).collect()
    }

    pub fn as_f64_list(&self) -> Option<Vec<f64>> {
        self.as_array()?.iter().map(Attribute::as_f64).collect()
    }

    /// Entry of a dictionary attribute.
    pub fn get(&self, key: &str) -> Option<&Attribute> {
        lookup(self.as_dict()?, key)
    }

    /// Short name of the attribute kind, used in warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            Attribute::Unit => "unit",
            Attribute::Bool(_) => "bool",
            Attribute::Int(_) => "int",
            Attribute::Float(_) => "float",
            Attribute::Str(_) => "string",
            Attribute::Bytes(_) => "bytes",
            Attribute::Type(_) => "type",
            Attribute::Array(_) => "array",
            Attribute::Dict(_) => "dictionary",
            Attribute::Elements(_) => "elements",
            Attribute::Sparsity(_) => "sparsity",
            Attribute::Symbol(_) => "symbol",
        }
    }
}

/// Find an entry in an ordered attribute list.
pub fn lookup<'a>(attrs: &'a [(String, Attribute)], key: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

const LARGE_ELEMENTS: usize = 16;

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Unit => write!(f, "unit"),
            Attribute::Bool(b) => write!(f, "{b}"),
            Attribute::Int(v) => write!(f, "{v}"),
            Attribute::Float(v) => write!(f, "{v:?}"),
            Attribute::Str(s) => write!(f, "\"{s}\""),
            Attribute::Bytes(b) => write!(f, "bytes<{}>", b.len()),
            Attribute::Type(t) => write!(f, "{t}"),
            Attribute::Symbol(s) => write!(f, "@{s}"),
            Attribute::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Attribute::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
            Attribute::Elements(e) if e.len() > LARGE_ELEMENTS => write!(f, "<large>"),
            Attribute::Elements(e) => match &e.data {
                ElementsData::Raw(bytes) => write!(f, "dense<{bytes:?}> : {}", e.ty),
                ElementsData::Strings(items) => {
                    let items: Vec<_> = items.iter().map(|s| String::from_utf8_lossy(s)).collect();
                    write!(f, "dense<{items:?}> : {}", e.ty)
                }
            },
            Attribute::Sparsity(s) => write!(f, "sparsity<{} dims>", s.dim_metadata.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_elements_identity() {
        let a = ElementsAttr::from_f32(&[2], &[1.0, 2.0]);
        let b = ElementsAttr::from_f32(&[2], &[1.0, 2.0]);
        let c = ElementsAttr::from_f32(&[1, 2], &[1.0, 2.0]);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_list_accessors() {
        assert_eq!(Attribute::ints(&[1, 2]).as_i64_list(), Some(vec![1, 2]));
        let mixed = Attribute::Array(vec![Attribute::Int(1), Attribute::str("x")]);
        assert_eq!(mixed.as_i64_list(), None);

        let dict = Attribute::dict(&[("inputs", Attribute::str("a,b"))]);
        assert_eq!(dict.get("inputs").and_then(Attribute::as_str), Some("a,b"));
    }

    #[test]
    fn test_large_elements_elided() {
        let big = ElementsAttr::from_i32(&[32], &[0; 32]);
        assert_eq!(Attribute::Elements(big).to_string(), "<large>");
    }
}
