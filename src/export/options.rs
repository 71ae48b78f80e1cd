// This module implements the declarative encoder for operator option tables. An OptionsSpec
// names the union tag of the table and lists its fields; each Field pairs a schema field id
// with the op attribute it is read from and the kind of value it holds (scalar, enum name,
// integer or boolean list). Encoding reads every attribute, converts it with range checks,
// creates the vectors first (they must exist before the table is started), then writes the
// table with push_slot against the schema default, so absent attributes read back as the
// schema default. Fields whose value only the translator knows (sub-graph indices of nested
// regions) are passed in as extra slots.

use flatbuffers::{VOffsetT, WIPOffset};

use crate::container::schema::slot;
use crate::container::Fbb;
use crate::core::adaptor::{invalid_attribute, EncodedOptions};
use crate::core::error::ExportResult;
use crate::ir::{Attribute, Operation};

/// Kind of value stored in one option field.
#[derive(Clone, Copy)]
pub enum Kind {
    Bool(bool),
    I8(i8),
    I32(i32),
    I64(i64),
    U32(u32),
    F32(f32),
    /// String attribute mapped to a one-byte enum.
    Enum8(fn(&str) -> Option<i8>, i8),
    /// String attribute mapped to a four-byte enum.
    Enum32(fn(&str) -> Option<u32>, u32),
    I32List,
    I64List,
    BoolList,
    Enum32List(fn(&str) -> Option<u32>),
}

/// One field of an option table.
#[derive(Clone, Copy)]
pub struct Field {
    pub id: u16,
    pub key: &'static str,
    pub kind: Kind,
}

impl Field {
    pub const fn new(id: u16, key: &'static str, kind: Kind) -> Self {
        Self { id, key, kind }
    }
}

/// Layout of one option table.
#[derive(Clone, Copy)]
pub struct OptionsSpec {
    pub union_type: u8,
    pub fields: &'static [Field],
}

enum Scalar {
    Bool(bool, bool),
    I8(i8, i8),
    I32(i32, i32),
    I64(i64, i64),
    U32(u32, u32),
    F32(f32, f32),
}

enum Value {
    Scalar(Scalar),
    Vector(WIPOffset<flatbuffers::UnionWIPOffset>),
}

fn int_in<T: TryFrom<i64>>(op: &Operation, key: &str, what: &str) -> ExportResult<Option<T>> {
    match op.attr(key) {
        None => Ok(None),
        Some(attr) => attr
            .as_i64()
            .and_then(|v| T::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| invalid_attribute(op, key, what)),
    }
}

fn list<T, F>(op: &Operation, key: &str, what: &str, convert: F) -> ExportResult<Vec<T>>
where
    F: Fn(&Attribute) -> Option<T>,
{
    match op.attr(key) {
        None => Ok(Vec::new()),
        Some(attr) => attr
            .as_array()
            .and_then(|items| items.iter().map(&convert).collect::<Option<Vec<T>>>())
            .ok_or_else(|| invalid_attribute(op, key, what)),
    }
}

fn enum_name<'a>(op: &'a Operation, key: &str) -> ExportResult<Option<&'a str>> {
    match op.attr(key) {
        None => Ok(None),
        Some(attr) => attr.as_str().map(Some).ok_or_else(|| invalid_attribute(op, key, "an enum name")),
    }
}

impl OptionsSpec {
    /// Encode the options of `op`, plus `extra` i32 fields supplied by the caller.
    pub fn encode(&self, op: &Operation, fbb: &mut Fbb, extra: &[(u16, i32)]) -> ExportResult<EncodedOptions> {
        let mut values: Vec<(VOffsetT, Value)> = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            let key = field.key;
            let value = match field.kind {
                Kind::Bool(default) => {
                    let v = match op.attr(key) {
                        None => default,
                        Some(attr) => attr.as_bool().ok_or_else(|| invalid_attribute(op, key, "a bool"))?,
                    };
                    Value::Scalar(Scalar::Bool(v, default))
                }
                Kind::I8(default) => {
                    Value::Scalar(Scalar::I8(int_in(op, key, "an 8-bit integer")?.unwrap_or(default), default))
                }
                Kind::I32(default) => {
                    Value::Scalar(Scalar::I32(int_in(op, key, "a 32-bit integer")?.unwrap_or(default), default))
                }
                Kind::I64(default) => {
                    Value::Scalar(Scalar::I64(int_in(op, key, "an integer")?.unwrap_or(default), default))
                }
                Kind::U32(default) => Value::Scalar(Scalar::U32(
                    int_in(op, key, "an unsigned 32-bit integer")?.unwrap_or(default),
                    default,
                )),
                Kind::F32(default) => {
                    let v = match op.attr(key) {
                        None => default,
                        Some(attr) => attr.as_f64().ok_or_else(|| invalid_attribute(op, key, "a float"))? as f32,
                    };
                    Value::Scalar(Scalar::F32(v, default))
                }
                Kind::Enum8(lookup, default) => {
                    let v = match enum_name(op, key)? {
                        None => default,
                        Some(name) => lookup(name).ok_or_else(|| invalid_attribute(op, key, "a known enum name"))?,
                    };
                    Value::Scalar(Scalar::I8(v, default))
                }
                Kind::Enum32(lookup, default) => {
                    let v = match enum_name(op, key)? {
                        None => default,
                        Some(name) => lookup(name).ok_or_else(|| invalid_attribute(op, key, "a known enum name"))?,
                    };
                    Value::Scalar(Scalar::U32(v, default))
                }
                Kind::I32List => {
                    let items = list(op, key, "a list of 32-bit integers", |a| {
                        a.as_i64().and_then(|v| i32::try_from(v).ok())
                    })?;
                    Value::Vector(fbb.create_vector(&items).as_union_value())
                }
                Kind::I64List => {
                    let items = list(op, key, "a list of integers", Attribute::as_i64)?;
                    Value::Vector(fbb.create_vector(&items).as_union_value())
                }
                Kind::BoolList => {
                    let items = list(op, key, "a list of bools", Attribute::as_bool)?;
                    Value::Vector(fbb.create_vector(&items).as_union_value())
                }
                Kind::Enum32List(lookup) => {
                    let items = list(op, key, "a list of enum names", |a| a.as_str().and_then(lookup))?;
                    Value::Vector(fbb.create_vector(&items).as_union_value())
                }
            };
            values.push((slot(field.id), value));
        }

        let start = fbb.start_table();
        for (field_slot, value) in values {
            match value {
                Value::Scalar(Scalar::Bool(v, d)) => fbb.push_slot::<bool>(field_slot, v, d),
                Value::Scalar(Scalar::I8(v, d)) => fbb.push_slot::<i8>(field_slot, v, d),
                Value::Scalar(Scalar::I32(v, d)) => fbb.push_slot::<i32>(field_slot, v, d),
                Value::Scalar(Scalar::I64(v, d)) => fbb.push_slot::<i64>(field_slot, v, d),
                Value::Scalar(Scalar::U32(v, d)) => fbb.push_slot::<u32>(field_slot, v, d),
                Value::Scalar(Scalar::F32(v, d)) => fbb.push_slot::<f32>(field_slot, v, d),
                Value::Vector(offset) => fbb.push_slot_always(field_slot, offset),
            }
        }
        for &(id, v) in extra {
            fbb.push_slot::<i32>(slot(id), v, 0);
        }
        let table = fbb.end_table(start);
        Ok(EncodedOptions { union_type: self.union_type, table: table.as_union_value() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::reader::TableRef;
    use crate::container::schema::activation;
    use flatbuffers::FlatBufferBuilder;

    const SPEC: OptionsSpec = OptionsSpec {
        union_type: 7,
        fields: &[
            Field::new(0, "fused_activation_function", Kind::Enum8(activation::from_name, 0)),
            Field::new(1, "stride", Kind::I32(1)),
            Field::new(2, "dims", Kind::I64List),
            Field::new(3, "beta", Kind::F32(0.0)),
        ],
    };

    fn op(attrs: Vec<(&str, Attribute)>) -> Operation {
        Operation {
            name: "tfl.test".into(),
            operands: vec![],
            results: vec![],
            attributes: attrs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            regions: vec![],
        }
    }

    fn finish(fbb: &mut Fbb, encoded: EncodedOptions) -> Vec<u8> {
        let start = fbb.start_table();
        fbb.push_slot_always(slot(0), encoded.table);
        let root = fbb.end_table(start);
        fbb.finish_minimal(root);
        fbb.finished_data().to_vec()
    }

    #[test]
    fn test_encode_fields() {
        let op = op(vec![
            ("fused_activation_function", Attribute::str("RELU6")),
            ("dims", Attribute::ints(&[3, -1])),
            ("beta", Attribute::Float(0.25)),
        ]);
        let mut fbb: Fbb = FlatBufferBuilder::with_capacity(64);
        let encoded = SPEC.encode(&op, &mut fbb, &[(4, 9)]).unwrap();
        assert_eq!(encoded.union_type, 7);
        let bytes = finish(&mut fbb, encoded);

        let options = TableRef::root(&bytes).unwrap().table(slot(0)).unwrap().unwrap();
        assert_eq!(options.scalar(slot(0), 0i8).unwrap(), activation::RELU6);
        assert_eq!(options.scalar(slot(1), 1i32).unwrap(), 1);
        assert!(options.field_pos(slot(1)).unwrap().is_none());
        assert_eq!(options.scalars::<i64>(slot(2)).unwrap(), vec![3, -1]);
        assert_eq!(options.scalar(slot(3), 0f32).unwrap(), 0.25);
        assert_eq!(options.scalar(slot(4), 0i32).unwrap(), 9);
    }

    #[test]
    fn test_bad_attribute() {
        let mut fbb: Fbb = FlatBufferBuilder::with_capacity(64);
        let bad_enum = op(vec![("fused_activation_function", Attribute::str("GELU"))]);
        assert!(SPEC.encode(&bad_enum, &mut fbb, &[]).is_err());

        let overflow = op(vec![("stride", Attribute::Int(1 << 40))]);
        assert!(SPEC.encode(&overflow, &mut fbb, &[]).is_err());
    }
}
