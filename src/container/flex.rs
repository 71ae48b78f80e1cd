// This module builds the schemaless key/value blobs (FlexBuffers) carried by operators and by
// one metadata entry. Generic custom ops get a key-sorted map of their attributes: strings,
// integers, floats, booleans and element types become scalars, homogeneous string/int/float
// lists become vectors, and every other attribute kind is dropped with a warning. Flex ops
// carry a two element vector of the op name and its serialized descriptor. NumericVerify and
// the extension custom_call op use small fixed maps. Control dependencies are persisted as a
// vector with one entry per sub-graph, each a vector of [from, to] operator index pairs.

use flexbuffers::{Blob, Builder};

use crate::ir::{Attribute, Type};

/// Attributes with these keys are implied by the opcode of an extension custom call.
const CUSTOM_CALL_RESERVED: [&str; 2] = ["call_target_name", "backend_config"];

/// Key-sorted attribute map of a generic custom op.
///
/// `type_code` maps element types to container codes; types without a code
/// are skipped with a warning.
pub fn attribute_map<F>(op_name: &str, attrs: &[(String, Attribute)], type_code: F) -> Vec<u8>
where
    F: Fn(&Type) -> Option<i8>,
{
    let mut sorted: Vec<&(String, Attribute)> = attrs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut builder = Builder::default();
    let mut map = builder.start_map();
    for (key, value) in sorted {
        match value {
            Attribute::Str(s) => map.push(key, s.as_str()),
            Attribute::Int(v) => map.push(key, *v),
            Attribute::Float(v) => map.push(key, *v as f32),
            Attribute::Bool(b) => map.push(key, *b),
            Attribute::Type(ty) => match type_code(ty) {
                Some(code) => map.push(key, i64::from(code)),
                None => log::warn!("{}: ignoring unsupported type attribute with key: {}", op_name, key),
            },
            Attribute::Array(items) => push_list(&mut map, op_name, key, items),
            other => log::warn!(
                "{}: ignoring unsupported attribute type with key: {} ({})",
                op_name,
                key,
                other.kind()
            ),
        }
    }
    map.end_map();
    builder.take_buffer()
}

fn push_list(map: &mut flexbuffers::MapBuilder<'_>, op_name: &str, key: &str, items: &[Attribute]) {
    let all = |pred: fn(&Attribute) -> bool| items.iter().all(pred);
    if all(|a| matches!(a, Attribute::Str(_))) {
        let mut vector = map.start_vector(key);
        for item in items {
            if let Attribute::Str(s) = item {
                vector.push(s.as_str());
            }
        }
        vector.end_vector();
    } else if all(|a| matches!(a, Attribute::Int(_))) {
        let mut vector = map.start_vector(key);
        for item in items {
            if let Attribute::Int(v) = item {
                vector.push(*v);
            }
        }
        vector.end_vector();
    } else if all(|a| matches!(a, Attribute::Float(_))) {
        let mut vector = map.start_vector(key);
        for item in items {
            if let Attribute::Float(v) = item {
                vector.push(*v as f32);
            }
        }
        vector.end_vector();
    } else {
        log::warn!(
            "{}: ignoring unsupported type in list attribute with key: {}",
            op_name,
            key
        );
    }
}

/// `[op name, serialized descriptor]` options of a flex op.
pub fn flex_options(op: &str, descriptor: &[u8]) -> Vec<u8> {
    let mut builder = Builder::default();
    let mut vector = builder.start_vector();
    vector.push(op);
    vector.push(Blob(descriptor));
    vector.end_vector();
    builder.take_buffer()
}

/// Options of the NumericVerify custom op.
pub fn numeric_verify_options(tolerance: f32, log_if_failed: bool) -> Vec<u8> {
    let mut builder = Builder::default();
    let mut map = builder.start_map();
    map.push("log_if_failed", log_if_failed);
    map.push("tolerance", tolerance);
    map.end_map();
    builder.take_buffer()
}

/// Bool and string attributes of an extension custom call, minus the
/// ones carried by dedicated option fields.
pub fn custom_call_attributes(attrs: &[(String, Attribute)]) -> Vec<u8> {
    let mut builder = Builder::default();
    let mut map = builder.start_map();
    for (key, value) in attrs {
        if CUSTOM_CALL_RESERVED.contains(&key.as_str()) {
            continue;
        }
        match value {
            Attribute::Bool(b) => map.push(key, *b),
            Attribute::Str(s) => map.push(key, s.as_str()),
            _ => {}
        }
    }
    map.end_map();
    builder.take_buffer()
}

/// Control edges of every sub-graph.
pub fn control_dependencies(edges: &[Vec<(i32, i32)>]) -> Vec<u8> {
    let mut builder = Builder::default();
    let mut outer = builder.start_vector();
    for subgraph in edges {
        let mut pairs = outer.start_vector();
        for &(from, to) in subgraph {
            let mut pair = pairs.start_vector();
            pair.push(from);
            pair.push(to);
            pair.end_vector();
        }
        pairs.end_vector();
    }
    outer.end_vector();
    builder.take_buffer()
}

/// Decode a blob written by [`control_dependencies`].
pub fn read_control_dependencies(bytes: &[u8]) -> Option<Vec<Vec<(i32, i32)>>> {
    let root = flexbuffers::Reader::get_root(bytes).ok()?;
    let outer = root.as_vector();
    let mut result = Vec::with_capacity(outer.len());
    for i in 0..outer.len() {
        let pairs = outer.idx(i).as_vector();
        let mut edges = Vec::with_capacity(pairs.len());
        for j in 0..pairs.len() {
            let pair = pairs.idx(j).as_vector();
            edges.push((pair.idx(0).as_i64() as i32, pair.idx(1).as_i64() as i32));
        }
        result.push(edges);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ElementType;
    use flexbuffers::Reader;

    #[test]
    fn test_attribute_map() {
        let attrs = vec![
            ("k".to_string(), Attribute::Int(5)),
            ("alpha".to_string(), Attribute::Float(0.5)),
            ("mode".to_string(), Attribute::str("fast")),
            ("flag".to_string(), Attribute::Bool(true)),
            ("dims".to_string(), Attribute::ints(&[1, 2, 3])),
            ("mixed".to_string(), Attribute::Array(vec![Attribute::Int(1), Attribute::str("x")])),
            ("payload".to_string(), Attribute::Bytes(vec![1, 2])),
            ("T".to_string(), Attribute::Type(Type::tensor(ElementType::F32, &[]))),
        ];
        let bytes = attribute_map("tf.Thing", &attrs, |_| Some(0));
        let map = Reader::get_root(bytes.as_slice()).unwrap().as_map();

        assert_eq!(map.idx("k").as_i64(), 5);
        assert_eq!(map.idx("alpha").as_f32(), 0.5);
        assert_eq!(map.idx("mode").as_str(), "fast");
        assert!(map.idx("flag").as_bool());
        assert_eq!(map.idx("T").as_i64(), 0);
        let dims = map.idx("dims").as_vector();
        assert_eq!(dims.len(), 3);
        assert_eq!(dims.idx(2).as_i64(), 3);
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_flex_options() {
        let bytes = flex_options("MatMul", &[7, 8, 9]);
        let vector = Reader::get_root(bytes.as_slice()).unwrap().as_vector();
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.idx(0).as_str(), "MatMul");
        assert_eq!(vector.idx(1).as_blob().0, &[7u8, 8, 9][..]);
    }

    #[test]
    fn test_custom_call_attributes_skip_reserved() {
        let attrs = vec![
            ("call_target_name".to_string(), Attribute::str("foo")),
            ("backend_config".to_string(), Attribute::str("cfg")),
            ("has_side_effect".to_string(), Attribute::Bool(true)),
            ("note".to_string(), Attribute::str("n")),
            ("api_version".to_string(), Attribute::Int(2)),
        ];
        let bytes = custom_call_attributes(&attrs);
        let map = Reader::get_root(bytes.as_slice()).unwrap().as_map();
        assert_eq!(map.len(), 2);
        assert!(map.idx("has_side_effect").as_bool());
        assert_eq!(map.idx("note").as_str(), "n");
    }

    #[test]
    fn test_control_dependencies() {
        let edges = vec![vec![(0, 2), (1, 2)], vec![]];
        let bytes = control_dependencies(&edges);
        assert_eq!(read_control_dependencies(&bytes), Some(edges));
    }
}
