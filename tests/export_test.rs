//! End-to-end export tests: build a module, export it, read the container back.

use flatgraph::container::schema::{builtin_op, builtin_options, builtin_options_2, slot, tensor_type};
use flatgraph::container::Model;
use flatgraph::ir::{
    names, Attribute, ElementType, ElementsAttr, FunctionHandle, OpSpec, Shape, TensorType, Type, ValueId,
};
use flatgraph::{
    export_model, export_with_session, Collaborators, ExportConfig, ExportError, ExportSession, Module,
    ModuleBuilder,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32s(dims: &[i64]) -> Type {
    Type::tensor(ElementType::F32, dims)
}

fn export(module: &Module, config: &ExportConfig) -> Vec<u8> {
    export_model(module, config, &Collaborators::default()).unwrap_or_else(|e| panic!("export failed: {}", e))
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `relu(x + bias)` in `main`.
fn add_relu_module() -> Module {
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[1, 4])]);
    let x = b.arg(main, 0);
    let bias = b.constant(main.body, ElementsAttr::from_f32(&[1, 4], &[1.0, 2.0, 3.0, 4.0]));
    let sum = b.push_value(main.body, OpSpec::new("tfl.add").operands([x, bias]).result(f32s(&[1, 4])));
    let out = b.push_value(main.body, OpSpec::new("tfl.relu").operand(sum).result(f32s(&[1, 4])));
    b.ret(main.body, &[out]);
    b.finish()
}

#[test]
fn test_basic_model_layout() {
    init_logger();
    let bytes = export(&add_relu_module(), &ExportConfig::default());
    assert_eq!(&bytes[4..8], b"TFL3");

    let model = Model::parse(&bytes).unwrap_or_else(|e| panic!("parse failed: {}", e));
    assert_eq!(model.version, 3);
    assert_eq!(model.description.as_deref(), Some("MLIR Converted."));

    // Buffer 0 is the empty buffer.
    assert!(model.buffers[0].data.map_or(true, <[u8]>::is_empty));
    assert_eq!(model.buffers[0].offset, 0);

    assert_eq!(model.subgraphs.len(), 1);
    let main = &model.subgraphs[0];
    assert_eq!(main.name.as_deref(), Some("main"));
    assert_eq!(main.tensors.len(), 4);
    assert_eq!(main.operators.len(), 2);
    assert_eq!(main.inputs, vec![0]);
    assert_eq!(main.outputs, vec![3]);
    assert_eq!(main.tensors[0].name, "arg0");
    assert_eq!(main.tensors[0].ty, tensor_type::FLOAT32);
    assert_eq!(main.tensors[0].shape, vec![1, 4]);
    assert!(main.tensors[0].shape_signature.is_none());

    let bias = &main.tensors[1];
    assert_eq!(
        model.buffer_data(bias.buffer as usize),
        Some(&f32_bytes(&[1.0, 2.0, 3.0, 4.0])[..])
    );

    let codes: Vec<i32> = model.operator_codes.iter().map(|c| c.builtin_code).collect();
    assert_eq!(codes, vec![builtin_op::ADD, builtin_op::RELU]);
    assert!(model.operator_codes.iter().all(|c| c.version == 1));
    assert_eq!(main.operators[0].inputs, vec![0, 1]);
    assert_eq!(main.operators[0].outputs, vec![2]);
    assert_eq!(main.operators[0].builtin_options_type, builtin_options::ADD);
    assert_eq!(main.operators[1].inputs, vec![2]);

    let version = model.metadata_bytes("min_runtime_version").unwrap();
    assert_eq!(version.len(), 16);
    assert!(version.starts_with(b"1.5.0"));
    assert!(version[5..].iter().all(|&b| b == 0));
    assert!(model.metadata_bytes("buffer_location").is_none());
    assert!(model.signature_defs.is_empty());
}

#[test]
fn test_export_is_deterministic() {
    init_logger();
    let module = add_relu_module();
    let config = ExportConfig::default().with_metadata("producer", "unit-test");
    assert_eq!(export(&module, &config), export(&module, &config));
}

#[test]
fn test_identical_constants_share_a_buffer() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![]);
    let value = ElementsAttr::from_f32(&[2], &[7.0, 8.0]);
    let c1 = b.constant(main.body, value.clone());
    let c2 = b.constant(main.body, value);
    let sum = b.push_value(main.body, OpSpec::new("tfl.add").operands([c1, c2]).result(f32s(&[2])));
    b.ret(main.body, &[sum]);
    let module = b.finish();

    let arena = bumpalo::Bump::new();
    let session = ExportSession::new(&arena);
    let bytes = export_with_session(&module, &ExportConfig::default(), &Collaborators::default(), &session)
        .unwrap_or_else(|e| panic!("export failed: {}", e));
    let model = Model::parse(&bytes).unwrap();
    let tensors = &model.subgraphs[0].tensors;
    assert_eq!(tensors[0].buffer, tensors[1].buffer);
    assert_ne!(tensors[0].buffer, tensors[2].buffer);
    assert_eq!(session.stats().dedup_hits, 1);
    assert_eq!(session.stats().attempts, 1);
}

#[test]
fn test_returned_constant_is_not_shared() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![]);
    let value = ElementsAttr::from_f32(&[2], &[7.0, 8.0]);
    let c1 = b.constant(main.body, value.clone());
    let c2 = b.constant(main.body, value);
    let sum = b.push_value(main.body, OpSpec::new("tfl.add").operands([c1, c1]).result(f32s(&[2])));
    b.ret(main.body, &[sum, c2]);
    let module = b.finish();

    let model_bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&model_bytes).unwrap();
    let tensors = &model.subgraphs[0].tensors;
    assert_ne!(tensors[0].buffer, tensors[1].buffer);
    assert_eq!(
        model.buffer_data(tensors[0].buffer as usize),
        model.buffer_data(tensors[1].buffer as usize)
    );
    assert_eq!(model.subgraphs[0].outputs, vec![2, 1]);
}

#[test]
fn test_opcodes_in_first_use_order() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[3]), f32s(&[3])]);
    let (x, y) = (b.arg(main, 0), b.arg(main, 1));
    let m1 = b.push_value(main.body, OpSpec::new("tfl.mul").operands([x, y]).result(f32s(&[3])));
    let a = b.push_value(main.body, OpSpec::new("tfl.add").operands([m1, y]).result(f32s(&[3])));
    let m2 = b.push_value(main.body, OpSpec::new("tfl.mul").operands([a, x]).result(f32s(&[3])));
    b.ret(main.body, &[m2]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    let codes: Vec<i32> = model.operator_codes.iter().map(|c| c.builtin_code).collect();
    assert_eq!(codes, vec![builtin_op::MUL, builtin_op::ADD]);
    let indices: Vec<u32> = model.subgraphs[0].operators.iter().map(|op| op.opcode_index).collect();
    assert_eq!(indices, vec![0, 1, 0]);
}

#[test]
fn test_dynamic_dimension_and_signature() {
    init_logger();
    let dynamic = Type::Tensor(TensorType::new(ElementType::F32, Shape::Ranked(vec![Some(2), None, Some(4)])));
    let mut b = ModuleBuilder::new();
    let serving = b.function("serving_default", vec![dynamic.clone()]);
    b.function_attr(
        serving,
        names::ENTRY_FUNCTION,
        Attribute::dict(&[("inputs", Attribute::str("input")), ("outputs", Attribute::str("output"))]),
    )
    .function_attr(serving, names::EXPORTED_NAMES, Attribute::strs(&["serving_default"]))
    .arg_attr(serving, 0, names::INDEX_PATH, Attribute::strs(&["x"]))
    .result_attr(serving, 0, names::INDEX_PATH, Attribute::strs(&["y"]));
    let x = b.arg(serving, 0);
    let out = b.push_value(serving.body, OpSpec::new("tfl.relu").operand(x).result(dynamic));
    b.ret(serving.body, &[out]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    let main = &model.subgraphs[0];
    assert_eq!(main.name.as_deref(), Some("main"));
    assert_eq!(main.tensors[0].name, "input");
    assert_eq!(main.tensors[0].shape, vec![2, 1, 4]);
    assert_eq!(main.tensors[0].shape_signature, Some(vec![2, -1, 4]));
    assert_eq!(main.tensors[1].name, "output");

    assert_eq!(model.signature_defs.len(), 1);
    let def = &model.signature_defs[0];
    assert_eq!(def.signature_key, "serving_default");
    assert_eq!(def.subgraph_index, 0);
    assert_eq!(def.inputs, vec![("x".to_string(), 0)]);
    assert_eq!(def.outputs, vec![("y".to_string(), 1)]);
}

#[test]
fn test_mismatched_signature_is_skipped() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[1]), f32s(&[1])]);
    b.function_attr(main, names::ENTRY_FUNCTION, Attribute::dict(&[("inputs", Attribute::str("a,b"))]))
        .function_attr(main, names::EXPORTED_NAMES, Attribute::strs(&["serving_default"]))
        .arg_attr(main, 0, names::INDEX_PATH, Attribute::strs(&["a"]));
    let a = b.arg(main, 0);
    b.ret(main.body, &[a]);
    let module = b.finish();

    let model_bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&model_bytes).unwrap();
    assert!(model.signature_defs.is_empty());
    assert_eq!(model.subgraphs[0].tensors[1].name, "b");
}

#[test]
fn test_overflow_restarts_out_of_band() {
    init_logger();
    let values: Vec<f32> = (0..8192).map(|i| i as f32).collect();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[8192])]);
    let x = b.arg(main, 0);
    let weights = b.constant(main.body, ElementsAttr::from_f32(&[8192], &values));
    let sum = b.push_value(main.body, OpSpec::new("tfl.add").operands([x, weights]).result(f32s(&[8192])));
    b.ret(main.body, &[sum]);
    let module = b.finish();

    let config = ExportConfig::default().with_max_container_size(16 * 1024);
    let arena = bumpalo::Bump::new();
    let session = ExportSession::new(&arena);
    let bytes = export_with_session(&module, &config, &Collaborators::default(), &session)
        .unwrap_or_else(|e| panic!("export failed: {}", e));

    let stats = session.stats();
    assert_eq!(stats.attempts, 2);
    assert!(stats.out_of_band);
    assert!(stats.out_of_band_bytes >= values.len() * 4);

    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.metadata_bytes("buffer_location"), Some(&b"outside flatbuffers"[..]));
    let buffer = model.subgraphs[0].tensors[1].buffer as usize;
    assert!(model.buffers[buffer].offset > 1);
    assert_eq!(model.buffers[buffer].offset % 16, 0);
    assert_eq!(model.buffers[buffer].size, (values.len() * 4) as u64);
    assert_eq!(model.buffer_data(buffer), Some(&f32_bytes(&values)[..]));
}

#[test]
fn test_model_too_large_when_structure_overflows() {
    init_logger();
    let config = ExportConfig::default().with_max_container_size(64);
    let result = export_model(&add_relu_module(), &config, &Collaborators::default());
    assert!(matches!(result, Err(ExportError::ModelTooLarge { limit: 64, .. })));
}

#[test]
fn test_call_once_names_init_subgraph() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[1])]);
    let init = b.function("init", vec![]);
    b.ret(init.body, &[]);
    b.push(
        main.body,
        OpSpec::new("tfl.call_once").attr("session_init_function", Attribute::Symbol("init".into())),
    );
    let x = b.arg(main, 0);
    b.ret(main.body, &[x]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.subgraphs.len(), 2);
    assert_eq!(model.subgraphs[1].name.as_deref(), Some("init"));

    let op = &model.subgraphs[0].operators[0];
    assert_eq!(model.operator_codes[op.opcode_index as usize].builtin_code, builtin_op::CALL_ONCE);
    assert_eq!(op.builtin_options_type, builtin_options::CALL_ONCE);
    let options = op.builtin_options.as_ref().unwrap();
    assert_eq!(options.scalar::<i32>(slot(0), 0).unwrap(), 1);
}

fn foreign_module() -> Module {
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[2])]);
    let x = b.arg(main, 0);
    let y = b.push_value(
        main.body,
        OpSpec::new("tf.CustomThing")
            .operand(x)
            .result(f32s(&[2]))
            .attr("mode", Attribute::str("fast"))
            .attr("k", Attribute::Int(5))
            .attr("alpha", Attribute::Float(0.5)),
    );
    b.ret(main.body, &[y]);
    b.finish()
}

#[test]
fn test_foreign_op_as_custom_op() {
    init_logger();
    let bytes = export(&foreign_module(), &ExportConfig::default().with_custom_ops(true));
    let model = Model::parse(&bytes).unwrap();

    let code = &model.operator_codes[0];
    assert_eq!(code.builtin_code, builtin_op::CUSTOM);
    assert_eq!(code.custom_code.as_deref(), Some("CustomThing"));

    let op = &model.subgraphs[0].operators[0];
    let options = model.custom_options(op).unwrap();
    let map = flexbuffers::Reader::get_root(options).unwrap().as_map();
    assert_eq!(map.idx("mode").as_str(), "fast");
    assert_eq!(map.idx("k").as_i64(), 5);
    assert_eq!(map.idx("alpha").as_f32(), 0.5);
}

#[test]
fn test_foreign_op_without_fallback_fails() {
    init_logger();
    match export_model(&foreign_module(), &ExportConfig::default(), &Collaborators::default()) {
        Err(ExportError::Unsupported { function, summary }) => {
            assert_eq!(function, "main");
            assert!(summary.contains("CustomThing"), "summary: {}", summary);
        }
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
}

#[test]
fn test_allowlisted_foreign_op_uses_flex() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[2]), f32s(&[2])]);
    let (x, y) = (b.arg(main, 0), b.arg(main, 1));
    let sum = b.push_value(main.body, OpSpec::new("tf.AddV2").operands([x, y]).result(f32s(&[2])));
    b.ret(main.body, &[sum]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default().with_foreign_passthrough(true));
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.operator_codes[0].custom_code.as_deref(), Some("FlexAddV2"));
    let options = model.custom_options(&model.subgraphs[0].operators[0]).unwrap();
    let root = flexbuffers::Reader::get_root(options).unwrap().as_vector();
    assert_eq!(root.idx(0).as_str(), "AddV2");
}

#[test]
fn test_extension_region_becomes_subgraph() {
    init_logger();
    let scalar = Type::Tensor(TensorType::new(ElementType::F32, Shape::scalar()));
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[4])]);
    let x = b.arg(main, 0);
    let init = b.constant(main.body, ElementsAttr::from_f32(&[], &[0.0]));

    let body = b.region(vec![scalar.clone(), scalar.clone()]);
    let (lhs, rhs) = (b.region_arg(body, 0), b.region_arg(body, 1));
    let sum = b.push_value(body, OpSpec::new("stablehlo.add").operands([lhs, rhs]).result(scalar));
    b.push(body, OpSpec::new(names::EXTENSION_RETURN).operand(sum));

    let pooled = b.push_value(
        main.body,
        OpSpec::new("stablehlo.reduce_window")
            .operands([x, init])
            .result(f32s(&[3]))
            .attr("window_dimensions", Attribute::ints(&[2]))
            .attr("window_strides", Attribute::ints(&[1]))
            .region(body),
    );
    b.ret(main.body, &[pooled]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.subgraphs.len(), 2);
    assert_eq!(model.subgraphs[1].name.as_deref(), Some("STABLEHLO_REDUCE_WINDOW1"));
    assert_eq!(model.subgraphs[1].inputs, vec![0, 1]);
    assert_eq!(model.subgraphs[1].outputs, vec![2]);

    let op = &model.subgraphs[0].operators[0];
    assert_eq!(
        model.operator_codes[op.opcode_index as usize].builtin_code,
        builtin_op::STABLEHLO_REDUCE_WINDOW
    );
    assert_eq!(op.builtin_options_2_type, builtin_options_2::REDUCE_WINDOW);
    let options = op.builtin_options_2.as_ref().unwrap();
    assert_eq!(options.scalar::<i32>(slot(5), 0).unwrap(), 1);
}

#[test]
fn test_structural_extension_op_needs_opt_in() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[4])]);
    let x = b.arg(main, 0);
    let y = b.push_value(main.body, OpSpec::new("stablehlo.abs").operand(x).result(f32s(&[4])));
    b.ret(main.body, &[y]);
    let module = b.finish();

    let result = export_model(&module, &ExportConfig::default(), &Collaborators::default());
    match result {
        Err(ExportError::Unsupported { summary, .. }) => {
            assert!(summary.contains("stablehlo support"), "summary: {}", summary)
        }
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
    let bytes = export(&module, &ExportConfig::default().with_extension_ops(true));
    assert_eq!(Model::parse(&bytes).unwrap().subgraphs[0].operators.len(), 1);
}

/// Wrap `inner` in a control node waiting on `tokens`. Returns (data, token).
fn control_node(b: &mut ModuleBuilder, main: FunctionHandle, inner: OpSpec, tokens: &[ValueId]) -> (ValueId, ValueId) {
    let region = b.region(vec![]);
    let value = b.push_value(region, inner);
    b.push(region, OpSpec::new(names::YIELD).operand(value));
    let op = b.push(
        main.body,
        OpSpec::new(names::CONTROL_NODE)
            .operands(tokens.iter().copied())
            .result(f32s(&[2]))
            .result(Type::Control)
            .region(region),
    );
    (b.result(op, 0), b.result(op, 1))
}

#[test]
fn test_control_edges_are_persisted() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[2])]);
    let x = b.arg(main, 0);
    let (first, token) = control_node(&mut b, main, OpSpec::new("tfl.relu").operand(x).result(f32s(&[2])), &[]);
    let (second, _) = control_node(&mut b, main, OpSpec::new("tfl.relu").operand(x).result(f32s(&[2])), &[token]);
    b.ret(main.body, &[first, second]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.subgraphs[0].operators.len(), 2);
    let blob = model.metadata_bytes("model_control_dependencies").unwrap();
    assert_eq!(
        flatgraph::container::flex::read_control_dependencies(blob),
        Some(vec![vec![(0, 1)]])
    );
}

#[test]
fn test_metadata_entries() {
    init_logger();
    let mut b = ModuleBuilder::new();
    b.module_attr(names::MODULE_DESCRIPTION, Attribute::str("tiny"))
        .module_attr(names::MODULE_METADATA, Attribute::dict(&[("author", Attribute::str("someone"))]));
    let main = b.function("main", vec![f32s(&[1])]);
    let x = b.arg(main, 0);
    b.ret(main.body, &[x]);
    let module = b.finish();

    let config = ExportConfig::default().with_metadata("runtime", "2.15.0");
    let bytes = export(&module, &config);
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.description.as_deref(), Some("tiny"));
    let names: Vec<&str> = model.metadata.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["author", "min_runtime_version", "runtime"]);
    assert_eq!(model.metadata_bytes("author"), Some(&b"someone"[..]));
    assert_eq!(model.metadata_bytes("runtime"), Some(&b"2.15.0\0\0\0\0\0\0\0\0\0\0"[..]));
}

#[test]
fn test_non_string_metadata_is_rejected() {
    init_logger();
    let mut b = ModuleBuilder::new();
    b.module_attr(names::MODULE_METADATA, Attribute::dict(&[("count", Attribute::Int(3))]));
    let main = b.function("main", vec![f32s(&[1])]);
    let x = b.arg(main, 0);
    b.ret(main.body, &[x]);
    let module = b.finish();

    let result = export_model(&module, &ExportConfig::default(), &Collaborators::default());
    assert!(matches!(result, Err(ExportError::InvalidMetadata { .. })));
}

struct FixedVersions;

impl flatgraph::core::VersionResolver for FixedVersions {
    fn operator_version(&self, _model: &Model<'_>, _opcode_index: usize) -> i32 {
        3
    }

    fn min_runtime_version(&self, _model: &Model<'_>) -> String {
        "2.3.0".to_string()
    }
}

#[test]
fn test_versions_are_patched() {
    init_logger();
    let collaborators = Collaborators::default().with_versions(FixedVersions);
    let bytes = export_model(&add_relu_module(), &ExportConfig::default(), &collaborators)
        .unwrap_or_else(|e| panic!("export failed: {}", e));
    let model = Model::parse(&bytes).unwrap();
    assert!(model.operator_codes.iter().all(|c| c.version == 3));
    let version = model.metadata_bytes("min_runtime_version").unwrap();
    assert_eq!(&version[..6], b"2.3.0\0");
}

#[test]
fn test_gpu_delegate_rejects_custom_ops() {
    init_logger();
    let config = ExportConfig::default().with_custom_ops(true).with_supported_backend("GPU");
    match export_model(&foreign_module(), &config, &Collaborators::default()) {
        Err(ExportError::DelegateIncompatible { backend, summary }) => {
            assert_eq!(backend, "GPU");
            assert!(summary.contains("CustomThing"), "summary: {}", summary);
        }
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
}

/// One `tfl.custom` op named `MyOp` carrying `payload`.
fn user_custom_module(payload: &[u8]) -> Module {
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[2])]);
    let x = b.arg(main, 0);
    let y = b.push_value(
        main.body,
        OpSpec::new("tfl.custom")
            .operand(x)
            .result(f32s(&[2]))
            .attr("custom_code", Attribute::str("MyOp"))
            .attr("custom_option", Attribute::Bytes(payload.to_vec())),
    );
    b.ret(main.body, &[y]);
    b.finish()
}

#[test]
fn test_user_custom_options_out_of_band() {
    init_logger();
    let payload: Vec<u8> = (1..=10).collect();
    let module = user_custom_module(&payload);

    let config = ExportConfig::default().with_out_of_band_buffers(true).with_custom_option_alignment(64);
    let bytes = export(&module, &config);
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.operator_codes[0].custom_code.as_deref(), Some("MyOp"));
    let op = &model.subgraphs[0].operators[0];
    assert!(op.custom_options.is_none());
    assert_eq!(op.large_custom_options_offset % 64, 0);
    assert_eq!(op.large_custom_options_size, 10);
    assert_eq!(model.custom_options(op), Some(&payload[..]));
    assert_eq!(model.metadata_bytes("buffer_location"), Some(&b"outside flatbuffers"[..]));
}

#[test]
fn test_user_selected_foreign_op_uses_flex() {
    init_logger();
    let config = ExportConfig::default()
        .with_foreign_passthrough(true)
        .with_custom_ops(true)
        .with_allowlisted_foreign_op("CustomThing");
    let bytes = export(&foreign_module(), &config);
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.opcode_names(), vec!["FlexCustomThing".to_string()]);

    // Without the selection the generic custom path is taken.
    let plain = ExportConfig::default().with_foreign_passthrough(true).with_custom_ops(true);
    let bytes = export(&foreign_module(), &plain);
    assert_eq!(Model::parse(&bytes).unwrap().opcode_names(), vec!["CustomThing".to_string()]);
}

#[test]
fn test_user_custom_options_are_aligned_inline() {
    init_logger();
    for alignment in [16usize, 64, 128] {
        for len in [1u8, 3, 10, 37] {
            let payload: Vec<u8> = (1..=len).collect();
            let config = ExportConfig::default().with_custom_option_alignment(alignment);
            let bytes = export(&user_custom_module(&payload), &config);
            let model = Model::parse(&bytes).unwrap_or_else(|e| panic!("parse failed: {}", e));
            let op = &model.subgraphs[0].operators[0];
            let options = op.custom_options.unwrap_or_else(|| panic!("no inline options for {} bytes", len));
            assert_eq!(options, &payload[..]);
            let offset = options.as_ptr() as usize - bytes.as_ptr() as usize;
            assert_eq!(offset % alignment, 0, "{} bytes at offset {} with alignment {}", len, offset, alignment);
        }
    }
}

/// `main` runs `tfl.while` whose regions call `cond` and `body`. With
/// `extra_body_op` the body region does more than the call.
fn while_module(extra_body_op: bool) -> Module {
    let flag = Type::tensor(ElementType::BOOL, &[1]);
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[1])]);
    let cond = b.function("cond", vec![f32s(&[1])]);
    let body = b.function("body", vec![f32s(&[1])]);

    let c = b.arg(cond, 0);
    let limit = b.constant(cond.body, ElementsAttr::from_f32(&[1], &[100.0]));
    let more = b.push_value(cond.body, OpSpec::new("tfl.less").operands([c, limit]).result(flag.clone()));
    b.ret(cond.body, &[more]);

    let v = b.arg(body, 0);
    let doubled = b.push_value(body.body, OpSpec::new("tfl.add").operands([v, v]).result(f32s(&[1])));
    b.ret(body.body, &[doubled]);

    let cond_region = b.region(vec![f32s(&[1])]);
    let arg = b.region_arg(cond_region, 0);
    let keep_going = b.push_value(
        cond_region,
        OpSpec::new(names::CALL).operand(arg).result(flag).attr("callee", Attribute::Symbol("cond".into())),
    );
    b.push(cond_region, OpSpec::new(names::YIELD).operand(keep_going));

    let body_region = b.region(vec![f32s(&[1])]);
    let arg = b.region_arg(body_region, 0);
    let mut next = b.push_value(
        body_region,
        OpSpec::new(names::CALL)
            .operand(arg)
            .result(f32s(&[1]))
            .attr("callee", Attribute::Symbol("body".into())),
    );
    if extra_body_op {
        next = b.push_value(body_region, OpSpec::new("tfl.relu").operand(next).result(f32s(&[1])));
    }
    b.push(body_region, OpSpec::new(names::YIELD).operand(next));

    let x = b.arg(main, 0);
    let out = b.push_value(
        main.body,
        OpSpec::new("tfl.while")
            .operand(x)
            .result(f32s(&[1]))
            .region(cond_region)
            .region(body_region),
    );
    b.ret(main.body, &[out]);
    b.finish()
}

#[test]
fn test_while_with_single_call_regions() {
    init_logger();
    let bytes = export(&while_module(false), &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    let names: Vec<Option<&str>> = model.subgraphs.iter().map(|s| s.name.as_deref()).collect();
    assert_eq!(names, vec![Some("main"), Some("cond"), Some("body")]);

    let op = &model.subgraphs[0].operators[0];
    assert_eq!(model.operator_codes[op.opcode_index as usize].builtin_code, builtin_op::WHILE);
    assert_eq!(op.builtin_options_type, builtin_options::WHILE);
    let options = op.builtin_options.as_ref().unwrap();
    assert_eq!(options.scalar::<i32>(slot(0), 0).unwrap(), 1);
    assert_eq!(options.scalar::<i32>(slot(1), 0).unwrap(), 2);
    assert_eq!(op.inputs, vec![0]);
    assert_eq!(op.outputs, vec![1]);
}

#[test]
fn test_while_with_extra_region_op_is_rejected() {
    init_logger();
    match export_model(&while_module(true), &ExportConfig::default(), &Collaborators::default()) {
        Err(ExportError::WhileNotSingleCall { op }) => assert_eq!(op, "tfl.while"),
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
}

#[test]
fn test_if_branches_name_subgraphs() {
    init_logger();
    for if_op in ["tfl.if", "tf.If"] {
        let mut b = ModuleBuilder::new();
        let main = b.function("main", vec![Type::tensor(ElementType::BOOL, &[]), f32s(&[1])]);
        let then_branch = b.function("then", vec![f32s(&[1])]);
        let else_branch = b.function("else", vec![f32s(&[1])]);

        let t = b.arg(then_branch, 0);
        b.ret(then_branch.body, &[t]);
        let e = b.arg(else_branch, 0);
        let clipped = b.push_value(else_branch.body, OpSpec::new("tfl.relu").operand(e).result(f32s(&[1])));
        b.ret(else_branch.body, &[clipped]);

        let (pred, x) = (b.arg(main, 0), b.arg(main, 1));
        let y = b.push_value(
            main.body,
            OpSpec::new(if_op)
                .operands([pred, x])
                .result(f32s(&[1]))
                .attr("then_branch", Attribute::Symbol("then".into()))
                .attr("else_branch", Attribute::Symbol("else".into())),
        );
        b.ret(main.body, &[y]);
        let module = b.finish();

        let bytes = export(&module, &ExportConfig::default());
        let model = Model::parse(&bytes).unwrap();
        assert_eq!(model.subgraphs.len(), 3, "{}", if_op);
        assert_eq!(model.subgraphs[1].name.as_deref(), Some("then"));
        assert_eq!(model.subgraphs[2].name.as_deref(), Some("else"));

        let op = &model.subgraphs[0].operators[0];
        assert_eq!(model.operator_codes[op.opcode_index as usize].builtin_code, builtin_op::IF);
        assert_eq!(op.builtin_options_type, builtin_options::IF);
        assert_eq!(op.inputs, vec![0, 1]);
        let options = op.builtin_options.as_ref().unwrap();
        assert_eq!(options.scalar::<i32>(slot(0), 0).unwrap(), 1, "{}", if_op);
        assert_eq!(options.scalar::<i32>(slot(1), 0).unwrap(), 2, "{}", if_op);
    }
}

#[test]
fn test_numeric_verify_names_its_result() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[4])]);
    let x = b.arg(main, 0);
    let dequantized = b.push_value(main.body, OpSpec::new("tfl.relu").operand(x).named_result(f32s(&[4]), "deq"));
    let verified = b.push_value(
        main.body,
        OpSpec::new("tfl.numeric_verify")
            .operands([dequantized, x])
            .result(f32s(&[4]))
            .attr("tolerance", Attribute::Float(0.25))
            .attr("log_if_failed", Attribute::Bool(true)),
    );
    b.ret(main.body, &[dequantized, verified]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    let tensors: Vec<&str> = model.subgraphs[0].tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tensors, vec!["arg0", "deq", "NumericVerify/deq:1"]);

    let op = &model.subgraphs[0].operators[1];
    assert_eq!(model.operator_codes[op.opcode_index as usize].custom_code.as_deref(), Some("NumericVerify"));
    assert_eq!(op.inputs, vec![1, 0]);
    let options = model.custom_options(op).unwrap();
    let map = flexbuffers::Reader::get_root(options).unwrap().as_map();
    assert_eq!(map.idx("tolerance").as_f32(), 0.25);
    assert!(map.idx("log_if_failed").as_bool());
}

#[test]
fn test_lstm_intermediates_become_tensors() {
    init_logger();
    let dynamic = Type::Tensor(TensorType::new(ElementType::F32, Shape::Ranked(vec![None, Some(4)])));
    for lstm in ["tfl.lstm", "tfl.unidirectional_sequence_lstm"] {
        let mut b = ModuleBuilder::new();
        let main = b.function("main", vec![f32s(&[1, 4])]);
        let x = b.arg(main, 0);
        let out = b.push_value(
            main.body,
            OpSpec::new(lstm)
                .operand(x)
                .named_result(f32s(&[1, 4]), "out")
                .attr("input_to_input_intermediate", Attribute::Type(f32s(&[1, 4])))
                .attr("input_to_forget_intermediate", Attribute::Type(dynamic.clone()))
                .attr("effective_hidden_scale_intermediate", Attribute::Type(f32s(&[1, 4]))),
        );
        b.ret(main.body, &[out]);
        let module = b.finish();

        let bytes = export(&module, &ExportConfig::default());
        let model = Model::parse(&bytes).unwrap();
        let main = &model.subgraphs[0];
        let tensors: Vec<&str> = main.tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            tensors,
            vec!["arg0", "input_to_input_intermediate", "effective_hidden_scale_intermediate", "out"],
            "{}",
            lstm
        );
        assert_eq!(main.tensors[1].shape, vec![1, 4]);
        assert_eq!(main.tensors[1].buffer, 0);

        let op = &main.operators[0];
        assert_eq!(op.inputs, vec![0]);
        assert_eq!(op.intermediates, vec![1, 2]);
        assert_eq!(op.outputs, vec![3]);
    }
}

#[test]
fn test_stats_node_is_folded_into_its_operand() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[4])]);
    let x = b.arg(main, 0);
    let activated = b.push_value(main.body, OpSpec::new("tfl.relu").operand(x).result(f32s(&[4])));
    let observed = b.push_value(
        main.body,
        OpSpec::new(names::STATS)
            .operand(activated)
            .result(f32s(&[4]))
            .attr("layer_stats", Attribute::floats(&[-1.0, 6.0])),
    );
    let out = b.push_value(main.body, OpSpec::new("tfl.tanh").operand(observed).result(f32s(&[4])));
    b.ret(main.body, &[out]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    let main = &model.subgraphs[0];
    assert_eq!(main.tensors.len(), 3);
    assert_eq!(main.operators.len(), 2);
    assert_eq!(main.operators[1].inputs, vec![1]);
    assert_eq!(main.outputs, vec![2]);
    assert!(model.opcode_names().iter().all(|name| !name.contains("stats")));

    let range = main.tensors[1].quantization.as_ref().unwrap();
    assert_eq!(range.min, vec![-1.0]);
    assert_eq!(range.max, vec![6.0]);
    assert_eq!(range.quantized_dimension, 0);
}

#[test]
fn test_control_edge_to_a_constant_is_rejected() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![]);
    let weights = OpSpec::new("tfl.pseudo_const")
        .result(f32s(&[2]))
        .attr("value", Attribute::Elements(ElementsAttr::from_f32(&[2], &[1.0, 2.0])));
    let (data, token) = control_node(&mut b, main, weights, &[]);
    let (out, _) = control_node(&mut b, main, OpSpec::new("tfl.relu").operand(data).result(f32s(&[2])), &[token]);
    b.ret(main.body, &[out]);
    let module = b.finish();

    match export_model(&module, &ExportConfig::default(), &Collaborators::default()) {
        Err(ExportError::DanglingControlEdge { subgraph, from, to }) => {
            assert_eq!(subgraph, "main");
            assert_eq!((from, to), (0, 1));
        }
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
}

#[test]
fn test_inline_limit_boundary() {
    init_logger();
    let values: Vec<f32> = (0..256).map(|i| i as f32 * 0.5).collect();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[256])]);
    let x = b.arg(main, 0);
    let weights = b.constant(main.body, ElementsAttr::from_f32(&[256], &values));
    let sum = b.push_value(main.body, OpSpec::new("tfl.add").operands([x, weights]).result(f32s(&[256])));
    b.ret(main.body, &[sum]);
    let module = b.finish();

    let unlimited = export(&module, &ExportConfig::default());
    let exact = unlimited.len();

    // A model exactly at the limit stays inline.
    let arena = bumpalo::Bump::new();
    let session = ExportSession::new(&arena);
    let config = ExportConfig::default().with_max_container_size(exact);
    let bytes = export_with_session(&module, &config, &Collaborators::default(), &session)
        .unwrap_or_else(|e| panic!("export failed: {}", e));
    assert_eq!(session.stats().attempts, 1);
    assert_eq!(bytes, unlimited);

    // One byte less and the constant moves behind the container.
    let arena = bumpalo::Bump::new();
    let session = ExportSession::new(&arena);
    let config = ExportConfig::default().with_max_container_size(exact - 1);
    let bytes = export_with_session(&module, &config, &Collaborators::default(), &session)
        .unwrap_or_else(|e| panic!("export failed: {}", e));
    assert_eq!(session.stats().attempts, 2);
    let model = Model::parse(&bytes).unwrap();
    assert_eq!(model.metadata_bytes("buffer_location"), Some(&b"outside flatbuffers"[..]));
    let buffer = model.subgraphs[0].tensors[1].buffer as usize;
    assert_eq!(model.buffers[buffer].offset % 16, 0);
    assert_eq!(model.buffer_data(buffer), Some(&f32_bytes(&values)[..]));
}

#[test]
fn test_is_variable_marker_needs_no_value() {
    init_logger();
    let mut b = ModuleBuilder::new();
    let main = b.function("main", vec![f32s(&[2])]);
    let x = b.arg(main, 0);
    let state = b.push_value(
        main.body,
        OpSpec::new("tfl.pseudo_const")
            .result(f32s(&[2]))
            .attr("value", Attribute::Elements(ElementsAttr::from_f32(&[2], &[0.0, 0.0])))
            .attr(names::IS_VARIABLE, Attribute::Bool(false)),
    );
    let sum = b.push_value(main.body, OpSpec::new("tfl.add").operands([x, state]).result(f32s(&[2])));
    b.ret(main.body, &[sum]);
    let module = b.finish();

    let bytes = export(&module, &ExportConfig::default());
    let model = Model::parse(&bytes).unwrap();
    let state = &model.subgraphs[0].tensors[1];
    assert!(state.is_variable);
    assert_eq!(state.buffer, 0);
    assert!(!model.subgraphs[0].tensors[0].is_variable);
}
