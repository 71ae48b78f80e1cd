//! Command line front end: inspect finished containers and write a demo model.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use flatgraph::container::Model;
use flatgraph::ir::{names, Attribute, ElementType, ElementsAttr, OpSpec, Type};
use flatgraph::{export_model, Collaborators, ExportConfig, Module, ModuleBuilder};

#[derive(Parser)]
#[command(name = "flatgraph", about = "Dataflow graph to FlatBuffer model exporter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tables of a finished model file.
    Inspect {
        file: PathBuf,
    },
    /// Export a small built-in model to `out`.
    Demo {
        out: PathBuf,
        /// Store constant data after the container.
        #[arg(long)]
        out_of_band: bool,
        /// Extra metadata entries as key=value.
        #[arg(long = "metadata", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },
}

fn inspect(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(file)?;
    let model = Model::parse(&bytes)?;

    println!("version: {}", model.version);
    println!("description: {}", model.description.as_deref().unwrap_or(""));
    println!("operator codes:");
    for (index, code) in model.operator_codes.iter().enumerate() {
        println!("  [{}] {} v{}", index, code.display_name(), code.version);
    }
    for (index, subgraph) in model.subgraphs.iter().enumerate() {
        println!(
            "sub-graph {} '{}': inputs {:?} outputs {:?}",
            index,
            subgraph.name.as_deref().unwrap_or(""),
            subgraph.inputs,
            subgraph.outputs
        );
        for (t, tensor) in subgraph.tensors.iter().enumerate() {
            println!(
                "  tensor {:3} {:<32} type {:2} shape {:?} buffer {}{}",
                t,
                tensor.name,
                tensor.ty,
                tensor.shape,
                tensor.buffer,
                if tensor.is_variable { " (variable)" } else { "" }
            );
        }
        for op in &subgraph.operators {
            let name = model
                .operator_codes
                .get(op.opcode_index as usize)
                .map(|c| c.display_name())
                .unwrap_or_default();
            println!("  op {:<24} {:?} -> {:?}", name, op.inputs, op.outputs);
        }
    }
    println!("buffers: {}", model.buffers.len());
    for entry in &model.metadata {
        let size = model.buffer_data(entry.buffer as usize).map_or(0, <[u8]>::len);
        println!("metadata '{}': buffer {} ({} bytes)", entry.name, entry.buffer, size);
    }
    for def in &model.signature_defs {
        println!(
            "signature '{}' (sub-graph {}): inputs {:?} outputs {:?}",
            def.signature_key, def.subgraph_index, def.inputs, def.outputs
        );
    }
    Ok(())
}

/// `relu(x + bias)` with a saved-model signature.
fn demo_module() -> Module {
    let f32x4 = Type::tensor(ElementType::F32, &[1, 4]);
    let mut b = ModuleBuilder::new();
    b.module_attr(names::MODULE_DESCRIPTION, Attribute::str("flatgraph demo"));

    let main = b.function("serving_default", vec![f32x4.clone()]);
    b.function_attr(
        main,
        names::ENTRY_FUNCTION,
        Attribute::dict(&[("inputs", Attribute::str("input")), ("outputs", Attribute::str("output"))]),
    )
    .function_attr(main, names::EXPORTED_NAMES, Attribute::strs(&["serving_default"]))
    .arg_attr(main, 0, names::INDEX_PATH, Attribute::strs(&["x"]))
    .result_attr(main, 0, names::INDEX_PATH, Attribute::strs(&["y"]));

    let x = b.arg(main, 0);
    let bias = b.constant(main.body, ElementsAttr::from_f32(&[1, 4], &[0.5, -1.0, 0.0, 2.0]));
    let sum = b.push_value(
        main.body,
        OpSpec::new("tfl.add")
            .operands([x, bias])
            .result(f32x4.clone())
            .attr("fused_activation_function", Attribute::str("NONE")),
    );
    let out = b.push_value(main.body, OpSpec::new("tfl.relu").operand(sum).named_result(f32x4, "output"));
    b.ret(main.body, &[out]);
    b.finish()
}

fn demo(out: &PathBuf, out_of_band: bool, metadata: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ExportConfig::new().with_out_of_band_buffers(out_of_band);
    for entry in metadata {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("metadata entry '{}' is not key=value", entry))?;
        config = config.with_metadata(key, value);
    }
    let bytes = export_model(&demo_module(), &config, &Collaborators::default())?;
    fs::write(out, &bytes)?;
    log::info!("wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Inspect { file } => inspect(file),
        Command::Demo { out, out_of_band, metadata } => demo(out, *out_of_band, metadata),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
