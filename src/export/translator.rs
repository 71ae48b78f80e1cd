// This module drives one export. export_model creates the session arena and runs
// export_with_session, which validates the configuration and makes the first attempt in the
// configured buffer layout. An attempt (Translator::run) orders the functions so the entry
// function becomes sub-graph 0, builds every sub-graph while collecting soft op failures,
// reports the foreign-op summaries, builds metadata, signature defs and the model table,
// finishes the container with the TFL3 identifier and runs the post passes: operator code
// versions, the minimum runtime version, delegate checks, and in the out-of-band layout the
// payload area behind the container. An inline attempt that outgrows the size ceiling ends
// with NeedsOutOfBand and the whole export is rerun out of band; a second overflow is fatal.

use bumpalo::Bump;
use hashbrown::HashMap;

use super::operator::OpcodeTable;
use crate::container::buffers::realign_finished;
use crate::container::patch::apply_all;
use crate::container::schema::FILE_IDENTIFIER;
use crate::container::{BufferLayout, BufferTable, Fbb, Model, Patch, TableOffset};
use crate::core::adaptor::Collaborators;
use crate::core::analyzer::UseMap;
use crate::core::config::ExportConfig;
use crate::core::error::{ops_summary, Diagnostics, ExportError, ExportResult};
use crate::core::session::ExportSession;
use crate::core::value_assignment::{NameMapper, TensorIndexMap};
use crate::ir::{Function, Module};

/// Result of one attempt.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Finished(Vec<u8>),
    /// The inline layout cannot hold the model.
    NeedsOutOfBand { size: usize },
}

/// State of one export attempt.
pub(crate) struct Translator<'m, 's, 'arena> {
    pub(crate) module: &'m Module,
    pub(crate) config: &'m ExportConfig,
    pub(crate) collaborators: &'m Collaborators,
    pub(crate) session: &'s ExportSession<'arena>,
    pub(crate) fbb: Fbb,
    pub(crate) buffers: BufferTable,
    pub(crate) opcodes: OpcodeTable,
    pub(crate) names: NameMapper<'s, 'arena>,
    pub(crate) tensor_indices: TensorIndexMap,
    pub(crate) uses: UseMap,
    /// Function name -> sub-graph index.
    pub(crate) subgraph_indices: HashMap<String, i32>,
    /// Function sub-graphs first, then region sub-graphs in reservation order.
    pub(crate) subgraphs: Vec<Option<TableOffset>>,
    /// Control edges per sub-graph as (producer, consumer) operator indices.
    pub(crate) control_edges: Vec<Vec<(i32, i32)>>,
    pub(crate) diags: Diagnostics,
    /// Alignment the finished container must be padded to.
    pub(crate) realign: Option<usize>,
}

/// Functions in sub-graph order with their exported names.
pub(crate) fn order_functions(module: &Module) -> ExportResult<Vec<(&Function, String)>> {
    let entries: Vec<&Function> = module.functions.iter().filter(|f| f.is_entry()).collect();
    let renamed = if module.function("main").is_some() {
        None
    } else {
        match entries.as_slice() {
            [] => return Err(ExportError::NoEntryFunction),
            [only] => Some(only.name.as_str()),
            _ => {
                return Err(ExportError::AmbiguousEntryFunction {
                    names: entries.iter().map(|f| f.name.clone()).collect(),
                })
            }
        }
    };
    let main_name = renamed.unwrap_or("main");
    let main = module.function(main_name).ok_or(ExportError::NoEntryFunction)?;

    let mut ordered: Vec<&Function> = Vec::with_capacity(module.functions.len());
    if main.is_entry() {
        ordered.push(main);
    }
    ordered.extend(entries.iter().copied().filter(|f| f.name != main_name));
    if !main.is_entry() {
        ordered.push(main);
    }
    ordered.extend(module.functions.iter().filter(|f| !f.is_entry() && f.name != main_name));

    Ok(ordered
        .into_iter()
        .map(|f| {
            let name = if Some(f.name.as_str()) == renamed { "main".to_string() } else { f.name.clone() };
            (f, name)
        })
        .collect())
}

impl<'m, 's, 'arena> Translator<'m, 's, 'arena> {
    fn new(
        module: &'m Module,
        config: &'m ExportConfig,
        collaborators: &'m Collaborators,
        session: &'s ExportSession<'arena>,
        layout: BufferLayout,
    ) -> Self {
        Self {
            module,
            config,
            collaborators,
            session,
            fbb: Fbb::with_capacity(1024),
            buffers: BufferTable::new(layout, config.max_container_size),
            opcodes: OpcodeTable::new(),
            names: NameMapper::new(session),
            tensor_indices: TensorIndexMap::new(),
            uses: UseMap::build(module),
            subgraph_indices: HashMap::new(),
            subgraphs: Vec::new(),
            control_edges: Vec::new(),
            diags: Diagnostics::new(),
            realign: None,
        }
    }

    /// Run one attempt in `layout`.
    pub(crate) fn run(
        module: &'m Module,
        config: &'m ExportConfig,
        collaborators: &'m Collaborators,
        session: &'s ExportSession<'arena>,
        layout: BufferLayout,
    ) -> ExportResult<AttemptOutcome> {
        session.record_attempt(layout == BufferLayout::OutOfBand);
        let functions = order_functions(module)?;
        let mut t = Self::new(module, config, collaborators, session, layout);

        for (index, (function, _)) in functions.iter().enumerate() {
            t.subgraph_indices.insert(function.name.clone(), index as i32);
        }
        t.subgraphs = vec![None; functions.len()];

        let mut failed_function: Option<String> = None;
        for (index, (function, name)) in functions.iter().enumerate() {
            let built = t.build_subgraph(name, function.body, index, Some(*function))?;
            if layout == BufferLayout::Inline && t.buffers.needs_out_of_band() {
                return Ok(AttemptOutcome::NeedsOutOfBand { size: t.fbb.unfinished_data().len() });
            }
            match built {
                Some(table) => t.subgraphs[index] = Some(table),
                None => {
                    failed_function.get_or_insert_with(|| name.clone());
                }
            }
        }

        t.report_foreign_ops();
        if t.diags.has_failures() {
            return Err(ExportError::Unsupported {
                function: failed_function.unwrap_or_else(|| "main".to_string()),
                summary: t.diags.failure_summary(),
            });
        }

        let subgraphs = t
            .subgraphs
            .iter()
            .copied()
            .collect::<Option<Vec<TableOffset>>>()
            .ok_or_else(|| ExportError::Container { reason: "sub-graph slot left empty".into() })?;
        let model = t.build_model_table(&functions, subgraphs)?;
        if layout == BufferLayout::Inline && t.buffers.needs_out_of_band() {
            return Ok(AttemptOutcome::NeedsOutOfBand { size: t.fbb.unfinished_data().len() });
        }
        t.fbb.finish(model, Some(FILE_IDENTIFIER));
        let mut bytes = t.fbb.finished_data().to_vec();
        if let Some(alignment) = t.realign {
            realign_finished(&mut bytes, alignment);
        }

        if bytes.len() > config.max_container_size {
            return match layout {
                BufferLayout::Inline => Ok(AttemptOutcome::NeedsOutOfBand { size: bytes.len() }),
                BufferLayout::OutOfBand => Err(ExportError::ModelTooLarge {
                    size: bytes.len(),
                    limit: config.max_container_size,
                }),
            };
        }

        t.post_process(&mut bytes, layout)?;
        Ok(AttemptOutcome::Finished(bytes))
    }

    fn report_foreign_ops(&self) {
        if !self.diags.resource_ops.is_empty() {
            log::warn!(
                "Graph contains the following resource op(s), that use(s) resource type. \
                 Currently, resource types are only partially supported by the runtime.\n{}",
                ops_summary(&self.diags.resource_ops, "Resource")
            );
        }
        if !self.diags.flex_ops.is_empty() {
            log::warn!(
                "The following operation(s) need the foreign kernel fallback (flex) to run:\n{}",
                ops_summary(&self.diags.flex_ops, "Flex")
            );
        }
        if !self.diags.custom_ops.is_empty() {
            log::warn!(
                "The following operation(s) are exported as custom ops and need a custom kernel:\n{}",
                ops_summary(&self.diags.custom_ops, "Custom")
            );
        }
    }

    // -------- post passes ---------

    fn post_process(&mut self, bytes: &mut Vec<u8>, layout: BufferLayout) -> ExportResult<()> {
        let patches = {
            let model = Model::parse(bytes)?;
            let versions = &*self.collaborators.versions;
            let mut patches: Vec<Patch> = self
                .opcodes
                .builtin_indices()
                .into_iter()
                .map(|opcode| Patch::OperatorCodeVersion { opcode, version: versions.operator_version(&model, opcode) })
                .collect();
            patches.push(Patch::MinRuntimeVersion { value: versions.min_runtime_version(&model) });

            let incompatible = self.collaborators.check_delegates(&model, &self.config.supported_backends);
            if let Some((backend, issues)) = incompatible.into_iter().next() {
                for (op_name, reason) in issues {
                    Diagnostics::record(&mut self.diags.delegate_incompatible, &op_name, reason);
                }
                let summary = ops_summary(&self.diags.delegate_incompatible, &backend);
                return Err(ExportError::DelegateIncompatible { backend, summary });
            }
            patches
        };
        apply_all(bytes, &patches)?;

        if layout == BufferLayout::OutOfBand {
            let structure = bytes.len();
            let locations = self.buffers.append_out_of_band(bytes);
            apply_all(bytes, &locations)?;
            self.session.record_out_of_band_bytes(bytes.len() - structure);
        }
        self.session.record_container_size(bytes.len());
        Ok(())
    }
}

/// Export `module` with a fresh session.
pub fn export_model(module: &Module, config: &ExportConfig, collaborators: &Collaborators) -> ExportResult<Vec<u8>> {
    let arena = Bump::new();
    let session = ExportSession::new(&arena);
    let result = export_with_session(module, config, collaborators, &session);
    log::debug!("export statistics:\n{}", session.stats());
    result
}

/// Export `module`, recording statistics in `session`.
pub fn export_with_session(
    module: &Module,
    config: &ExportConfig,
    collaborators: &Collaborators,
    session: &ExportSession<'_>,
) -> ExportResult<Vec<u8>> {
    config.validate()?;
    let first = if config.use_out_of_band_buffers { BufferLayout::OutOfBand } else { BufferLayout::Inline };
    let too_large = |size| ExportError::ModelTooLarge { size, limit: config.max_container_size };

    match Translator::run(module, config, collaborators, session, first)? {
        AttemptOutcome::Finished(bytes) => Ok(bytes),
        AttemptOutcome::NeedsOutOfBand { size } if first == BufferLayout::Inline => {
            log::info!(
                "model needs {} bytes, above the {} byte inline limit; restarting with out-of-band buffers",
                size,
                config.max_container_size
            );
            match Translator::run(module, config, collaborators, session, BufferLayout::OutOfBand)? {
                AttemptOutcome::Finished(bytes) => Ok(bytes),
                AttemptOutcome::NeedsOutOfBand { size } => Err(too_large(size)),
            }
        }
        AttemptOutcome::NeedsOutOfBand { size } => Err(too_large(size)),
    }
}
