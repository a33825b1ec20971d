//! Orchestration: load, rename cascade, optional compression, dispatch,
//! optimization, packaging. One invocation, run to completion, no partial
//! artifact on failure.

use std::collections::HashMap;
use std::path::PathBuf;

use log::info;

use crate::compress;
use crate::custom_ops::{self, CustomOps, OpsetId};
use crate::dispatch::{ConversionDispatch, DispatchOptions, DEFAULT_OPSET_VERSION};
use crate::error::{Error, Result};
use crate::loader::Source;
use crate::optim::Optimizer;
use crate::package;
use crate::rename;
use crate::store::ExternalTensorStore;

/// Typed, validated configuration of one conversion. Built by the caller's
/// pure parse stage; nothing here performs I/O.
pub struct Options {
    pub source: Source,
    pub inputs: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
    pub shape_overrides: HashMap<String, Vec<i64>>,
    /// Externalize big constants and package an archive bundle.
    pub large_model: bool,
    pub custom_ops: CustomOps,
    pub extra_opsets: Vec<OpsetId>,
    pub rename_inputs: Option<Vec<String>>,
    pub rename_outputs: Option<Vec<String>>,
    pub targets: Vec<String>,
    pub opset_version: i64,
    pub continue_on_error: bool,
    /// No destination means convert-and-report without writing.
    pub output: Option<PathBuf>,
}

impl Options {
    pub fn new(source: Source) -> Options {
        Options {
            source,
            inputs: None,
            outputs: None,
            shape_overrides: HashMap::new(),
            large_model: false,
            custom_ops: CustomOps::default(),
            extra_opsets: vec![],
            rename_inputs: None,
            rename_outputs: None,
            targets: vec![],
            opset_version: DEFAULT_OPSET_VERSION,
            continue_on_error: false,
            output: None,
        }
    }

    /// Configuration checks that must fire before any model I/O.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.source, Source::GraphDef { .. } | Source::Checkpoint { .. }) {
            let given = |names: &Option<Vec<String>>| {
                names.as_ref().map(|n| !n.is_empty()).unwrap_or(false)
            };
            if !given(&self.inputs) || !given(&self.outputs) {
                return Err(Error::Config(
                    "graph-definition and checkpoint sources need --inputs and --outputs"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Names and destination of the converted model.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub output: Option<PathBuf>,
}

pub fn run(
    options: &Options,
    dispatch: &dyn ConversionDispatch,
    optimizer: &dyn Optimizer,
) -> Result<Summary> {
    options.validate()?;

    let mut normalized =
        options.source.load(options.inputs.as_deref(), options.outputs.as_deref())?;
    info!("inputs: {:?}", normalized.inputs);
    info!("outputs: {:?}", normalized.outputs);

    let renames = rename::build_rename_map(
        &normalized.tensors_to_rename,
        &normalized.inputs,
        &normalized.outputs,
        options.rename_inputs.as_deref(),
        options.rename_outputs.as_deref(),
    )?;

    let mut store = options.large_model.then(ExternalTensorStore::new);
    if let (Some(store), Some(graph)) = (store.as_mut(), normalized.graph.as_mut()) {
        let moved = compress::compress_graph(graph, store)?;
        info!("externalized {moved} constants");
    }

    let opsets = custom_ops::merge_opsets(
        &options.extra_opsets,
        options.custom_ops.inferred_opset.clone(),
    );
    let dispatch_options = DispatchOptions {
        custom_ops: options.custom_ops.bindings.clone(),
        opsets,
        targets: options.targets.clone(),
        opset_version: options.opset_version,
        continue_on_error: options.continue_on_error,
        shape_overrides: options.shape_overrides.clone(),
        store: store.as_ref(),
    };
    let mut model = dispatch.convert(&normalized, &dispatch_options)?;
    model.description = format!("converted from {}", options.source.locator().display());

    let model = optimizer.optimize(model);

    let final_names = |names: &[String]| {
        names.iter().map(|n| renames.get(n).unwrap_or(n).clone()).collect::<Vec<String>>()
    };
    let summary = Summary {
        inputs: final_names(&normalized.inputs),
        outputs: final_names(&normalized.outputs),
        output: options.output.clone(),
    };

    match &options.output {
        Some(dest) => package::write(&model, store.as_ref(), &renames, dest)?,
        None => info!("no output path given, skipping serialization"),
    }
    Ok(summary)
}
