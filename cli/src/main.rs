use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use structopt::StructOpt;

use modelport::custom_ops::{parse_opset_spec, CustomOpParser, CustomOps, OpsetId};
use modelport::dispatch::{DefaultDispatch, DEFAULT_OPSET_VERSION};
use modelport::loader::{split_name_and_shape, Source};
use modelport::optim::IdentityElision;
use modelport::pipeline::{self, Options};

fn main() {
    let args = CliArgs::from_args();

    let level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = args.run() {
        log::error!("{e:?}");
        std::process::exit(1)
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "modelport",
    about = "Convert computation-graph models to the portable interchange format"
)]
pub struct CliArgs {
    /// Frozen graph definition file
    #[structopt(long, alias = "input")]
    graphdef: Option<PathBuf>,
    /// Checkpoint meta-graph file
    #[structopt(long)]
    checkpoint: Option<PathBuf>,
    /// Saved-model bundle directory (or its protobuf file)
    #[structopt(long = "saved-model")]
    saved_model: Option<PathBuf>,
    /// Serialized high-level model file
    #[structopt(long)]
    keras: Option<PathBuf>,
    /// Mobile-interpreter model file, passed through by path
    #[structopt(long)]
    tflite: Option<PathBuf>,
    /// Meta-graph tag to select in a saved-model bundle
    #[structopt(long)]
    tag: Option<String>,
    /// Signature to use from a saved-model bundle
    #[structopt(long = "signature-def")]
    signature_def: Option<String>,
    /// Comma-separated input tensor names, with optional [shape] overrides
    /// (required with --graphdef and --checkpoint)
    #[structopt(long)]
    inputs: Option<String>,
    /// Comma-separated output tensor names (required with --graphdef and
    /// --checkpoint)
    #[structopt(long)]
    outputs: Option<String>,
    /// Externalize big constants and write an archive bundle, for models
    /// above the single-file size ceiling
    #[structopt(long = "large-model", alias = "large_model")]
    large_model: bool,
    /// Comma-separated custom operators, `OpName` or `OpName:domain`
    #[structopt(long = "custom-ops")]
    custom_ops: Option<String>,
    /// Extra opset as `domain:version`
    #[structopt(long = "extra-opset", alias = "extra_opset")]
    extra_opset: Option<String>,
    /// New input names, positionally matching the declared inputs
    #[structopt(long = "rename-inputs")]
    rename_inputs: Option<String>,
    /// New output names, positionally matching the declared outputs
    #[structopt(long = "rename-outputs")]
    rename_outputs: Option<String>,
    /// Comma-separated target platforms
    #[structopt(long)]
    target: Option<String>,
    /// Interchange opset version to produce
    #[structopt(long)]
    opset: Option<i64>,
    /// Keep going past unsupported operators instead of aborting
    #[structopt(long = "continue-on-error")]
    continue_on_error: bool,
    /// Output model file
    #[structopt(long)]
    output: Option<PathBuf>,
    #[structopt(short = "v", parse(from_occurrences))]
    verbosity: usize,
}

impl CliArgs {
    pub fn run(&self) -> Result<()> {
        // all parsing and validation happens before any model I/O
        let options = self.to_options()?;
        let summary = pipeline::run(&options, &DefaultDispatch, &IdentityElision)?;

        log::info!(
            "successfully converted model {}",
            options.source.locator().display()
        );
        log::info!("model inputs: {:?}", summary.inputs);
        log::info!("model outputs: {:?}", summary.outputs);
        match &summary.output {
            Some(path) if options.large_model => log::info!(
                "archived model saved at {}. Unpack it for readers without archive support.",
                path.display()
            ),
            Some(path) => log::info!("model saved at {}", path.display()),
            None => log::info!("to write the model to a file, re-run with --output"),
        }
        Ok(())
    }

    fn source(&self) -> Result<Source> {
        let mut sources = vec![];
        if let Some(path) = &self.graphdef {
            sources.push(Source::GraphDef { path: path.clone() });
        }
        if let Some(path) = &self.checkpoint {
            sources.push(Source::Checkpoint { path: path.clone() });
        }
        if let Some(path) = &self.saved_model {
            sources.push(Source::SavedModel {
                path: path.clone(),
                tag: self.tag.clone(),
                signature: self.signature_def.clone(),
            });
        }
        if let Some(path) = &self.keras {
            sources.push(Source::Keras { path: path.clone() });
        }
        if let Some(path) = &self.tflite {
            sources.push(Source::Tflite { path: path.clone() });
        }
        match sources.len() {
            0 => {
                // no source selector at all: print usage and leave non-zero
                CliArgs::clap().print_long_help()?;
                eprintln!();
                std::process::exit(1)
            }
            1 => Ok(sources.remove(0)),
            _ => bail!(
                "source selectors are mutually exclusive, pick one of \
                 --graphdef, --checkpoint, --saved-model, --keras, --tflite"
            ),
        }
    }

    fn to_options(&self) -> Result<Options> {
        let source = self.source()?;

        let mut shape_overrides = HashMap::new();
        let inputs = self
            .inputs
            .as_deref()
            .map(|spec| -> Result<Vec<String>> {
                spec.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|token| {
                        let (name, shape) = split_name_and_shape(token)?;
                        if let Some(shape) = shape {
                            shape_overrides.insert(name.clone(), shape);
                        }
                        Ok(name)
                    })
                    .collect()
            })
            .transpose()?;

        let custom_ops: CustomOps = self
            .custom_ops
            .as_deref()
            .map(|spec| CustomOpParser::default().parse(spec))
            .transpose()?
            .unwrap_or_default();

        let extra_opsets: Vec<OpsetId> =
            self.extra_opset.as_deref().map(parse_opset_spec).transpose()?.into_iter().collect();

        let mut options = Options::new(source);
        options.inputs = inputs;
        options.outputs = comma_list(&self.outputs);
        options.shape_overrides = shape_overrides;
        options.large_model = self.large_model;
        options.custom_ops = custom_ops;
        options.extra_opsets = extra_opsets;
        options.rename_inputs = comma_list(&self.rename_inputs);
        options.rename_outputs = comma_list(&self.rename_outputs);
        options.targets = comma_list(&self.target).unwrap_or_default();
        options.opset_version = self.opset.unwrap_or(DEFAULT_OPSET_VERSION);
        options.continue_on_error = self.continue_on_error;
        options.output = self.output.clone();
        options.validate()?;
        Ok(options)
    }
}

fn comma_list(spec: &Option<String>) -> Option<Vec<String>> {
    spec.as_ref().map(|s| {
        s.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn underscore_flag_spellings_are_accepted() {
        let args = CliArgs::from_iter_safe([
            "modelport",
            "--graphdef",
            "frozen.pb",
            "--inputs",
            "X:0",
            "--outputs",
            "Y:0",
            "--large_model",
            "--extra_opset",
            "com.acme:2",
        ])
        .unwrap();
        assert!(args.large_model);
        assert_eq!(args.extra_opset.as_deref(), Some("com.acme:2"));

        let options = args.to_options().unwrap();
        assert!(options.large_model);
        assert_eq!(options.extra_opsets, [OpsetId::new("com.acme", 2)]);
    }
}
