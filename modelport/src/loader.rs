//! Source loader: one tagged source kind in, one [`NormalizedModel`] out.
//!
//! Graph-definition and checkpoint sources need caller-supplied input/output
//! names. Saved-model and high-level-model sources discover them from
//! signature metadata and report internal-to-declared renames. The
//! mobile-interpreter source produces no graph at all and travels by path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info};
use prost::Message;

use crate::error::{Error, Result};
use crate::model::{NormalizedModel, TableInit};
use crate::tfpb::{
    attr_value, GraphDef, MetaGraphDef, NodeDef, SavedModel, SignatureDef, TensorProto,
};

pub const DEFAULT_SAVED_MODEL_TAG: &str = "serve";
pub const DEFAULT_SIGNATURE: &str = "serving_default";
const SAVED_MODEL_FILENAME: &str = "saved_model.pb";
const INTERPRETER_MAGIC: &[u8] = b"TFL3";

#[derive(Clone, Debug)]
pub enum Source {
    GraphDef { path: PathBuf },
    Checkpoint { path: PathBuf },
    SavedModel { path: PathBuf, tag: Option<String>, signature: Option<String> },
    Keras { path: PathBuf },
    Tflite { path: PathBuf },
}

impl Source {
    pub fn locator(&self) -> &Path {
        match self {
            Source::GraphDef { path }
            | Source::Checkpoint { path }
            | Source::SavedModel { path, .. }
            | Source::Keras { path }
            | Source::Tflite { path } => path,
        }
    }

    /// Caller-supplied inputs/outputs are mandatory for graph-definition and
    /// checkpoint sources, and override signature discovery elsewhere.
    pub fn load(
        &self,
        inputs: Option<&[String]>,
        outputs: Option<&[String]>,
    ) -> Result<NormalizedModel> {
        match self {
            Source::GraphDef { path } => {
                let (inputs, outputs) = required_io(inputs, outputs, "graph-definition")?;
                let graph = GraphDef::decode(&*read_source(path)?)?;
                Ok(NormalizedModel::from_graph(graph, inputs, outputs))
            }
            Source::Checkpoint { path } => {
                let (inputs, outputs) = required_io(inputs, outputs, "checkpoint")?;
                let meta = MetaGraphDef::decode(&*read_source(path)?)?;
                let graph = meta.graph_def.ok_or_else(|| {
                    Error::Malformed(format!("checkpoint {} carries no graph", path.display()))
                })?;
                Ok(NormalizedModel::from_graph(graph, inputs, outputs))
            }
            Source::SavedModel { path, tag, signature } => {
                let pb_path =
                    if path.is_dir() { path.join(SAVED_MODEL_FILENAME) } else { path.clone() };
                let bundle = SavedModel::decode(&*read_source(&pb_path)?)?;
                let meta = select_meta_graph(&bundle, tag.as_deref(), path)?;
                from_meta_graph(meta, path, signature.as_deref(), inputs, outputs)
            }
            Source::Keras { path } => {
                let meta = MetaGraphDef::decode(&*read_source(path)?)?;
                from_meta_graph(&meta, path, None, inputs, outputs)
            }
            Source::Tflite { path } => {
                let header = read_source(path)?;
                if header.len() < 8 || &header[4..8] != INTERPRETER_MAGIC {
                    return Err(Error::Malformed(format!(
                        "{} does not look like an interpreter-format model",
                        path.display()
                    )));
                }
                Ok(NormalizedModel {
                    interpreter_path: Some(path.clone()),
                    ..NormalizedModel::default()
                })
            }
        }
    }
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::SourceNotFound { locator: path.to_path_buf() });
    }
    Ok(fs::read(path)?)
}

fn required_io(
    inputs: Option<&[String]>,
    outputs: Option<&[String]>,
    kind: &str,
) -> Result<(Vec<String>, Vec<String>)> {
    match (inputs, outputs) {
        (Some(i), Some(o)) if !i.is_empty() && !o.is_empty() => Ok((i.to_vec(), o.to_vec())),
        _ => Err(Error::Config(format!(
            "{kind} sources need explicit input and output tensor names"
        ))),
    }
}

fn select_meta_graph<'m>(
    bundle: &'m SavedModel,
    tag: Option<&str>,
    path: &Path,
) -> Result<&'m MetaGraphDef> {
    if bundle.meta_graphs.is_empty() {
        return Err(Error::Malformed(format!(
            "saved model {} contains no meta graph",
            path.display()
        )));
    }
    if bundle.meta_graphs.len() == 1 && tag.is_none() {
        return Ok(&bundle.meta_graphs[0]);
    }
    let tag = tag.unwrap_or(DEFAULT_SAVED_MODEL_TAG);
    bundle
        .meta_graphs
        .iter()
        .find(|mg| {
            mg.meta_info_def
                .as_ref()
                .map(|info| info.tags.iter().any(|t| t == tag))
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            Error::Malformed(format!("no meta graph tagged `{tag}' in {}", path.display()))
        })
}

fn from_meta_graph(
    meta: &MetaGraphDef,
    path: &Path,
    signature: Option<&str>,
    inputs: Option<&[String]>,
    outputs: Option<&[String]>,
) -> Result<NormalizedModel> {
    let graph = meta.graph_def.clone().ok_or_else(|| {
        Error::Malformed(format!("model {} carries no graph", path.display()))
    })?;
    let sig = select_signature(meta, signature, path)?;

    let (sig_inputs, mut renames) = signature_tensors(&sig.inputs);
    let (sig_outputs, output_renames) = signature_tensors(&sig.outputs);
    renames.extend(output_renames);

    let inputs = inputs.map(|i| i.to_vec()).unwrap_or(sig_inputs);
    let outputs = outputs.map(|o| o.to_vec()).unwrap_or(sig_outputs);
    // rename keys must be actual model inputs/outputs
    renames.retain(|old, _| inputs.contains(old) || outputs.contains(old));
    debug!("signature renames: {renames:?}");

    let initialized_tables = extract_initialized_tables(&graph);
    if let Some(tables) = &initialized_tables {
        info!("found {} initialized lookup tables", tables.len());
    }

    Ok(NormalizedModel {
        graph: Some(graph),
        inputs,
        outputs,
        initialized_tables,
        tensors_to_rename: renames,
        interpreter_path: None,
    })
}

fn select_signature<'m>(
    meta: &'m MetaGraphDef,
    name: Option<&str>,
    path: &Path,
) -> Result<&'m SignatureDef> {
    if let Some(name) = name {
        return meta.signature_def.get(name).ok_or_else(|| Error::SignatureNotFound {
            path: path.to_path_buf(),
            name: name.to_string(),
        });
    }
    let candidates: Vec<&String> = meta.signature_def.keys().sorted().collect();
    match candidates.as_slice() {
        [] => Err(Error::Malformed(format!(
            "saved model {} declares no signature",
            path.display()
        ))),
        [only] => Ok(&meta.signature_def[*only]),
        _ => meta.signature_def.get(DEFAULT_SIGNATURE).ok_or_else(|| {
            Error::AmbiguousSignature {
                path: path.to_path_buf(),
                candidates: candidates.into_iter().cloned().collect(),
            }
        }),
    }
}

/// Internal tensor names in declared-name order, plus internal-to-declared
/// renames.
fn signature_tensors(
    entries: &HashMap<String, crate::tfpb::TensorInfo>,
) -> (Vec<String>, HashMap<String, String>) {
    let mut names = vec![];
    let mut renames = HashMap::new();
    for (declared, info) in entries.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        if info.name.is_empty() {
            continue;
        }
        names.push(info.name.clone());
        renames.insert(info.name.clone(), declared.clone());
    }
    (names, renames)
}

/// Pairs every `LookupTableImportV2` node with its `HashTableV2` handle and
/// the constant key/value tensors it imports.
fn extract_initialized_tables(graph: &GraphDef) -> Option<HashMap<String, TableInit>> {
    let by_name: HashMap<&str, &NodeDef> =
        graph.node.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut tables = HashMap::new();
    for node in graph.node.iter().filter(|n| n.op == "LookupTableImportV2") {
        if node.input.len() != 3 {
            continue;
        }
        let Some(handle) = by_name.get(strip_port(&node.input[0])) else { continue };
        if handle.op != "HashTableV2" {
            continue;
        }
        let name = string_attr(handle, "shared_name").unwrap_or_else(|| handle.name.clone());
        let keys = by_name.get(strip_port(&node.input[1])).and_then(|n| const_value(n));
        let values = by_name.get(strip_port(&node.input[2])).and_then(|n| const_value(n));
        if let (Some(keys), Some(values)) = (keys, values) {
            tables.insert(name, TableInit { keys, values });
        }
    }
    (!tables.is_empty()).then_some(tables)
}

fn strip_port(input: &str) -> &str {
    let input = input.strip_prefix('^').unwrap_or(input);
    input.split(':').next().unwrap_or(input)
}

fn string_attr(node: &NodeDef, key: &str) -> Option<String> {
    match node.attr.get(key)?.value.as_ref()? {
        attr_value::Value::S(bytes) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}

fn const_value(node: &NodeDef) -> Option<TensorProto> {
    if node.op != "Const" {
        return None;
    }
    match node.attr.get("value")?.value.as_ref()? {
        attr_value::Value::Tensor(t) => Some(t.clone()),
        _ => None,
    }
}

/// Splits an input token like `x:0[1,28,28]` into the tensor name and its
/// optional shape override.
pub fn split_name_and_shape(token: &str) -> Result<(String, Option<Vec<i64>>)> {
    let Some(open) = token.find('[') else { return Ok((token.to_string(), None)) };
    if !token.ends_with(']') {
        return Err(Error::Config(format!("bad shape override in input `{token}'")));
    }
    let name = token[..open].to_string();
    let dims = token[open + 1..token.len() - 1]
        .split(',')
        .filter(|d| !d.trim().is_empty())
        .map(|d| {
            d.trim()
                .parse::<i64>()
                .map_err(|_| Error::Config(format!("bad shape override in input `{token}'")))
        })
        .collect::<Result<Vec<i64>>>()?;
    Ok((name, Some(dims)))
}
