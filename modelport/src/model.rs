use std::collections::HashMap;
use std::path::PathBuf;

use crate::tfpb::{GraphDef, TensorProto};

/// Lookup table initializer: parallel key and value tensors.
#[derive(Clone, Debug, PartialEq)]
pub struct TableInit {
    pub keys: TensorProto,
    pub values: TensorProto,
}

/// Canonical in-memory form every source kind is normalized to.
///
/// Exactly one of `graph` and `interpreter_path` is present: interpreter-format
/// models carry no graph structure through this layer and travel by path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedModel {
    pub graph: Option<GraphDef>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub initialized_tables: Option<HashMap<String, TableInit>>,
    /// Internal tensor name to the name declared by the source's signature.
    pub tensors_to_rename: HashMap<String, String>,
    pub interpreter_path: Option<PathBuf>,
}

impl NormalizedModel {
    pub fn from_graph(graph: GraphDef, inputs: Vec<String>, outputs: Vec<String>) -> NormalizedModel {
        NormalizedModel { graph: Some(graph), inputs, outputs, ..NormalizedModel::default() }
    }

    pub fn is_interpreter(&self) -> bool {
        self.interpreter_path.is_some()
    }
}
