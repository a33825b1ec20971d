//! The interchange object model produced by conversion dispatch and consumed
//! by the packager.

use std::collections::HashMap;

use crate::custom_ops::OpsetId;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeModel {
    pub producer: String,
    pub description: String,
    pub opset_version: i64,
    pub opsets: Vec<OpsetId>,
    pub graph: ExchangeGraph,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeGraph {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub nodes: Vec<ExchangeNode>,
    pub initializers: Vec<Initializer>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeNode {
    pub name: String,
    pub op: String,
    /// Empty for standard operators.
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Payload of an initializer: embedded bytes, or a key into the co-located
/// external tensor store.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Inline(Vec<u8>),
    External { key: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Initializer {
    pub name: String,
    pub dtype: i32,
    pub shape: Vec<i64>,
    pub data: TensorData,
}

/// Applies a rename map to every tensor name in the model. Old names are
/// replaced wherever they appear; names not in the map are left alone, so
/// re-applying the map is a no-op.
pub fn apply_renames(model: &mut ExchangeModel, renames: &HashMap<String, String>) {
    if renames.is_empty() {
        return;
    }
    let fix = |name: &mut String| {
        if let Some(new) = renames.get(name) {
            *name = new.clone();
        }
    };
    model.graph.inputs.iter_mut().for_each(fix);
    model.graph.outputs.iter_mut().for_each(fix);
    for node in &mut model.graph.nodes {
        node.inputs.iter_mut().for_each(fix);
        node.outputs.iter_mut().for_each(fix);
    }
    for initializer in &mut model.graph.initializers {
        fix(&mut initializer.name);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renaming_twice_is_a_no_op() {
        let mut model = ExchangeModel {
            graph: ExchangeGraph {
                inputs: vec!["x:0".to_string()],
                outputs: vec!["y:0".to_string()],
                nodes: vec![ExchangeNode {
                    name: "y".to_string(),
                    op: "Relu".to_string(),
                    inputs: vec!["x:0".to_string()],
                    outputs: vec!["y:0".to_string()],
                    ..ExchangeNode::default()
                }],
                ..ExchangeGraph::default()
            },
            ..ExchangeModel::default()
        };
        let renames: HashMap<String, String> =
            [("x:0".to_string(), "input".to_string()), ("y:0".to_string(), "output".to_string())]
                .into();
        apply_renames(&mut model, &renames);
        let once = model.clone();
        apply_renames(&mut model, &renames);
        assert_eq!(model, once);
        assert_eq!(model.graph.inputs, ["input"]);
        assert_eq!(model.graph.nodes[0].outputs, ["output"]);
    }
}
