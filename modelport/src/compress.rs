//! Large-model path: moves big constant payloads out of the graph structure
//! into an [`ExternalTensorStore`], leaving only dtype/shape metadata behind.
//! The record key is the node name, so the rewrite is exactly reversible.

use log::debug;

use crate::error::{Error, Result};
use crate::store::{ConstantRecord, ExternalTensorStore};
use crate::tfpb::{attr_value, GraphDef, NodeDef, TensorProto};

/// Constants at or below this payload size stay embedded: a store entry would
/// cost more than it saves.
pub const EXTERNAL_TENSOR_THRESHOLD: usize = 1024;

const CONST_OPS: [&str; 2] = ["Const", "HostConst"];

/// Single pass over the graph. Returns the number of constants externalized.
pub fn compress_graph(graph: &mut GraphDef, store: &mut ExternalTensorStore) -> Result<usize> {
    let mut moved = 0;
    for node in &mut graph.node {
        if !CONST_OPS.contains(&node.op.as_str()) {
            continue;
        }
        let name = node.name.clone();
        let Some(tensor) = const_tensor_mut(node) else { continue };
        if tensor.tensor_content.len() <= EXTERNAL_TENSOR_THRESHOLD {
            continue;
        }
        debug!("externalizing constant `{}' ({} bytes)", name, tensor.tensor_content.len());
        store.insert(ConstantRecord {
            key: name,
            dtype: tensor.dtype,
            shape: tensor.dims(),
            payload: std::mem::take(&mut tensor.tensor_content),
        })?;
        moved += 1;
    }
    Ok(moved)
}

/// Reverses [`compress_graph`]: re-embeds every record into its node.
pub fn inline_graph(graph: &mut GraphDef, store: &ExternalTensorStore) -> Result<()> {
    for node in &mut graph.node {
        let Some(record) = store.get(&node.name) else { continue };
        let payload = record.payload.clone();
        let name = node.name.clone();
        let tensor = const_tensor_mut(node).ok_or_else(|| {
            Error::Malformed(format!("node `{}' has an external record but no tensor value", name))
        })?;
        tensor.tensor_content = payload;
    }
    Ok(())
}

fn const_tensor_mut(node: &mut NodeDef) -> Option<&mut TensorProto> {
    match node.attr.get_mut("value")?.value.as_mut()? {
        attr_value::Value::Tensor(t) => Some(t),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tfpb::AttrValue;
    use proptest::prelude::*;

    fn const_node(name: &str, payload: Vec<u8>) -> NodeDef {
        let mut node = NodeDef { name: name.to_string(), op: "Const".to_string(), ..NodeDef::default() };
        let tensor = TensorProto { dtype: 1, tensor_content: payload, ..TensorProto::default() };
        node.attr.insert(
            "value".to_string(),
            AttrValue { value: Some(attr_value::Value::Tensor(tensor)) },
        );
        node
    }

    #[test]
    fn small_constants_stay_embedded() {
        let mut graph = GraphDef { node: vec![const_node("w", vec![1; 16])] };
        let mut store = ExternalTensorStore::new();
        assert_eq!(compress_graph(&mut graph, &mut store).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn big_constants_move_to_the_store() {
        let mut graph = GraphDef {
            node: vec![const_node("w", vec![7; 4096]), const_node("b", vec![1; 4])],
        };
        let mut store = ExternalTensorStore::new();
        assert_eq!(compress_graph(&mut graph, &mut store).unwrap(), 1);
        let record = store.get("w").unwrap();
        assert_eq!(record.payload, vec![7; 4096]);
        let tensor = const_tensor_mut(&mut graph.node[0]).unwrap();
        assert!(tensor.tensor_content.is_empty());
    }

    #[test]
    fn non_constant_nodes_are_untouched() {
        let mut node = NodeDef { name: "x".into(), op: "Placeholder".into(), ..NodeDef::default() };
        node.attr.insert(
            "value".to_string(),
            AttrValue {
                value: Some(attr_value::Value::Tensor(TensorProto {
                    tensor_content: vec![0; 4096],
                    ..TensorProto::default()
                })),
            },
        );
        let mut graph = GraphDef { node: vec![node] };
        let mut store = ExternalTensorStore::new();
        assert_eq!(compress_graph(&mut graph, &mut store).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn compress_then_inline_is_identity(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..4096), 1..8)
        ) {
            let mut graph = GraphDef::default();
            for (ix, payload) in payloads.into_iter().enumerate() {
                graph.node.push(const_node(&format!("const_{ix}"), payload));
            }
            let original = graph.clone();

            let mut store = ExternalTensorStore::new();
            compress_graph(&mut graph, &mut store).unwrap();
            for node in &mut graph.node {
                let embedded = const_tensor_mut(node).unwrap().tensor_content.len();
                prop_assert!(embedded <= EXTERNAL_TENSOR_THRESHOLD);
            }

            inline_graph(&mut graph, &store).unwrap();
            prop_assert_eq!(graph, original);
        }
    }
}
