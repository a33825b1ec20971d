//! Boundary to the graph-conversion engine. The pipeline only depends on the
//! [`ConversionDispatch`] trait; [`DefaultDispatch`] is a reference
//! implementation with a deliberately small operator table, enough to exercise
//! the pipeline end to end.

use std::collections::HashMap;

use log::{debug, warn};

use crate::custom_ops::{OperatorBinding, OpsetId};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeGraph, ExchangeModel, ExchangeNode, Initializer, TensorData};
use crate::model::NormalizedModel;
use crate::store::ExternalTensorStore;
use crate::tfpb::{attr_value, NodeDef};

/// Interchange opset version produced when the caller does not pick one.
pub const DEFAULT_OPSET_VERSION: i64 = 13;

/// Side inputs to the conversion engine.
pub struct DispatchOptions<'a> {
    pub custom_ops: HashMap<String, OperatorBinding>,
    pub opsets: Vec<OpsetId>,
    pub targets: Vec<String>,
    pub opset_version: i64,
    /// Keep going past unsupported operators instead of aborting.
    pub continue_on_error: bool,
    pub shape_overrides: HashMap<String, Vec<i64>>,
    /// Extracted-constant table from the graph compressor, when large-model
    /// mode is active. Constants found here become external references.
    pub store: Option<&'a ExternalTensorStore>,
}

impl<'a> Default for DispatchOptions<'a> {
    fn default() -> DispatchOptions<'a> {
        DispatchOptions {
            custom_ops: HashMap::new(),
            opsets: vec![],
            targets: vec![],
            opset_version: DEFAULT_OPSET_VERSION,
            continue_on_error: false,
            shape_overrides: HashMap::new(),
            store: None,
        }
    }
}

pub trait ConversionDispatch {
    fn convert(&self, model: &NormalizedModel, options: &DispatchOptions) -> Result<ExchangeModel>;
}

pub struct DefaultDispatch;

const BUILTIN_OPS: &[&str] = &[
    "Add", "AddV2", "BiasAdd", "Concat", "ConcatV2", "Identity", "MatMul", "Maximum", "Mean",
    "Mul", "Pad", "Relu", "Relu6", "Reshape", "Sigmoid", "Softmax", "Squeeze", "Sub", "Tanh",
    "Transpose",
];

impl ConversionDispatch for DefaultDispatch {
    fn convert(&self, model: &NormalizedModel, options: &DispatchOptions) -> Result<ExchangeModel> {
        if let Some(path) = &model.interpreter_path {
            return Err(Error::Conversion {
                node: path.display().to_string(),
                op: "interpreter-format model".to_string(),
            });
        }
        let graph = model.graph.as_ref().ok_or_else(|| {
            Error::Malformed("normalized model carries neither a graph nor an interpreter path".to_string())
        })?;
        if !options.shape_overrides.is_empty() {
            debug!("shape overrides: {:?}", options.shape_overrides);
        }
        if !options.targets.is_empty() {
            debug!("targets: {:?}", options.targets);
        }
        if let Some(tables) = &model.initialized_tables {
            debug!("{} initialized lookup tables available", tables.len());
        }

        let mut nodes = vec![];
        let mut initializers = vec![];
        for node in &graph.node {
            match node.op.as_str() {
                "Placeholder" | "PlaceholderV2" | "PlaceholderWithDefault" | "NoOp" => continue,
                "Const" | "HostConst" => initializers.push(initializer_for(node, options.store)?),
                op => {
                    if let Some(binding) = options.custom_ops.get(op) {
                        let mut converted = exchange_node(node);
                        (binding.handler)(&mut converted);
                        nodes.push(converted);
                    } else if BUILTIN_OPS.contains(&op) {
                        nodes.push(exchange_node(node));
                    } else if options.continue_on_error {
                        warn!("no conversion for operator `{}' (node `{}'), skipping", op, node.name);
                    } else {
                        return Err(Error::Conversion {
                            node: node.name.clone(),
                            op: op.to_string(),
                        });
                    }
                }
            }
        }

        Ok(ExchangeModel {
            producer: format!("modelport {}", env!("CARGO_PKG_VERSION")),
            description: String::new(),
            opset_version: options.opset_version,
            opsets: options.opsets.clone(),
            graph: ExchangeGraph {
                name: "graph".to_string(),
                inputs: model.inputs.clone(),
                outputs: model.outputs.clone(),
                nodes,
                initializers,
            },
        })
    }
}

fn initializer_for(node: &NodeDef, store: Option<&ExternalTensorStore>) -> Result<Initializer> {
    let tensor = node
        .attr
        .get("value")
        .and_then(|attr| match attr.value.as_ref()? {
            attr_value::Value::Tensor(t) => Some(t),
            _ => None,
        })
        .ok_or_else(|| {
            Error::Malformed(format!("constant node `{}' has no tensor value", node.name))
        })?;
    let data = if store.map(|s| s.contains(&node.name)).unwrap_or(false) {
        TensorData::External { key: node.name.clone() }
    } else {
        TensorData::Inline(tensor.tensor_content.clone())
    };
    Ok(Initializer {
        name: format!("{}:0", node.name),
        dtype: tensor.dtype,
        shape: tensor.dims(),
        data,
    })
}

fn exchange_node(node: &NodeDef) -> ExchangeNode {
    // control dependencies ("^node") have no tensor value and are dropped
    let inputs =
        node.input.iter().filter(|i| !i.starts_with('^')).map(|i| tensor_name(i)).collect();
    ExchangeNode {
        name: node.name.clone(),
        op: node.op.clone(),
        domain: String::new(),
        inputs,
        outputs: vec![format!("{}:0", node.name)],
    }
}

/// "node" and "node:0" refer to the same tensor.
fn tensor_name(input: &str) -> String {
    if input.contains(':') {
        input.to_string()
    } else {
        format!("{input}:0")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::custom_ops::CustomOpParser;
    use crate::tfpb::{AttrValue, GraphDef, TensorProto};

    fn node(name: &str, op: &str, inputs: &[&str]) -> NodeDef {
        NodeDef {
            name: name.to_string(),
            op: op.to_string(),
            input: inputs.iter().map(|i| i.to_string()).collect(),
            ..NodeDef::default()
        }
    }

    fn const_node(name: &str, payload: Vec<u8>) -> NodeDef {
        let mut n = node(name, "Const", &[]);
        n.attr.insert(
            "value".to_string(),
            AttrValue {
                value: Some(attr_value::Value::Tensor(TensorProto {
                    dtype: 1,
                    tensor_content: payload,
                    ..TensorProto::default()
                })),
            },
        );
        n
    }

    fn normalized(nodes: Vec<NodeDef>) -> NormalizedModel {
        NormalizedModel::from_graph(
            GraphDef { node: nodes },
            vec!["x:0".to_string()],
            vec!["y:0".to_string()],
        )
    }

    #[test]
    fn maps_nodes_and_constants() {
        let model = normalized(vec![
            node("x", "Placeholder", &[]),
            const_node("w", vec![1, 2, 3, 4]),
            node("y", "MatMul", &["x", "w"]),
        ]);
        let converted = DefaultDispatch.convert(&model, &DispatchOptions::default()).unwrap();
        assert_eq!(converted.graph.nodes.len(), 1);
        assert_eq!(converted.graph.nodes[0].inputs, ["x:0", "w:0"]);
        assert_eq!(converted.graph.initializers.len(), 1);
        assert_eq!(converted.graph.initializers[0].data, TensorData::Inline(vec![1, 2, 3, 4]));
    }

    #[test]
    fn unsupported_operator_is_fatal_by_default() {
        let model = normalized(vec![node("y", "FancyOp", &[])]);
        let err = DefaultDispatch.convert(&model, &DispatchOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Conversion { node, op } if node == "y" && op == "FancyOp"));
    }

    #[test]
    fn continue_on_error_skips_the_node() {
        let model = normalized(vec![node("y", "FancyOp", &[]), node("z", "Relu", &["y"])]);
        let options = DispatchOptions { continue_on_error: true, ..DispatchOptions::default() };
        let converted = DefaultDispatch.convert(&model, &options).unwrap();
        let ops: Vec<&str> = converted.graph.nodes.iter().map(|n| n.op.as_str()).collect();
        assert_eq!(ops, ["Relu"]);
    }

    #[test]
    fn custom_binding_stamps_the_domain() {
        let custom = CustomOpParser::default().parse("FancyOp:com.acme").unwrap();
        let model = normalized(vec![node("y", "FancyOp", &[])]);
        let options = DispatchOptions { custom_ops: custom.bindings, ..DispatchOptions::default() };
        let converted = DefaultDispatch.convert(&model, &options).unwrap();
        assert_eq!(converted.graph.nodes[0].domain, "com.acme");
    }

    #[test]
    fn externalized_constants_become_references() {
        let mut store = ExternalTensorStore::new();
        store
            .insert(crate::store::ConstantRecord {
                key: "w".to_string(),
                dtype: 1,
                shape: vec![],
                payload: vec![0; 2048],
            })
            .unwrap();
        let model = normalized(vec![const_node("w", vec![])]);
        let options = DispatchOptions { store: Some(&store), ..DispatchOptions::default() };
        let converted = DefaultDispatch.convert(&model, &options).unwrap();
        assert_eq!(
            converted.graph.initializers[0].data,
            TensorData::External { key: "w".to_string() }
        );
    }

    #[test]
    fn interpreter_models_need_an_interpreter_aware_dispatcher() {
        let model = NormalizedModel {
            interpreter_path: Some("model.tflite".into()),
            ..NormalizedModel::default()
        };
        assert!(DefaultDispatch.convert(&model, &DispatchOptions::default()).is_err());
    }
}
