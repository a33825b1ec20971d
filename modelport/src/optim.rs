//! Boundary to the interchange graph optimizer: a total function from model to
//! model. [`IdentityElision`] is the reference pass.

use std::collections::HashMap;

use crate::exchange::ExchangeModel;

pub trait Optimizer {
    fn optimize(&self, model: ExchangeModel) -> ExchangeModel;
}

/// Leaves the model untouched.
pub struct NullOptimizer;

impl Optimizer for NullOptimizer {
    fn optimize(&self, model: ExchangeModel) -> ExchangeModel {
        model
    }
}

/// Removes standard-domain Identity nodes, rewiring consumers to the identity
/// input. Identities feeding a graph output are kept so output names survive.
pub struct IdentityElision;

impl Optimizer for IdentityElision {
    fn optimize(&self, mut model: ExchangeModel) -> ExchangeModel {
        let mut rewires: HashMap<String, String> = HashMap::new();
        let outputs = &model.graph.outputs;
        model.graph.nodes.retain(|node| {
            if node.op == "Identity"
                && node.domain.is_empty()
                && node.inputs.len() == 1
                && node.outputs.len() == 1
                && !outputs.contains(&node.outputs[0])
            {
                rewires.insert(node.outputs[0].clone(), node.inputs[0].clone());
                false
            } else {
                true
            }
        });
        for node in &mut model.graph.nodes {
            for input in &mut node.inputs {
                *input = resolve(&rewires, input);
            }
        }
        model
    }
}

// elided identities may chain
fn resolve(rewires: &HashMap<String, String>, name: &str) -> String {
    let mut current = name;
    while let Some(next) = rewires.get(current) {
        current = next;
    }
    current.to_string()
}
