//! Compiler — turns validated IR into an executable, wrapped graph.

use std::collections::{BTreeMap, HashMap};

use nodes::Node;

use crate::dag::Graph;
use crate::error::EngineError;
use crate::models::{InputSpec, WorkflowIr};
use crate::registry::NodeRegistry;
use crate::template::TemplateString;
use crate::validate::validate_ir;
use crate::wrapper;

/// One compiled, wrapped node plus its routing table.
pub struct CompiledNode {
    pub id: String,
    pub node: Box<dyn Node>,
    /// `action -> target node id`.
    pub successors: HashMap<String, String>,
    /// Direct predecessor node ids (§4.C static template validation,
    /// §4.G cancellation bookkeeping).
    pub predecessors: std::collections::HashSet<String>,
    pub max_visits: u32,
}

/// The compiled, executable form of a `WorkflowIr`.
pub struct CompiledGraph {
    pub nodes: HashMap<String, CompiledNode>,
    pub start_node: String,
    /// `output name -> parsed template`, evaluated against the final store
    /// on successful completion.
    pub outputs: HashMap<String, TemplateString>,
    /// Declared input specs, carried forward so the executor can default
    /// and coerce a run's live inputs without needing the original IR.
    pub inputs: BTreeMap<String, InputSpec>,
}

impl CompiledGraph {
    pub fn get(&self, node_id: &str) -> Option<&CompiledNode> {
        self.nodes.get(node_id)
    }
}

pub struct Compiler;

impl Compiler {
    /// Validate and compile `ir` against `registry`. Runs the full
    /// validator first; any `Error`-severity diagnostic aborts compilation
    /// with `EngineError::ValidationError`.
    pub fn compile(ir: &WorkflowIr, registry: &NodeRegistry) -> Result<CompiledGraph, EngineError> {
        let report = validate_ir(ir, registry);
        if !report.is_ok() {
            return Err(EngineError::ValidationError(report));
        }

        let start_node = ir
            .effective_start_node()
            .ok_or(EngineError::MissingStartNode)?
            .to_string();

        let graph = Graph::build(&ir.nodes, &ir.edges);

        let mut nodes = HashMap::new();
        for spec in &ir.nodes {
            let instance = registry
                .build(&spec.node_type)
                .map_err(|_| EngineError::UnknownNodeType(spec.node_type.clone()))?;
            let max_visits = instance.interface().max_visits;
            let wrapped = wrapper::wrap(instance, &spec.id, spec.params.clone());

            let mut successors = HashMap::new();
            for edge in ir.edges.iter().filter(|e| e.from == spec.id) {
                if let Some(existing) = successors.get(&edge.action) {
                    if existing != &edge.to {
                        return Err(EngineError::AmbiguousRouting {
                            node_id: spec.id.clone(),
                            action: edge.action.clone(),
                        });
                    }
                } else {
                    successors.insert(edge.action.clone(), edge.to.clone());
                }
            }

            nodes.insert(
                spec.id.clone(),
                CompiledNode {
                    id: spec.id.clone(),
                    node: wrapped,
                    successors,
                    predecessors: graph.direct_predecessors(&spec.id),
                    max_visits,
                },
            );
        }

        let mut outputs = HashMap::new();
        for (name, raw) in &ir.outputs {
            let parsed = TemplateString::parse(raw).map_err(|e| EngineError::UnresolvedTemplate(e.to_string()))?;
            outputs.insert(name.clone(), parsed);
        }

        Ok(CompiledGraph { nodes, start_node, outputs, inputs: ir.inputs.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeSpec, NodeSpec};
    use nodes::mock::MockNode;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> NodeRegistry {
        let mut r = NodeRegistry::new();
        r.register("mock", || Box::new(MockNode::returning("mock", json!({}))) as Box<dyn Node>)
            .unwrap();
        r
    }

    fn ir() -> WorkflowIr {
        WorkflowIr {
            ir_version: "0.2".to_string(),
            id: None,
            name: None,
            trigger: None,
            inputs: BTreeMap::new(),
            nodes: vec![
                NodeSpec { id: "a".into(), node_type: "mock".into(), params: serde_json::Map::new() },
                NodeSpec { id: "b".into(), node_type: "mock".into(), params: serde_json::Map::new() },
            ],
            edges: vec![EdgeSpec { from: "a".into(), to: "b".into(), action: "default".into() }],
            start_node: Some("a".into()),
            outputs: BTreeMap::new(),
        }
    }

    #[test]
    fn compiles_valid_ir() {
        let compiled = Compiler::compile(&ir(), &registry()).unwrap();
        assert_eq!(compiled.start_node, "a");
        assert_eq!(compiled.nodes["a"].successors.get("default"), Some(&"b".to_string()));
        assert!(compiled.nodes["b"].predecessors.contains("a"));
    }

    #[test]
    fn ambiguous_routing_is_rejected() {
        let mut workflow = ir();
        workflow.nodes.push(NodeSpec { id: "c".into(), node_type: "mock".into(), params: serde_json::Map::new() });
        workflow.edges.push(EdgeSpec { from: "a".into(), to: "c".into(), action: "default".into() });
        let err = Compiler::compile(&workflow, &registry()).unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }
}
