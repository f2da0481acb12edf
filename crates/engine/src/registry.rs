//! The node type registry: maps `NodeSpec::node_type` strings to factories
//! that build boxed `nodes::Node` instances.

use std::collections::HashMap;
use std::sync::Arc;

use nodes::Node;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("node type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Builds a fresh `Node` instance for one `NodeSpec`. Factories are called
/// once per compiled node, not once per execution, so a node type that
/// carries per-instance state (e.g. a parsed regex) only pays that cost at
/// compile time.
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn Node> + Send + Sync>;

/// Registered node types available to the compiler.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type under `node_type`. Returns an error if the name
    /// is already taken.
    pub fn register(
        &mut self,
        node_type: impl Into<String>,
        factory: impl Fn() -> Box<dyn Node> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let node_type = node_type.into();
        if self.factories.contains_key(&node_type) {
            return Err(RegistryError::AlreadyRegistered(node_type));
        }
        self.factories.insert(node_type, Arc::new(factory));
        Ok(())
    }

    /// Instantiate a fresh node for `node_type`.
    pub fn build(&self, node_type: &str) -> Result<Box<dyn Node>, RegistryError> {
        self.factories
            .get(node_type)
            .map(|f| f())
            .ok_or_else(|| RegistryError::UnknownNodeType(node_type.to_string()))
    }

    /// Whether `node_type` is registered, used by the validator's
    /// node-reference phase without paying for an instantiation.
    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// All registered type names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodes::mock::MockNode;
    use serde_json::json;

    fn make_mock() -> Box<dyn Node> {
        Box::new(MockNode::returning("mock", json!({})))
    }

    #[test]
    fn register_and_build_round_trips() {
        let mut registry = NodeRegistry::new();
        registry.register("mock", make_mock).unwrap();
        assert!(registry.contains("mock"));
        assert!(registry.build("mock").is_ok());
        assert!(matches!(
            registry.build("ghost"),
            Err(RegistryError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register("mock", make_mock).unwrap();
        let err = registry.register("mock", make_mock).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }
}
