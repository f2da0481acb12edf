//! The IR validator — eight phases, diagnostics aggregated across all of
//! them rather than stopping at the first error.

use std::collections::HashSet;

use serde_json::Value;

use crate::coerce::coerce;
use crate::dag::Graph;
use crate::models::WorkflowIr;
use crate::registry::NodeRegistry;
use crate::template::TemplateString;

/// Severity of a single diagnostic. Only `Error` blocks compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warn,
    Info,
}

/// One validator finding.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Short machine-stable code, e.g. `"unknown-node-type"`.
    pub code: String,
    /// Dotted path into the IR document this diagnostic concerns.
    pub path: String,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    fn error(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            path: path.into(),
            message: message.into(),
            hint: None,
        }
    }

    fn warn(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            code: code.to_string(),
            path: path.into(),
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Aggregated result of `validate_ir`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
}

/// Implemented by anything that may echo a sensitive input's value back to
/// a caller (diagnostics, trace events). `redact` replaces every occurrence
/// of a sensitive value's string form with a fixed placeholder.
pub trait Redactable {
    fn redact(self, sensitive_values: &[String]) -> Self;
}

impl Redactable for Diagnostic {
    fn redact(mut self, sensitive_values: &[String]) -> Self {
        for value in sensitive_values.iter().filter(|v| !v.is_empty()) {
            self.message = self.message.replace(value.as_str(), "[REDACTED]");
            self.hint = self.hint.map(|h| h.replace(value.as_str(), "[REDACTED]"));
        }
        self
    }
}

impl Redactable for ValidationReport {
    fn redact(mut self, sensitive_values: &[String]) -> Self {
        self.diagnostics = self.diagnostics.into_iter().map(|d| d.redact(sensitive_values)).collect();
        self
    }
}

/// Collect the string form of every input marked `sensitive: true` in `ir`,
/// resolved against the actual values supplied for this run. Used to scrub
/// diagnostics and error messages before they leave the engine boundary.
pub fn sensitive_input_values(ir: &WorkflowIr, inputs: &serde_json::Map<String, Value>) -> Vec<String> {
    ir.inputs
        .iter()
        .filter(|(_, spec)| spec.sensitive)
        .filter_map(|(name, spec)| {
            inputs
                .get(name)
                .or(spec.default.as_ref())
                .map(value_to_redaction_string)
        })
        .collect()
}

fn value_to_redaction_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    fn push(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }

    fn extend(&mut self, ds: Vec<Diagnostic>) {
        self.diagnostics.extend(ds);
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Run all eight validation phases against `ir`, using `registry` to resolve
/// node types. Every phase runs to completion and contributes diagnostics
/// even if an earlier phase already produced errors, since later phases may
/// still find issues in parts of the IR the earlier ones didn't touch.
pub fn validate_ir(ir: &WorkflowIr, registry: &NodeRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Phase 1: schema.
    phase_schema(ir, &mut report);

    // Phase 2: node references.
    let node_ids: HashSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
    phase_node_references(ir, registry, &node_ids, &mut report);

    // Phase 3: inputs.
    phase_inputs(ir, &mut report);

    // Phase 4: params & outputs templates.
    phase_templates(ir, &node_ids, &mut report);

    // Phases 5-6 need a start node; skip gracefully if one can't be resolved
    // (phase 2 will already have raised an error in that case).
    if let Some(start) = ir.effective_start_node() {
        if node_ids.contains(start) {
            let graph = Graph::build(&ir.nodes, &ir.edges);
            phase_reachability(ir, &graph, start, &mut report);
            phase_cycle_budget(ir, &graph, &mut report);
        }
    }

    // Phase 7: action closure.
    phase_action_closure(ir, registry, &mut report);

    // Phase 8: batch directives.
    phase_batch_directives(ir, &mut report);

    report
}

fn phase_schema(ir: &WorkflowIr, report: &mut ValidationReport) {
    if !crate::models::SUPPORTED_IR_VERSIONS.contains(&ir.ir_version.as_str()) {
        report.push(Diagnostic::error(
            "unsupported-ir-version",
            "ir_version",
            format!("unsupported ir_version '{}'", ir.ir_version),
        ).with_hint(format!(
            "supported versions: {}",
            crate::models::SUPPORTED_IR_VERSIONS.join(", ")
        )));
    }
    if ir.nodes.is_empty() {
        report.push(Diagnostic::error("empty-workflow", "nodes", "workflow declares no nodes"));
    }

    let mut seen = HashSet::new();
    for (i, node) in ir.nodes.iter().enumerate() {
        if node.id.is_empty() {
            report.push(Diagnostic::error(
                "empty-node-id",
                format!("nodes[{i}].id"),
                "node id must not be empty",
            ));
        } else if !seen.insert(node.id.as_str()) {
            report.push(Diagnostic::error(
                "duplicate-node-id",
                format!("nodes[{i}].id"),
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }
}

fn phase_node_references(
    ir: &WorkflowIr,
    registry: &NodeRegistry,
    node_ids: &HashSet<&str>,
    report: &mut ValidationReport,
) {
    for (i, node) in ir.nodes.iter().enumerate() {
        if !registry.contains(&node.node_type) {
            report.push(Diagnostic::error(
                "unknown-node-type",
                format!("nodes[{i}].type"),
                format!("unknown node type '{}'", node.node_type),
            ).with_hint(format!("registered types: {}", registry.list().join(", "))));
        }
    }

    for (i, edge) in ir.edges.iter().enumerate() {
        if !node_ids.contains(edge.from.as_str()) {
            report.push(Diagnostic::error(
                "unknown-node-reference",
                format!("edges[{i}].from"),
                format!("edge references unknown node '{}'", edge.from),
            ));
        }
        if !node_ids.contains(edge.to.as_str()) {
            report.push(Diagnostic::error(
                "unknown-node-reference",
                format!("edges[{i}].to"),
                format!("edge references unknown node '{}'", edge.to),
            ));
        }
    }

    if let Some(start) = &ir.start_node {
        if !node_ids.contains(start.as_str()) {
            report.push(Diagnostic::error(
                "unknown-node-reference",
                "start_node",
                format!("start_node references unknown node '{start}'"),
            ));
        }
    }

    for (key, path) in &ir.outputs {
        if let Ok(parsed) = TemplateString::parse(path) {
            for p in parsed.referenced_paths() {
                let root = p.root();
                if !node_ids.contains(root) && !ir.inputs.contains_key(root) {
                    report.push(Diagnostic::error(
                        "unknown-node-reference",
                        format!("outputs.{key}"),
                        format!("output template references unknown node or input '{root}'"),
                    ));
                }
            }
        }
    }
}

fn phase_inputs(ir: &WorkflowIr, report: &mut ValidationReport) {
    for (name, spec) in &ir.inputs {
        if !is_valid_identifier(name) {
            report.push(Diagnostic::error(
                "invalid-input-name",
                format!("inputs.{name}"),
                format!("'{name}' is not a valid identifier"),
            ));
        }
        if let Some(default) = &spec.default {
            if coerce(default, spec.ty).is_err() {
                report.push(Diagnostic::error(
                    "invalid-input-default",
                    format!("inputs.{name}.default"),
                    format!("default value does not coerce to declared type '{}'", spec.ty),
                ));
            }
        } else if spec.required {
            report.push(Diagnostic::error(
                "required-input-without-default",
                format!("inputs.{name}"),
                format!("input '{name}' is required and has no default"),
            ));
        }
    }
}

fn phase_templates(ir: &WorkflowIr, node_ids: &HashSet<&str>, report: &mut ValidationReport) {
    let start = ir.effective_start_node();
    let dominators = start
        .filter(|s| node_ids.contains(s))
        .map(|s| Graph::build(&ir.nodes, &ir.edges).dominators(s));

    for node in &ir.nodes {
        for (key, value) in &node.params {
            validate_template_value(ir, node_ids, &dominators, &node.id, &format!("nodes.{}.params.{key}", node.id), value, report);
        }
    }
}

fn validate_template_value(
    ir: &WorkflowIr,
    node_ids: &HashSet<&str>,
    dominators: &Option<std::collections::HashMap<String, HashSet<String>>>,
    consumer: &str,
    path: &str,
    value: &Value,
    report: &mut ValidationReport,
) {
    match value {
        Value::String(s) => {
            let parsed = match TemplateString::parse(s) {
                Ok(p) => p,
                Err(e) => {
                    report.push(Diagnostic::error("template-parse-error", path, e.to_string()));
                    return;
                }
            };
            for template_path in parsed.referenced_paths() {
                let root = template_path.root();
                if ir.inputs.contains_key(root) {
                    continue;
                }
                if !node_ids.contains(root) {
                    report.push(Diagnostic::error(
                        "unresolved-template-path",
                        path,
                        format!("'{root}' is neither a declared input nor a node id"),
                    ));
                    continue;
                }
                if root == consumer {
                    // Self-reference (e.g. reading a prior loop iteration's
                    // own output) can't be statically proven; leave it to
                    // runtime resolution.
                    continue;
                }
                if let Some(doms) = dominators {
                    if let Some(consumer_doms) = doms.get(consumer) {
                        if !consumer_doms.contains(root) {
                            report.push(Diagnostic::warn(
                                "non-guaranteed-template-path",
                                path,
                                format!(
                                    "'{root}' does not run on every path reaching '{consumer}'; \
                                     resolution may fail at runtime"
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                validate_template_value(ir, node_ids, dominators, consumer, path, item, report);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                validate_template_value(ir, node_ids, dominators, consumer, path, v, report);
            }
        }
        _ => {}
    }
}

fn phase_reachability(ir: &WorkflowIr, graph: &Graph, start: &str, report: &mut ValidationReport) {
    let reachable = graph.reachable_from(start);
    for node in &ir.nodes {
        if !reachable.contains(&node.id) {
            report.push(Diagnostic::warn(
                "unreachable-node",
                format!("nodes.{}", node.id),
                format!("node '{}' is not reachable from start node '{start}'", node.id),
            ));
        }
    }
}

fn phase_cycle_budget(ir: &WorkflowIr, graph: &Graph, report: &mut ValidationReport) {
    let cyclic = graph.cyclic_nodes();
    for node in &ir.nodes {
        if cyclic.contains(&node.id) {
            report.push(Diagnostic::warn(
                "cyclic-node",
                format!("nodes.{}", node.id),
                format!(
                    "node '{}' participates in a cycle; ensure its registered max_visits bounds the loop",
                    node.id
                ),
            ));
        }
    }
}

fn phase_action_closure(ir: &WorkflowIr, registry: &NodeRegistry, report: &mut ValidationReport) {
    use std::collections::HashMap;

    let mut declared_actions: HashMap<&str, Vec<String>> = HashMap::new();
    for node in &ir.nodes {
        if let Ok(instance) = registry.build(&node.node_type) {
            declared_actions.insert(node.id.as_str(), instance.interface().actions);
        }
    }

    for (i, edge) in ir.edges.iter().enumerate() {
        if let Some(actions) = declared_actions.get(edge.from.as_str()) {
            if !actions.contains(&edge.action) {
                report.push(Diagnostic::warn(
                    "unknown-action",
                    format!("edges[{i}].action"),
                    format!(
                        "node '{}' does not declare action '{}'; declared: [{}]",
                        edge.from,
                        edge.action,
                        actions.join(", ")
                    ),
                ));
            }
        }
    }

    // Ambiguous routing: two edges from the same (node, action) pair to
    // different targets. This is promoted to an error here even though
    // spec.md places the formal check at compile time (§4.E), since it is
    // cheap to detect over the same edge list this phase already walks.
    let mut seen: HashMap<(&str, &str), &str> = HashMap::new();
    for edge in &ir.edges {
        let key = (edge.from.as_str(), edge.action.as_str());
        match seen.get(&key) {
            Some(existing) if *existing != edge.to.as_str() => {
                report.push(Diagnostic::error(
                    "ambiguous-routing",
                    format!("edges[?]"),
                    format!(
                        "node '{}' action '{}' maps to both '{}' and '{}'",
                        edge.from, edge.action, existing, edge.to
                    ),
                ));
            }
            _ => {
                seen.insert(key, edge.to.as_str());
            }
        }
    }
}

/// `params.batch.concurrency` is parsed by the wrapper chain (for future use
/// and for operator visibility) but has no effect on execution — batch
/// items always run sequentially. Warn so a workflow author declaring a
/// value above 1 isn't left assuming it changed anything.
fn phase_batch_directives(ir: &WorkflowIr, report: &mut ValidationReport) {
    for node in &ir.nodes {
        let Some(batch) = node.params.get("batch").and_then(Value::as_object) else {
            continue;
        };
        if let Some(concurrency) = batch.get("concurrency").and_then(Value::as_u64) {
            if concurrency > 1 {
                report.push(Diagnostic::warn(
                    "batch-concurrency-ignored",
                    format!("nodes.{}.params.batch.concurrency", node.id),
                    format!(
                        "node '{}' declares batch concurrency {concurrency}, but batch items run \
                         sequentially in this engine; the value has no effect on execution",
                        node.id
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeSpec, InputSpec, InputType, NodeSpec};
    use nodes::mock::MockNode;
    use nodes::Node;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> NodeRegistry {
        let mut r = NodeRegistry::new();
        r.register("mock", || Box::new(MockNode::returning("mock", json!({}))) as Box<dyn Node>)
            .unwrap();
        r
    }

    fn node(id: &str, params: serde_json::Map<String, Value>) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            node_type: "mock".to_string(),
            params,
        }
    }

    #[test]
    fn valid_linear_workflow_passes() {
        let ir = WorkflowIr {
            ir_version: "0.2".to_string(),
            id: None,
            name: None,
            trigger: None,
            inputs: BTreeMap::new(),
            nodes: vec![node("a", serde_json::Map::new()), node("b", serde_json::Map::new())],
            edges: vec![EdgeSpec { from: "a".into(), to: "b".into(), action: "default".into() }],
            start_node: Some("a".to_string()),
            outputs: BTreeMap::new(),
        };
        let report = validate_ir(&ir, &registry());
        assert!(report.is_ok(), "{:?}", report.diagnostics);
    }

    #[test]
    fn unknown_node_type_is_an_error() {
        let ir = WorkflowIr::new(vec![node("a", serde_json::Map::new())], vec![]);
        let report = validate_ir(&ir, &NodeRegistry::new());
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "unknown-node-type"));
    }

    #[test]
    fn template_referencing_non_dominating_node_warns() {
        let mut params = serde_json::Map::new();
        params.insert("input".to_string(), json!("${c.value}"));
        let ir = WorkflowIr {
            ir_version: "0.2".to_string(),
            id: None,
            name: None,
            trigger: None,
            inputs: BTreeMap::new(),
            nodes: vec![
                node("a", serde_json::Map::new()),
                node("b", params),
                node("c", serde_json::Map::new()),
            ],
            edges: vec![
                EdgeSpec { from: "a".into(), to: "b".into(), action: "default".into() },
                EdgeSpec { from: "a".into(), to: "c".into(), action: "default".into() },
            ],
            start_node: Some("a".to_string()),
            outputs: BTreeMap::new(),
        };
        let report = validate_ir(&ir, &registry());
        assert!(report.diagnostics.iter().any(|d| d.code == "non-guaranteed-template-path"));
    }

    #[test]
    fn required_input_without_default_is_a_validation_error() {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "url".to_string(),
            InputSpec {
                ty: InputType::String,
                required: true,
                default: None,
                description: None,
                sensitive: false,
            },
        );
        let ir = WorkflowIr {
            ir_version: "0.2".to_string(),
            id: None,
            name: None,
            trigger: None,
            inputs,
            nodes: vec![node("a", serde_json::Map::new())],
            edges: vec![],
            start_node: Some("a".to_string()),
            outputs: BTreeMap::new(),
        };
        let report = validate_ir(&ir, &registry());
        assert!(!report.is_ok());
        let diag = report.diagnostics.iter().find(|d| d.code == "required-input-without-default").unwrap();
        assert_eq!(diag.severity, Severity::Error);
    }

    #[test]
    fn batch_concurrency_above_one_warns() {
        let mut params = serde_json::Map::new();
        params.insert("batch".to_string(), json!({ "source": "${a.items}", "key": "item", "concurrency": 4 }));
        let ir = WorkflowIr {
            ir_version: "0.2".to_string(),
            id: None,
            name: None,
            trigger: None,
            inputs: BTreeMap::new(),
            nodes: vec![node("a", serde_json::Map::new()), node("b", params)],
            edges: vec![EdgeSpec { from: "a".into(), to: "b".into(), action: "default".into() }],
            start_node: Some("a".to_string()),
            outputs: BTreeMap::new(),
        };
        let report = validate_ir(&ir, &registry());
        let diag = report.diagnostics.iter().find(|d| d.code == "batch-concurrency-ignored").unwrap();
        assert_eq!(diag.severity, Severity::Warn);
    }
}
