//! `engine` crate — workflow IR models, the namespaced shared store,
//! template/data resolution, IR validation, compilation, the wrapper
//! chain, and the scheduler that drives a compiled graph to completion.

pub mod coerce;
pub mod compile;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod store;
pub mod template;
pub mod validate;
pub mod wrapper;

pub use compile::{CompiledGraph, CompiledNode, Compiler};
pub use error::EngineError;
pub use executor::{Executor, ExecutorConfig, Phase, RunOptions, RunResult, RunStatus};
pub use models::{EdgeSpec, InputSpec, InputType, NodeSpec, Trigger, WorkflowIr};
pub use persistence::RunPersistence;
pub use registry::{NodeFactory, NodeRegistry, RegistryError};
pub use store::SharedStore;
pub use validate::{validate_ir, sensitive_input_values, Diagnostic, Redactable, Severity, ValidationReport};

/// Compile `ir` against `registry` and run it to completion in one call —
/// the convenience entry point used by the CLI's `validate`/one-shot paths
/// and the queue worker alike. Diagnostics and the final error message are
/// redacted against any workflow input declared `sensitive: true`.
pub async fn run_workflow(
    ir: &models::WorkflowIr,
    registry: &registry::NodeRegistry,
    mut options: executor::RunOptions,
    config: executor::ExecutorConfig,
) -> Result<executor::RunResult, EngineError> {
    let compiled = compile::Compiler::compile(ir, registry)?;
    let sensitive = validate::sensitive_input_values(ir, &options.inputs);

    let executor = executor::Executor::new(&compiled, config);
    options.compile_diagnostics = options
        .compile_diagnostics
        .into_iter()
        .map(|d| d.redact(&sensitive))
        .collect();
    let mut result = executor.run(options).await;
    result.error = result.error.map(|e| {
        let mut redacted = e;
        for value in sensitive.iter().filter(|v| !v.is_empty()) {
            redacted = redacted.replace(value.as_str(), "[REDACTED]");
        }
        redacted
    });
    Ok(result)
}

#[cfg(test)]
mod executor_tests;
