//! The per-method compilation driver.
//!
//! Runs the pipeline strictly in order: decode, control flow, dominator
//! tree, data flow, semantic binding. All allocations go into one
//! `MethodGraph` arena that is returned on success and dropped on
//! failure. When `early_throw_method_body_errors` is off, a body error
//! does not fail the compile: it is returned as a deferred outcome so
//! the code generator can emit a stub body that throws the same error on
//! first invocation.

use crate::binder;
use crate::dataflow;
use crate::decode;
use crate::dominator_tree::DominatorTree;
use crate::error::{BodyError, BodyResult, CodegenError, CodegenResult};
use crate::flowgraph;
use crate::ir::MethodGraph;
use crate::settings::Options;
use avmlift_environ::{ClassRegistry, ConstPool, MethodBodyInfo, MethodInfo};

/// The result of compiling one method body.
pub enum MethodOutcome {
    /// The typed value graph, ready for code generation.
    Compiled(MethodGraph),
    /// The body failed to verify or bind and error throwing is deferred
    /// to the first invocation; the code generator emits a throwing stub
    /// carrying this error.
    Deferred(BodyError),
}

/// Compile one method body to its typed IR.
pub fn compile_method(
    registry: &dyn ClassRegistry,
    pool: &dyn ConstPool,
    method: &MethodInfo,
    body: &MethodBodyInfo,
    options: &Options,
) -> CodegenResult<MethodOutcome> {
    options.validate()?;
    log::debug!("compiling {}", method.name);
    match compile_body(registry, pool, method, body, options) {
        Ok(graph) => Ok(MethodOutcome::Compiled(graph)),
        Err(error) if !options.early_throw_method_body_errors => {
            log::warn!("deferring body error in {}: {error}", method.name);
            Ok(MethodOutcome::Deferred(error))
        }
        Err(error) => Err(CodegenError::in_method(method.name, error)),
    }
}

fn compile_body(
    registry: &dyn ClassRegistry,
    pool: &dyn ConstPool,
    method: &MethodInfo,
    body: &MethodBodyInfo,
    options: &Options,
) -> BodyResult<MethodGraph> {
    let mut graph = MethodGraph::new(body.local_count, body.max_stack, body.scope_limit());

    decode::decode(&mut graph, body.code)?;
    flowgraph::compute(&mut graph, body.exceptions)?;
    flowgraph::check_local_indices(&graph)?;
    let tree = DominatorTree::compute(&mut graph);
    flowgraph::check_reachable_opcodes(&graph)?;
    if options.enable_tracing {
        log::trace!("{} after control flow:\n{}", method.name, graph.display());
    }

    dataflow::compute(&mut graph, &tree, method, pool)?;
    if options.enable_tracing {
        log::trace!("{} after data flow:\n{}", method.name, graph.display());
    }

    binder::bind(&mut graph, &tree, pool, registry, method, options)?;
    if options.enable_tracing {
        log::trace!("{} after binding:\n{}", method.name, graph.display());
    }

    Ok(graph)
}
