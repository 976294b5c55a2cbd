//! Method-level parallel compilation.
//!
//! One worker compiles one method end to end; there are no yield points
//! inside the pipeline and no shared mutable state between workers. The
//! registry and pools are shared immutably (`Sync`), which is what keeps
//! lookups stable for the whole compilation without a lock.

use crate::context::{compile_method, MethodOutcome};
use crate::error::{CodegenError, CodegenResult};
use crate::settings::Options;
use avmlift_environ::{ClassRegistry, ConstPool, MethodBodyInfo, MethodInfo};
use rayon::prelude::*;

/// One unit of work for the pool.
pub struct MethodJob<'a> {
    /// Declaration-side method description.
    pub method: MethodInfo<'a>,
    /// The body to compile.
    pub body: MethodBodyInfo<'a>,
    /// The constant pool of the ABC the body came from.
    pub pool: &'a (dyn ConstPool + Sync),
}

/// Compile a batch of methods across `options.threads` workers (0 uses
/// the rayon default). Per-method failures are returned in place so one
/// bad body does not sink the batch.
pub fn compile_methods(
    registry: &dyn ClassRegistry,
    jobs: &[MethodJob],
    options: &Options,
) -> CodegenResult<Vec<CodegenResult<MethodOutcome>>> {
    options.validate()?;
    let run = || {
        jobs.par_iter()
            .map(|job| compile_method(registry, job.pool, &job.method, &job.body, options))
            .collect()
    };
    if options.threads == 0 {
        return Ok(run());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .build()
        .map_err(|e| CodegenError::Argument(format!("thread pool: {e}").into()))?;
    Ok(pool.install(run))
}
