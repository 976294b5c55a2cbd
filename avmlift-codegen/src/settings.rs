//! Compilation options.

use crate::error::{CodegenError, CodegenResult};
use core::str::FromStr;

/// How eagerly floating-point arithmetic is narrowed to integer
/// arithmetic.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum IntegerMode {
    /// Only explicit integer opcodes (`add_i` and friends) stay integer.
    ExplicitOnly,
    /// Narrow `modulo` when both operands are integers of the same
    /// signedness, and promote whole integer expression trees whose root
    /// is coerced to an integer type.
    #[default]
    Default,
    /// Additionally narrow `add`/`subtract`/`multiply` whenever both
    /// operands are integers of the same signedness.
    Aggressive,
}

impl FromStr for IntegerMode {
    type Err = CodegenError;

    fn from_str(s: &str) -> CodegenResult<Self> {
        match s {
            "explicit-only" => Ok(IntegerMode::ExplicitOnly),
            "default" => Ok(IntegerMode::Default),
            "aggressive" => Ok(IntegerMode::Aggressive),
            _ => Err(CodegenError::Argument(
                format!("unknown integer arithmetic mode `{s}`").into(),
            )),
        }
    }
}

/// Options recognised by the method compiler.
#[derive(Clone, Debug)]
pub struct Options {
    /// Gate for integer-arithmetic narrowing and promotion.
    pub integer_mode: IntegerMode,
    /// Emit truncating double-to-int conversions instead of the
    /// ECMA-262-compliant routine. Consumed by the code generator; the
    /// binder only records it with the IR.
    pub use_native_double_to_int: bool,
    /// Dump the IR after each pass through `log::trace!`.
    pub enable_tracing: bool,
    /// Propagate body errors at compile time. When false, a failed body
    /// compiles to a deferred outcome that throws on first call.
    pub early_throw_method_body_errors: bool,
    /// Worker threads for multi-method compilation; 0 picks the rayon
    /// default.
    pub threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            integer_mode: IntegerMode::default(),
            use_native_double_to_int: false,
            enable_tracing: false,
            early_throw_method_body_errors: true,
            threads: 0,
        }
    }
}

/// Threads beyond this are a configuration mistake, not a request.
const MAX_THREADS: usize = 512;

impl Options {
    /// Check the option values. Called by the compilation entry points.
    pub fn validate(&self) -> CodegenResult<()> {
        if self.threads > MAX_THREADS {
            return Err(CodegenError::Argument(
                format!("thread count {} exceeds {MAX_THREADS}", self.threads).into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_mode_parses() {
        assert_eq!(
            IntegerMode::from_str("aggressive").unwrap(),
            IntegerMode::Aggressive
        );
        assert!(IntegerMode::from_str("sometimes").is_err());
    }

    #[test]
    fn thread_limit() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());
        opts.threads = 4096;
        assert!(opts.validate().is_err());
    }
}
