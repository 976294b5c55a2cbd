//! Error types for method compilation.
//!
//! Errors originate inside a pass as a [`BodyError`] carrying the byte
//! offset of the offending instruction; the per-method entry point wraps
//! them with the method name into a [`CodegenError`]. When
//! `early_throw_method_body_errors` is disabled the wrapper is not an
//! `Err` at all: the body error is returned as a deferred outcome so the
//! code generator can emit a stub that throws it at first invocation.

use core::fmt;
use thiserror::Error;

/// A verify-category failure, in the sense of the AVM2 verifier: the
/// bytecode is structurally unsound and no code can be generated for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyKind {
    /// The method body ended in the middle of an instruction.
    AbcCorrupt,
    /// Operand stack grew past the declared `max_stack`.
    StackOverflow {
        /// Declared limit.
        limit: u32,
    },
    /// Operand stack popped below empty.
    StackUnderflow,
    /// Scope stack grew past the declared limit.
    ScopeStackOverflow {
        /// Declared limit.
        limit: u32,
    },
    /// Scope stack popped below empty.
    ScopeStackUnderflow,
    /// Stack depth disagrees between a predecessor exit and a successor
    /// entry.
    StackDepthUnbalanced {
        /// Depth expected at the join.
        expected: u32,
        /// Depth actually found.
        found: u32,
    },
    /// An undecodable opcode is reachable in the flow graph.
    IllegalOpcode {
        /// The raw opcode byte.
        byte: u8,
    },
    /// A branch or switch target is not an instruction boundary inside
    /// the method.
    BranchOffsetInvalid {
        /// The computed target byte offset.
        target: i64,
    },
    /// A local register index is out of range.
    InvalidRegister {
        /// The register referenced.
        index: u32,
        /// Declared register count.
        count: u32,
    },
    /// A constant-pool or multiname index is out of range, or a runtime
    /// multiname is used where a compile-time name is required.
    InvalidMultiname {
        /// The offending pool index.
        index: u32,
    },
    /// `getscopeobject` past the current scope depth.
    InvalidScopeIndex {
        /// The index requested.
        index: u32,
        /// Scope depth at that point.
        depth: u32,
    },
    /// A super expression outside an instance method, or against a class
    /// with no parent.
    IllegalSuper,
    /// Early binding was mandated but impossible (for example `getslot`
    /// on a type with no known slot table).
    IllegalEarlyBinding,
    /// An exception_info record is malformed: empty or inverted range,
    /// target outside the method, or overlapping handlers that do not
    /// nest.
    EhRangeInvalid,
    /// `newclass` against a base that cannot be extended.
    IllegalNewclassBase,
    /// Control falls off the end of the method body.
    CodeFalloff,
}

impl fmt::Display for VerifyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            VerifyKind::AbcCorrupt => write!(f, "truncated or corrupt method body"),
            VerifyKind::StackOverflow { limit } => {
                write!(f, "operand stack exceeds max_stack {limit}")
            }
            VerifyKind::StackUnderflow => write!(f, "operand stack underflow"),
            VerifyKind::ScopeStackOverflow { limit } => {
                write!(f, "scope stack exceeds limit {limit}")
            }
            VerifyKind::ScopeStackUnderflow => write!(f, "scope stack underflow"),
            VerifyKind::StackDepthUnbalanced { expected, found } => {
                write!(f, "stack depth {found} at join, predecessors leave {expected}")
            }
            VerifyKind::IllegalOpcode { byte } => write!(f, "illegal opcode {byte:#04x}"),
            VerifyKind::BranchOffsetInvalid { target } => {
                write!(f, "branch target {target} is not an instruction")
            }
            VerifyKind::InvalidRegister { index, count } => {
                write!(f, "local {index} out of range (local_count {count})")
            }
            VerifyKind::InvalidMultiname { index } => {
                write!(f, "invalid multiname (pool index {index})")
            }
            VerifyKind::InvalidScopeIndex { index, depth } => {
                write!(f, "scope index {index} out of range (depth {depth})")
            }
            VerifyKind::IllegalSuper => write!(f, "illegal super expression"),
            VerifyKind::IllegalEarlyBinding => write!(f, "illegal early binding"),
            VerifyKind::EhRangeInvalid => write!(f, "invalid exception handler range"),
            VerifyKind::IllegalNewclassBase => write!(f, "illegal newclass base"),
            VerifyKind::CodeFalloff => write!(f, "control falls off end of method body"),
        }
    }
}

/// An error raised while analysing one method body.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BodyError {
    /// Structurally unsound bytecode.
    #[error("verify error at {offset:#06x}: {kind}")]
    Verify {
        /// Byte offset of the offending instruction.
        offset: u32,
        /// What went wrong.
        kind: VerifyKind,
    },
    /// A compile-time type error (multiname-kind misuse, `dxns` without
    /// the `SET_DXNS` flag). Coercion failures are never raised here;
    /// the binder records the coercion and leaves it to runtime.
    #[error("type error at {offset:#06x}: {message}")]
    Type {
        /// Byte offset of the offending instruction.
        offset: u32,
        /// Description.
        message: Box<str>,
    },
    /// A trait could not be located and the context mandates early
    /// binding.
    #[error("reference error at {offset:#06x}: {message}")]
    Reference {
        /// Byte offset of the offending instruction.
        offset: u32,
        /// Description.
        message: Box<str>,
    },
}

impl BodyError {
    /// Shorthand for a verify error.
    pub fn verify(offset: u32, kind: VerifyKind) -> Self {
        BodyError::Verify { offset, kind }
    }
}

/// Result type used inside the per-method passes.
pub type BodyResult<T> = Result<T, BodyError>;

/// A compilation error surfaced to the embedder.
#[derive(Clone, Debug, Error)]
pub enum CodegenError {
    /// A method body failed to compile.
    #[error("in method {method}: {error}")]
    Body {
        /// Name of the method being compiled.
        method: Box<str>,
        /// The underlying failure.
        error: BodyError,
    },
    /// An invalid configuration value.
    #[error("invalid option: {0}")]
    Argument(Box<str>),
}

impl CodegenError {
    pub(crate) fn in_method(method: &str, error: BodyError) -> Self {
        CodegenError::Body {
            method: method.into(),
            error,
        }
    }
}

/// Result type surfaced to the embedder.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_offset_and_method() {
        let err = CodegenError::in_method(
            "Foo/bar",
            BodyError::verify(0x24, VerifyKind::StackUnderflow),
        );
        let text = err.to_string();
        assert!(text.contains("Foo/bar"));
        assert!(text.contains("0x0024"));
        assert!(text.contains("underflow"));
    }
}
