//! AVM2 method-body analysis for ahead-of-time compilation.
//!
//! This crate takes one ABC method body at a time and turns its
//! stack-machine bytecode into a typed, statically bound value graph that
//! a code generator for a typed target can consume directly. The
//! pipeline is strictly sequential per method:
//!
//! 1. **decode** — linear scan of the body bytes into an instruction
//!    arena ([`decode`]).
//! 2. **control flow** — basic blocks, edges, exception regions
//!    ([`flowgraph`]), then reverse postorder and immediate dominators
//!    ([`dominator_tree`]).
//! 3. **data flow** — SSA construction: a value node for every stack,
//!    scope and local slot written, phi nodes at iterated dominance
//!    frontiers, def/use links ([`dataflow`]).
//! 4. **semantic binding** — fixed-point type inference, property
//!    resolution, intrinsic recognition and conversion hoisting
//!    ([`binder`]).
//!
//! [`context::compile_method`] runs the whole pipeline;
//! [`scheduler::compile_methods`] fans a batch of methods out over a
//! thread pool. The surrounding program (classes, traits, constant
//! pools) is consumed read-only through the traits in
//! [`avmlift_environ`].

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(missing_docs, unused_import_braces)]

pub mod binder;
pub mod context;
pub mod dataflow;
pub mod decode;
pub mod dominator_tree;
pub mod error;
pub mod flowgraph;
pub mod ir;
pub mod scheduler;
pub mod settings;
pub mod write;

pub use crate::context::{compile_method, MethodOutcome};
pub use crate::error::{BodyError, BodyResult, CodegenError, CodegenResult, VerifyKind};
pub use crate::scheduler::{compile_methods, MethodJob};
pub use crate::settings::{IntegerMode, Options};
