//! Symbol-table model consumed by the avmlift method compiler.
//!
//! The compiler core translates one ABC method body at a time against a
//! read-only view of the surrounding program: classes and their traits,
//! multinames, constant pools, and method signatures. This crate defines
//! that view. It contains no ABC file parsing; hosts parse the container
//! format themselves and implement the [`ClassRegistry`] and [`ConstPool`]
//! traits over their own tables.
//!
//! Classes and methods are referenced by compact entity ids ([`ClassId`],
//! [`MethodId`]) rather than Rust references so that the compiler's IR can
//! embed them in `Copy` data without borrowing the registry.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod class;
pub mod dummy;
mod multiname;
mod registry;

pub use crate::class::{
    Class, ClassFlags, ClassId, IndexAccess, MethodId, MethodSig, TraitDesc, TraitKind,
};
pub use crate::multiname::{Multiname, Namespace, NsKind, NsSet};
pub use crate::registry::{
    Builtin, CapturedScope, ClassRegistry, ConstPool, ExceptionInfo, MethodBodyInfo, MethodFlags,
    MethodInfo,
};
