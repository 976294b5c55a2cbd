//! Resolved property records.
//!
//! Each property-access instruction gets a `ResolvedProperty` allocated
//! on its first binder visit and reused afterwards. The record holds the
//! binding decision (trait, index accessor, intrinsic, or deferred to
//! runtime), the folded compile-time components of a runtime multiname,
//! and a snapshot of the receiver type for the revisit fast path.

use avmlift_environ::{ClassId, IndexAccess, Namespace, TraitDesc};
use cranelift_entity::packed_option::PackedOption;

use crate::ir::node::DataType;

/// The binding decision for one property access.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PropKind {
    /// Not resolved yet.
    Unresolved,
    /// Bound directly to a trait.
    Trait,
    /// A recognised built-in with a specialised emission path.
    Intrinsic,
    /// A numeric-indexed accessor (arrays, vectors, rest).
    Index,
    /// The trait resolved but the invocation needs a runtime dispatch
    /// (calling a non-callable trait, argument-count mismatch).
    TraitRtInvoke,
    /// Fully deferred to runtime lookup.
    Runtime,
}

/// Recognised built-in operations.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Intrinsic {
    /// `Math.min(int, int)`.
    MathMinInt,
    /// `Math.max(int, int)`.
    MathMaxInt,
    /// `String.charAt(int)`.
    StringCharAt,
    /// `String.charCodeAt(int)`.
    StringCharCodeAt,
    /// `charAt(i)` fused with a comparison against a one-character
    /// string constant.
    StringCharAtCompare,
    /// `charCodeAt(i)` fused with a comparison against an integer
    /// constant.
    StringCharCodeAtCompare,
    /// `Array.push(x)` with exactly one argument.
    ArrayPushOne,
    /// `int(x)`.
    ConvertInt,
    /// `uint(x)`.
    ConvertUint,
    /// `Number(x)`.
    ConvertNumber,
    /// `String(x)`.
    ConvertString,
    /// `Boolean(x)`.
    ConvertBool,
    /// Vector element read through an integer index.
    VectorIndexGet,
    /// Vector element write through an integer index.
    VectorIndexSet,
    /// A cast expressed as a one-argument class call.
    ClassCast,
}

/// Where the receiver of a resolved access lives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PropLocation {
    /// The object is on the operand stack.
    Target,
    /// Found on the method's own scope stack at this depth.
    Scope(u32),
    /// Found on the captured scope stack at this index (outermost 0).
    CapturedScope(u32),
    /// Found on the application-domain global object.
    Global,
}

/// The record of a compile-time property-binding decision.
#[derive(Clone, Debug)]
pub struct ResolvedProperty {
    /// The binding decision.
    pub kind: PropKind,
    /// Where the receiver lives.
    pub location: PropLocation,
    /// The class whose trait table matched.
    pub owner: PackedOption<ClassId>,
    /// The match was in the static table.
    pub is_static: bool,
    /// The matched trait.
    pub trait_desc: Option<TraitDesc>,
    /// The recognised built-in, for `PropKind::Intrinsic`.
    pub intrinsic: Option<Intrinsic>,
    /// The index accessor, for `PropKind::Index`.
    pub index_access: Option<IndexAccess>,
    /// Runtime namespace argument folded to this compile-time value.
    pub folded_ns: Option<Namespace>,
    /// Runtime name argument folded to this compile-time value.
    pub folded_name: Option<Box<str>>,
    /// Type produced by reading (or calling, for call opcodes) through
    /// this binding.
    pub value_ty: DataType,
    /// Receiver type at the last resolution, for the revisit fast path.
    pub seen_ty: DataType,
}

impl Default for ResolvedProperty {
    fn default() -> Self {
        Self {
            kind: PropKind::Unresolved,
            location: PropLocation::Target,
            owner: Default::default(),
            is_static: false,
            trait_desc: None,
            intrinsic: None,
            index_access: None,
            folded_ns: None,
            folded_name: None,
            value_ty: DataType::Unknown,
            seen_ty: DataType::Unknown,
        }
    }
}

impl ResolvedProperty {
    /// Reset everything except the folded runtime components, which do
    /// not depend on the receiver type.
    pub fn reset(&mut self) {
        let folded_ns = self.folded_ns.take();
        let folded_name = self.folded_name.take();
        *self = Self::default();
        self.folded_ns = folded_ns;
        self.folded_name = folded_name;
    }
}
