//! IR entity references.
//!
//! Everything in the per-method arena is addressed by a compact u32
//! newtype rather than a Rust reference: the def/use graph is cyclic
//! (through phi nodes in loops), and 64-bit pointers would double the
//! size of the hot tables. `PackedOption` is used wherever a reference is
//! optional inside a data structure; plain `Option` is preferred in
//! function signatures.

use cranelift_entity::entity_impl;

/// An opaque reference to a decoded instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to an exception-handler region.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handler(u32);
entity_impl!(Handler, "eh");

/// An opaque reference to a resolved property record.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropRef(u32);
entity_impl!(PropRef, "prop");

/// An opaque reference to a lookupswitch jump table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JumpTable(u32);
entity_impl!(JumpTable, "jt");
