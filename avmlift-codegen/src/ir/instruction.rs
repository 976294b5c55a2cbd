//! Decoded instructions.
//!
//! An instruction owns its opcode, source byte offset, and an
//! opcode-group-specific payload. The SSA links (popped list, pushed
//! value) are filled in by the data-flow pass; the resolved-property
//! reference inside name payloads is filled in by the binder.

use crate::ir::entities::{Block, Inst, JumpTable, PropRef, Value};
use crate::ir::opcodes::Opcode;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::EntityList;

/// A pooled list of values (popped operands, entry states).
pub type ValueList = EntityList<Value>;

/// Instruction flags.
///
/// A hand-rolled bit field, kept to one byte.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct InstFlags {
    bits: u8,
}

impl InstFlags {
    const BLOCK_START: u8 = 1 << 0;
    const BLOCK_END: u8 = 1 << 1;
    const SINGLE_POP: u8 = 1 << 2;
    const ELIDED: u8 = 1 << 3;
    const CONCAT_ROOT: u8 = 1 << 4;
    const CONCAT_INTERNAL: u8 = 1 << 5;

    fn read(self, bit: u8) -> bool {
        self.bits & bit != 0
    }

    fn set(&mut self, bit: u8) {
        self.bits |= bit;
    }

    /// First instruction of its basic block.
    pub fn is_block_start(self) -> bool {
        self.read(Self::BLOCK_START)
    }

    /// Mark as first instruction of a block.
    pub fn set_block_start(&mut self) {
        self.set(Self::BLOCK_START)
    }

    /// Last instruction of its basic block.
    pub fn is_block_end(self) -> bool {
        self.read(Self::BLOCK_END)
    }

    /// Mark as last instruction of a block.
    pub fn set_block_end(&mut self) {
        self.set(Self::BLOCK_END)
    }

    /// The popped list holds exactly one value.
    pub fn is_single_pop(self) -> bool {
        self.read(Self::SINGLE_POP)
    }

    /// Record the single-pop hint.
    pub fn set_single_pop(&mut self) {
        self.set(Self::SINGLE_POP)
    }

    /// Conversion hoisted onto its producer; emit nothing for this
    /// instruction.
    pub fn is_elided(self) -> bool {
        self.read(Self::ELIDED)
    }

    /// Mark the conversion as hoisted.
    pub fn set_elided(&mut self) {
        self.set(Self::ELIDED)
    }

    /// Root of a string-concatenation tree.
    pub fn is_concat_tree_root(self) -> bool {
        self.read(Self::CONCAT_ROOT)
    }

    /// Mark as concat-tree root.
    pub fn set_concat_tree_root(&mut self) {
        self.set(Self::CONCAT_ROOT)
    }

    /// Internal node of a string-concatenation tree.
    pub fn is_concat_tree_internal(self) -> bool {
        self.read(Self::CONCAT_INTERNAL)
    }

    /// Mark as concat-tree internal node.
    pub fn set_concat_tree_internal(&mut self) {
        self.set(Self::CONCAT_INTERNAL)
    }
}

/// Opcode-group-specific operand payload.
///
/// The discriminant follows the opcode group, not the opcode: every
/// `Name`-format opcode gets a `Name` payload, every call-through-name
/// opcode a `CallName`, and so on. Fields that later passes fill in
/// (`target`, `prop`, the dup/swap pair) start out as `None`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Payload {
    /// No operands.
    None,
    /// An immediate integer (`pushbyte`, `pushshort`).
    Imm {
        /// The decoded, sign-extended value.
        value: i32,
    },
    /// A local register access.
    Local {
        /// Register index.
        index: u32,
    },
    /// `hasnext2` register pair.
    TwoLocals {
        /// Register holding the object being enumerated.
        object: u32,
        /// Register holding the enumeration index.
        index: u32,
        /// The value written to the object register, filled by the
        /// data-flow pass.
        object_value: PackedOption<Value>,
        /// The value written to the index register, filled by the
        /// data-flow pass.
        index_value: PackedOption<Value>,
    },
    /// A constant-pool reference; the pool is implied by the opcode.
    Pool {
        /// Pool index.
        index: u32,
    },
    /// A property access through a multiname.
    Name {
        /// Multiname pool index.
        index: u32,
        /// Resolution record, filled by the binder.
        prop: PackedOption<PropRef>,
    },
    /// A call through a multiname.
    CallName {
        /// Multiname pool index.
        index: u32,
        /// Argument count.
        argc: u32,
        /// Resolution record, filled by the binder.
        prop: PackedOption<PropRef>,
    },
    /// `callstatic`/`callmethod`: a method or dispatch index plus count.
    CallIndex {
        /// method_info index (`callstatic`) or dispatch id (`callmethod`).
        index: u32,
        /// Argument count.
        argc: u32,
    },
    /// A bare argument count (`call`, `construct`, `newarray`, ...).
    Argc {
        /// Argument count; property-pair count for `newobject`.
        argc: u32,
    },
    /// A slot, scope or exception index.
    Slot {
        /// The index operand.
        index: u32,
    },
    /// A branch.
    Branch {
        /// Absolute byte offset of the target.
        target_offset: u32,
        /// Target block, filled by the control-flow pass.
        target: PackedOption<Block>,
    },
    /// A `lookupswitch` jump table.
    Switch {
        /// The table.
        table: JumpTable,
    },
    /// `newclass`.
    ClassInfo {
        /// class_info index.
        index: u32,
    },
    /// `newfunction`.
    MethodInfo {
        /// method_info index.
        index: u32,
    },
    /// The value pair recorded for `dup`, `swap` and `checkfilter`,
    /// filled by the data-flow pass.
    DupSwap {
        /// `dup`: the duplicated value. `swap`: the new top. `checkfilter`:
        /// the checked value.
        a: PackedOption<Value>,
        /// `dup`: the copy. `swap`: the new second-from-top.
        b: PackedOption<Value>,
    },
    /// `debug` operands, carried through unused.
    Debug {
        /// Debug kind byte.
        kind: u8,
        /// String pool index.
        index: u32,
        /// Register byte.
        reg: u8,
        /// Trailing u30.
        extra: u32,
    },
    /// `debugline`.
    Line {
        /// Source line number.
        line: u32,
    },
}

impl Payload {
    /// The multiname pool index, for name-carrying payloads.
    pub fn multiname_index(&self) -> Option<u32> {
        match *self {
            Payload::Name { index, .. } | Payload::CallName { index, .. } => Some(index),
            _ => None,
        }
    }

    /// The resolved-property reference, if one has been assigned.
    pub fn prop(&self) -> Option<PropRef> {
        match *self {
            Payload::Name { prop, .. } | Payload::CallName { prop, .. } => prop.expand(),
            _ => None,
        }
    }

    /// Store a resolved-property reference on a name payload.
    pub fn set_prop(&mut self, new: PropRef) {
        match self {
            Payload::Name { prop, .. } | Payload::CallName { prop, .. } => *prop = new.into(),
            _ => panic!("payload has no property slot"),
        }
    }

    /// The call argument count, for payloads that carry one.
    pub fn argc(&self) -> Option<u32> {
        match *self {
            Payload::CallName { argc, .. }
            | Payload::CallIndex { argc, .. }
            | Payload::Argc { argc } => Some(argc),
            _ => None,
        }
    }
}

/// One decoded instruction.
#[derive(Clone, Debug)]
pub struct InstData {
    /// The opcode.
    pub opcode: Opcode,
    /// Byte offset in the method body.
    pub offset: u32,
    /// Owning basic block, assigned by the control-flow pass.
    pub block: PackedOption<Block>,
    /// Flags.
    pub flags: InstFlags,
    /// Values popped by this instruction, in stack order (bottom first).
    pub popped: ValueList,
    /// The value pushed, if the opcode produces one. Local and scope
    /// writes also record their defined value here.
    pub pushed: PackedOption<Value>,
    /// Opcode-group payload.
    pub payload: Payload,
}

impl InstData {
    /// A fresh instruction with no SSA links.
    pub fn new(opcode: Opcode, offset: u32, payload: Payload) -> Self {
        Self {
            opcode,
            offset,
            block: Default::default(),
            flags: InstFlags::default(),
            popped: ValueList::new(),
            pushed: Default::default(),
            payload,
        }
    }
}

/// Case table of a `lookupswitch`.
#[derive(Clone, Debug, Default)]
pub struct JumpTableData {
    /// Absolute byte offset of the default target.
    pub default_offset: u32,
    /// Absolute byte offsets of the case targets.
    pub case_offsets: Vec<u32>,
    /// Default target block, filled by the control-flow pass.
    pub default_block: PackedOption<Block>,
    /// Case target blocks, parallel to `case_offsets`.
    pub case_blocks: Vec<Block>,
}

impl JumpTableData {
    /// Iterate all target blocks (default first). Valid after the
    /// control-flow pass.
    pub fn targets(&self) -> impl Iterator<Item = Block> + '_ {
        self.default_block
            .expand()
            .into_iter()
            .chain(self.case_blocks.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let mut f = InstFlags::default();
        assert!(!f.is_block_start());
        f.set_block_start();
        f.set_concat_tree_root();
        assert!(f.is_block_start());
        assert!(f.is_concat_tree_root());
        assert!(!f.is_elided());
    }

    #[test]
    fn payload_accessors() {
        let mut p = Payload::CallName {
            index: 7,
            argc: 2,
            prop: Default::default(),
        };
        assert_eq!(p.multiname_index(), Some(7));
        assert_eq!(p.argc(), Some(2));
        assert_eq!(p.prop(), None);
        p.set_prop(PropRef::from_u32(0));
        assert!(p.prop().is_some());
    }
}
