//! The typed intermediate representation.

pub mod block;
pub mod entities;
pub mod graph;
pub mod handler;
pub mod instruction;
pub mod node;
pub mod opcodes;
pub mod prop;

pub use self::block::{BlockData, BlockFlags, BlockList};
pub use self::entities::{Block, Handler, Inst, JumpTable, PropRef, Value};
pub use self::graph::MethodGraph;
pub use self::handler::HandlerData;
pub use self::instruction::{InstData, InstFlags, JumpTableData, Payload, ValueList};
pub use self::node::{Const, DataType, PhiCoercion, Slot, SlotKind, ValueData, ValueFlags};
pub use self::opcodes::{Flow, Format, Opcode};
pub use self::prop::{Intrinsic, PropKind, PropLocation, ResolvedProperty};
