//! Instruction decoding.
//!
//! A single linear scan of the method body bytes. Each instruction gets
//! its opcode, byte offset and operand payload; no type information, no
//! block assignment, no stack tracking. Bytes that do not decode to a
//! known opcode become `Opcode::Unknown` entries carrying the raw byte;
//! the control-flow pass rejects them only if they are actually
//! reachable.

use crate::error::{BodyError, BodyResult, VerifyKind};
use crate::ir::{InstData, JumpTableData, MethodGraph, Opcode, Payload};
use crate::ir::Format;

/// Cursor over the method body bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Offset of the instruction currently being decoded, for errors.
    inst_offset: u32,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            inst_offset: 0,
        }
    }

    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn corrupt(&self) -> BodyError {
        BodyError::verify(self.inst_offset, VerifyKind::AbcCorrupt)
    }

    fn u8(&mut self) -> BodyResult<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| self.corrupt())?;
        self.pos += 1;
        Ok(b)
    }

    /// Variable-length u30, at most five bytes; the result is truncated
    /// to 32 bits like the reference decoder does.
    fn u30(&mut self) -> BodyResult<u32> {
        let mut result: u32 = 0;
        for shift in [0u32, 7, 14, 21, 28] {
            let b = self.u8()?;
            result |= u32::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Ok(result)
    }

    /// Three-byte little-endian signed branch displacement.
    fn s24(&mut self) -> BodyResult<i32> {
        let b0 = self.u8()? as i32;
        let b1 = self.u8()? as i32;
        let b2 = self.u8()? as i32;
        Ok((b0 | (b1 << 8) | (b2 << 16)) << 8 >> 8)
    }
}

/// Compute an absolute branch target and range-check it.
fn branch_target(base: usize, rel: i32, len: usize, offset: u32) -> BodyResult<u32> {
    let target = base as i64 + rel as i64;
    if target < 0 || target >= len as i64 {
        return Err(BodyError::verify(
            offset,
            VerifyKind::BranchOffsetInvalid { target },
        ));
    }
    Ok(target as u32)
}

/// Decode `code` into `graph.insts`.
pub fn decode(graph: &mut MethodGraph, code: &[u8]) -> BodyResult<()> {
    let mut r = Reader::new(code);
    while !r.done() {
        let offset = r.pos as u32;
        r.inst_offset = offset;
        let byte = r.u8()?;
        let opcode = Opcode::from_byte(byte).unwrap_or(Opcode::Unknown);
        let payload = decode_payload(&mut r, graph, opcode, byte, offset, code.len())?;
        graph.make_inst(InstData::new(opcode, offset, payload));
    }
    log::trace!("decoded {} instructions", graph.insts.len());
    Ok(())
}

fn decode_payload(
    r: &mut Reader,
    graph: &mut MethodGraph,
    opcode: Opcode,
    byte: u8,
    offset: u32,
    len: usize,
) -> BodyResult<Payload> {
    let payload = match opcode.format() {
        Format::None => match opcode {
            // The pair fields are filled in by the data-flow pass.
            Opcode::Dup | Opcode::Swap | Opcode::CheckFilter => Payload::DupSwap {
                a: Default::default(),
                b: Default::default(),
            },
            Opcode::Unknown => Payload::Imm {
                value: byte as i32,
            },
            _ => match opcode.implicit_local() {
                Some(index) => Payload::Local { index },
                None => Payload::None,
            },
        },
        Format::U8 => {
            let b = r.u8()?;
            if opcode == Opcode::PushByte {
                Payload::Imm {
                    value: b as i8 as i32,
                }
            } else {
                Payload::Slot { index: b as u32 }
            }
        }
        Format::ShortImm => {
            let v = r.u30()?;
            Payload::Imm {
                value: (v as i32) << 16 >> 16,
            }
        }
        Format::Local => Payload::Local { index: r.u30()? },
        Format::U30 => Payload::Argc { argc: r.u30()? },
        Format::Slot => Payload::Slot { index: r.u30()? },
        Format::Int | Format::Uint | Format::Double | Format::Str | Format::Ns => {
            Payload::Pool { index: r.u30()? }
        }
        Format::Name => Payload::Name {
            index: r.u30()?,
            prop: Default::default(),
        },
        Format::NameArgc => Payload::CallName {
            index: r.u30()?,
            argc: r.u30()?,
            prop: Default::default(),
        },
        Format::IndexArgc => Payload::CallIndex {
            index: r.u30()?,
            argc: r.u30()?,
        },
        Format::TwoLocals => Payload::TwoLocals {
            object: r.u30()?,
            index: r.u30()?,
            object_value: Default::default(),
            index_value: Default::default(),
        },
        Format::ClassInfo => Payload::ClassInfo { index: r.u30()? },
        Format::MethodInfo => Payload::MethodInfo { index: r.u30()? },
        Format::Branch => {
            let rel = r.s24()?;
            // Branch displacements are relative to the end of the
            // instruction.
            let target_offset = branch_target(r.pos, rel, len, offset)?;
            Payload::Branch {
                target_offset,
                target: Default::default(),
            }
        }
        Format::Switch => {
            // lookupswitch displacements are relative to the start of
            // the instruction.
            let base = offset as usize;
            let default_rel = r.s24()?;
            let default_offset = branch_target(base, default_rel, len, offset)?;
            let case_count = r.u30()? as usize + 1;
            let mut case_offsets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                let rel = r.s24()?;
                case_offsets.push(branch_target(base, rel, len, offset)?);
            }
            let table = graph.jump_tables.push(JumpTableData {
                default_offset,
                case_offsets,
                default_block: Default::default(),
                case_blocks: Vec::new(),
            });
            Payload::Switch { table }
        }
        Format::Debug => Payload::Debug {
            kind: r.u8()?,
            index: r.u30()?,
            reg: r.u8()?,
            extra: r.u30()?,
        },
        Format::Line => Payload::Line { line: r.u30()? },
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifyKind;
    use cranelift_entity::EntityRef;
    use crate::ir::Inst;

    fn graph() -> MethodGraph {
        MethodGraph::new(4, 8, 4)
    }

    #[test]
    fn simple_sequence() {
        // pushbyte 5; pushshort -2 (0xfffe as u30); add; returnvalue
        let code = [
            0x24, 5, //
            0x25, 0xfe, 0xff, 0x03, // u30 0xfffe
            0xa0, //
            0x48,
        ];
        let mut g = graph();
        decode(&mut g, &code).unwrap();
        assert_eq!(g.insts.len(), 4);
        assert_eq!(g.insts[Inst::new(0)].opcode, Opcode::PushByte);
        assert_eq!(g.insts[Inst::new(0)].payload, Payload::Imm { value: 5 });
        assert_eq!(g.insts[Inst::new(1)].payload, Payload::Imm { value: -2 });
        assert_eq!(g.insts[Inst::new(2)].opcode, Opcode::Add);
        assert_eq!(g.insts[Inst::new(2)].offset, 6);
        assert_eq!(g.insts[Inst::new(3)].opcode, Opcode::ReturnValue);
    }

    #[test]
    fn branch_targets_are_absolute() {
        // 0: jump +1 (to 5); 4: returnvoid; 5: returnvoid
        let code = [0x10, 1, 0, 0, 0x47, 0x47];
        let mut g = graph();
        decode(&mut g, &code).unwrap();
        match g.insts[Inst::new(0)].payload {
            Payload::Branch { target_offset, .. } => assert_eq!(target_offset, 5),
            ref p => panic!("unexpected payload {p:?}"),
        }
    }

    #[test]
    fn branch_out_of_method() {
        let code = [0x10, 0x40, 0, 0, 0x47];
        let mut g = graph();
        match decode(&mut g, &code) {
            Err(BodyError::Verify {
                kind: VerifyKind::BranchOffsetInvalid { .. },
                ..
            }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn truncated_operand() {
        let code = [0x2c, 0x80]; // pushstring with unterminated u30
        let mut g = graph();
        match decode(&mut g, &code) {
            Err(BodyError::Verify {
                kind: VerifyKind::AbcCorrupt,
                offset,
            }) => assert_eq!(offset, 0),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_opaque() {
        let code = [0x22, 0x47]; // 0x22 undefined, then returnvoid
        let mut g = graph();
        decode(&mut g, &code).unwrap();
        assert_eq!(g.insts[Inst::new(0)].opcode, Opcode::Unknown);
        assert_eq!(g.insts[Inst::new(1)].opcode, Opcode::ReturnVoid);
    }

    #[test]
    fn lookupswitch_table() {
        // 0: lookupswitch default=+11 count=1 (2 cases) case0=+11 case1=+12
        // 11,12: returnvoid
        let code = [
            0x1b, 11, 0, 0, 1, 11, 0, 0, 12, 0, 0, 0x47, 0x47,
        ];
        let mut g = graph();
        decode(&mut g, &code).unwrap();
        let table = match g.insts[Inst::new(0)].payload {
            Payload::Switch { table } => table,
            ref p => panic!("unexpected payload {p:?}"),
        };
        let jt = &g.jump_tables[table];
        assert_eq!(jt.default_offset, 11);
        assert_eq!(jt.case_offsets, vec![11, 12]);
    }
}
