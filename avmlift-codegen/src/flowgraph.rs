//! Control-flow assembly.
//!
//! Partitions the decoded instruction stream into basic blocks, records
//! predecessor/successor edges, and expands exception regions: every
//! block inside a try range that contains at least one
//! potentially-throwing instruction gets an edge to the region's catch
//! entry (and to each enclosing region's catch entry). The
//! over-approximation is intentional; exception edges are kept on a
//! separate list so ordinary flow analyses see only the normal edges.

use crate::error::{BodyError, BodyResult, VerifyKind};
use crate::ir::{Block, Flow, Handler, Inst, MethodGraph, Opcode, Payload};
use avmlift_environ::ExceptionInfo;
use cranelift_entity::{EntityRef, SecondaryMap};

/// Build blocks, edges and exception regions for `graph`.
pub fn compute(graph: &mut MethodGraph, exceptions: &[ExceptionInfo]) -> BodyResult<()> {
    if graph.insts.len() == 0 {
        return Err(BodyError::verify(0, VerifyKind::CodeFalloff));
    }
    make_handlers(graph, exceptions)?;
    let leaders = find_leaders(graph)?;
    make_blocks(graph, &leaders);
    link_edges(graph)?;
    expand_exception_regions(graph)?;
    log::trace!(
        "control flow: {} blocks, {} handlers",
        graph.blocks.len(),
        graph.handlers.len()
    );
    Ok(())
}

/// Create handler records and compute their nesting.
fn make_handlers(graph: &mut MethodGraph, exceptions: &[ExceptionInfo]) -> BodyResult<()> {
    for exc in exceptions {
        if exc.from >= exc.to {
            return Err(BodyError::verify(exc.from, VerifyKind::EhRangeInvalid));
        }
        graph.handlers.push(crate::ir::HandlerData {
            from: exc.from,
            to: exc.to,
            target_offset: exc.target,
            type_name: exc.type_name,
            var_name: exc.var_name,
            ..Default::default()
        });
    }

    // Parent = the smallest region properly containing this one. Any two
    // overlapping regions must nest.
    let handlers: Vec<(u32, u32)> = graph.handlers.values().map(|h| (h.from, h.to)).collect();
    for (i, &(from, to)) in handlers.iter().enumerate() {
        let mut parent: Option<usize> = None;
        for (j, &(pfrom, pto)) in handlers.iter().enumerate() {
            if i == j {
                continue;
            }
            let contains = pfrom <= from && to <= pto && (pto - pfrom) > (to - from);
            let disjoint = pto <= from || to <= pfrom;
            let contained = from <= pfrom && pto <= to;
            if !contains && !disjoint && !contained {
                return Err(BodyError::verify(from, VerifyKind::EhRangeInvalid));
            }
            if contains {
                match parent {
                    Some(p) => {
                        let (cfrom, cto) = handlers[p];
                        if (pto - pfrom) < (cto - cfrom) {
                            parent = Some(j);
                        }
                    }
                    None => parent = Some(j),
                }
            }
        }
        if let Some(p) = parent {
            graph.handlers[Handler::new(i)].parent = Handler::new(p).into();
        }
    }
    Ok(())
}

/// Collect the set of instructions that start a block.
fn find_leaders(graph: &MethodGraph) -> BodyResult<Vec<Inst>> {
    let mut is_leader = SecondaryMap::<Inst, bool>::new();
    is_leader.resize(graph.insts.len());
    is_leader[Inst::new(0)] = true;

    let at_boundary = |offset: u32, err: BodyError| -> BodyResult<Inst> {
        graph.inst_at_offset(offset).ok_or(err)
    };

    for (inst, data) in graph.insts.iter() {
        match data.payload {
            Payload::Branch { target_offset, .. } => {
                let target = at_boundary(
                    target_offset,
                    BodyError::verify(
                        data.offset,
                        VerifyKind::BranchOffsetInvalid {
                            target: target_offset as i64,
                        },
                    ),
                )?;
                is_leader[target] = true;
            }
            Payload::Switch { table } => {
                let jt = &graph.jump_tables[table];
                for offset in core::iter::once(jt.default_offset).chain(jt.case_offsets.iter().copied())
                {
                    let target = at_boundary(
                        offset,
                        BodyError::verify(
                            data.offset,
                            VerifyKind::BranchOffsetInvalid {
                                target: offset as i64,
                            },
                        ),
                    )?;
                    is_leader[target] = true;
                }
            }
            _ => {}
        }
        if data.opcode.ends_block() {
            let next = inst.index() + 1;
            if next < graph.insts.len() {
                is_leader[Inst::new(next)] = true;
            }
        }
    }

    // Exception boundaries split blocks so regions align with them.
    for handler in graph.handlers.values() {
        let eh = BodyError::verify(handler.from, VerifyKind::EhRangeInvalid);
        is_leader[at_boundary(handler.from, eh.clone())?] = true;
        if let Some(end) = graph.inst_at_offset(handler.to) {
            is_leader[end] = true;
        }
        is_leader[at_boundary(handler.target_offset, eh)?] = true;
    }

    Ok(graph
        .insts
        .keys()
        .filter(|&i| is_leader[i])
        .collect())
}

/// Create one block per leader and assign every instruction to its block.
fn make_blocks(graph: &mut MethodGraph, leaders: &[Inst]) {
    for (n, &first) in leaders.iter().enumerate() {
        let end = leaders
            .get(n + 1)
            .map_or(graph.insts.len(), |next| next.index());
        let block = graph.make_block();
        graph.blocks[block].first = first.into();
        graph.blocks[block].inst_count = (end - first.index()) as u32;
        for i in first.index()..end {
            graph.insts[Inst::new(i)].block = block.into();
        }
        graph.insts[first].flags.set_block_start();
        graph.insts[Inst::new(end - 1)].flags.set_block_end();
    }
    graph.entry_block = graph.insts[Inst::new(0)].block;
}

/// Record normal successor/predecessor edges and resolve branch targets
/// to blocks.
fn link_edges(graph: &mut MethodGraph) -> BodyResult<()> {
    let block_count = graph.blocks.len();
    for n in 0..block_count {
        let block = Block::new(n);
        let last = graph
            .block_last_inst(block)
            .expect("blocks are never empty");
        let data = &graph.insts[last];
        let offset = data.offset;
        let opcode = data.opcode;
        let fallthrough = || -> BodyResult<Block> {
            if n + 1 < block_count {
                Ok(Block::new(n + 1))
            } else {
                Err(BodyError::verify(offset, VerifyKind::CodeFalloff))
            }
        };
        match opcode.flow() {
            Flow::Next => {
                let next = fallthrough()?;
                graph.add_edge(block, next);
            }
            Flow::Branch => {
                let target = branch_block(graph, last)?;
                graph.add_edge(block, target);
            }
            Flow::CondBranch => {
                let next = fallthrough()?;
                let target = branch_block(graph, last)?;
                graph.add_edge(block, next);
                graph.add_edge(block, target);
            }
            Flow::Switch => {
                let table = match graph.insts[last].payload {
                    Payload::Switch { table } => table,
                    _ => unreachable!("switch flow implies switch payload"),
                };
                let mut targets = Vec::new();
                {
                    let jt = &graph.jump_tables[table];
                    targets.push(jt.default_offset);
                    targets.extend(jt.case_offsets.iter().copied());
                }
                let mut blocks = Vec::with_capacity(targets.len());
                for t in &targets {
                    let inst = graph.inst_at_offset(*t).expect("leader collection checked");
                    blocks.push(
                        graph.insts[inst]
                            .block
                            .expand()
                            .expect("instruction assigned to a block"),
                    );
                }
                for &b in &blocks {
                    graph.add_edge(block, b);
                }
                let jt = &mut graph.jump_tables[table];
                jt.default_block = blocks[0].into();
                jt.case_blocks = blocks[1..].to_vec();
            }
            Flow::Return | Flow::Throw => {}
        }
    }
    Ok(())
}

/// The target block of a branch instruction; also fills the payload's
/// block field.
fn branch_block(graph: &mut MethodGraph, inst: Inst) -> BodyResult<Block> {
    let (target_offset, offset) = match graph.insts[inst].payload {
        Payload::Branch { target_offset, .. } => (target_offset, graph.insts[inst].offset),
        _ => unreachable!("branch flow implies branch payload"),
    };
    let target_inst = graph.inst_at_offset(target_offset).ok_or_else(|| {
        BodyError::verify(
            offset,
            VerifyKind::BranchOffsetInvalid {
                target: target_offset as i64,
            },
        )
    })?;
    let block = graph.insts[target_inst]
        .block
        .expand()
        .expect("instruction assigned to a block");
    if let Payload::Branch { ref mut target, .. } = graph.insts[inst].payload {
        *target = block.into();
    }
    Ok(block)
}

/// Assign blocks to regions, mark catch entries, and add exception
/// edges.
fn expand_exception_regions(graph: &mut MethodGraph) -> BodyResult<()> {
    let handler_count = graph.handlers.len();
    for n in 0..handler_count {
        let h = Handler::new(n);
        let (from, to, target_offset) = {
            let data = &graph.handlers[h];
            (data.from, data.to, data.target_offset)
        };

        let first = graph
            .inst_at_offset(from)
            .ok_or_else(|| BodyError::verify(from, VerifyKind::EhRangeInvalid))?;
        let mut count = 0u32;
        for i in first.index()..graph.insts.len() {
            if graph.insts[Inst::new(i)].offset >= to {
                break;
            }
            count += 1;
        }
        if count == 0 {
            return Err(BodyError::verify(from, VerifyKind::EhRangeInvalid));
        }
        graph.handlers[h].first_inst = first.into();
        graph.handlers[h].inst_count = count;

        let target_inst = graph
            .inst_at_offset(target_offset)
            .ok_or_else(|| BodyError::verify(from, VerifyKind::EhRangeInvalid))?;
        let target_block = graph.insts[target_inst].block.unwrap();
        graph.handlers[h].target_block = target_block.into();
        graph.blocks[target_block].flags.set_catch_entry();

        // Flattened catch targets: this region's, then each ancestor's.
        let mut cur = Some(h);
        while let Some(handler) = cur {
            if let Some(t) = graph.handlers[handler].target_block.expand() {
                graph.handlers[h].catch_blocks.push(t, &mut graph.block_lists);
            }
            cur = graph.handlers[handler].parent.expand();
        }
    }

    // Innermost covering region per block, and the exception edges
    // themselves. Blocks were split at region boundaries, so testing the
    // first instruction's offset is enough.
    let block_count = graph.blocks.len();
    for n in 0..block_count {
        let block = Block::new(n);
        let first_offset = {
            let first = graph.blocks[block].first.unwrap();
            graph.insts[first].offset
        };
        let mut innermost: Option<Handler> = None;
        for (h, data) in graph.handlers.iter() {
            if data.covers_offset(first_offset) {
                let better = match innermost {
                    Some(cur) => {
                        let c = &graph.handlers[cur];
                        (data.to - data.from) < (c.to - c.from)
                    }
                    None => true,
                };
                if better {
                    innermost = Some(h);
                }
            }
        }
        let Some(region) = innermost else { continue };
        graph.blocks[block].handler = region.into();

        let can_throw = graph
            .block_insts(block)
            .any(|i| graph.insts[i].opcode.can_throw());
        if !can_throw {
            continue;
        }
        // Edges to the catch entry of every covering region, not just
        // the innermost chain; same-extent sibling regions both apply.
        let catches: Vec<Block> = graph
            .handlers
            .values()
            .filter(|h| h.covers_offset(first_offset))
            .filter_map(|h| h.target_block.expand())
            .collect();
        for catch in catches {
            if !graph.catch_succs(block).contains(&catch) {
                graph.blocks[block].catch_succs.push(catch, &mut graph.block_lists);
            }
        }
    }

    Ok(())
}

/// Reject unknown opcodes inside any block reachable in the CFG. Called
/// by the dominator pass once reachability is known.
pub fn check_reachable_opcodes(graph: &MethodGraph) -> BodyResult<()> {
    for (block, data) in graph.blocks.iter() {
        if !data.is_reachable() {
            continue;
        }
        for inst in graph.block_insts(block) {
            let inst_data = &graph.insts[inst];
            if inst_data.opcode == Opcode::Unknown {
                let byte = match inst_data.payload {
                    Payload::Imm { value } => value as u8,
                    _ => 0,
                };
                return Err(BodyError::verify(
                    inst_data.offset,
                    VerifyKind::IllegalOpcode { byte },
                ));
            }
        }
    }
    Ok(())
}

/// Every local register index in operand payloads must be in range.
pub fn check_local_indices(graph: &MethodGraph) -> BodyResult<()> {
    let count = graph.local_count;
    for data in graph.insts.values() {
        let bad = |index: u32| {
            Err(BodyError::verify(
                data.offset,
                VerifyKind::InvalidRegister { index, count },
            ))
        };
        match data.payload {
            Payload::Local { index } if index >= count => return bad(index),
            Payload::TwoLocals { object, index, .. } => {
                if object >= count {
                    return bad(object);
                }
                if index >= count {
                    return bad(index);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    fn build(code: &[u8], exceptions: &[ExceptionInfo]) -> BodyResult<MethodGraph> {
        let mut g = MethodGraph::new(4, 8, 4);
        decode::decode(&mut g, code)?;
        compute(&mut g, exceptions)?;
        Ok(g)
    }

    #[test]
    fn straight_line_is_one_block() {
        let g = build(&[0x24, 1, 0x24, 2, 0xa0, 0x48], &[]).unwrap();
        assert_eq!(g.blocks.len(), 1);
        let b = g.entry_block.unwrap();
        assert_eq!(g.blocks[b].inst_count, 4);
        assert!(g.succs(b).is_empty());
    }

    #[test]
    fn diamond() {
        // 0: pushtrue
        // 1: iffalse +3 -> 8
        // 5: pushbyte 1
        // 7: returnvalue            (block of 5..8)
        // 8: pushbyte 2
        // 10: returnvalue
        let code = [0x26, 0x12, 3, 0, 0, 0x24, 1, 0x48, 0x24, 2, 0x48];
        let g = build(&code, &[]).unwrap();
        assert_eq!(g.blocks.len(), 3);
        let entry = g.entry_block.unwrap();
        assert_eq!(g.succs(entry).len(), 2);
        for &s in g.succs(entry) {
            assert_eq!(g.preds(s), &[entry]);
            assert!(g.succs(s).is_empty());
        }
    }

    #[test]
    fn fall_off_end() {
        let err = build(&[0x24, 1], &[]).unwrap_err();
        match err {
            BodyError::Verify {
                kind: VerifyKind::CodeFalloff,
                ..
            } => {}
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn backward_branch_makes_loop() {
        // 0: label; 1: jump -5 -> 0
        let code = [0x09, 0x10, 0xfb, 0xff, 0xff];
        let g = build(&code, &[]).unwrap();
        assert_eq!(g.blocks.len(), 1);
        let b = g.entry_block.unwrap();
        assert_eq!(g.succs(b), &[b]);
    }

    #[test]
    fn exception_region_edges() {
        // 0: nop; 1: pushnull; 2: throw (try 0..3); 3: returnvoid;
        // 4: pop (catch entry); 5: returnvoid
        let code = [0x02, 0x20, 0x03, 0x47, 0x29, 0x47];
        let exceptions = [ExceptionInfo {
            from: 0,
            to: 3,
            target: 4,
            type_name: 0,
            var_name: 0,
        }];
        let g = build(&code, &exceptions).unwrap();
        let h = Handler::new(0);
        let catch = g.handlers[h].target_block.unwrap();
        assert!(g.blocks[catch].flags.is_catch_entry());
        // The try block contains `throw`, which can raise.
        let entry = g.entry_block.unwrap();
        assert_eq!(g.catch_succs(entry), &[catch]);
        assert_eq!(g.blocks[entry].handler.expand(), Some(h));
    }

    #[test]
    fn inverted_region_rejected() {
        let code = [0x02, 0x47];
        let exceptions = [ExceptionInfo {
            from: 1,
            to: 1,
            target: 0,
            type_name: 0,
            var_name: 0,
        }];
        match build(&code, &exceptions) {
            Err(BodyError::Verify {
                kind: VerifyKind::EhRangeInvalid,
                ..
            }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn overlapping_regions_rejected() {
        let code = [0x02, 0x02, 0x02, 0x02, 0x47, 0x47];
        let exceptions = [
            ExceptionInfo {
                from: 0,
                to: 3,
                target: 5,
                type_name: 0,
                var_name: 0,
            },
            ExceptionInfo {
                from: 2,
                to: 4,
                target: 5,
                type_name: 0,
                var_name: 0,
            },
        ];
        match build(&code, &exceptions) {
            Err(BodyError::Verify {
                kind: VerifyKind::EhRangeInvalid,
                ..
            }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }
}
