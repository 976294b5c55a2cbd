//! SSA construction.
//!
//! Three stages over the flow graph:
//!
//! 1. **Shape discovery** — simulate abstract stack/scope depths through
//!    every reachable block without allocating values. This yields entry
//!    and exit depths (validated across edges), the minimum depth each
//!    block reaches (anything between the minimum and the exit depth was
//!    redefined by the block), and the set of locals each block writes.
//! 2. **Phi placement** — for every tracked slot, place a phi value at
//!    each block of the iterated dominance frontier of the slot's
//!    definition sites. Catch entries get a phi for every local and a
//!    fresh value for the caught exception.
//! 3. **Node assignment** — re-walk the blocks keeping a current value
//!    per slot, record popped operands and use edges on each
//!    instruction, allocate result values, and merge exit states into
//!    successor entry states (filling copied slots, extending phis).
//!    Finally, link catch-entry local phis to every definition inside
//!    their try range.

pub mod idf;

use crate::dominator_tree::DominatorTree;
use crate::error::{BodyError, BodyResult, VerifyKind};
use crate::ir::{
    Block, Inst, MethodGraph, Opcode, Payload, Slot, Value,
};
use avmlift_environ::{ConstPool, MethodInfo};
use cranelift_entity::packed_option::ReservedValue;
use cranelift_entity::{EntityList, EntityRef, SecondaryMap};
use smallvec::SmallVec;

use self::idf::DominanceFrontiers;

/// Per-block results of the shape pass.
#[derive(Clone, Default)]
struct Shape {
    seen: bool,
    entry_stack: u32,
    exit_stack: u32,
    entry_scope: u32,
    exit_scope: u32,
    /// Lowest stack depth reached while executing the block.
    min_stack: u32,
    /// Lowest scope depth reached.
    min_scope: u32,
    /// Bitset of written local registers.
    locals_written: Vec<u64>,
}

impl Shape {
    fn write_local(&mut self, index: u32, local_count: u32) {
        if self.locals_written.is_empty() {
            self.locals_written = vec![0; (local_count as usize + 63) / 64];
        }
        self.locals_written[index as usize / 64] |= 1u64 << (index % 64);
    }

    fn writes_local(&self, index: u32) -> bool {
        self.locals_written
            .get(index as usize / 64)
            .map_or(false, |w| w & (1u64 << (index % 64)) != 0)
    }
}

/// Run SSA construction over `graph`.
pub fn compute(
    graph: &mut MethodGraph,
    tree: &DominatorTree,
    method: &MethodInfo,
    pool: &dyn ConstPool,
) -> BodyResult<()> {
    let shapes = shape_pass(graph, tree, pool)?;
    place_phis(graph, tree, &shapes);
    seed_entry_locals(graph, method);
    link_pass(graph, tree, pool)?;
    link_catch_phis(graph, tree);
    log::trace!(
        "data flow: {} values, {} blocks with phis",
        graph.values.len(),
        graph
            .blocks
            .values()
            .filter(|b| b.flags.defines_phi())
            .count()
    );
    Ok(())
}

/// Stage 1: abstract depth simulation.
fn shape_pass(
    graph: &mut MethodGraph,
    tree: &DominatorTree,
    pool: &dyn ConstPool,
) -> BodyResult<SecondaryMap<Block, Shape>> {
    let mut shapes = SecondaryMap::<Block, Shape>::with_capacity(graph.blocks.len());
    let entry = graph.entry_block.expand().expect("flow graph was built");

    for &block in tree.rpo() {
        let (entry_stack, entry_scope) = if block == entry {
            (0, 0)
        } else if graph.blocks[block].flags.is_catch_entry() {
            // The catch entry starts with exactly the thrown value on
            // the stack and an unwound scope stack.
            (1, 0)
        } else {
            let pred = graph
                .preds(block)
                .iter()
                .copied()
                .find(|&p| shapes[p].seen)
                .expect("reverse postorder visits a predecessor first");
            (shapes[pred].exit_stack, shapes[pred].exit_scope)
        };

        let mut shape = Shape {
            seen: true,
            entry_stack,
            exit_stack: entry_stack,
            entry_scope,
            exit_scope: entry_scope,
            min_stack: entry_stack,
            min_scope: entry_scope,
            locals_written: Vec::new(),
        };

        for inst in graph.block_insts(block) {
            simulate_shape(graph, inst, &mut shape, pool)?;
        }

        shapes[block] = shape;
    }

    // Every edge must agree on depths; the first pass only pulled from
    // one predecessor.
    for &block in tree.rpo() {
        for &succ in graph.succs(block) {
            let expected = shapes[block].exit_stack;
            let found = shapes[succ].entry_stack;
            if expected != found {
                let offset = first_offset(graph, succ);
                return Err(BodyError::verify(
                    offset,
                    VerifyKind::StackDepthUnbalanced { expected, found },
                ));
            }
            if shapes[block].exit_scope != shapes[succ].entry_scope {
                let offset = first_offset(graph, succ);
                return Err(BodyError::verify(
                    offset,
                    VerifyKind::StackDepthUnbalanced {
                        expected: shapes[block].exit_scope,
                        found: shapes[succ].entry_scope,
                    },
                ));
            }
        }
    }

    // Record the depths on the blocks; later passes and the verifier
    // read them from there.
    for &block in tree.rpo() {
        let shape = &shapes[block];
        let data = &mut graph.blocks[block];
        data.entry_stack_depth = shape.entry_stack;
        data.entry_scope_depth = shape.entry_scope;
        data.exit_stack_depth = shape.exit_stack;
        data.exit_scope_depth = shape.exit_scope;
    }
    Ok(shapes)
}

fn first_offset(graph: &MethodGraph, block: Block) -> u32 {
    graph.blocks[block]
        .first
        .expand()
        .map_or(0, |i| graph.insts[i].offset)
}

/// Simulate one instruction's effect on abstract depths.
fn simulate_shape(
    graph: &MethodGraph,
    inst: Inst,
    shape: &mut Shape,
    pool: &dyn ConstPool,
) -> BodyResult<()> {
    let opcode = graph.insts[inst].opcode;
    let offset = graph.insts[inst].offset;
    let depth = shape.exit_stack;

    // Opcodes with stack requirements beyond their pop count.
    match opcode {
        Opcode::Swap => {
            if depth < 2 {
                return Err(BodyError::verify(offset, VerifyKind::StackUnderflow));
            }
            // Both swapped slots count as redefined by this block.
            shape.min_stack = shape.min_stack.min(depth - 2);
            return Ok(());
        }
        Opcode::Dup | Opcode::CheckFilter => {
            if depth < 1 {
                return Err(BodyError::verify(offset, VerifyKind::StackUnderflow));
            }
        }
        _ => {}
    }

    let pops = graph.expected_pops(inst, pool)?;
    if depth < pops {
        return Err(BodyError::verify(offset, VerifyKind::StackUnderflow));
    }
    let mut depth = depth - pops;
    shape.min_stack = shape.min_stack.min(depth);
    if opcode.pushes() {
        depth += 1;
        if depth > graph.max_stack {
            return Err(BodyError::verify(
                offset,
                VerifyKind::StackOverflow {
                    limit: graph.max_stack,
                },
            ));
        }
    }
    shape.exit_stack = depth;

    // Scope and local effects.
    match opcode {
        Opcode::PushScope | Opcode::PushWith => {
            shape.exit_scope += 1;
            if shape.exit_scope > graph.max_scope {
                return Err(BodyError::verify(
                    offset,
                    VerifyKind::ScopeStackOverflow {
                        limit: graph.max_scope,
                    },
                ));
            }
        }
        Opcode::PopScope => {
            if shape.exit_scope == 0 {
                return Err(BodyError::verify(offset, VerifyKind::ScopeStackUnderflow));
            }
            shape.exit_scope -= 1;
            shape.min_scope = shape.min_scope.min(shape.exit_scope);
        }
        Opcode::GetScopeObject => {
            let index = match graph.insts[inst].payload {
                Payload::Slot { index } => index,
                _ => 0,
            };
            if index >= shape.exit_scope {
                return Err(BodyError::verify(
                    offset,
                    VerifyKind::InvalidScopeIndex {
                        index,
                        depth: shape.exit_scope,
                    },
                ));
            }
        }
        _ => {}
    }

    match graph.insts[inst].payload {
        Payload::Local { index } if writes_local(opcode) => {
            shape.write_local(index, graph.local_count);
        }
        Payload::TwoLocals { object, index, .. } => {
            shape.write_local(object, graph.local_count);
            shape.write_local(index, graph.local_count);
        }
        _ => {}
    }
    Ok(())
}

fn writes_local(opcode: Opcode) -> bool {
    opcode.is_set_local()
        || matches!(
            opcode,
            Opcode::Kill
                | Opcode::IncLocal
                | Opcode::DecLocal
                | Opcode::IncLocalI
                | Opcode::DecLocalI
        )
}

/// Stage 2: allocate phi values at iterated dominance frontiers and
/// build every reachable block's entry-state vectors.
fn place_phis(graph: &mut MethodGraph, tree: &DominatorTree, shapes: &SecondaryMap<Block, Shape>) {
    let sentinel = Value::reserved_value();
    let entry = graph.entry_block.expand().expect("flow graph was built");
    let block_count = graph.blocks.len();

    // Entry-state vectors, all slots unset.
    for &block in tree.rpo() {
        let shape = &shapes[block];
        let stack = vec![sentinel; shape.entry_stack as usize];
        let scope = vec![sentinel; shape.entry_scope as usize];
        let locals = vec![sentinel; graph.local_count as usize];
        graph.blocks[block].stack_entry = EntityList::from_slice(&stack, &mut graph.value_lists);
        graph.blocks[block].scope_entry = EntityList::from_slice(&scope, &mut graph.value_lists);
        graph.blocks[block].locals_entry = EntityList::from_slice(&locals, &mut graph.value_lists);
    }

    let frontiers = DominanceFrontiers::compute(graph, tree);
    let max_stack_seen = tree
        .rpo()
        .iter()
        .map(|&b| shapes[b].exit_stack)
        .max()
        .unwrap_or(0);
    let max_scope_seen = tree
        .rpo()
        .iter()
        .map(|&b| shapes[b].exit_scope)
        .max()
        .unwrap_or(0);

    // Stack and scope slots: defined where the block's minimum depth
    // dips to (or below) the slot and the exit depth covers it again.
    for slot_index in 0..max_stack_seen {
        let defsites: Vec<Block> = tree
            .rpo()
            .iter()
            .copied()
            .filter(|&b| {
                let s = &shapes[b];
                s.min_stack <= slot_index && slot_index < s.exit_stack
            })
            .chain(catch_entries_defining_stack(graph, tree, slot_index))
            .collect();
        for block in frontiers.iterated(&defsites, block_count) {
            // A catch entry's single stack slot is always the caught
            // exception, never a phi.
            if slot_index < shapes[block].entry_stack
                && !graph.blocks[block].flags.is_catch_entry()
            {
                set_entry_phi(graph, block, Slot::stack(slot_index));
            }
        }
    }
    for slot_index in 0..max_scope_seen {
        let defsites: Vec<Block> = tree
            .rpo()
            .iter()
            .copied()
            .filter(|&b| {
                let s = &shapes[b];
                s.min_scope <= slot_index && slot_index < s.exit_scope
            })
            .collect();
        for block in frontiers.iterated(&defsites, block_count) {
            if slot_index < shapes[block].entry_scope {
                set_entry_phi(graph, block, Slot::scope(slot_index));
            }
        }
    }

    // Locals: the entry defines every local (arguments and undefined
    // initial values); catch entries also define every local.
    for index in 0..graph.local_count {
        let defsites: Vec<Block> = tree
            .rpo()
            .iter()
            .copied()
            .filter(|&b| {
                b == entry
                    || graph.blocks[b].flags.is_catch_entry()
                    || shapes[b].writes_local(index)
            })
            .collect();
        for block in frontiers.iterated(&defsites, block_count) {
            if block != entry && !graph.blocks[block].flags.is_catch_entry() {
                set_entry_phi(graph, block, Slot::local(index));
            }
        }
    }

    // Catch entries: a fresh value for the caught exception, and a phi
    // for every local (exceptions arrive at arbitrary points in the try
    // range, so every local is considered redefined).
    for &block in tree.rpo() {
        if !graph.blocks[block].flags.is_catch_entry() {
            continue;
        }
        let exc = graph.make_value(Slot::stack(0));
        graph.blocks[block].stack_entry.as_mut_slice(&mut graph.value_lists)[0] = exc;
        for n in 0..graph.handlers.len() {
            let h = crate::ir::Handler::new(n);
            if graph.handlers[h].target_block.expand() == Some(block) {
                graph.handlers[h].catch_value = exc.into();
            }
        }
        for index in 0..graph.local_count {
            set_entry_phi(graph, block, Slot::local(index));
        }
    }
}

fn catch_entries_defining_stack<'a>(
    graph: &'a MethodGraph,
    tree: &'a DominatorTree,
    slot_index: u32,
) -> impl Iterator<Item = Block> + 'a {
    tree.rpo()
        .iter()
        .copied()
        .filter(move |&b| slot_index == 0 && graph.blocks[b].flags.is_catch_entry())
}

/// Read `block`'s entry value for `slot`.
fn entry_slot(graph: &MethodGraph, block: Block, slot: Slot) -> Value {
    let index = slot.index as usize;
    match slot.kind {
        crate::ir::SlotKind::Stack => graph.blocks[block].stack_entry.get(index, &graph.value_lists),
        crate::ir::SlotKind::Scope => graph.blocks[block].scope_entry.get(index, &graph.value_lists),
        crate::ir::SlotKind::Local => {
            graph.blocks[block].locals_entry.get(index, &graph.value_lists)
        }
    }
    .expect("entry vector sized by shape pass")
}

/// Write `block`'s entry value for `slot`.
fn set_entry_slot(graph: &mut MethodGraph, block: Block, slot: Slot, value: Value) {
    let index = slot.index as usize;
    match slot.kind {
        crate::ir::SlotKind::Stack => {
            graph.blocks[block].stack_entry.as_mut_slice(&mut graph.value_lists)[index] = value;
        }
        crate::ir::SlotKind::Scope => {
            graph.blocks[block].scope_entry.as_mut_slice(&mut graph.value_lists)[index] = value;
        }
        crate::ir::SlotKind::Local => {
            graph.blocks[block].locals_entry.as_mut_slice(&mut graph.value_lists)[index] = value;
        }
    }
}

/// Install a phi as `block`'s entry value for `slot`, if one is not
/// already there.
fn set_entry_phi(graph: &mut MethodGraph, block: Block, slot: Slot) {
    if entry_slot(graph, block, slot) != Value::reserved_value() {
        return;
    }
    let phi = graph.make_phi(slot);
    set_entry_slot(graph, block, slot, phi);
    graph.blocks[block].flags.set_defines_phi();
}

/// Seed the method-entry locals: `this`, the declared parameters, the
/// rest array, and undefined for the remainder.
fn seed_entry_locals(graph: &mut MethodGraph, method: &MethodInfo) {
    let entry = graph.entry_block.expand().expect("flow graph was built");
    let param_count = method.params.len() as u32;
    let required = param_count - method.optional_count;
    for index in 0..graph.local_count {
        let v = graph.make_value(Slot::local(index));
        if index >= 1 && index <= param_count {
            graph.values[v].flags.set_argument();
            if index > required {
                graph.values[v].flags.set_push_optional_param();
            }
        }
        let slot = Slot::local(index);
        let current = entry_slot(graph, entry, slot);
        if current == Value::reserved_value() {
            set_entry_slot(graph, entry, slot, v);
        } else {
            // The method starts at a loop header; the entry slot is a
            // phi and the seeded value arrives as one of its sources.
            debug_assert!(graph.values[current].flags.is_phi());
            graph.add_phi_source(current, v);
        }
    }
}

/// Stage 3: walk the blocks assigning value ids and def/use edges.
fn link_pass(graph: &mut MethodGraph, tree: &DominatorTree, pool: &dyn ConstPool) -> BodyResult<()> {
    let sentinel = Value::reserved_value();
    let entry = graph.entry_block.expand().expect("flow graph was built");

    for &block in tree.rpo() {
        let mut stack: Vec<Value> = graph.blocks[block]
            .stack_entry
            .as_slice(&graph.value_lists)
            .to_vec();
        let mut scope: Vec<Value> = graph.blocks[block]
            .scope_entry
            .as_slice(&graph.value_lists)
            .to_vec();
        let mut locals: Vec<Value> = graph.blocks[block]
            .locals_entry
            .as_slice(&graph.value_lists)
            .to_vec();

        // The entry block sees phis seeded for loop headers at offset
        // zero; those phis receive the seeded arguments as sources.
        if block == entry {
            for slot in &mut locals {
                debug_assert_ne!(*slot, sentinel);
            }
        }
        debug_assert!(stack.iter().all(|&v| v != sentinel));
        debug_assert!(locals.iter().all(|&v| v != sentinel));

        let insts: SmallVec<[Inst; 16]> = graph.block_insts(block).collect();
        for inst in insts {
            link_inst(graph, inst, &mut stack, &mut scope, &mut locals, pool)?;
        }

        // Merge the exit state into each successor's entry state.
        let succs: SmallVec<[Block; 4]> = graph.succs(block).iter().copied().collect();
        for succ in succs {
            merge_into_entry(graph, succ, &stack, &scope, &locals);
        }
    }
    Ok(())
}

fn merge_into_entry(
    graph: &mut MethodGraph,
    succ: Block,
    stack: &[Value],
    scope: &[Value],
    locals: &[Value],
) {
    for (kind, exit) in [
        (crate::ir::SlotKind::Stack, stack),
        (crate::ir::SlotKind::Scope, scope),
        (crate::ir::SlotKind::Local, locals),
    ] {
        for (slot_index, &exit_value) in exit.iter().enumerate() {
            let slot = Slot {
                kind,
                index: slot_index as u32,
            };
            let entry_value = entry_slot(graph, succ, slot);
            if entry_value == Value::reserved_value() {
                set_entry_slot(graph, succ, slot, exit_value);
            } else if graph.values[entry_value].flags.is_phi() {
                graph.add_phi_source(entry_value, exit_value);
            } else {
                debug_assert_eq!(
                    entry_value, exit_value,
                    "non-phi entry slot fed by conflicting definitions"
                );
            }
        }
    }
}

/// Assign values and def/use edges for one instruction.
fn link_inst(
    graph: &mut MethodGraph,
    inst: Inst,
    stack: &mut Vec<Value>,
    scope: &mut Vec<Value>,
    locals: &mut [Value],
    pool: &dyn ConstPool,
) -> BodyResult<()> {
    let opcode = graph.insts[inst].opcode;

    // Special stack shapes first. None of these allocate values: `dup`
    // replicates the top id, `swap` rotates ids in place, and
    // `checkfilter` only observes the top.
    match opcode {
        Opcode::Swap => {
            let depth = stack.len();
            stack.swap(depth - 1, depth - 2);
            graph.insts[inst].payload = Payload::DupSwap {
                a: stack[depth - 1].into(),
                b: stack[depth - 2].into(),
            };
            return Ok(());
        }
        Opcode::Dup => {
            let top = *stack.last().expect("shape pass checked depth");
            graph.insts[inst].payload = Payload::DupSwap {
                a: top.into(),
                b: top.into(),
            };
            graph.insts[inst].pushed = top.into();
            stack.push(top);
            return Ok(());
        }
        Opcode::CheckFilter => {
            let top = *stack.last().expect("shape pass checked depth");
            graph.add_use(top, inst);
            graph.insts[inst].payload = Payload::DupSwap {
                a: top.into(),
                b: Default::default(),
            };
            return Ok(());
        }
        _ => {}
    }

    // Pops.
    let pops = graph.expected_pops(inst, pool)? as usize;
    if pops > 0 {
        let at = stack.len() - pops;
        let popped: SmallVec<[Value; 8]> = stack.drain(at..).collect();
        graph.set_popped(inst, &popped);
    }

    // Defs. Local reads and writes and scope pushes move existing ids
    // between slots instead of allocating: the identity method
    // (`getlocal0; returnvalue`) produces exactly one value.
    match opcode {
        Opcode::PushScope | Opcode::PushWith => {
            let v = graph.popped(inst)[0];
            if opcode == Opcode::PushWith {
                graph.values[v].flags.set_with_scope();
            }
            graph.insts[inst].pushed = v.into();
            scope.push(v);
        }
        Opcode::PopScope => {
            scope.pop();
        }
        Opcode::GetScopeObject => {
            let index = match graph.insts[inst].payload {
                Payload::Slot { index } => index,
                _ => 0,
            };
            let v = scope[index as usize];
            graph.insts[inst].pushed = v.into();
            stack.push(v);
        }
        Opcode::HasNext2 => {
            let (object, index) = match graph.insts[inst].payload {
                Payload::TwoLocals { object, index, .. } => (object, index),
                _ => unreachable!("hasnext2 payload"),
            };
            graph.add_use(locals[object as usize], inst);
            graph.add_use(locals[index as usize], inst);
            let ov = graph.make_def(inst, Slot::local(object));
            let iv = graph.make_def(inst, Slot::local(index));
            locals[object as usize] = ov;
            locals[index as usize] = iv;
            graph.insts[inst].payload = Payload::TwoLocals {
                object,
                index,
                object_value: ov.into(),
                index_value: iv.into(),
            };
            let v = graph.make_result(inst, Slot::stack(stack.len() as u32));
            stack.push(v);
        }
        Opcode::Kill => {
            // The register is dead; give it a fresh value the binder
            // types as undefined.
            let index = local_index(graph, inst);
            let v = graph.make_result(inst, Slot::local(index));
            locals[index as usize] = v;
        }
        Opcode::IncLocal | Opcode::DecLocal | Opcode::IncLocalI | Opcode::DecLocalI => {
            let index = local_index(graph, inst);
            graph.add_use(locals[index as usize], inst);
            let v = graph.make_result(inst, Slot::local(index));
            locals[index as usize] = v;
        }
        _ if opcode.is_set_local() => {
            let v = graph.popped(inst)[0];
            locals[local_index(graph, inst) as usize] = v;
        }
        _ if opcode.is_get_local() => {
            let v = locals[local_index(graph, inst) as usize];
            graph.insts[inst].pushed = v.into();
            stack.push(v);
        }
        _ if opcode.pushes() => {
            let v = graph.make_result(inst, Slot::stack(stack.len() as u32));
            stack.push(v);
        }
        _ => {}
    }
    Ok(())
}

fn local_index(graph: &MethodGraph, inst: Inst) -> u32 {
    match graph.insts[inst].payload {
        Payload::Local { index } => index,
        _ => unreachable!("local opcode carries a local payload"),
    }
}

/// The local registers written by `inst`, with the values written.
pub(crate) fn local_writes(graph: &MethodGraph, inst: Inst) -> SmallVec<[(u32, Value); 2]> {
    let data = &graph.insts[inst];
    let mut writes = SmallVec::new();
    match data.opcode {
        op if op.is_set_local() => {
            if let Some(&v) = graph.popped(inst).first() {
                writes.push((local_index(graph, inst), v));
            }
        }
        Opcode::Kill
        | Opcode::IncLocal
        | Opcode::DecLocal
        | Opcode::IncLocalI
        | Opcode::DecLocalI => {
            if let Some(v) = data.pushed.expand() {
                writes.push((local_index(graph, inst), v));
            }
        }
        Opcode::HasNext2 => {
            if let Payload::TwoLocals {
                object,
                index,
                object_value,
                index_value,
            } = data.payload
            {
                if let Some(v) = object_value.expand() {
                    writes.push((object, v));
                }
                if let Some(v) = index_value.expand() {
                    writes.push((index, v));
                }
            }
        }
        _ => {}
    }
    writes
}

/// Link catch-entry local phis: every value written to a local inside a
/// try range feeds the corresponding phi of the region's catch entry,
/// plus the value live when the region is entered.
fn link_catch_phis(graph: &mut MethodGraph, tree: &DominatorTree) {
    for n in 0..graph.handlers.len() {
        let h = crate::ir::Handler::new(n);
        let Some(catch) = graph.handlers[h].target_block.expand() else {
            continue;
        };
        if !tree.is_reachable(catch) {
            continue;
        }
        let Some(region_first) = graph.handlers[h].first_inst.expand() else {
            continue;
        };
        let region_block = graph.insts[region_first].block.unwrap();

        // The locals live when the region is entered.
        if tree.is_reachable(region_block) {
            let entry_locals: Vec<Value> = graph.blocks[region_block]
                .locals_entry
                .as_slice(&graph.value_lists)
                .to_vec();
            for (index, &live) in entry_locals.iter().enumerate() {
                if live == Value::reserved_value() {
                    continue;
                }
                let phi = catch_local_phi(graph, catch, index);
                if phi != live {
                    graph.add_phi_source(phi, live);
                }
            }
        }

        // Every value written inside the covered range.
        let first = region_first.index();
        let count = graph.handlers[h].inst_count as usize;
        for i in first..first + count {
            let inst = Inst::new(i);
            let in_reachable_block = graph.insts[inst]
                .block
                .expand()
                .map_or(false, |b| tree.is_reachable(b));
            if !in_reachable_block {
                continue;
            }
            for (index, v) in local_writes(graph, inst) {
                let phi = catch_local_phi(graph, catch, index as usize);
                graph.add_phi_source(phi, v);
            }
        }
    }
}

fn catch_local_phi(graph: &MethodGraph, catch: Block, index: usize) -> Value {
    graph.blocks[catch]
        .locals_entry
        .get(index, &graph.value_lists)
        .expect("catch entry has a full locals vector")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::flowgraph;
    use avmlift_environ::{
        CapturedScope, ClassId, ExceptionInfo, MethodFlags, Multiname, Namespace,
    };

    struct EmptyPool;

    impl ConstPool for EmptyPool {
        fn int(&self, _: u32) -> Option<i32> {
            None
        }
        fn uint(&self, _: u32) -> Option<u32> {
            None
        }
        fn double(&self, _: u32) -> Option<f64> {
            None
        }
        fn string(&self, _: u32) -> Option<&str> {
            None
        }
        fn namespace(&self, _: u32) -> Option<&Namespace> {
            None
        }
        fn multiname(&self, _: u32) -> Option<&Multiname> {
            None
        }
    }

    fn method() -> MethodInfo<'static> {
        static NO_PARAMS: [Option<ClassId>; 0] = [];
        static NO_SCOPE: [CapturedScope; 0] = [];
        MethodInfo {
            name: "test",
            flags: MethodFlags::from_bits(0),
            params: &NO_PARAMS,
            optional_count: 0,
            return_type: None,
            this_class: None,
            captured_scope: &NO_SCOPE,
        }
    }

    fn build(
        code: &[u8],
        exceptions: &[ExceptionInfo],
        locals: u32,
    ) -> BodyResult<(MethodGraph, DominatorTree)> {
        let mut g = MethodGraph::new(locals, 8, 4);
        decode::decode(&mut g, code)?;
        flowgraph::compute(&mut g, exceptions)?;
        let tree = DominatorTree::compute(&mut g);
        compute(&mut g, &tree, &method(), &EmptyPool)?;
        Ok((g, tree))
    }

    #[test]
    fn identity_method_graph() {
        // getlocal0; returnvalue
        let (g, _) = build(&[0xd0, 0x48], &[], 1).unwrap();
        assert_eq!(g.blocks.len(), 1);
        // Exactly one value: the entry `this` local. getlocal moves the
        // id onto the stack without copying.
        assert_eq!(g.values.len(), 1);
        let local = g.blocks[g.entry_block.unwrap()]
            .locals_entry
            .get(0, &g.value_lists)
            .unwrap();
        let ret = g.inst_at_offset(1).unwrap();
        assert_eq!(g.popped(ret), &[local]);
        let pushed_by_get = g.insts[g.inst_at_offset(0).unwrap()].pushed.unwrap();
        assert_eq!(pushed_by_get, local);
        // One use edge: the returnvalue pop.
        assert_eq!(g.use_count(local), 1);
    }

    #[test]
    fn stack_underflow_detected() {
        // add with one operand
        let err = build(&[0x24, 1, 0xa0, 0x48], &[], 1).unwrap_err();
        match err {
            BodyError::Verify {
                kind: VerifyKind::StackUnderflow,
                ..
            } => {}
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn loop_local_gets_phi() {
        // 0: pushbyte 0; 2: setlocal 1
        // 4: label (loop header)
        // 5: getlocal 1; 7: pushbyte 1; 9: add; 10: setlocal 1
        // 12: pushtrue; 13: iftrue -> 4
        // 17: returnvoid
        let code = [
            0x24, 0, 0x63, 1, 0x09, 0x62, 1, 0x24, 1, 0xa0, 0x63, 1, 0x26, 0x11, 0xf3, 0xff,
            0xff, 0x47,
        ];
        let (g, _) = build(&code, &[], 2).unwrap();
        let header = g
            .inst_at_offset(4)
            .and_then(|i| g.insts[i].block.expand())
            .unwrap();
        let phi = g.blocks[header]
            .locals_entry
            .get(1, &g.value_lists)
            .unwrap();
        assert!(g.values[phi].flags.is_phi());
        let sources = g.phi_sources(phi);
        assert_eq!(sources.len(), 2);
        // setlocal stores the producing value itself, so the sources are
        // the pushbyte constant and the add result.
        let defs: Vec<Opcode> = sources
            .iter()
            .map(|&s| g.insts[g.values[s].def.unwrap()].opcode)
            .collect();
        assert!(defs.contains(&Opcode::PushByte));
        assert!(defs.contains(&Opcode::Add));
        for &s in sources {
            assert!(g.values[s].flags.is_phi_source());
        }
    }

    #[test]
    fn swap_rotates_without_new_values() {
        // pushbyte 1; pushbyte 2; swap; pop; pop; returnvoid
        let code = [0x24, 1, 0x24, 2, 0x2b, 0x29, 0x29, 0x47];
        let (g, _) = build(&code, &[], 1).unwrap();
        let first = g.insts[g.inst_at_offset(0).unwrap()].pushed.unwrap();
        let second = g.insts[g.inst_at_offset(2).unwrap()].pushed.unwrap();
        let pop1 = g.inst_at_offset(5).unwrap();
        let pop2 = g.inst_at_offset(6).unwrap();
        // After the swap the first push is on top.
        assert_eq!(g.popped(pop1), &[first]);
        assert_eq!(g.popped(pop2), &[second]);
        match g.insts[g.inst_at_offset(4).unwrap()].payload {
            Payload::DupSwap { a, b } => {
                assert_eq!(a.expand(), Some(first));
                assert_eq!(b.expand(), Some(second));
            }
            ref p => panic!("unexpected payload {p:?}"),
        }
    }

    #[test]
    fn catch_entry_local_phis() {
        // 0: pushbyte 0; 2: setlocal 1
        // try [4, 10):
        //   4: pushbyte 9; 6: setlocal 1; 8: pushnull; 9: throw
        // 10: returnvoid (unreachable)
        // 11: setlocal 2 (catch entry: stores the exception)
        // 13: returnvoid
        let code = [
            0x24, 0, 0x63, 1, 0x24, 9, 0x63, 1, 0x20, 0x03, 0x47, 0x63, 2, 0x47,
        ];
        let exceptions = [ExceptionInfo {
            from: 4,
            to: 10,
            target: 11,
            type_name: 0,
            var_name: 0,
        }];
        let (g, _) = build(&code, &exceptions, 3).unwrap();
        let catch = g.handlers[crate::ir::Handler::new(0)]
            .target_block
            .unwrap();
        assert!(g.blocks[catch].flags.is_catch_entry());
        // The caught exception value exists on the catch entry stack.
        let exc = g.handlers[crate::ir::Handler::new(0)].catch_value.unwrap();
        assert_eq!(
            g.blocks[catch].stack_entry.get(0, &g.value_lists),
            Some(exc)
        );
        // Local 1 is written inside the try; its catch phi has the
        // inside definition and the region-entry value as sources.
        let phi = g.blocks[catch].locals_entry.get(1, &g.value_lists).unwrap();
        assert!(g.values[phi].flags.is_phi());
        assert_eq!(g.phi_sources(phi).len(), 2);
    }
}
