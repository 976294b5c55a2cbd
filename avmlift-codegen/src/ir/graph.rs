//! The per-method compilation arena.
//!
//! `MethodGraph` owns every instruction, block, value, handler, jump
//! table and resolved-property record produced while compiling one
//! method, plus the list pools backing their edge lists. The whole arena
//! is created by the decode/control-flow/data-flow passes, mutated by the
//! binder, and dropped en masse when the method is done. Nothing in here
//! escapes; the code generator consumes the graph by reference.

use crate::error::{BodyError, BodyResult, VerifyKind};
use crate::ir::block::BlockData;
use crate::ir::entities::{Block, Handler, Inst, JumpTable, PropRef, Value};
use crate::ir::handler::HandlerData;
use crate::ir::instruction::{InstData, JumpTableData, ValueList};
use crate::ir::node::{PhiCoercion, Slot, ValueData};
use crate::ir::opcodes::Opcode;
use crate::ir::prop::ResolvedProperty;
use avmlift_environ::ConstPool;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{EntityList, EntityRef, ListPool, PrimaryMap};

/// The per-method arena. See the module docs.
#[derive(Debug)]
pub struct MethodGraph {
    /// Instructions, in source order.
    pub insts: PrimaryMap<Inst, InstData>,
    /// Basic blocks, in source order.
    pub blocks: PrimaryMap<Block, BlockData>,
    /// SSA values.
    pub values: PrimaryMap<Value, ValueData>,
    /// Exception regions, in declaration order.
    pub handlers: PrimaryMap<Handler, HandlerData>,
    /// `lookupswitch` tables.
    pub jump_tables: PrimaryMap<JumpTable, JumpTableData>,
    /// Resolved property records.
    pub props: PrimaryMap<PropRef, ResolvedProperty>,
    /// Pool backing value lists (popped operands, entry states, phi
    /// sources).
    pub value_lists: ListPool<Value>,
    /// Pool backing per-value use lists.
    pub inst_lists: ListPool<Inst>,
    /// Pool backing block edge lists.
    pub block_lists: ListPool<Block>,
    /// Coercions required on phi edges, filled by the binder.
    pub phi_coercions: Vec<PhiCoercion>,
    /// The entry block.
    pub entry_block: PackedOption<Block>,
    /// Declared local register count.
    pub local_count: u32,
    /// Declared operand-stack limit.
    pub max_stack: u32,
    /// Declared scope-stack slot limit for this body.
    pub max_scope: u32,
}

impl MethodGraph {
    /// An empty arena with the given declared limits.
    pub fn new(local_count: u32, max_stack: u32, max_scope: u32) -> Self {
        Self {
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            values: PrimaryMap::new(),
            handlers: PrimaryMap::new(),
            jump_tables: PrimaryMap::new(),
            props: PrimaryMap::new(),
            value_lists: ListPool::new(),
            inst_lists: ListPool::new(),
            block_lists: ListPool::new(),
            phi_coercions: Vec::new(),
            entry_block: Default::default(),
            local_count,
            max_stack,
            max_scope,
        }
    }

    /// Append a decoded instruction.
    pub fn make_inst(&mut self, data: InstData) -> Inst {
        self.insts.push(data)
    }

    /// Create an empty block.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::new())
    }

    /// Create a value with no def.
    pub fn make_value(&mut self, slot: Slot) -> Value {
        self.values.push(ValueData::new(slot))
    }

    /// Create a phi value.
    pub fn make_phi(&mut self, slot: Slot) -> Value {
        let v = self.values.push(ValueData::new(slot));
        self.values[v].flags.set_phi();
        v
    }

    /// Create the result value of `inst` in `slot` and link the def edge.
    pub fn make_result(&mut self, inst: Inst, slot: Slot) -> Value {
        let v = self.make_def(inst, slot);
        self.insts[inst].pushed = v.into();
        v
    }

    /// Create a value defined by `inst` without recording it as the
    /// instruction's pushed result (`hasnext2` local writes).
    pub fn make_def(&mut self, inst: Inst, slot: Slot) -> Value {
        let v = self.values.push(ValueData::new(slot));
        self.values[v].def = inst.into();
        v
    }

    /// Record the popped operands of `inst` and add one use edge per
    /// popped value.
    pub fn set_popped(&mut self, inst: Inst, popped: &[Value]) {
        let list = ValueList::from_slice(popped, &mut self.value_lists);
        self.insts[inst].popped = list;
        if popped.len() == 1 {
            self.insts[inst].flags.set_single_pop();
        }
        for &v in popped {
            self.add_use(v, inst);
        }
    }

    /// The popped operands of `inst`, bottom of stack first.
    pub fn popped(&self, inst: Inst) -> &[Value] {
        self.insts[inst].popped.as_slice(&self.value_lists)
    }

    /// Add a use edge: `inst` consumes `v`.
    ///
    /// The first use is stored inline; a second use promotes to a pooled
    /// list.
    pub fn add_use(&mut self, v: Value, inst: Inst) {
        let data = &mut self.values[v];
        if data.flags.has_many_uses() {
            data.use_list.push(inst, &mut self.inst_lists);
        } else if let Some(first) = data.use_first.expand() {
            let mut list = EntityList::new();
            list.push(first, &mut self.inst_lists);
            list.push(inst, &mut self.inst_lists);
            data.use_list = list;
            data.use_first = Default::default();
            data.flags.set_many_uses();
        } else {
            data.use_first = inst.into();
        }
    }

    /// Iterate the instructions consuming `v`.
    pub fn uses(&self, v: Value) -> impl Iterator<Item = Inst> + '_ {
        let data = &self.values[v];
        let (single, list) = if data.flags.has_many_uses() {
            (None, data.use_list.as_slice(&self.inst_lists))
        } else {
            (data.use_first.expand(), &[][..])
        };
        single.into_iter().chain(list.iter().copied())
    }

    /// Total consumer count: instruction uses plus phi edges.
    pub fn use_count(&self, v: Value) -> usize {
        let data = &self.values[v];
        let insts = if data.flags.has_many_uses() {
            data.use_list.len(&self.inst_lists)
        } else {
            data.use_first.is_some() as usize
        };
        insts + data.phi_use_count as usize
    }

    /// The single consuming instruction, when `v` has exactly one
    /// consumer and it is an instruction.
    pub fn sole_use(&self, v: Value) -> Option<Inst> {
        if self.use_count(v) != 1 {
            return None;
        }
        self.uses(v).next()
    }

    /// Add `source` as a phi source of `phi` (deduplicated).
    pub fn add_phi_source(&mut self, phi: Value, source: Value) {
        debug_assert!(self.values[phi].flags.is_phi());
        if self.phi_sources(phi).contains(&source) {
            return;
        }
        self.values[phi].phi_sources.push(source, &mut self.value_lists);
        self.values[source].flags.set_phi_source();
        self.values[source].phi_use_count += 1;
    }

    /// The sources of a phi.
    pub fn phi_sources(&self, phi: Value) -> &[Value] {
        self.values[phi].phi_sources.as_slice(&self.value_lists)
    }

    /// Add a CFG edge (deduplicated).
    pub fn add_edge(&mut self, from: Block, to: Block) {
        if self.succs(from).contains(&to) {
            return;
        }
        self.blocks[from].succs.push(to, &mut self.block_lists);
        self.blocks[to].preds.push(from, &mut self.block_lists);
    }

    /// Successor blocks of `b` (normal edges).
    pub fn succs(&self, b: Block) -> &[Block] {
        self.blocks[b].succs.as_slice(&self.block_lists)
    }

    /// Predecessor blocks of `b` (normal edges).
    pub fn preds(&self, b: Block) -> &[Block] {
        self.blocks[b].preds.as_slice(&self.block_lists)
    }

    /// Catch entries reachable from `b`.
    pub fn catch_succs(&self, b: Block) -> &[Block] {
        self.blocks[b].catch_succs.as_slice(&self.block_lists)
    }

    /// The instructions of `b`, in source order.
    pub fn block_insts(&self, b: Block) -> impl Iterator<Item = Inst> {
        let data = &self.blocks[b];
        let first = data.first.expand().map_or(0, |i| i.index());
        (first..first + data.inst_count as usize).map(Inst::new)
    }

    /// The block's terminating instruction, if the block is non-empty.
    pub fn block_last_inst(&self, b: Block) -> Option<Inst> {
        let data = &self.blocks[b];
        let first = data.first.expand()?;
        if data.inst_count == 0 {
            return None;
        }
        Some(Inst::new(first.index() + data.inst_count as usize - 1))
    }

    /// Find the instruction starting at byte `offset`.
    ///
    /// Instructions are stored in source order, so this is a binary
    /// search.
    pub fn inst_at_offset(&self, offset: u32) -> Option<Inst> {
        let mut lo = 0usize;
        let mut hi = self.insts.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let at = self.insts[Inst::new(mid)].offset;
            if at == offset {
                return Some(Inst::new(mid));
            } else if at < offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    }

    /// A fresh resolved-property record.
    pub fn make_prop(&mut self) -> PropRef {
        self.props.push(ResolvedProperty::default())
    }

    /// Catch successors plus normal successors, for reachability walks.
    pub fn all_succs(&self, b: Block) -> impl Iterator<Item = Block> + '_ {
        self.succs(b)
            .iter()
            .chain(self.catch_succs(b).iter())
            .copied()
    }

    /// The exact number of values `inst` must pop, resolving
    /// multiname-dependent and argument-count-dependent opcodes.
    pub fn expected_pops(&self, inst: Inst, pool: &dyn ConstPool) -> BodyResult<u32> {
        let data = &self.insts[inst];
        if let Some(n) = data.opcode.static_pops() {
            return Ok(n);
        }
        let rt = match data.payload.multiname_index() {
            Some(index) => self
                .multiname_runtime_args(index, data.offset, pool)?,
            None => 0,
        };
        let argc = data.payload.argc().unwrap_or(0);
        let base = match data.opcode {
            Opcode::GetSuper
            | Opcode::GetProperty
            | Opcode::DeleteProperty
            | Opcode::GetDescendants => 1,
            Opcode::SetSuper | Opcode::SetProperty | Opcode::InitProperty => 2,
            Opcode::FindProperty | Opcode::FindPropStrict => 0,
            Opcode::CallProperty
            | Opcode::CallPropLex
            | Opcode::CallPropVoid
            | Opcode::CallSuper
            | Opcode::CallSuperVoid
            | Opcode::ConstructProp => 1,
            Opcode::Call => 2,
            Opcode::Construct
            | Opcode::ConstructSuper
            | Opcode::CallMethod
            | Opcode::CallStatic
            | Opcode::ApplyType => 1,
            Opcode::NewObject => return Ok(2 * argc),
            Opcode::NewArray => return Ok(argc),
            _ => 0,
        };
        Ok(base + argc + rt)
    }

    fn multiname_runtime_args(
        &self,
        index: u32,
        offset: u32,
        pool: &dyn ConstPool,
    ) -> BodyResult<u32> {
        let mn = pool
            .multiname(index)
            .ok_or_else(|| BodyError::verify(offset, VerifyKind::InvalidMultiname { index }))?;
        Ok(mn.runtime_arg_count())
    }

    /// The flattened catch-target list of `handler`.
    pub fn handler_catch_blocks(&self, handler: Handler) -> &[Block] {
        self.handlers[handler].catch_blocks.as_slice(&self.block_lists)
    }

    /// Structural consistency checks over a fully bound graph, for
    /// debugging and the test suites: pop arity, depth balance across
    /// edges, phi source subtyping (modulo recorded edge coercions), no
    /// leftover untyped values, and the no-push contract.
    pub fn verify_invariants(
        &self,
        pool: &dyn ConstPool,
        registry: &dyn avmlift_environ::ClassRegistry,
        this_class: Option<avmlift_environ::ClassId>,
    ) -> Result<(), String> {
        use crate::binder::lattice::TypeEnv;
        use crate::ir::node::DataType;
        let env = TypeEnv {
            registry,
            this_class,
        };

        for (inst, data) in self.insts.iter() {
            let Some(block) = data.block.expand() else {
                continue;
            };
            if !self.blocks[block].is_reachable() {
                continue;
            }
            let expected = self
                .expected_pops(inst, pool)
                .map_err(|e| format!("{inst}: {e}"))?;
            let found = data.popped.len(&self.value_lists) as u32;
            if expected != found {
                return Err(format!("{inst}: pops {found}, opcode expects {expected}"));
            }
        }

        for (block, data) in self.blocks.iter() {
            if !data.is_reachable() {
                continue;
            }
            for &succ in self.succs(block) {
                let sd = &self.blocks[succ];
                if sd.entry_stack_depth != data.exit_stack_depth
                    || sd.entry_scope_depth != data.exit_scope_depth
                {
                    return Err(format!("depth mismatch on edge {block} -> {succ}"));
                }
            }
        }

        for (v, data) in self.values.iter() {
            if data.flags.is_phi() {
                if data.ty == DataType::Unknown {
                    if !self.phi_sources(v).is_empty()
                        && self
                            .phi_sources(v)
                            .iter()
                            .any(|&s| self.values[s].ty != DataType::Unknown)
                    {
                        return Err(format!("{v}: untyped phi with typed sources"));
                    }
                    continue;
                }
                for &s in self.phi_sources(v) {
                    let sd = &self.values[s];
                    if sd.ty == DataType::Unknown || sd.ty == data.ty {
                        continue;
                    }
                    let joined = env.join(data.ty, data.constant, sd.ty, sd.constant);
                    let coerced = self
                        .phi_coercions
                        .iter()
                        .any(|c| c.phi == v && c.source == s);
                    if joined != data.ty && !coerced {
                        return Err(format!(
                            "{v}: source {s} of type {} breaks join {}",
                            sd.ty, data.ty
                        ));
                    }
                    if !coerced {
                        return Err(format!("{v}: uncoerced phi edge from {s}"));
                    }
                }
            } else if data.ty == DataType::Unknown {
                return Err(format!("{v}: untyped after binding"));
            }

            if data.flags.is_no_push() {
                for consumer in self.uses(v) {
                    let cd = &self.insts[consumer];
                    let has_fused_prop = cd.payload.prop().map_or(false, |p| {
                        let prop = &self.props[p];
                        prop.intrinsic.is_some()
                            || prop.folded_name.is_some()
                            || prop.folded_ns.is_some()
                    });
                    // A fused comparison materialises its constant side
                    // itself.
                    let fused_compare = cd.opcode.is_compare()
                        && self.popped(consumer).iter().any(|&other| {
                            other != v
                                && self.values[other].def.expand().map_or(false, |d| {
                                    self.insts[d].payload.prop().map_or(false, |p| {
                                        matches!(
                                            self.props[p].intrinsic,
                                            Some(crate::ir::Intrinsic::StringCharAtCompare)
                                                | Some(
                                                    crate::ir::Intrinsic::StringCharCodeAtCompare
                                                )
                                        )
                                    })
                                })
                        });
                    let ok = cd.flags.is_elided()
                        || cd.opcode == crate::ir::Opcode::Pop
                        || cd.opcode.is_set_local()
                        || has_fused_prop
                        || fused_compare;
                    if !ok {
                        return Err(format!("{v}: no-push value consumed by {consumer}"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::Payload;
    use crate::ir::node::Slot;

    #[test]
    fn use_promotion() {
        let mut g = MethodGraph::new(1, 4, 2);
        let i0 = g.make_inst(InstData::new(Opcode::PushInt, 0, Payload::Pool { index: 1 }));
        let i1 = g.make_inst(InstData::new(Opcode::Add, 2, Payload::None));
        let i2 = g.make_inst(InstData::new(Opcode::Add, 3, Payload::None));
        let i3 = g.make_inst(InstData::new(Opcode::Pop, 4, Payload::None));
        let v = g.make_result(i0, Slot::stack(0));

        assert_eq!(g.use_count(v), 0);
        g.add_use(v, i1);
        assert_eq!(g.use_count(v), 1);
        assert_eq!(g.sole_use(v), Some(i1));
        g.add_use(v, i2);
        g.add_use(v, i3);
        assert_eq!(g.use_count(v), 3);
        assert_eq!(g.sole_use(v), None);
        let uses: Vec<_> = g.uses(v).collect();
        assert_eq!(uses, vec![i1, i2, i3]);
    }

    #[test]
    fn phi_sources_dedup() {
        let mut g = MethodGraph::new(1, 4, 2);
        let phi = g.make_phi(Slot::local(0));
        let a = g.make_value(Slot::local(0));
        let b = g.make_value(Slot::local(0));
        g.add_phi_source(phi, a);
        g.add_phi_source(phi, b);
        g.add_phi_source(phi, a);
        assert_eq!(g.phi_sources(phi), &[a, b]);
        assert!(g.values[a].flags.is_phi_source());
        assert_eq!(g.use_count(a), 1);
    }

    #[test]
    fn offset_search() {
        let mut g = MethodGraph::new(1, 4, 2);
        for off in [0u32, 2, 5, 9] {
            g.make_inst(InstData::new(Opcode::Nop, off, Payload::None));
        }
        assert_eq!(g.inst_at_offset(5).map(|i| i.index()), Some(2));
        assert_eq!(g.inst_at_offset(4), None);
    }

    #[test]
    fn edges_dedup() {
        let mut g = MethodGraph::new(1, 4, 2);
        let b0 = g.make_block();
        let b1 = g.make_block();
        g.add_edge(b0, b1);
        g.add_edge(b0, b1);
        assert_eq!(g.succs(b0), &[b1]);
        assert_eq!(g.preds(b1), &[b0]);
    }
}
