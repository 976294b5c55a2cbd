//! Semantic binding.
//!
//! Two sub-passes over the SSA graph:
//!
//! 1. **Forward type propagation** ([`dispatch`]) — iterate the blocks in
//!    reverse postorder to a fixed point, updating each pushed value's
//!    type, constant and flags from its operands, resolving property
//!    accesses ([`resolve`]) as receiver types become known. Each block
//!    keeps a snapshot of its entry state (type, flags, constant per
//!    entry value); a revisit whose snapshot is unchanged returns
//!    immediately, which is what makes the fixed point affordable on
//!    large graphs.
//! 2. **Demand propagation** ([`demand`]) — a single reverse-postorder
//!    sweep that hoists conversions onto producers, marks dead constant
//!    pushes, promotes integer expression trees, recognises string
//!    concatenation trees, and fuses comparison intrinsics.
//!
//! Afterwards, phi nodes record a coercion for every source whose type
//! differs from the joined type; the code generator materialises those
//! on the predecessor edges.

pub mod demand;
pub mod dispatch;
pub mod lattice;
pub mod resolve;

use crate::dataflow::local_writes;
use crate::dominator_tree::DominatorTree;
use crate::error::BodyResult;
use crate::ir::{
    Block, Const, DataType, MethodGraph, Opcode, PhiCoercion, Value,
};
use crate::settings::Options;
use avmlift_environ::{ClassRegistry, ConstPool, MethodInfo};
use cranelift_entity::{EntityRef, SecondaryMap};
use std::collections::VecDeque;

use self::lattice::TypeEnv;

/// Entry-state snapshot entry: type, raw flag bits, constant.
type Snapshot = (DataType, u16, Option<Const>);

/// The binder's working state. Lives for the two sub-passes of one
/// method and borrows the arena.
pub(crate) struct Binder<'a> {
    pub graph: &'a mut MethodGraph,
    pub pool: &'a dyn ConstPool,
    pub method: &'a MethodInfo<'a>,
    pub options: &'a Options,
    pub env: TypeEnv<'a>,
    /// Shadow of the scope stack during a block walk.
    pub scope: Vec<Value>,
    /// Shadow of the locals during a block walk.
    pub locals: Vec<Value>,
    snapshots: SecondaryMap<Block, Vec<Snapshot>>,
    queue: VecDeque<Block>,
}

/// Run both binder sub-passes.
pub fn bind(
    graph: &mut MethodGraph,
    tree: &DominatorTree,
    pool: &dyn ConstPool,
    registry: &dyn ClassRegistry,
    method: &MethodInfo,
    options: &Options,
) -> BodyResult<()> {
    let mut binder = Binder {
        env: TypeEnv {
            registry,
            this_class: method.this_class,
        },
        graph,
        pool,
        method,
        options,
        scope: Vec::new(),
        locals: Vec::new(),
        snapshots: SecondaryMap::new(),
        queue: VecDeque::new(),
    };
    binder.seed_entry_types();
    binder.run_to_fixed_point(tree)?;
    demand::run(&mut binder, tree)?;
    binder.record_phi_coercions();
    log::trace!(
        "binder: {} values typed, {} resolved properties, {} phi edge coercions",
        binder.graph.values.len(),
        binder.graph.props.len(),
        binder.graph.phi_coercions.len()
    );
    Ok(())
}

impl<'a> Binder<'a> {
    /// Types for the values that exist before any instruction runs:
    /// `this`, parameters, the rest/arguments array, undefined locals,
    /// and caught exceptions.
    fn seed_entry_types(&mut self) {
        let Some(entry) = self.graph.entry_block.expand() else {
            return;
        };
        let param_count = self.method.params.len() as u32;
        let locals: Vec<Value> = self.graph.blocks[entry]
            .locals_entry
            .as_slice(&self.graph.value_lists)
            .to_vec();
        for (index, &v) in locals.iter().enumerate() {
            // A phi here means the entry is a loop header; the seeded
            // value is among its sources and gets typed instead.
            let target = if self.graph.values[v].flags.is_phi() {
                self.graph
                    .phi_sources(v)
                    .iter()
                    .copied()
                    .find(|&s| self.graph.values[s].def.is_none())
            } else {
                Some(v)
            };
            let Some(target) = target else { continue };
            let index = index as u32;
            let data = &mut self.graph.values[target];
            if index == 0 {
                data.ty = DataType::This;
                data.flags.set_not_null();
            } else if index <= param_count {
                data.ty = self
                    .env
                    .class_to_type(self.method.params[index as usize - 1]);
            } else if index == param_count + 1 && self.method.flags.need_rest() {
                data.ty = DataType::Rest;
                data.flags.set_not_null();
            } else if index == param_count + 1 && self.method.flags.need_arguments() {
                data.ty = self.env.class_to_type(
                    self.env.registry.builtin(avmlift_environ::Builtin::Array),
                );
                data.flags.set_not_null();
            } else {
                data.ty = DataType::Undefined;
                data.constant = Some(Const::Undefined);
            }
        }

        // Caught exceptions are typed by the handler's declared error
        // class; an unresolvable or absent name catches anything.
        for n in 0..self.graph.handlers.len() {
            let h = crate::ir::Handler::new(n);
            let Some(exc) = self.graph.handlers[h].catch_value.expand() else {
                continue;
            };
            let type_name = self.graph.handlers[h].type_name;
            let ty = if type_name == 0 {
                DataType::Any
            } else {
                match self.pool.multiname(type_name) {
                    Some(mn) => match self.env.registry.class_for_multiname(mn) {
                        Some(c) => DataType::Object(c),
                        None => DataType::Any,
                    },
                    None => DataType::Any,
                }
            };
            let data = &mut self.graph.values[exc];
            data.ty = ty;
            data.flags.set_not_null();
        }
    }

    /// First sub-pass: iterate block visits until no entry state
    /// changes.
    fn run_to_fixed_point(&mut self, tree: &DominatorTree) -> BodyResult<()> {
        for &block in tree.rpo() {
            self.graph.blocks[block].flags.set_touched();
            self.queue.push_back(block);
        }
        while let Some(block) = self.queue.pop_front() {
            self.graph.blocks[block].flags.clear_touched();
            if self.visit(block)? {
                let succs: Vec<Block> = self.graph.all_succs(block).collect();
                for succ in succs {
                    if !self.graph.blocks[succ].flags.is_touched() {
                        self.graph.blocks[succ].flags.set_touched();
                        self.queue.push_back(succ);
                    }
                }
            }
        }
        Ok(())
    }

    /// Visit one block. Returns whether the body was actually walked
    /// (false when the entry snapshot is unchanged).
    fn visit(&mut self, block: Block) -> BodyResult<bool> {
        let entries = self.entry_values(block);
        for &v in &entries {
            if self.graph.values[v].flags.is_phi() {
                self.merge_phi(v);
            }
        }
        let snapshot: Vec<Snapshot> = entries
            .iter()
            .map(|&v| {
                let d = &self.graph.values[v];
                (d.ty, d.flags.bits(), d.constant)
            })
            .collect();
        if self.graph.blocks[block].flags.is_visited()
            && self.snapshots.get(block) == Some(&snapshot)
        {
            return Ok(false);
        }
        self.snapshots[block] = snapshot;
        self.graph.blocks[block].flags.set_visited();

        self.scope = self.graph.blocks[block]
            .scope_entry
            .as_slice(&self.graph.value_lists)
            .to_vec();
        self.locals = self.graph.blocks[block]
            .locals_entry
            .as_slice(&self.graph.value_lists)
            .to_vec();

        let insts: Vec<_> = self.graph.block_insts(block).collect();
        for inst in insts {
            self.dispatch(inst)?;
            match self.graph.insts[inst].opcode {
                Opcode::PushScope | Opcode::PushWith => {
                    let v = self.graph.insts[inst].pushed.unwrap();
                    self.scope.push(v);
                }
                Opcode::PopScope => {
                    self.scope.pop();
                }
                _ => {}
            }
            for (index, v) in local_writes(self.graph, inst) {
                self.locals[index as usize] = v;
            }
        }
        Ok(true)
    }

    fn entry_values(&self, block: Block) -> Vec<Value> {
        let data = &self.graph.blocks[block];
        data.stack_entry
            .as_slice(&self.graph.value_lists)
            .iter()
            .chain(data.scope_entry.as_slice(&self.graph.value_lists))
            .chain(data.locals_entry.as_slice(&self.graph.value_lists))
            .copied()
            .collect()
    }

    /// Recompute a phi's type, constant and flags from its sources.
    fn merge_phi(&mut self, phi: Value) {
        let sources = self.graph.phi_sources(phi).to_vec();
        let mut ty = DataType::Unknown;
        let mut konst: Option<Const> = None;
        let mut any_known = false;
        let mut saw_unknown = false;
        let mut not_null = true;
        let mut late = false;
        let mut with = false;
        for &s in &sources {
            let sd = &self.graph.values[s];
            if sd.ty == DataType::Unknown {
                saw_unknown = true;
                continue;
            }
            if !any_known {
                ty = sd.ty;
                konst = sd.constant;
                any_known = true;
            } else {
                ty = self.env.join(ty, konst, sd.ty, sd.constant);
                konst = match (konst, sd.constant) {
                    (Some(a), Some(b)) if a == b => Some(a),
                    _ => None,
                };
            }
            not_null &= sd.flags.is_not_null();
            late |= sd.flags.is_late_name_binding();
            with |= sd.flags.is_with_scope();
        }
        // Predictive strip: while some source is still untyped, do not
        // specialise the phi to a constant; a wrong speculation would
        // only force another round of revisits.
        if saw_unknown && konst.is_some() && ty.is_primitive() {
            konst = None;
        }
        let data = &mut self.graph.values[phi];
        data.ty = ty;
        data.constant = konst;
        if any_known && not_null {
            data.flags.set_not_null();
        }
        if late {
            data.flags.set_late_name_binding();
        }
        if with {
            data.flags.set_with_scope();
        }
    }

    /// Record a coercion for every phi edge whose source type
    /// differs from the joined type.
    fn record_phi_coercions(&mut self) {
        let mut coercions = Vec::new();
        for (v, data) in self.graph.values.iter() {
            if !data.flags.is_phi() || data.ty == DataType::Unknown {
                continue;
            }
            for &s in data.phi_sources.as_slice(&self.graph.value_lists) {
                let sty = self.graph.values[s].ty;
                if sty != data.ty && sty != DataType::Unknown {
                    coercions.push(PhiCoercion {
                        phi: v,
                        source: s,
                        ty: data.ty,
                    });
                }
            }
        }
        self.graph.phi_coercions = coercions;
    }

    /// The value pushed by `inst`, when the data-flow pass recorded one.
    pub(crate) fn out(&self, inst: crate::ir::Inst) -> Option<Value> {
        self.graph.insts[inst].pushed.expand()
    }

    /// Set the pushed value's inferred type.
    pub(crate) fn set_out(&mut self, inst: crate::ir::Inst, ty: DataType) {
        if let Some(v) = self.out(inst) {
            self.graph.values[v].ty = ty;
        }
    }

    /// Set the pushed value's type together with a constant.
    pub(crate) fn set_out_const(&mut self, inst: crate::ir::Inst, ty: DataType, k: Const) {
        if let Some(v) = self.out(inst) {
            let data = &mut self.graph.values[v];
            data.ty = ty;
            data.constant = Some(k);
            if ty.is_never_null() || matches!(k, Const::Str(_) | Const::Ns(_)) {
                data.flags.set_not_null();
            }
        }
    }
}
