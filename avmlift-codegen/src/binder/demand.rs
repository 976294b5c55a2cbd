//! Demand propagation and elision.
//!
//! The second binder sub-pass walks the blocks once in reverse postorder
//! and pushes consumer demands back onto producers:
//!
//! - a single-use conversion is hoisted onto its producer
//!   (`coerce_on_push`), and the conversion instruction itself is
//!   elided;
//! - constants whose remaining instruction consumers all elide them are
//!   marked `NO_PUSH` (phi edges materialise their sources themselves);
//! - integer expression trees rooted at an int/uint coercion are
//!   rewritten to integer opcodes;
//! - nested single-use string `add`s are marked as one concatenation
//!   tree for a multi-operand concat;
//! - `charAt`/`charCodeAt` results compared against small constants fuse
//!   into index-level comparison intrinsics;
//! - vector accesses indexed by `int ± small constant` collapse onto the
//!   integer index accessor.

use crate::binder::Binder;
use crate::dominator_tree::DominatorTree;
use crate::error::BodyResult;
use crate::ir::{
    Const, DataType, Inst, Intrinsic, Opcode, PropKind, Value,
};
use crate::settings::IntegerMode;

/// Run the pass.
pub(crate) fn run(binder: &mut Binder, tree: &DominatorTree) -> BodyResult<()> {
    let order: Vec<Inst> = tree
        .rpo()
        .iter()
        .flat_map(|&b| binder.graph.block_insts(b))
        .collect();

    for &inst in &order {
        match binder.graph.insts[inst].opcode {
            Opcode::ConvertI => hoist_conversion(binder, inst, DataType::Int),
            Opcode::ConvertU => hoist_conversion(binder, inst, DataType::Uint),
            Opcode::ConvertD => hoist_conversion(binder, inst, DataType::Number),
            Opcode::ConvertB => hoist_conversion(binder, inst, DataType::Bool),
            Opcode::ConvertS | Opcode::CoerceS => hoist_conversion(binder, inst, DataType::String),
            Opcode::CoerceA => hoist_conversion(binder, inst, DataType::Any),
            Opcode::ReturnValue => demand_return(binder, inst),
            op if op.is_compare() => fuse_compare(binder, inst),
            Opcode::GetProperty | Opcode::SetProperty => fuse_vector_index(binder, inst),
            _ => {}
        }
    }

    if binder.options.integer_mode != IntegerMode::ExplicitOnly {
        promote_integer_trees(binder, &order);
    }
    mark_concat_trees(binder, &order);
    mark_folded_name_args(binder, &order);
    mark_dead_constants(binder);
    Ok(())
}

/// Can a value of type `ty` be converted without observable effects? A
/// conversion of an object can run `valueOf`/`toString`.
fn side_effect_free(ty: DataType, target: DataType) -> bool {
    matches!(target, DataType::Any) || ty.is_primitive() || matches!(ty, DataType::Unknown)
}

/// Hoist a single-use conversion onto its producer.
fn hoist_conversion(binder: &mut Binder, inst: Inst, target: DataType) {
    let input = binder.graph.popped(inst)[0];
    if binder.graph.use_count(input) != 1 {
        return;
    }
    let in_ty = binder.graph.values[input].ty;
    if !side_effect_free(in_ty, target) {
        return;
    }
    if target != DataType::Any {
        binder.graph.values[input].coerce_on_push = Some(target);
    }
    binder.graph.insts[inst].flags.set_elided();
}

/// The value returned by the method is coerced to the declared return
/// type; a primitive target can be produced directly.
fn demand_return(binder: &mut Binder, inst: Inst) {
    let target = binder.env.class_to_type(binder.method.return_type);
    if !target.is_primitive() {
        return;
    }
    let input = binder.graph.popped(inst)[0];
    if binder.graph.use_count(input) != 1 {
        return;
    }
    let in_ty = binder.graph.values[input].ty;
    if in_ty != target && side_effect_free(in_ty, target) {
        binder.graph.values[input].coerce_on_push = Some(target);
    }
}

/// The demanded integer type at a value, from an explicit conversion or
/// a hoisted one.
fn integer_demand(binder: &Binder, v: Value) -> Option<DataType> {
    match binder.graph.values[v].coerce_on_push {
        Some(t) if t.is_integer() => return Some(t),
        _ => {}
    }
    let consumer = binder.graph.sole_use(v)?;
    match binder.graph.insts[consumer].opcode {
        Opcode::ConvertI => Some(DataType::Int),
        Opcode::ConvertU => Some(DataType::Uint),
        _ => None,
    }
}

/// Integer-arithmetic promotion: rewrite a whole expression tree to
/// integer opcodes when its root is demanded as an integer.
fn promote_integer_trees(binder: &mut Binder, order: &[Inst]) {
    for &inst in order {
        let opcode = binder.graph.insts[inst].opcode;
        if !matches!(opcode, Opcode::Add | Opcode::Subtract | Opcode::Multiply
            | Opcode::Divide | Opcode::Modulo)
        {
            continue;
        }
        let Some(out) = binder.graph.insts[inst].pushed.expand() else {
            continue;
        };
        let Some(target) = integer_demand(binder, out) else {
            continue;
        };
        // `divide`/`modulo` participate only as the root and only over
        // integers of one signedness.
        if matches!(opcode, Opcode::Divide | Opcode::Modulo) {
            let popped = binder.graph.popped(inst).to_vec();
            let same_sign = popped.iter().all(|&v| binder.graph.values[v].ty == target);
            if !same_sign {
                continue;
            }
        }
        if tree_is_integer(binder, inst, true) {
            rewrite_tree(binder, inst, target);
        }
    }
}

/// Is the expression tree rooted at `inst` entirely integer, with every
/// interior value consumed exactly once?
fn tree_is_integer(binder: &Binder, inst: Inst, root: bool) -> bool {
    let opcode = binder.graph.insts[inst].opcode;
    let arith = matches!(
        opcode,
        Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Negate
            | Opcode::Increment
            | Opcode::Decrement
    ) || (root && matches!(opcode, Opcode::Divide | Opcode::Modulo));
    if !arith {
        return false;
    }
    if !root {
        let Some(out) = binder.graph.insts[inst].pushed.expand() else {
            return false;
        };
        if binder.graph.use_count(out) != 1 {
            return false;
        }
    }
    for &operand in binder.graph.popped(inst) {
        let data = &binder.graph.values[operand];
        if data.ty.is_integer() || data.constant.map_or(false, |k| k.as_int().is_some()) {
            continue;
        }
        let Some(def) = data.def.expand() else {
            return false;
        };
        if binder.graph.use_count(operand) != 1 || !tree_is_integer(binder, def, false) {
            return false;
        }
    }
    true
}

/// Rewrite every node of an integer tree to the integer opcode and type.
fn rewrite_tree(binder: &mut Binder, inst: Inst, target: DataType) {
    let rewritten = match binder.graph.insts[inst].opcode {
        Opcode::Add => Some(Opcode::AddI),
        Opcode::Subtract => Some(Opcode::SubtractI),
        Opcode::Multiply => Some(Opcode::MultiplyI),
        Opcode::Negate => Some(Opcode::NegateI),
        Opcode::Increment => Some(Opcode::IncrementI),
        Opcode::Decrement => Some(Opcode::DecrementI),
        // divide/modulo keep their opcode; the generator sees integer
        // operand types.
        _ => None,
    };
    if let Some(op) = rewritten {
        binder.graph.insts[inst].opcode = op;
    }
    if let Some(out) = binder.graph.insts[inst].pushed.expand() {
        let data = &mut binder.graph.values[out];
        data.ty = target;
        if let Some(k) = data.constant {
            data.constant = k.as_int().map(Const::Int);
        }
        data.coerce_on_push = None;
    }
    let operands = binder.graph.popped(inst).to_vec();
    for operand in operands {
        let def = binder.graph.values[operand].def.expand();
        let interior = def.map_or(false, |d| {
            matches!(
                binder.graph.insts[d].opcode,
                Opcode::Add
                    | Opcode::Subtract
                    | Opcode::Multiply
                    | Opcode::Negate
                    | Opcode::Increment
                    | Opcode::Decrement
            ) && binder.graph.use_count(operand) == 1
                && !binder.graph.values[operand].ty.is_integer()
        });
        if interior {
            rewrite_tree(binder, def.expect("interior implies a def"), target);
        } else if !binder.graph.values[operand].ty.is_integer() {
            // An integer-valued constant leaf is retyped in place.
            let data = &mut binder.graph.values[operand];
            if let Some(k) = data.constant.and_then(Const::as_int) {
                data.ty = target;
                data.constant = Some(Const::Int(k));
            } else {
                data.coerce_on_push = Some(target);
            }
        }
    }
}

/// String-concatenation trees: a single-use string add feeding another
/// string add is an internal node; the outermost add over at least one
/// internal node is the tree root. The code generator emits one
/// multi-operand concat for the whole tree.
fn mark_concat_trees(binder: &mut Binder, order: &[Inst]) {
    let string_add = |binder: &Binder, inst: Inst| {
        binder.graph.insts[inst].opcode == Opcode::Add
            && binder.graph.insts[inst]
                .pushed
                .expand()
                .map_or(false, |v| binder.graph.values[v].ty == DataType::String)
    };
    for &inst in order {
        if !string_add(binder, inst) {
            continue;
        }
        let out = binder.graph.insts[inst].pushed.unwrap();
        let consumer = binder.graph.sole_use(out);
        if let Some(c) = consumer {
            if string_add(binder, c) {
                binder.graph.insts[inst].flags.set_concat_tree_internal();
            }
        }
    }
    for &inst in order {
        if !string_add(binder, inst) || binder.graph.insts[inst].flags.is_concat_tree_internal() {
            continue;
        }
        let has_internal_child = binder.graph.popped(inst).iter().any(|&v| {
            binder.graph.values[v]
                .def
                .expand()
                .map_or(false, |d| binder.graph.insts[d].flags.is_concat_tree_internal())
        });
        if has_internal_child {
            binder.graph.insts[inst].flags.set_concat_tree_root();
        }
    }
}

/// Compare fusion: a `charAt(i)` result against a one-character string
/// constant, or a `charCodeAt(i)` result against an integer constant,
/// becomes an index-level comparison intrinsic.
fn fuse_compare(binder: &mut Binder, inst: Inst) {
    let popped = binder.graph.popped(inst).to_vec();
    if popped.len() != 2 {
        return;
    }
    for (call_side, const_side) in [(popped[0], popped[1]), (popped[1], popped[0])] {
        let Some(def) = binder.graph.values[call_side].def.expand() else {
            continue;
        };
        if binder.graph.use_count(call_side) != 1 {
            continue;
        }
        let Some(p) = binder.graph.insts[def].payload.prop() else {
            continue;
        };
        let fused = match binder.graph.props[p].intrinsic {
            Some(Intrinsic::StringCharAt) => {
                match binder.graph.values[const_side].constant {
                    Some(Const::Str(index))
                        if binder
                            .pool
                            .string(index)
                            .map_or(false, |s| s.chars().count() == 1) =>
                    {
                        Some(Intrinsic::StringCharAtCompare)
                    }
                    _ => None,
                }
            }
            Some(Intrinsic::StringCharCodeAt) => {
                match binder.graph.values[const_side].constant {
                    Some(k) if k.as_int().is_some() => Some(Intrinsic::StringCharCodeAtCompare),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(intrinsic) = fused {
            binder.graph.props[p].intrinsic = Some(intrinsic);
            binder.graph.values[const_side].flags.set_no_push();
            return;
        }
    }
}

/// Small displacements only: a large constant could wrap the 32-bit
/// index past the bounds check.
const MAX_INDEX_DISPLACEMENT: i32 = 4096;

/// Vector index optimisation: `vec[i ± k]` with an integer `i`
/// and a small constant `k` binds the integer index accessor and keeps
/// the arithmetic in integers.
fn fuse_vector_index(binder: &mut Binder, inst: Inst) {
    let opcode = binder.graph.insts[inst].opcode;
    let Some(p) = binder.graph.insts[inst].payload.prop() else {
        return;
    };
    if binder.graph.props[p].kind != PropKind::Index {
        return;
    }
    let elementish = binder.graph.props[p]
        .index_access
        .map_or(false, |a| a.element.is_some());
    if !elementish {
        return;
    }
    // The index is the last runtime name argument before any stored
    // value: popped = [obj, index] for reads, [obj, index, value] for
    // writes.
    let popped = binder.graph.popped(inst).to_vec();
    let index_at = if opcode == Opcode::SetProperty { popped.len() - 2 } else { popped.len() - 1 };
    let Some(&index_v) = popped.get(index_at) else {
        return;
    };
    let Some(def) = binder.graph.values[index_v].def.expand() else {
        finish_vector_fuse(binder, inst, p, index_v);
        return;
    };
    let def_op = binder.graph.insts[def].opcode;
    if matches!(def_op, Opcode::Add | Opcode::Subtract)
        && binder.graph.use_count(index_v) == 1
    {
        let operands = binder.graph.popped(def).to_vec();
        if operands.len() == 2 {
            let int_side = binder.graph.values[operands[0]].ty == DataType::Int;
            let k = binder.graph.values[operands[1]].constant.and_then(Const::as_int);
            if int_side && matches!(k, Some(v) if v.abs() <= MAX_INDEX_DISPLACEMENT) {
                let op = if def_op == Opcode::Add {
                    Opcode::AddI
                } else {
                    Opcode::SubtractI
                };
                binder.graph.insts[def].opcode = op;
                let out = binder.graph.insts[def].pushed.unwrap();
                binder.graph.values[out].ty = DataType::Int;
                binder.graph.values[operands[1]].ty = DataType::Int;
            }
        }
    }
    finish_vector_fuse(binder, inst, p, index_v);
}

fn finish_vector_fuse(
    binder: &mut Binder,
    inst: Inst,
    p: crate::ir::PropRef,
    index_v: Value,
) {
    let intrinsic = if binder.graph.insts[inst].opcode == Opcode::SetProperty {
        Intrinsic::VectorIndexSet
    } else {
        Intrinsic::VectorIndexGet
    };
    binder.graph.props[p].intrinsic = Some(intrinsic);
    binder.graph.values[index_v].coerce_on_push = None;
}

/// Folded runtime name components are compile-time now; their pushes
/// vanish.
fn mark_folded_name_args(binder: &mut Binder, order: &[Inst]) {
    for &inst in order {
        let Some(p) = binder.graph.insts[inst].payload.prop() else {
            continue;
        };
        let (folded_ns, folded_name) = {
            let prop = &binder.graph.props[p];
            (prop.folded_ns.is_some(), prop.folded_name.is_some())
        };
        if !folded_ns && !folded_name {
            continue;
        }
        // The runtime components sit right after the receiver (if the
        // opcode has one).
        let has_receiver = !matches!(
            binder.graph.insts[inst].opcode,
            Opcode::FindProperty | Opcode::FindPropStrict | Opcode::FindDef
        );
        let base = has_receiver as usize;
        let popped = binder.graph.popped(inst).to_vec();
        let mut at = base;
        if folded_ns {
            if let Some(&v) = popped.get(at) {
                binder.graph.values[v].flags.set_no_push();
            }
            at += 1;
        }
        if folded_name {
            if let Some(&v) = popped.get(at) {
                binder.graph.values[v].flags.set_no_push();
            }
        }
    }
}

/// Constants whose every instruction consumer elides them do not get
/// pushed at all. Phi edges handle their own materialisation.
fn mark_dead_constants(binder: &mut Binder) {
    for n in 0..binder.graph.values.len() {
        let v = Value::from_u32(n as u32);
        let data = &binder.graph.values[v];
        if data.constant.is_none() || data.flags.is_no_push() {
            continue;
        }
        let mut any = false;
        let mut all_elidable = true;
        for consumer in binder.graph.uses(v) {
            any = true;
            let cd = &binder.graph.insts[consumer];
            let elidable = cd.flags.is_elided()
                || cd.opcode == Opcode::Pop
                || cd.opcode.is_set_local();
            if !elidable {
                all_elidable = false;
                break;
            }
        }
        if any && all_elidable {
            binder.graph.values[v].flags.set_no_push();
        }
    }
}
