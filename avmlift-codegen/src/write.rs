//! Human-readable IR dumps.
//!
//! Used by the `enable_tracing` option: the per-method driver logs one
//! dump after control flow, data flow and binding. The format is meant
//! for eyeballing regressions, not for parsing.

use crate::ir::{Block, InstData, MethodGraph, Payload, Value};
use core::fmt;

/// Wraps a graph for display.
pub struct DisplayGraph<'a>(pub &'a MethodGraph);

impl fmt::Display for DisplayGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let graph = self.0;
        for (block, data) in graph.blocks.iter() {
            write!(f, "{block}:")?;
            if !data.is_reachable() {
                write!(f, " (unreachable)")?;
            }
            if data.flags.is_catch_entry() {
                write!(f, " (catch entry)")?;
            }
            let preds = graph.preds(block);
            if !preds.is_empty() {
                write!(f, " preds=[")?;
                write_blocks(f, preds)?;
                write!(f, "]")?;
            }
            writeln!(
                f,
                " stack {}->{} scope {}->{}",
                data.entry_stack_depth,
                data.exit_stack_depth,
                data.entry_scope_depth,
                data.exit_scope_depth
            )?;
            for (label, list) in [
                ("stack", &data.stack_entry),
                ("scope", &data.scope_entry),
                ("locals", &data.locals_entry),
            ] {
                let slice = list.as_slice(&graph.value_lists);
                if slice.is_empty() {
                    continue;
                }
                write!(f, "  entry {label}:")?;
                for &v in slice {
                    write!(f, " ")?;
                    write_value(f, graph, v)?;
                }
                writeln!(f)?;
            }
            for inst in graph.block_insts(block) {
                write_inst(f, graph, inst, &graph.insts[inst])?;
            }
        }
        if !graph.phi_coercions.is_empty() {
            writeln!(f, "phi coercions:")?;
            for c in &graph.phi_coercions {
                writeln!(f, "  {} <- {} as {}", c.phi, c.source, c.ty)?;
            }
        }
        Ok(())
    }
}

fn write_blocks(f: &mut fmt::Formatter, blocks: &[Block]) -> fmt::Result {
    for (i, b) in blocks.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{b}")?;
    }
    Ok(())
}

fn write_value(f: &mut fmt::Formatter, graph: &MethodGraph, v: Value) -> fmt::Result {
    let data = &graph.values[v];
    write!(f, "{v}:{}", data.ty)?;
    if data.flags.is_phi() {
        write!(f, "=phi(")?;
        for (i, s) in graph.phi_sources(v).iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{s}")?;
        }
        write!(f, ")")?;
    }
    if let Some(k) = data.constant {
        write!(f, "={k:?}")?;
    }
    if let Some(t) = data.coerce_on_push {
        write!(f, "»{t}")?;
    }
    if data.flags.is_no_push() {
        write!(f, "!")?;
    }
    Ok(())
}

fn write_inst(
    f: &mut fmt::Formatter,
    graph: &MethodGraph,
    inst: crate::ir::Inst,
    data: &InstData,
) -> fmt::Result {
    write!(f, "  {:>5}  {}", data.offset, data.opcode)?;
    match data.payload {
        Payload::Imm { value } => write!(f, " {value}")?,
        Payload::Local { index } => write!(f, " L{index}")?,
        Payload::Pool { index } | Payload::Slot { index } => write!(f, " #{index}")?,
        Payload::Name { index, prop } => {
            write!(f, " mn{index}")?;
            if let Some(p) = prop.expand() {
                write!(f, " [{:?}]", graph.props[p].kind)?;
            }
        }
        Payload::CallName { index, argc, prop } => {
            write!(f, " mn{index} argc={argc}")?;
            if let Some(p) = prop.expand() {
                write!(f, " [{:?}]", graph.props[p].kind)?;
            }
        }
        Payload::Branch { target, .. } => {
            if let Some(b) = target.expand() {
                write!(f, " -> {b}")?;
            }
        }
        Payload::Argc { argc } => write!(f, " argc={argc}")?,
        _ => {}
    }
    let popped = graph.popped(inst);
    if !popped.is_empty() {
        write!(f, " pops[")?;
        for (i, v) in popped.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")?;
    }
    if let Some(v) = data.pushed.expand() {
        write!(f, " -> ")?;
        write_value(f, graph, v)?;
    }
    if data.flags.is_elided() {
        write!(f, " (elided)")?;
    }
    if data.flags.is_concat_tree_root() {
        write!(f, " (concat root)")?;
    }
    if data.flags.is_concat_tree_internal() {
        write!(f, " (concat)")?;
    }
    writeln!(f)
}

impl MethodGraph {
    /// Display adaptor for tracing.
    pub fn display(&self) -> DisplayGraph {
        DisplayGraph(self)
    }
}
