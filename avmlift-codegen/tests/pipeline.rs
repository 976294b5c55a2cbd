//! End-to-end pipeline scenarios: decode through binding on assembled
//! method bodies, checking the typed graph the code generator would
//! consume.

mod common;

use avmlift_codegen::ir::{
    Const, DataType, Inst, Intrinsic, MethodGraph, Opcode, PropKind, Value,
};
use avmlift_codegen::{IntegerMode, MethodOutcome};
use avmlift_environ::{Builtin, ClassRegistry, ExceptionInfo, TraitDesc, TraitKind};
use common::{Asm, Fixture};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn insts_with(graph: &MethodGraph, opcode: Opcode) -> Vec<Inst> {
    graph
        .insts
        .iter()
        .filter(|(_, d)| d.opcode == opcode)
        .map(|(i, _)| i)
        .collect()
}

fn only_inst(graph: &MethodGraph, opcode: Opcode) -> Inst {
    let found = insts_with(graph, opcode);
    assert_eq!(found.len(), 1, "expected exactly one {opcode:?}");
    found[0]
}

fn pushed(graph: &MethodGraph, inst: Inst) -> Value {
    graph.insts[inst].pushed.expand().expect("instruction pushes")
}

#[test]
fn identity_round_trip() {
    init_logging();
    let mut fx = Fixture::new();
    fx.locals = 1;
    let mut asm = Asm::new();
    asm.get_local(0).return_value();
    let graph = fx.compile_checked(&asm.finish());

    assert_eq!(graph.blocks.len(), 1);
    assert_eq!(graph.values.len(), 1);
    let this = graph.insts[only_inst(&graph, Opcode::GetLocal0)]
        .pushed
        .unwrap();
    assert_eq!(graph.values[this].ty, DataType::This);
    assert_eq!(graph.use_count(this), 1);
}

// A counted loop: the loop variable gets a phi whose sources are the
// initial constant and the increment, everything stays integer, and the
// returned value is integer-typed.
#[test]
fn s1_simple_loop() {
    init_logging();
    let mut fx = Fixture::new();
    fx.options.integer_mode = IntegerMode::Aggressive;
    fx.locals = 2;

    let mut asm = Asm::new();
    let l1 = asm.label();
    let l3 = asm.label();
    asm.push_byte(0).set_local(1);
    asm.mark(l1);
    let header_off = asm.here();
    asm.get_local(1).push_byte(10).iflt(l3);
    asm.get_local(1).push_byte(1).add().set_local(1).jump(l1);
    asm.mark(l3);
    asm.get_local(1).return_value();
    let graph = fx.compile_checked(&asm.finish());

    assert_eq!(graph.blocks.len(), 4);

    // The add result and the initial constant feed the header phi.
    let add = only_inst(&graph, Opcode::Add);
    let add_out = pushed(&graph, add);
    assert_eq!(graph.values[add_out].ty, DataType::Int);

    let header = graph.insts[graph.inst_at_offset(header_off).unwrap()]
        .block
        .unwrap();
    let phi = graph.blocks[header]
        .locals_entry
        .get(1, &graph.value_lists)
        .unwrap();
    assert!(graph.values[phi].flags.is_phi());
    assert_eq!(graph.values[phi].ty, DataType::Int);
    let sources = graph.phi_sources(phi);
    assert_eq!(sources.len(), 2);
    assert!(sources.contains(&add_out));
    assert!(sources
        .iter()
        .any(|&s| graph.values[s].constant == Some(Const::Int(0))));

    // The loop condition compares two integers.
    let cmp = only_inst(&graph, Opcode::IfLt);
    for &v in graph.popped(cmp) {
        assert_eq!(graph.values[v].ty, DataType::Int);
    }

    // The returned value is the header phi, typed int.
    let ret = only_inst(&graph, Opcode::ReturnValue);
    assert_eq!(graph.values[graph.popped(ret)[0]].ty, DataType::Int);
}

// Locals written under a try range feed phis at the catch entry: one
// source per definition in the range plus the value on entry.
#[test]
fn s2_exception_protected_locals() {
    init_logging();
    let mut fx = Fixture::new();
    fx.locals = 5;

    let mut asm = Asm::new();
    // Prologue: locals 2 and 4 hold constants.
    asm.push_byte(1).set_local(2);
    asm.push_byte(2).set_local(4);
    let from = asm.here();
    // Try range: redefine both, then throw.
    asm.push_byte(3).set_local(2);
    asm.push_byte(4).set_local(4);
    asm.push_null().throw();
    let to = asm.here();
    asm.return_void();
    let target = asm.here();
    // Catch: discard the exception.
    asm.pop().return_void();
    fx.exceptions.push(ExceptionInfo {
        from,
        to,
        target,
        type_name: 0,
        var_name: 0,
    });
    let graph = fx.compile_checked(&asm.finish());

    let handler = avmlift_codegen::ir::Handler::from_u32(0);
    let catch = graph.handlers[handler].target_block.unwrap();
    assert!(graph.blocks[catch].flags.is_catch_entry());
    assert!(graph.handlers[handler].catch_value.is_some());

    for local in [2u32, 4] {
        let phi = graph.blocks[catch]
            .locals_entry
            .get(local as usize, &graph.value_lists)
            .unwrap();
        assert!(graph.values[phi].flags.is_phi(), "local {local}");
        // One definition inside the range plus the value on entry.
        assert_eq!(graph.phi_sources(phi).len(), 2, "local {local}");
    }
}

// Unqualified lookup through the scope stack: findpropstrict binds the
// trait, the following getproperty reuses the resolution, and the read
// is integer-typed.
#[test]
fn s3_property_resolution_across_scope() {
    init_logging();
    let mut fx = Fixture::new();
    let foo = fx.registry.foo_class();
    fx.params = vec![Some(foo)];
    fx.locals = 2;
    let bar = fx.pool.qname("bar");

    let mut asm = Asm::new();
    asm.get_local(1).push_scope();
    asm.find_prop_strict(bar);
    asm.get_property(bar);
    asm.return_value();
    let graph = fx.compile_checked(&asm.finish());

    let find = only_inst(&graph, Opcode::FindPropStrict);
    let find_prop = graph.insts[find].payload.prop().expect("resolved");
    assert_eq!(graph.props[find_prop].kind, PropKind::Trait);
    assert_eq!(
        graph.props[find_prop].trait_desc.as_ref().map(|t| &*t.name),
        Some("bar")
    );
    // The find pushes the scope object itself.
    assert_eq!(graph.values[pushed(&graph, find)].ty, DataType::Object(foo));

    let get = only_inst(&graph, Opcode::GetProperty);
    let get_prop = graph.insts[get].payload.prop().expect("resolved");
    assert_eq!(graph.props[get_prop].kind, PropKind::Trait);
    assert_eq!(
        graph.props[get_prop].trait_desc.as_ref().map(|t| &*t.name),
        Some("bar")
    );
    assert_eq!(graph.values[pushed(&graph, get)].ty, DataType::Int);
}

// A string literal converted to int: the conversion folds, hoists onto
// the producer, and the literal push disappears.
#[test]
fn s4_constant_conversion_hoisting() {
    init_logging();
    let mut fx = Fixture::new();
    fx.locals = 2;
    let s = fx.pool.add_string("42");

    let mut asm = Asm::new();
    asm.push_string(s).convert_i().set_local(1).return_void();
    let graph = fx.compile_checked(&asm.finish());

    let push = only_inst(&graph, Opcode::PushString);
    let push_out = pushed(&graph, push);
    assert_eq!(graph.values[push_out].coerce_on_push, Some(DataType::Int));
    assert!(graph.values[push_out].flags.is_no_push());

    let convert = only_inst(&graph, Opcode::ConvertI);
    assert!(graph.insts[convert].flags.is_elided());
    let converted = pushed(&graph, convert);
    assert_eq!(graph.values[converted].ty, DataType::Int);
    assert_eq!(graph.values[converted].constant, Some(Const::Int(42)));

    // The stored local is the folded integer constant.
    let store = only_inst(&graph, Opcode::SetLocal1);
    assert_eq!(graph.popped(store), &[converted]);
}

// Chained string adds form one concatenation tree.
#[test]
fn s5_string_concat_tree() {
    init_logging();
    let mut fx = Fixture::new();
    let string = fx.registry.builtin(Builtin::String).unwrap();
    fx.params = vec![Some(string); 4];
    fx.locals = 5;

    let mut asm = Asm::new();
    asm.get_local(1).get_local(2).add();
    asm.get_local(3).add();
    asm.get_local(4).add();
    asm.return_value();
    let graph = fx.compile_checked(&asm.finish());

    let adds = insts_with(&graph, Opcode::Add);
    assert_eq!(adds.len(), 3);
    let roots: Vec<_> = adds
        .iter()
        .filter(|&&a| graph.insts[a].flags.is_concat_tree_root())
        .collect();
    let internal: Vec<_> = adds
        .iter()
        .filter(|&&a| graph.insts[a].flags.is_concat_tree_internal())
        .collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(internal.len(), 2);
    // The outermost add is the root.
    assert_eq!(*roots[0], *adds.iter().max().unwrap());
    for &a in &adds {
        assert_eq!(graph.values[pushed(&graph, a)].ty, DataType::String);
    }
}

// vec[i + 1] on a Vector.<int> collapses to the integer index accessor
// with integer index arithmetic.
#[test]
fn s6_vector_index_fusion() {
    init_logging();
    let mut fx = Fixture::new();
    let vec_int = fx.registry.vector_int_class();
    let int_c = fx.registry.builtin(Builtin::Int).unwrap();
    fx.params = vec![Some(vec_int), Some(int_c)];
    fx.locals = 3;
    let name = fx.pool.late_name();

    let mut asm = Asm::new();
    asm.get_local(1);
    asm.get_local(2).push_byte(1).add();
    asm.get_property(name);
    asm.return_value();
    let graph = fx.compile_checked(&asm.finish());

    let get = only_inst(&graph, Opcode::GetProperty);
    let prop = graph.insts[get].payload.prop().expect("resolved");
    assert_eq!(graph.props[prop].kind, PropKind::Index);
    assert_eq!(graph.props[prop].intrinsic, Some(Intrinsic::VectorIndexGet));
    assert_eq!(graph.values[pushed(&graph, get)].ty, DataType::Int);

    // The index arithmetic was rewritten to integer addition.
    assert!(insts_with(&graph, Opcode::Add).is_empty());
    let add = only_inst(&graph, Opcode::AddI);
    let add_out = pushed(&graph, add);
    assert_eq!(graph.values[add_out].ty, DataType::Int);
    assert_eq!(graph.values[add_out].coerce_on_push, None);
}

#[test]
fn math_min_intrinsic() {
    init_logging();
    let mut fx = Fixture::new();
    let math = fx.registry.builtin(Builtin::Math).unwrap();
    fx.registry.add_global(TraitDesc {
        name: "Math".into(),
        ns: avmlift_environ::Namespace::public(),
        kind: TraitKind::Class { class: math },
    });
    let math_mn = fx.pool.qname("Math");
    let min_mn = fx.pool.qname("min");

    let mut asm = Asm::new();
    asm.get_lex(math_mn);
    asm.push_byte(1).push_byte(2);
    asm.call_property(min_mn, 2);
    asm.return_value();
    let graph = fx.compile_checked(&asm.finish());

    let lex = only_inst(&graph, Opcode::GetLex);
    assert_eq!(graph.values[pushed(&graph, lex)].ty, DataType::Class(math));

    let call = only_inst(&graph, Opcode::CallProperty);
    let prop = graph.insts[call].payload.prop().expect("resolved");
    assert_eq!(graph.props[prop].kind, PropKind::Intrinsic);
    assert_eq!(graph.props[prop].intrinsic, Some(Intrinsic::MathMinInt));
    assert_eq!(graph.values[pushed(&graph, call)].ty, DataType::Int);
}

#[test]
fn char_at_compare_fuses() {
    init_logging();
    let mut fx = Fixture::new();
    let string = fx.registry.builtin(Builtin::String).unwrap();
    fx.params = vec![Some(string)];
    fx.locals = 2;
    let char_at = fx.pool.qname("charAt");
    let a = fx.pool.add_string("a");

    let mut asm = Asm::new();
    asm.get_local(1).push_byte(0).call_property(char_at, 1);
    asm.push_string(a).equals();
    asm.return_value();
    let graph = fx.compile_checked(&asm.finish());

    let call = only_inst(&graph, Opcode::CallProperty);
    let prop = graph.insts[call].payload.prop().expect("resolved");
    assert_eq!(
        graph.props[prop].intrinsic,
        Some(Intrinsic::StringCharAtCompare)
    );
    let comparand = pushed(&graph, only_inst(&graph, Opcode::PushString));
    assert!(graph.values[comparand].flags.is_no_push());
}

#[test]
fn convert_round_trip_folds() {
    init_logging();
    let fx = Fixture::new();
    let mut asm = Asm::new();
    asm.push_byte(7).convert_d().convert_i().return_value();
    let graph = fx.compile_checked(&asm.finish());

    let convert = only_inst(&graph, Opcode::ConvertI);
    let out = pushed(&graph, convert);
    assert_eq!(graph.values[out].ty, DataType::Int);
    assert_eq!(graph.values[out].constant, Some(Const::Int(7)));
}

#[test]
fn constructprop_binds_constructor() {
    init_logging();
    let mut fx = Fixture::new();
    let foo = fx.registry.foo_class();
    fx.registry.add_global(TraitDesc {
        name: "Foo".into(),
        ns: avmlift_environ::Namespace::public(),
        kind: TraitKind::Class { class: foo },
    });
    let foo_mn = fx.pool.qname("Foo");

    let mut asm = Asm::new();
    asm.find_prop_strict(foo_mn);
    asm.construct_prop(foo_mn, 0);
    asm.return_value();
    let graph = fx.compile_checked(&asm.finish());

    let ctor = only_inst(&graph, Opcode::ConstructProp);
    let prop = graph.insts[ctor].payload.prop().expect("resolved");
    assert_eq!(graph.props[prop].kind, PropKind::Trait);
    assert_eq!(graph.values[pushed(&graph, ctor)].ty, DataType::Object(foo));
}

#[test]
fn deferred_outcome_on_bad_body() {
    init_logging();
    let mut fx = Fixture::new();
    fx.options.early_throw_method_body_errors = false;
    // add with an empty stack underflows.
    let mut asm = Asm::new();
    asm.add().return_void();
    match fx.try_compile(&asm.finish()) {
        Ok(MethodOutcome::Deferred(err)) => {
            assert!(err.to_string().contains("underflow"));
        }
        other => panic!(
            "expected a deferred outcome, got {:?}",
            other.map(|_| "outcome")
        ),
    }
}

#[test]
fn early_throw_surfaces_method_name() {
    init_logging();
    let fx = Fixture::new();
    let mut asm = Asm::new();
    asm.add().return_void();
    match fx.try_compile(&asm.finish()) {
        Err(err) => assert!(err.to_string().contains("test/method")),
        Ok(_) => panic!("expected a compile error"),
    }
}

#[test]
fn batch_compilation() {
    init_logging();
    use avmlift_codegen::{compile_methods, MethodJob, Options};
    use avmlift_environ::{MethodBodyInfo, MethodFlags, MethodInfo};

    let registry = avmlift_environ::dummy::DummyRegistry::new();
    let pool = avmlift_environ::dummy::DummyPool::new();
    let mut good = Asm::new();
    good.get_local(0).return_value();
    let good = good.finish();
    let mut bad = Asm::new();
    bad.add().return_void();
    let bad = bad.finish();

    fn job<'a>(
        code: &'a [u8],
        pool: &'a avmlift_environ::dummy::DummyPool,
    ) -> MethodJob<'a> {
        MethodJob {
            method: MethodInfo {
                name: "m",
                flags: MethodFlags::from_bits(0),
                params: &[],
                optional_count: 0,
                return_type: None,
                this_class: None,
                captured_scope: &[],
            },
            body: MethodBodyInfo {
                code,
                max_stack: 8,
                local_count: 1,
                init_scope_depth: 0,
                max_scope_depth: 4,
                exceptions: &[],
            },
            pool,
        }
    }

    let mut options = Options::default();
    options.threads = 2;
    let jobs = [job(&good, &pool), job(&bad, &pool)];
    let results = compile_methods(&registry, &jobs, &options).unwrap();
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Ok(MethodOutcome::Compiled(_))));
    assert!(results[1].is_err());
}
