//! Shared fixtures for the pipeline tests: a tiny ABC assembler with
//! label fixups, plus wrappers around the dummy registry/pool.

use avmlift_codegen::ir::MethodGraph;
use avmlift_codegen::{compile_method, MethodOutcome, Options};
use avmlift_environ::dummy::{DummyPool, DummyRegistry};
use avmlift_environ::{CapturedScope, ClassId, ExceptionInfo, MethodBodyInfo, MethodFlags, MethodInfo};

/// A branch target under construction.
#[derive(Copy, Clone)]
pub struct Label(usize);

struct Fixup {
    /// Where the three displacement bytes sit.
    at: usize,
    /// The displacement base (end of instruction for branches, start of
    /// instruction for lookupswitch).
    base: usize,
    label: Label,
}

/// Assembles method-body bytes.
pub struct Asm {
    bytes: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

#[allow(dead_code)]
impl Asm {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn here(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn mark(&mut self, l: Label) {
        self.labels[l.0] = Some(self.bytes.len());
    }

    fn op(&mut self, byte: u8) -> &mut Self {
        self.bytes.push(byte);
        self
    }

    fn u30(&mut self, mut v: u32) -> &mut Self {
        loop {
            let b = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.bytes.push(b);
                break;
            }
            self.bytes.push(b | 0x80);
        }
        self
    }

    fn branch(&mut self, opcode: u8, l: Label) -> &mut Self {
        self.op(opcode);
        let at = self.bytes.len();
        self.bytes.extend([0, 0, 0]);
        self.fixups.push(Fixup {
            at,
            base: self.bytes.len(),
            label: l,
        });
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].expect("label marked");
            let rel = target as i64 - fixup.base as i64;
            let rel = rel as i32;
            self.bytes[fixup.at] = rel as u8;
            self.bytes[fixup.at + 1] = (rel >> 8) as u8;
            self.bytes[fixup.at + 2] = (rel >> 16) as u8;
        }
        self.bytes
    }

    // Literals.
    pub fn push_byte(&mut self, v: i8) -> &mut Self {
        self.op(0x24).op(v as u8)
    }
    pub fn push_int(&mut self, index: u32) -> &mut Self {
        self.op(0x2d).u30(index)
    }
    pub fn push_double(&mut self, index: u32) -> &mut Self {
        self.op(0x2f).u30(index)
    }
    pub fn push_string(&mut self, index: u32) -> &mut Self {
        self.op(0x2c).u30(index)
    }
    pub fn push_true(&mut self) -> &mut Self {
        self.op(0x26)
    }
    pub fn push_null(&mut self) -> &mut Self {
        self.op(0x20)
    }

    // Locals.
    pub fn get_local(&mut self, index: u32) -> &mut Self {
        if index < 4 {
            self.op(0xd0 + index as u8)
        } else {
            self.op(0x62).u30(index)
        }
    }
    pub fn set_local(&mut self, index: u32) -> &mut Self {
        if index < 4 {
            self.op(0xd4 + index as u8)
        } else {
            self.op(0x63).u30(index)
        }
    }
    pub fn kill(&mut self, index: u32) -> &mut Self {
        self.op(0x08).u30(index)
    }

    // Stack shuffles.
    pub fn dup(&mut self) -> &mut Self {
        self.op(0x2a)
    }
    pub fn swap(&mut self) -> &mut Self {
        self.op(0x2b)
    }
    pub fn pop(&mut self) -> &mut Self {
        self.op(0x29)
    }

    // Arithmetic and conversions.
    pub fn add(&mut self) -> &mut Self {
        self.op(0xa0)
    }
    pub fn subtract(&mut self) -> &mut Self {
        self.op(0xa1)
    }
    pub fn multiply(&mut self) -> &mut Self {
        self.op(0xa2)
    }
    pub fn equals(&mut self) -> &mut Self {
        self.op(0xab)
    }
    pub fn convert_i(&mut self) -> &mut Self {
        self.op(0x73)
    }
    pub fn convert_d(&mut self) -> &mut Self {
        self.op(0x75)
    }

    // Control flow.
    pub fn jump(&mut self, l: Label) -> &mut Self {
        self.branch(0x10, l)
    }
    pub fn iftrue(&mut self, l: Label) -> &mut Self {
        self.branch(0x11, l)
    }
    pub fn iffalse(&mut self, l: Label) -> &mut Self {
        self.branch(0x12, l)
    }
    pub fn iflt(&mut self, l: Label) -> &mut Self {
        self.branch(0x15, l)
    }
    pub fn return_value(&mut self) -> &mut Self {
        self.op(0x48)
    }
    pub fn return_void(&mut self) -> &mut Self {
        self.op(0x47)
    }
    pub fn throw(&mut self) -> &mut Self {
        self.op(0x03)
    }
    pub fn label_op(&mut self) -> &mut Self {
        self.op(0x09)
    }

    // Scopes.
    pub fn push_scope(&mut self) -> &mut Self {
        self.op(0x30)
    }
    pub fn pop_scope(&mut self) -> &mut Self {
        self.op(0x1d)
    }
    pub fn get_global_scope(&mut self) -> &mut Self {
        self.op(0x64)
    }

    // Names.
    pub fn find_prop_strict(&mut self, mn: u32) -> &mut Self {
        self.op(0x5d).u30(mn)
    }
    pub fn find_property(&mut self, mn: u32) -> &mut Self {
        self.op(0x5e).u30(mn)
    }
    pub fn get_lex(&mut self, mn: u32) -> &mut Self {
        self.op(0x60).u30(mn)
    }
    pub fn get_property(&mut self, mn: u32) -> &mut Self {
        self.op(0x66).u30(mn)
    }
    pub fn set_property(&mut self, mn: u32) -> &mut Self {
        self.op(0x61).u30(mn)
    }
    pub fn call_property(&mut self, mn: u32, argc: u32) -> &mut Self {
        self.op(0x46).u30(mn).u30(argc)
    }
    pub fn construct_prop(&mut self, mn: u32, argc: u32) -> &mut Self {
        self.op(0x4a).u30(mn).u30(argc)
    }
}

/// A ready-to-compile method fixture.
pub struct Fixture {
    pub registry: DummyRegistry,
    pub pool: DummyPool,
    pub params: Vec<Option<ClassId>>,
    pub this_class: Option<ClassId>,
    pub captured: Vec<CapturedScope>,
    pub locals: u32,
    pub max_stack: u32,
    pub max_scope: u32,
    pub exceptions: Vec<ExceptionInfo>,
    pub options: Options,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        Self {
            registry: DummyRegistry::new(),
            pool: DummyPool::new(),
            params: Vec::new(),
            this_class: None,
            captured: Vec::new(),
            locals: 8,
            max_stack: 16,
            max_scope: 8,
            exceptions: Vec::new(),
            options: Options::default(),
        }
    }

    /// Compile `code` and unwrap the typed graph.
    pub fn compile(&self, code: &[u8]) -> MethodGraph {
        match self.try_compile(code) {
            Ok(MethodOutcome::Compiled(graph)) => graph,
            Ok(MethodOutcome::Deferred(err)) => panic!("deferred body error: {err}"),
            Err(err) => panic!("compile failed: {err}"),
        }
    }

    pub fn try_compile(
        &self,
        code: &[u8],
    ) -> avmlift_codegen::CodegenResult<MethodOutcome> {
        let method = MethodInfo {
            name: "test/method",
            flags: MethodFlags::from_bits(0),
            params: &self.params,
            optional_count: 0,
            return_type: None,
            this_class: self.this_class,
            captured_scope: &self.captured,
        };
        let body = MethodBodyInfo {
            code,
            max_stack: self.max_stack,
            local_count: self.locals,
            init_scope_depth: 0,
            max_scope_depth: self.max_scope,
            exceptions: &self.exceptions,
        };
        compile_method(&self.registry, &self.pool, &method, &body, &self.options)
    }

    /// Compile and assert the structural invariants.
    pub fn compile_checked(&self, code: &[u8]) -> MethodGraph {
        let graph = self.compile(code);
        graph
            .verify_invariants(&self.pool, &self.registry, self.this_class)
            .unwrap_or_else(|e| panic!("invariant broken: {e}"));
        graph
    }
}
