//! An in-memory registry and constant pool for tests and examples.
//!
//! `DummyRegistry` models a tiny fixed world: the builtin classes the
//! binder special-cases, a small user hierarchy (`Base`, `DerivedA`,
//! `DerivedB`, an interface, and a `Foo` class with a public `bar:int`
//! member), and growable global traits. `DummyPool` is a constant pool
//! whose entries are added by the test itself. Hosts embedding the
//! compiler implement [`ClassRegistry`] and [`ConstPool`] over their own
//! tables instead; nothing in the compiler depends on this module.

use crate::class::{
    Class, ClassFlags, ClassId, IndexAccess, MethodId, MethodSig, TraitDesc, TraitKind,
};
use crate::multiname::{Multiname, Namespace, NsSet};
use crate::registry::{Builtin, ClassRegistry, ConstPool};
use cranelift_entity::PrimaryMap;

/// A tiny fixed world. See the module docs.
pub struct DummyRegistry {
    classes: PrimaryMap<ClassId, Class>,
    sigs: PrimaryMap<MethodId, MethodSig>,
    builtins: Vec<(Builtin, ClassId)>,
    globals: Vec<TraitDesc>,
    object: ClassId,
    base: ClassId,
    derived_a: ClassId,
    derived_b: ClassId,
    iface: ClassId,
    foo: ClassId,
    vector_int: ClassId,
}

/// A public slot trait.
pub fn slot(name: &str, ty: Option<ClassId>) -> TraitDesc {
    TraitDesc {
        name: name.into(),
        ns: Namespace::public(),
        kind: TraitKind::Slot { slot_id: 0, ty },
    }
}

/// A public method trait.
pub fn method(name: &str, m: MethodId) -> TraitDesc {
    TraitDesc {
        name: name.into(),
        ns: Namespace::public(),
        kind: TraitKind::Method { method: m },
    }
}

fn plain(
    classes: &mut PrimaryMap<ClassId, Class>,
    name: &str,
    parent: Option<ClassId>,
    finality: bool,
) -> ClassId {
    let mut flags = ClassFlags::new();
    if finality {
        flags.set_final();
    }
    classes.push(Class {
        name: name.into(),
        parent,
        flags,
        interfaces: Vec::new(),
        instance_traits: Vec::new(),
        static_traits: Vec::new(),
        index_access: None,
        constructor: Some(MethodSig::default()),
    })
}

impl DummyRegistry {
    /// Build the fixed world.
    pub fn new() -> Self {
        let mut classes: PrimaryMap<ClassId, Class> = PrimaryMap::new();
        let mut sigs: PrimaryMap<MethodId, MethodSig> = PrimaryMap::new();
        let mut builtins = Vec::new();

        let object = plain(&mut classes, "Object", None, false);
        classes[object].flags.set_dynamic();
        let int_c = plain(&mut classes, "int", Some(object), true);
        let uint_c = plain(&mut classes, "uint", Some(object), true);
        let number = plain(&mut classes, "Number", Some(object), true);
        let boolean = plain(&mut classes, "Boolean", Some(object), true);
        let string = plain(&mut classes, "String", Some(object), true);
        let namespace = plain(&mut classes, "Namespace", Some(object), true);
        let qname = plain(&mut classes, "QName", Some(object), true);
        let function = plain(&mut classes, "Function", Some(object), false);
        let class_c = plain(&mut classes, "Class", Some(object), true);
        let array = plain(&mut classes, "Array", Some(object), false);
        classes[array].flags.set_dynamic();
        let math = plain(&mut classes, "Math", Some(object), true);
        let vector = plain(&mut classes, "Vector", Some(object), true);
        let vector_int = plain(&mut classes, "Vector.<int>", Some(object), true);
        let vector_uint = plain(&mut classes, "Vector.<uint>", Some(object), true);
        let vector_number = plain(&mut classes, "Vector.<Number>", Some(object), true);
        let error = plain(&mut classes, "Error", Some(object), false);

        // String: charAt(int):String, charCodeAt(int):Number, length.
        let char_at = sigs.push(MethodSig {
            params: vec![Some(number)],
            optional_count: 1,
            has_rest: false,
            ret: Some(string),
        });
        let char_code_at = sigs.push(MethodSig {
            params: vec![Some(number)],
            optional_count: 1,
            has_rest: false,
            ret: Some(number),
        });
        classes[string].instance_traits = vec![
            method("charAt", char_at),
            method("charCodeAt", char_code_at),
            slot("length", Some(int_c)),
        ];

        // Math.min / Math.max are static and variadic.
        let min = sigs.push(MethodSig {
            params: vec![Some(number), Some(number)],
            optional_count: 0,
            has_rest: true,
            ret: Some(number),
        });
        let max = sigs.push(MethodSig {
            params: vec![Some(number), Some(number)],
            optional_count: 0,
            has_rest: true,
            ret: Some(number),
        });
        classes[math].static_traits = vec![method("min", min), method("max", max)];

        // Array.push(...):uint plus numeric indexing.
        let push = sigs.push(MethodSig {
            params: vec![],
            optional_count: 0,
            has_rest: true,
            ret: Some(uint_c),
        });
        classes[array].instance_traits = vec![method("push", push), slot("length", Some(uint_c))];
        classes[array].index_access = Some(IndexAccess {
            element: None,
            writable: true,
        });

        for (v, elem) in [
            (vector_int, int_c),
            (vector_uint, uint_c),
            (vector_number, number),
        ] {
            classes[v].index_access = Some(IndexAccess {
                element: Some(elem),
                writable: true,
            });
            classes[v].instance_traits = vec![slot("length", Some(uint_c))];
        }

        builtins.extend([
            (Builtin::Object, object),
            (Builtin::Int, int_c),
            (Builtin::Uint, uint_c),
            (Builtin::Number, number),
            (Builtin::Boolean, boolean),
            (Builtin::String, string),
            (Builtin::Namespace, namespace),
            (Builtin::QName, qname),
            (Builtin::Function, function),
            (Builtin::Class, class_c),
            (Builtin::Array, array),
            (Builtin::Math, math),
            (Builtin::Vector, vector),
            (Builtin::VectorInt, vector_int),
            (Builtin::VectorUint, vector_uint),
            (Builtin::VectorNumber, vector_number),
            (Builtin::Error, error),
        ]);

        // A small user hierarchy.
        let base = plain(&mut classes, "Base", Some(object), false);
        let derived_a = plain(&mut classes, "DerivedA", Some(base), false);
        let derived_b = plain(&mut classes, "DerivedB", Some(base), false);
        let iface = plain(&mut classes, "IFace", None, false);
        classes[iface].flags.set_interface();
        let foo = plain(&mut classes, "Foo", Some(object), false);
        classes[foo].instance_traits = vec![slot("bar", Some(int_c))];

        Self {
            classes,
            sigs,
            builtins,
            globals: Vec::new(),
            object,
            base,
            derived_a,
            derived_b,
            iface,
            foo,
            vector_int,
        }
    }

    /// The root object class.
    pub fn object_class(&self) -> ClassId {
        self.object
    }

    /// The `(Base, DerivedA, DerivedB)` triple.
    pub fn hierarchy(&self) -> (ClassId, ClassId, ClassId) {
        (self.base, self.derived_a, self.derived_b)
    }

    /// The interface class.
    pub fn interface_class(&self) -> ClassId {
        self.iface
    }

    /// The `Foo` class (public `bar:int`).
    pub fn foo_class(&self) -> ClassId {
        self.foo
    }

    /// `Vector.<int>`.
    pub fn vector_int_class(&self) -> ClassId {
        self.vector_int
    }

    /// Register an application-domain global trait.
    pub fn add_global(&mut self, t: TraitDesc) {
        self.globals.push(t);
    }

    /// Register a signature and get its id.
    pub fn add_sig(&mut self, sig: MethodSig) -> MethodId {
        self.sigs.push(sig)
    }

    /// Mutable access to a class, for fixture tweaks.
    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id]
    }
}

impl Default for DummyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry for DummyRegistry {
    fn class(&self, id: ClassId) -> &Class {
        &self.classes[id]
    }

    fn class_for_multiname(&self, mn: &Multiname) -> Option<ClassId> {
        let name = mn.local_name()?;
        self.classes
            .iter()
            .find(|(_, c)| &*c.name == name)
            .map(|(id, _)| id)
    }

    fn class_for_class_info(&self, index: u32) -> Option<ClassId> {
        self.classes.iter().nth(index as usize).map(|(id, _)| id)
    }

    fn method_for_method_info(&self, _index: u32) -> Option<MethodId> {
        None
    }

    fn method_sig(&self, id: MethodId) -> &MethodSig {
        &self.sigs[id]
    }

    fn global_trait(&self, name: &str, nss: &[Namespace]) -> Option<&TraitDesc> {
        self.globals.iter().find(|t| {
            &*t.name == name
                && if nss.is_empty() {
                    t.ns.is_public()
                } else {
                    nss.iter().any(|ns| *ns == t.ns)
                }
        })
    }

    fn builtin(&self, b: Builtin) -> Option<ClassId> {
        self.builtins
            .iter()
            .find(|(builtin, _)| *builtin == b)
            .map(|&(_, id)| id)
    }
}

/// A growable constant pool; index 0 of each table is reserved like in
/// a real ABC file.
pub struct DummyPool {
    ints: Vec<i32>,
    uints: Vec<u32>,
    doubles: Vec<f64>,
    strings: Vec<String>,
    namespaces: Vec<Namespace>,
    multinames: Vec<Option<Multiname>>,
}

impl DummyPool {
    /// An empty pool with the reserved zero entries.
    pub fn new() -> Self {
        Self {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![0.0],
            strings: vec![String::new()],
            namespaces: vec![Namespace::public()],
            multinames: vec![None],
        }
    }

    /// Add an int entry, returning its index.
    pub fn add_int(&mut self, v: i32) -> u32 {
        self.ints.push(v);
        self.ints.len() as u32 - 1
    }

    /// Add a uint entry, returning its index.
    pub fn add_uint(&mut self, v: u32) -> u32 {
        self.uints.push(v);
        self.uints.len() as u32 - 1
    }

    /// Add a double entry, returning its index.
    pub fn add_double(&mut self, v: f64) -> u32 {
        self.doubles.push(v);
        self.doubles.len() as u32 - 1
    }

    /// Add a string entry, returning its index.
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.strings.push(s.to_owned());
        self.strings.len() as u32 - 1
    }

    /// Add a namespace entry, returning its index.
    pub fn add_namespace(&mut self, ns: Namespace) -> u32 {
        self.namespaces.push(ns);
        self.namespaces.len() as u32 - 1
    }

    /// Add a multiname entry, returning its index.
    pub fn add_multiname(&mut self, mn: Multiname) -> u32 {
        self.multinames.push(Some(mn));
        self.multinames.len() as u32 - 1
    }

    /// Add a public qualified name.
    pub fn qname(&mut self, name: &str) -> u32 {
        self.add_multiname(Multiname::public(name))
    }

    /// Add a `MultinameL` with the public namespace set (a runtime local
    /// name).
    pub fn late_name(&mut self) -> u32 {
        self.add_multiname(Multiname::MultinameL {
            ns_set: NsSet::single(Namespace::public()),
            attr: false,
        })
    }
}

impl Default for DummyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstPool for DummyPool {
    fn int(&self, index: u32) -> Option<i32> {
        self.ints.get(index as usize).copied()
    }

    fn uint(&self, index: u32) -> Option<u32> {
        self.uints.get(index as usize).copied()
    }

    fn double(&self, index: u32) -> Option<f64> {
        self.doubles.get(index as usize).copied()
    }

    fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    fn namespace(&self, index: u32) -> Option<&Namespace> {
        self.namespaces.get(index as usize)
    }

    fn multiname(&self, index: u32) -> Option<&Multiname> {
        self.multinames.get(index as usize)?.as_ref()
    }
}
