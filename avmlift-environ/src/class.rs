//! Classes and traits.
//!
//! A `Class` is the compiler-facing description of a class or interface:
//! its parent, its flags, and its trait tables. Traits are the statically
//! bound members the semantic binder resolves property accesses against.

use crate::multiname::Namespace;
use cranelift_entity::entity_impl;

/// A compact reference to a class in the registry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);
entity_impl!(ClassId, "class");

/// A compact reference to a method signature in the registry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);
entity_impl!(MethodId, "method");

/// Class property flags.
///
/// Represented as a bit field rather than bools so a `Class` stays small
/// and the flags can be extended without changing its layout.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct ClassFlags {
    bits: u8,
}

impl ClassFlags {
    const INTERFACE: u8 = 1 << 0;
    const FINAL: u8 = 1 << 1;
    const DYNAMIC: u8 = 1 << 2;

    /// No flags set.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(self, bit: u8) -> bool {
        self.bits & bit != 0
    }

    fn set(&mut self, bit: u8) -> &mut Self {
        self.bits |= bit;
        self
    }

    /// Is this an interface?
    pub fn is_interface(self) -> bool {
        self.read(Self::INTERFACE)
    }

    /// Mark as an interface.
    pub fn set_interface(&mut self) -> &mut Self {
        self.set(Self::INTERFACE)
    }

    /// Is this class final (no subclasses)?
    pub fn is_final(self) -> bool {
        self.read(Self::FINAL)
    }

    /// Mark as final.
    pub fn set_final(&mut self) -> &mut Self {
        self.set(Self::FINAL)
    }

    /// Can instances carry dynamic properties?
    pub fn is_dynamic(self) -> bool {
        self.read(Self::DYNAMIC)
    }

    /// Mark as dynamic.
    pub fn set_dynamic(&mut self) -> &mut Self {
        self.set(Self::DYNAMIC)
    }
}

/// A named, typed class member.
#[derive(Clone, Debug)]
pub struct TraitDesc {
    /// Local name.
    pub name: Box<str>,
    /// Declaring namespace.
    pub ns: Namespace,
    /// What kind of member, with its payload.
    pub kind: TraitKind,
}

/// The kind of a trait, with kind-specific payload.
#[derive(Clone, Debug)]
pub enum TraitKind {
    /// A mutable field. `ty` is `None` for `*`-typed slots.
    Slot {
        /// Fixed slot index, 1-based; 0 means the host assigns one.
        slot_id: u32,
        /// Declared type.
        ty: Option<ClassId>,
    },
    /// A `const` field.
    Const {
        /// Fixed slot index, 1-based; 0 means the host assigns one.
        slot_id: u32,
        /// Declared type.
        ty: Option<ClassId>,
    },
    /// A method.
    Method {
        /// Signature reference.
        method: MethodId,
    },
    /// A property getter.
    Getter {
        /// Signature reference.
        method: MethodId,
    },
    /// A property setter.
    Setter {
        /// Signature reference.
        method: MethodId,
    },
    /// A nested class.
    Class {
        /// The class named by this trait.
        class: ClassId,
    },
    /// A free function bound as a member.
    Function {
        /// Signature reference.
        method: MethodId,
    },
}

/// Numeric index access supported by a class (arrays, vectors, the rest
/// array). When present, `a[i]` with a numeric `i` binds to a specialised
/// accessor instead of a runtime name lookup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexAccess {
    /// Element type read/written through the accessor; `None` for `*`.
    pub element: Option<ClassId>,
    /// Whether writes through the accessor are allowed (vectors of fixed
    /// length still allow writes; a sealed host array may not).
    pub writable: bool,
}

/// A method signature as the binder sees it.
#[derive(Clone, Debug, Default)]
pub struct MethodSig {
    /// Declared parameter types, `None` for `*`.
    pub params: Vec<Option<ClassId>>,
    /// Number of trailing parameters that have default values.
    pub optional_count: u32,
    /// Whether the method accepts rest arguments.
    pub has_rest: bool,
    /// Declared return type, `None` for `*` or `void`.
    pub ret: Option<ClassId>,
}

impl MethodSig {
    /// Fewest arguments a call may pass.
    pub fn required_count(&self) -> u32 {
        self.params.len() as u32 - self.optional_count
    }

    /// Is `argc` an acceptable argument count for this signature?
    pub fn accepts_argc(&self, argc: u32) -> bool {
        argc >= self.required_count() && (self.has_rest || argc <= self.params.len() as u32)
    }
}

/// The compiler-facing description of one class.
#[derive(Clone, Debug)]
pub struct Class {
    /// Qualified name, for diagnostics.
    pub name: Box<str>,
    /// Parent class; `None` only for the root object class.
    pub parent: Option<ClassId>,
    /// Interface/final/dynamic flags.
    pub flags: ClassFlags,
    /// Implemented interfaces.
    pub interfaces: Vec<ClassId>,
    /// Per-instance traits.
    pub instance_traits: Vec<TraitDesc>,
    /// Static traits on the class object.
    pub static_traits: Vec<TraitDesc>,
    /// Numeric index accessor, if the class has one.
    pub index_access: Option<IndexAccess>,
    /// Constructor signature; `None` for interfaces.
    pub constructor: Option<MethodSig>,
}

impl Class {
    /// Search one trait table of this class (no parent walk).
    ///
    /// `nss` is the set of acceptable namespaces; an empty set matches
    /// only public traits, which is how runtime-namespace lookups that
    /// were folded to a public constant behave.
    pub fn find_trait(&self, name: &str, nss: &[Namespace], is_static: bool) -> Option<&TraitDesc> {
        let table = if is_static {
            &self.static_traits
        } else {
            &self.instance_traits
        };
        table.iter().find(|t| {
            &*t.name == name
                && if nss.is_empty() {
                    t.ns.is_public()
                } else {
                    nss.iter().any(|ns| *ns == t.ns)
                }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_argc() {
        let sig = MethodSig {
            params: vec![None, None, None],
            optional_count: 1,
            has_rest: false,
            ret: None,
        };
        assert!(!sig.accepts_argc(1));
        assert!(sig.accepts_argc(2));
        assert!(sig.accepts_argc(3));
        assert!(!sig.accepts_argc(4));

        let rest = MethodSig {
            params: vec![None],
            optional_count: 0,
            has_rest: true,
            ret: None,
        };
        assert!(rest.accepts_argc(10));
    }
}
