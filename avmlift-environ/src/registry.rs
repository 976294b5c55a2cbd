//! The registry and constant-pool traits the compiler consumes.
//!
//! Hosts implement [`ClassRegistry`] over their loaded class tables and
//! [`ConstPool`] over a method's ABC constant pool. Both are read-only for
//! the duration of a compilation; the compiler shares one registry
//! reference across its worker threads, so implementations must be `Sync`.

use crate::class::{Class, ClassId, MethodId, MethodSig, TraitDesc};
use crate::multiname::{Multiname, Namespace};

/// Well-known classes the binder special-cases.
///
/// Hosts map each builtin to the `ClassId` of their own definition of it.
/// A host that does not define some builtin (a trimmed-down library, say)
/// returns `None` and the binder simply never specialises against it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// The root of the class hierarchy.
    Object,
    /// `int`.
    Int,
    /// `uint`.
    Uint,
    /// `Number`.
    Number,
    /// `Boolean`.
    Boolean,
    /// `String`.
    String,
    /// `Namespace`.
    Namespace,
    /// `QName`.
    QName,
    /// `Function`.
    Function,
    /// `Class`.
    Class,
    /// `Array`.
    Array,
    /// `Math`.
    Math,
    /// The `Vector` generic base.
    Vector,
    /// `Vector.<int>`.
    VectorInt,
    /// `Vector.<uint>`.
    VectorUint,
    /// `Vector.<Number>`.
    VectorNumber,
    /// `Error`, the base of throwable classes.
    Error,
}

/// Read-only class and trait lookup.
pub trait ClassRegistry: Sync {
    /// The class data for `id`. Ids handed out by this registry are always
    /// valid for its lifetime.
    fn class(&self, id: ClassId) -> &Class;

    /// Resolve a compile-time multiname to a class, if one is defined.
    fn class_for_multiname(&self, mn: &Multiname) -> Option<ClassId>;

    /// The class declared by `class_info` entry `index` of the current ABC.
    fn class_for_class_info(&self, index: u32) -> Option<ClassId>;

    /// The method declared by `method_info` entry `index` of the current ABC.
    fn method_for_method_info(&self, index: u32) -> Option<MethodId>;

    /// The signature of `id`.
    fn method_sig(&self, id: MethodId) -> &MethodSig;

    /// Search the application-domain global traits.
    fn global_trait(&self, name: &str, nss: &[Namespace]) -> Option<&TraitDesc>;

    /// The host's definition of a well-known class.
    fn builtin(&self, b: Builtin) -> Option<ClassId>;

    /// Search `class`'s trait tables, walking the parent chain.
    ///
    /// Static lookups also consult instance traits of the class object's
    /// own type, which for compilation purposes means falling through to
    /// the instance table after the static one.
    fn lookup_trait(
        &self,
        class: ClassId,
        name: &str,
        nss: &[Namespace],
        is_static: bool,
    ) -> Option<&TraitDesc> {
        let mut cur = Some(class);
        while let Some(id) = cur {
            let c = self.class(id);
            if is_static {
                if let Some(t) = c.find_trait(name, nss, true) {
                    return Some(t);
                }
            }
            if let Some(t) = c.find_trait(name, nss, false) {
                return Some(t);
            }
            cur = c.parent;
        }
        None
    }

    /// Is `sub` the same class as `sup` or derived from it?
    ///
    /// Interface implementation counts as derivation.
    fn is_subtype(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut cur = Some(sub);
        while let Some(id) = cur {
            if id == sup {
                return true;
            }
            let c = self.class(id);
            if c.interfaces.iter().any(|&i| i == sup || self.is_subtype(i, sup)) {
                return true;
            }
            cur = c.parent;
        }
        false
    }

    /// Least common ancestor of two classes.
    ///
    /// Walks parent chains only. If either side is an interface and
    /// neither is a subtype of the other, the answer is the root object
    /// class; same when the chains share no ancestor.
    fn common_ancestor(&self, a: ClassId, b: ClassId) -> ClassId {
        let object = self.builtin(Builtin::Object).unwrap_or(a);
        if self.is_subtype(a, b) {
            return b;
        }
        if self.is_subtype(b, a) {
            return a;
        }
        if self.class(a).flags.is_interface() || self.class(b).flags.is_interface() {
            return object;
        }
        let mut up = Some(a);
        while let Some(id) = up {
            if self.is_subtype(b, id) {
                return id;
            }
            up = self.class(id).parent;
        }
        object
    }
}

/// Per-method constant-pool access.
///
/// Indices are raw u30 operands out of the bytecode; `None` means the
/// index is out of range for the pool, which the compiler reports as
/// corrupt ABC.
pub trait ConstPool {
    /// Signed integer pool entry.
    fn int(&self, index: u32) -> Option<i32>;
    /// Unsigned integer pool entry.
    fn uint(&self, index: u32) -> Option<u32>;
    /// Double pool entry.
    fn double(&self, index: u32) -> Option<f64>;
    /// String pool entry.
    fn string(&self, index: u32) -> Option<&str>;
    /// Namespace pool entry.
    fn namespace(&self, index: u32) -> Option<&Namespace>;
    /// Multiname pool entry. Index 0 is not a valid name.
    fn multiname(&self, index: u32) -> Option<&Multiname>;
}

/// Method flags out of the ABC `method_info`.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct MethodFlags {
    bits: u8,
}

impl MethodFlags {
    const NEED_ARGUMENTS: u8 = 0x01;
    const NEED_ACTIVATION: u8 = 0x02;
    const NEED_REST: u8 = 0x04;
    const HAS_OPTIONAL: u8 = 0x08;
    const SET_DXNS: u8 = 0x40;

    /// Flags from the raw ABC byte.
    pub fn from_bits(bits: u8) -> Self {
        Self { bits }
    }

    /// Method uses the `arguments` array.
    pub fn need_arguments(self) -> bool {
        self.bits & Self::NEED_ARGUMENTS != 0
    }

    /// Method needs an activation object.
    pub fn need_activation(self) -> bool {
        self.bits & Self::NEED_ACTIVATION != 0
    }

    /// Method takes rest arguments.
    pub fn need_rest(self) -> bool {
        self.bits & Self::NEED_REST != 0
    }

    /// Method has optional parameters.
    pub fn has_optional(self) -> bool {
        self.bits & Self::HAS_OPTIONAL != 0
    }

    /// Method may set the default XML namespace.
    pub fn set_dxns(self) -> bool {
        self.bits & Self::SET_DXNS != 0
    }
}

/// One entry of a method's captured (outer) scope stack, outermost first.
#[derive(Copy, Clone, Debug)]
pub struct CapturedScope {
    /// Type of the scope object; `None` when unknown.
    pub class: Option<ClassId>,
    /// Pushed with `pushwith` (dynamic members participate in lookup).
    pub with: bool,
    /// This entry is the global object.
    pub global: bool,
}

/// One exception_info record of a method body.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// First covered byte offset (inclusive).
    pub from: u32,
    /// Last covered byte offset (exclusive).
    pub to: u32,
    /// Byte offset of the catch target.
    pub target: u32,
    /// Multiname index of the caught type; 0 catches everything.
    pub type_name: u32,
    /// Multiname index of the catch variable name; 0 if none.
    pub var_name: u32,
}

/// The declaration-side description of the method being compiled.
#[derive(Clone, Debug)]
pub struct MethodInfo<'a> {
    /// Method name, for diagnostics.
    pub name: &'a str,
    /// ABC method flags.
    pub flags: MethodFlags,
    /// Declared parameter types, `None` for `*`.
    pub params: &'a [Option<ClassId>],
    /// Number of trailing optional parameters.
    pub optional_count: u32,
    /// Declared return type.
    pub return_type: Option<ClassId>,
    /// The class whose instance `this` is; `None` for free functions
    /// (whose `this` is the global object).
    pub this_class: Option<ClassId>,
    /// The captured scope stack, outermost first.
    pub captured_scope: &'a [CapturedScope],
}

/// The body-side description of the method being compiled.
#[derive(Clone, Debug)]
pub struct MethodBodyInfo<'a> {
    /// Raw bytecode.
    pub code: &'a [u8],
    /// Declared operand-stack limit.
    pub max_stack: u32,
    /// Declared local register count (including `this` at index 0).
    pub local_count: u32,
    /// Scope depth on entry (captured scope size).
    pub init_scope_depth: u32,
    /// Declared scope-stack limit.
    pub max_scope_depth: u32,
    /// Exception handler records.
    pub exceptions: &'a [ExceptionInfo],
}

impl MethodBodyInfo<'_> {
    /// Number of scope slots this body may push.
    pub fn scope_limit(&self) -> u32 {
        self.max_scope_depth.saturating_sub(self.init_scope_depth)
    }
}
