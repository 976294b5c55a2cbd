//! The type lattice.
//!
//! `Unknown` is bottom; `Any` is top. Joins happen at phi nodes, so the
//! rules here define what a control-flow merge of two differently-typed
//! values is allowed to assume. The lattice has finite height and every
//! rule moves upward, which is what guarantees the binder's fixed point
//! terminates.

use crate::ir::{Const, DataType};
use avmlift_environ::{Builtin, ClassId, ClassRegistry};

/// Type context shared by the binder passes: the registry plus the
/// method-specific meanings of the singleton types.
pub struct TypeEnv<'a> {
    /// The class registry.
    pub registry: &'a dyn ClassRegistry,
    /// The class of `this`, when the method is an instance method.
    pub this_class: Option<ClassId>,
}

impl<'a> TypeEnv<'a> {
    /// Map a declared (registry) type to a lattice type.
    pub fn class_to_type(&self, class: Option<ClassId>) -> DataType {
        let Some(c) = class else {
            return DataType::Any;
        };
        let b = |builtin| self.registry.builtin(builtin) == Some(c);
        if b(Builtin::Int) {
            DataType::Int
        } else if b(Builtin::Uint) {
            DataType::Uint
        } else if b(Builtin::Number) {
            DataType::Number
        } else if b(Builtin::Boolean) {
            DataType::Bool
        } else if b(Builtin::String) {
            DataType::String
        } else if b(Builtin::Namespace) {
            DataType::Namespace
        } else if b(Builtin::QName) {
            DataType::QName
        } else {
            DataType::Object(c)
        }
    }

    /// The class whose trait table a value of type `ty` is resolved
    /// against. `None` means no compile-time table (any, null,
    /// undefined, the global object).
    pub fn type_class(&self, ty: DataType) -> Option<ClassId> {
        let b = |builtin| self.registry.builtin(builtin);
        match ty {
            DataType::Unknown | DataType::Any | DataType::Undefined | DataType::Null => None,
            DataType::Bool => b(Builtin::Boolean),
            DataType::Int => b(Builtin::Int),
            DataType::Uint => b(Builtin::Uint),
            DataType::Number => b(Builtin::Number),
            DataType::String => b(Builtin::String),
            DataType::Namespace => b(Builtin::Namespace),
            DataType::QName => b(Builtin::QName),
            DataType::Object(c) => Some(c),
            DataType::Class(_) => b(Builtin::Class),
            DataType::Function(_) => b(Builtin::Function),
            DataType::This => self.this_class,
            DataType::Global => None,
            DataType::Rest => b(Builtin::Array),
        }
    }

    /// Replace the singleton types by their concrete object types for
    /// joining against something else.
    fn concrete(&self, ty: DataType) -> DataType {
        match ty {
            DataType::This => match self.this_class {
                Some(c) => DataType::Object(c),
                None => DataType::Global,
            },
            DataType::Rest => match self.registry.builtin(Builtin::Array) {
                Some(c) => DataType::Object(c),
                None => DataType::Any,
            },
            other => other,
        }
    }

    fn object_root(&self) -> DataType {
        match self.registry.builtin(Builtin::Object) {
            Some(c) => DataType::Object(c),
            None => DataType::Any,
        }
    }

    /// What `Null` joined with `ty` becomes: reference types absorb the
    /// null, value types widen to the root object.
    fn join_null(&self, ty: DataType) -> DataType {
        match ty {
            DataType::String
            | DataType::Namespace
            | DataType::QName
            | DataType::Object(_)
            | DataType::Class(_)
            | DataType::Function(_)
            | DataType::Global => ty,
            _ => self.object_root(),
        }
    }

    /// The class standing behind a reference type, for least-common-
    /// ancestor joins.
    fn reference_class(&self, ty: DataType) -> Option<ClassId> {
        match ty {
            DataType::Object(c) => Some(c),
            DataType::Class(_) => self.registry.builtin(Builtin::Class),
            DataType::Function(_) => self.registry.builtin(Builtin::Function),
            DataType::Global => self.registry.builtin(Builtin::Object),
            _ => None,
        }
    }

    /// Join two types, with their constants when known. Commutative;
    /// constants only matter for the mixed int/uint refinement.
    pub fn join(
        &self,
        a: DataType,
        ca: Option<Const>,
        b: DataType,
        cb: Option<Const>,
    ) -> DataType {
        use DataType::*;
        if a == Unknown {
            return b;
        }
        if b == Unknown {
            return a;
        }
        if a == b {
            return a;
        }
        if a == Any || b == Any || a == Undefined || b == Undefined {
            return Any;
        }
        let a = self.concrete(a);
        let b = self.concrete(b);
        if a == b {
            return a;
        }

        // int/uint: a non-negative constant is representable on both
        // sides, so the merge keeps the other side's signedness.
        if a.is_integer() && b.is_integer() {
            let nonneg = |c: Option<Const>| matches!(c, Some(k) if k.as_int().map_or(false, |v| v >= 0));
            if nonneg(ca) {
                return b;
            }
            if nonneg(cb) {
                return a;
            }
            return Number;
        }
        if a.is_numeric() && b.is_numeric() {
            return Number;
        }
        if a == Null {
            return self.join_null(b);
        }
        if b == Null {
            return self.join_null(a);
        }

        // Two class objects merge below the classes they describe.
        if let (Class(c1), Class(c2)) = (a, b) {
            return Object(self.registry.common_ancestor(c1, c2));
        }
        match (self.reference_class(a), self.reference_class(b)) {
            (Some(c1), Some(c2)) => Object(self.registry.common_ancestor(c1, c2)),
            // A primitive meeting a non-matching primitive or reference
            // type boxes up to the root object class.
            _ => self.object_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avmlift_environ::dummy::DummyRegistry;

    fn env(reg: &DummyRegistry) -> TypeEnv {
        TypeEnv {
            registry: reg,
            this_class: None,
        }
    }

    #[test]
    fn bottom_and_top() {
        let reg = DummyRegistry::new();
        let env = env(&reg);
        assert_eq!(
            env.join(DataType::Unknown, None, DataType::Int, None),
            DataType::Int
        );
        assert_eq!(
            env.join(DataType::Any, None, DataType::Int, None),
            DataType::Any
        );
        assert_eq!(
            env.join(DataType::Int, None, DataType::Int, None),
            DataType::Int
        );
    }

    #[test]
    fn numeric_joins() {
        let reg = DummyRegistry::new();
        let env = env(&reg);
        assert_eq!(
            env.join(DataType::Int, None, DataType::Number, None),
            DataType::Number
        );
        // Mixed signedness without a helpful constant widens to number.
        assert_eq!(
            env.join(DataType::Int, None, DataType::Uint, None),
            DataType::Number
        );
        // A non-negative constant keeps the other side's type.
        assert_eq!(
            env.join(DataType::Int, Some(Const::Int(3)), DataType::Uint, None),
            DataType::Uint
        );
        assert_eq!(
            env.join(DataType::Uint, Some(Const::Uint(3)), DataType::Int, None),
            DataType::Int
        );
        assert_eq!(
            env.join(DataType::Int, Some(Const::Int(-1)), DataType::Uint, None),
            DataType::Number
        );
    }

    #[test]
    fn null_absorption() {
        let reg = DummyRegistry::new();
        let env = env(&reg);
        assert_eq!(
            env.join(DataType::String, None, DataType::Null, None),
            DataType::String
        );
        // null against a value type boxes to the root object.
        assert_eq!(
            env.join(DataType::Int, None, DataType::Null, None),
            DataType::Object(reg.object_class())
        );
    }

    #[test]
    fn class_hierarchy_joins() {
        let reg = DummyRegistry::new();
        let env = env(&reg);
        let (base, derived_a, derived_b) = reg.hierarchy();
        assert_eq!(
            env.join(
                DataType::Object(derived_a),
                None,
                DataType::Object(derived_b),
                None
            ),
            DataType::Object(base)
        );
        assert_eq!(
            env.join(
                DataType::Object(derived_a),
                None,
                DataType::Object(base),
                None
            ),
            DataType::Object(base)
        );
        // An interface on one side with no subtype relation falls to the
        // root object class.
        let iface = reg.interface_class();
        assert_eq!(
            env.join(
                DataType::Object(iface),
                None,
                DataType::Object(derived_a),
                None
            ),
            DataType::Object(reg.object_class())
        );
    }

    #[test]
    fn primitive_mismatch_boxes() {
        let reg = DummyRegistry::new();
        let env = env(&reg);
        assert_eq!(
            env.join(DataType::Bool, None, DataType::String, None),
            DataType::Object(reg.object_class())
        );
        assert_eq!(
            env.join(DataType::Undefined, None, DataType::Int, None),
            DataType::Any
        );
    }
}
