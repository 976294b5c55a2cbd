//! Property-name descriptors.
//!
//! An ABC multiname combines zero or more compile-time namespaces, an
//! optional runtime namespace operand, and an optional runtime local-name
//! operand. The compiler needs to know, per name, how many of its
//! components arrive on the operand stack; everything else is matched
//! against trait tables by `(namespace, local name)` pairs.

use core::fmt;
use smallvec::SmallVec;

/// The kind of a namespace. Kinds participate in equality: two namespaces
/// match only if both kind and URI match, except that private namespaces
/// never match across distinct declarations (hosts give each private
/// namespace a unique URI to preserve this).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NsKind {
    /// `namespace` declarations and the default public namespace.
    Namespace,
    /// A package namespace (`package foo.bar`).
    Package,
    /// Package-internal visibility.
    PackageInternal,
    /// `protected` members.
    Protected,
    /// An explicit namespace.
    Explicit,
    /// `protected` seen from a static context.
    StaticProtected,
    /// `private` members.
    Private,
}

/// A single namespace: kind plus URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Namespace kind.
    pub kind: NsKind,
    /// Namespace URI; empty for the unnamed package.
    pub uri: Box<str>,
}

impl Namespace {
    /// The public namespace of the unnamed package.
    pub fn public() -> Self {
        Self {
            kind: NsKind::Package,
            uri: "".into(),
        }
    }

    /// A package namespace with the given URI.
    pub fn package(uri: &str) -> Self {
        Self {
            kind: NsKind::Package,
            uri: uri.into(),
        }
    }

    /// Is this the public namespace of some package?
    pub fn is_public(&self) -> bool {
        self.kind == NsKind::Package
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{}", self.uri)
        }
    }
}

/// An ordered set of compile-time namespaces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NsSet(SmallVec<[Namespace; 2]>);

impl NsSet {
    /// An empty set.
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// A set holding a single namespace.
    pub fn single(ns: Namespace) -> Self {
        let mut v = SmallVec::new();
        v.push(ns);
        Self(v)
    }

    /// Build a set from a slice of namespaces.
    pub fn from_slice(nss: &[Namespace]) -> Self {
        Self(nss.iter().cloned().collect())
    }

    /// The namespaces in declaration order.
    pub fn as_slice(&self) -> &[Namespace] {
        &self.0
    }

    /// Does the set contain `ns`?
    pub fn contains(&self, ns: &Namespace) -> bool {
        self.0.iter().any(|n| n == ns)
    }
}

/// A property-name descriptor.
///
/// The variants mirror the ABC multiname kinds. `Rtq*` variants take their
/// namespace from the operand stack; `*L` variants take their local name
/// from the operand stack. Attribute names (`@name` in E4X expressions)
/// carry `attr` so the compiler can reject them where a plain name is
/// required.
#[derive(Clone, Debug, PartialEq)]
pub enum Multiname {
    /// Fully qualified compile-time name.
    QName {
        /// The single qualifying namespace.
        ns: Namespace,
        /// Local name.
        name: Box<str>,
        /// E4X attribute name.
        attr: bool,
    },
    /// Runtime namespace, compile-time local name.
    RtqName {
        /// Local name.
        name: Box<str>,
        /// E4X attribute name.
        attr: bool,
    },
    /// Runtime namespace and runtime local name.
    RtqNameL {
        /// E4X attribute name.
        attr: bool,
    },
    /// Compile-time namespace set, compile-time local name.
    Multiname {
        /// Candidate namespaces.
        ns_set: NsSet,
        /// Local name.
        name: Box<str>,
        /// E4X attribute name.
        attr: bool,
    },
    /// Compile-time namespace set, runtime local name.
    MultinameL {
        /// Candidate namespaces.
        ns_set: NsSet,
        /// E4X attribute name.
        attr: bool,
    },
    /// A parameterized name such as `Vector.<int>`.
    Typed {
        /// The generic base name.
        base: Box<Multiname>,
        /// Type arguments.
        args: Vec<Multiname>,
    },
}

impl Multiname {
    /// Shorthand for a public qualified name.
    pub fn public(name: &str) -> Self {
        Multiname::QName {
            ns: Namespace::public(),
            name: name.into(),
            attr: false,
        }
    }

    /// Does this name take its namespace from the operand stack?
    pub fn has_runtime_ns(&self) -> bool {
        matches!(
            self,
            Multiname::RtqName { .. } | Multiname::RtqNameL { .. }
        )
    }

    /// Does this name take its local name from the operand stack?
    pub fn has_runtime_name(&self) -> bool {
        matches!(
            self,
            Multiname::RtqNameL { .. } | Multiname::MultinameL { .. }
        )
    }

    /// Number of operand-stack arguments this name consumes (0, 1 or 2).
    pub fn runtime_arg_count(&self) -> u32 {
        self.has_runtime_ns() as u32 + self.has_runtime_name() as u32
    }

    /// The compile-time local name, if there is one.
    pub fn local_name(&self) -> Option<&str> {
        match self {
            Multiname::QName { name, .. }
            | Multiname::RtqName { name, .. }
            | Multiname::Multiname { name, .. } => Some(name),
            Multiname::RtqNameL { .. } | Multiname::MultinameL { .. } => None,
            Multiname::Typed { base, .. } => base.local_name(),
        }
    }

    /// The compile-time namespaces to search, as a slice.
    ///
    /// Empty for names whose namespace arrives at runtime.
    pub fn ns_candidates(&self) -> &[Namespace] {
        match self {
            Multiname::QName { ns, .. } => core::slice::from_ref(ns),
            Multiname::Multiname { ns_set, .. } | Multiname::MultinameL { ns_set, .. } => {
                ns_set.as_slice()
            }
            Multiname::RtqName { .. } | Multiname::RtqNameL { .. } => &[],
            Multiname::Typed { base, .. } => base.ns_candidates(),
        }
    }

    /// Is this an E4X attribute name?
    pub fn is_attribute(&self) -> bool {
        match self {
            Multiname::QName { attr, .. }
            | Multiname::RtqName { attr, .. }
            | Multiname::RtqNameL { attr }
            | Multiname::Multiname { attr, .. }
            | Multiname::MultinameL { attr, .. } => *attr,
            Multiname::Typed { base, .. } => base.is_attribute(),
        }
    }
}

// Display is only used in error messages and trace dumps; keep it short.
impl fmt::Display for Multiname {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Multiname::QName { ns, name, .. } => {
                if ns.uri.is_empty() {
                    write!(f, "{name}")
                } else {
                    write!(f, "{ns}::{name}")
                }
            }
            Multiname::RtqName { name, .. } => write!(f, "<rtns>::{name}"),
            Multiname::RtqNameL { .. } => write!(f, "<rtns>::<rtname>"),
            Multiname::Multiname { name, .. } => write!(f, "{{..}}::{name}"),
            Multiname::MultinameL { .. } => write!(f, "{{..}}::<rtname>"),
            Multiname::Typed { base, args } => {
                write!(f, "{base}.<")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_arg_counts() {
        assert_eq!(Multiname::public("x").runtime_arg_count(), 0);
        assert_eq!(
            Multiname::RtqName {
                name: "x".into(),
                attr: false
            }
            .runtime_arg_count(),
            1
        );
        assert_eq!(Multiname::RtqNameL { attr: false }.runtime_arg_count(), 2);
        assert_eq!(
            Multiname::MultinameL {
                ns_set: NsSet::single(Namespace::public()),
                attr: false
            }
            .runtime_arg_count(),
            1
        );
    }

    #[test]
    fn ns_candidates() {
        let mn = Multiname::Multiname {
            ns_set: NsSet::from_slice(&[Namespace::public(), Namespace::package("flash.utils")]),
            name: "x".into(),
            attr: false,
        };
        assert_eq!(mn.ns_candidates().len(), 2);
        assert!(Multiname::RtqNameL { attr: false }.ns_candidates().is_empty());
    }
}
