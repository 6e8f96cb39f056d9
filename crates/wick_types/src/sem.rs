//! The semantic type forms.

use indexmap::IndexMap;
use wick_base::Symbol;
use wick_heap::ItemIndex;

/// A record type: a field-to-type mapping plus openness.
///
/// An open record admits additional unlisted fields; this matters both to
/// subtyping and to the conservative reference-containment analysis. Field
/// order is canonical (sorted by name) from the moment a record is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: IndexMap<Symbol, Type>,
    pub open: bool,
}

impl Record {
    pub fn new(fields: IndexMap<Symbol, Type>, open: bool) -> Self {
        Self { fields, open }
    }

    pub fn field(&self, name: Symbol) -> Option<&Type> {
        self.fields.get(&name)
    }

    /// True when every field of `other` also exists here.
    pub fn contains_fields_of(&self, other: &Record) -> bool {
        other.fields.keys().all(|f| self.fields.contains_key(f))
    }

    /// True when both records list exactly the same field names.
    pub fn same_fields(&self, other: &Record) -> bool {
        self.fields.len() == other.fields.len() && self.contains_fields_of(other)
    }
}

/// A use of a declared type alias, with concrete template arguments.
///
/// `link` is the heap index of the resolved `Link` item naming the alias;
/// it doubles as the identity used by the subtype operator's expansion
/// stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nominal {
    pub link: ItemIndex,
    pub arguments: Vec<Type>,
}

/// Callable type forms.
///
/// Functions are pure; methods may capture lifetimes and mutate referenced
/// state; properties are boolean-valued specification helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callable {
    Function {
        parameters: Vec<Type>,
        returns: Vec<Type>,
    },
    Method {
        parameters: Vec<Type>,
        returns: Vec<Type>,
        captured: Vec<Symbol>,
        lifetimes: Vec<Symbol>,
    },
    Property {
        parameters: Vec<Type>,
    },
}

impl Callable {
    pub fn parameters(&self) -> &[Type] {
        match self {
            Callable::Function { parameters, .. }
            | Callable::Method { parameters, .. }
            | Callable::Property { parameters } => parameters,
        }
    }

    pub fn returns(&self) -> &[Type] {
        match self {
            Callable::Function { returns, .. } | Callable::Method { returns, .. } => returns,
            Callable::Property { .. } => &[],
        }
    }
}

/// A semantic type.
///
/// `Intersection` and `Difference` are compiler-internal combinators used by
/// the subtype operator; [`crate::lower`] refuses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Any,
    Void,
    Null,
    Bool,
    Byte,
    Int,
    Array(Box<Type>),
    Record(Record),
    /// Reference with an optional statically-scoped lifetime; `None` is the
    /// unscoped (global) lifetime.
    Reference(Box<Type>, Option<Symbol>),
    Callable(Callable),
    /// Order preserved for deterministic traversal; semantically a set.
    Union(Vec<Type>),
    Intersection(Vec<Type>),
    Difference(Box<Type>, Box<Type>),
    Nominal(Nominal),
    /// Back-reference into the heap closing a cyclic type.
    Recursive(ItemIndex),
    /// A template type variable.
    Variable(Symbol),
}

impl Type {
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    pub fn reference(element: Type) -> Type {
        Type::Reference(Box::new(element), None)
    }

    pub fn reference_in(element: Type, lifetime: Symbol) -> Type {
        Type::Reference(Box::new(element), Some(lifetime))
    }

    pub fn difference(left: Type, right: Type) -> Type {
        Type::Difference(Box::new(left), Box::new(right))
    }

    /// A union of the given members, flattening the degenerate cases.
    pub fn union_of(mut members: Vec<Type>) -> Type {
        members.dedup();
        match members.len() {
            0 => Type::Void,
            1 => members.pop().unwrap(),
            _ => Type::Union(members),
        }
    }

    pub fn record(fields: Vec<(Symbol, Type)>, open: bool) -> Type {
        Type::Record(Record::new(fields.into_iter().collect(), open))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Any | Type::Void | Type::Null | Type::Bool | Type::Byte | Type::Int
        )
    }

    /// True for the combinators that must never reach the heap.
    pub fn is_semantic_only(&self) -> bool {
        matches!(self, Type::Intersection(_) | Type::Difference(_, _))
    }

    /// The members of this type viewed as a union; a non-union is its own
    /// single member.
    pub fn union_members(&self) -> &[Type] {
        match self {
            Type::Union(members) => members,
            other => std::slice::from_ref(other),
        }
    }
}
