//! Identifiers and qualified names.
//!
//! An [`Identifier`] is a single interned name with the span it was written
//! at. A [`Name`] is a non-empty path of identifiers (`std::collections`, or
//! just `max`) as it appears before resolution. The resolver turns partial
//! names into fully-qualified ones; both shapes are carried by this type.

use crate::intern::{Interner, Symbol};
use crate::span::Span;

/// A single name with its source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub symbol: Symbol,
    pub span: Span,
}

impl Identifier {
    pub fn new(symbol: Symbol, span: Span) -> Self {
        Self { symbol, span }
    }

    /// An identifier with no source location, for synthesized names.
    pub fn synthetic(symbol: Symbol) -> Self {
        Self {
            symbol,
            span: Span::default(),
        }
    }
}

/// A non-empty sequence of identifiers forming a (possibly partial) path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    components: Vec<Identifier>,
}

impl Name {
    /// Builds a name from its components.
    ///
    /// Panics if `components` is empty; a name always has at least its last
    /// identifier.
    pub fn new(components: Vec<Identifier>) -> Self {
        assert!(!components.is_empty(), "name must have at least one component");
        Self { components }
    }

    pub fn single(id: Identifier) -> Self {
        Self {
            components: vec![id],
        }
    }

    pub fn components(&self) -> &[Identifier] {
        &self.components
    }

    /// The final identifier: the unqualified name being referred to.
    pub fn last(&self) -> Identifier {
        *self.components.last().unwrap()
    }

    /// The path up to but excluding the last identifier, or `None` for an
    /// unqualified name.
    pub fn parent(&self) -> Option<Name> {
        if self.components.len() <= 1 {
            None
        } else {
            Some(Name {
                components: self.components[..self.components.len() - 1].to_vec(),
            })
        }
    }

    /// This name with `id` appended as a further component.
    pub fn append(&self, id: Identifier) -> Name {
        let mut components = self.components.clone();
        components.push(id);
        Name { components }
    }

    pub fn is_qualified(&self) -> bool {
        self.components.len() > 1
    }

    /// True when the symbol paths of `self` and `other` coincide. Spans are
    /// ignored.
    pub fn same_path(&self, other: &Name) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a.symbol == b.symbol)
    }

    /// True when `prefix`'s symbols are a leading subsequence of this name's.
    pub fn starts_with(&self, prefix: &Name) -> bool {
        prefix.components.len() <= self.components.len()
            && prefix
                .components
                .iter()
                .zip(&self.components)
                .all(|(a, b)| a.symbol == b.symbol)
    }

    /// The span from the first to the last component.
    pub fn span(&self) -> Span {
        self.components
            .iter()
            .fold(self.components[0].span, |acc, id| acc.merge(id.span))
    }

    /// Renders the name as `a::b::c` against the given interner.
    pub fn display(&self, interner: &Interner) -> String {
        let mut out = String::new();
        for (i, id) in self.components.iter().enumerate() {
            if i > 0 {
                out.push_str("::");
            }
            out.push_str(interner.resolve(id.symbol));
        }
        out
    }
}
