//! The lifetime inclusion order.
//!
//! Named blocks and method lifetime parameters introduce lifetimes; the
//! enclosing-scope relation gives a partial order on them. `None` stands for
//! the unscoped (global) lifetime, which outlives every named one.

use std::collections::{HashMap, HashSet};
use wick_base::Symbol;

/// Records which named lifetimes enclose which.
#[derive(Debug, Clone, Default)]
pub struct LifetimeRelation {
    /// For each lifetime, the set of lifetimes strictly enclosing it.
    enclosing: HashMap<Symbol, HashSet<Symbol>>,
}

impl LifetimeRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `lifetime` with no enclosing scope recorded yet.
    pub fn declare(&mut self, lifetime: Symbol) {
        self.enclosing.entry(lifetime).or_default();
    }

    /// Declares `inner` as a scope nested inside `outer`; `inner` inherits
    /// everything enclosing `outer`, keeping the relation transitively
    /// closed.
    pub fn nest(&mut self, inner: Symbol, outer: Symbol) {
        let mut above: HashSet<Symbol> = self
            .enclosing
            .get(&outer)
            .cloned()
            .unwrap_or_default();
        above.insert(outer);
        self.enclosing.entry(inner).or_default().extend(above);
    }

    /// `outlives(a, b)` — does `a` outlive (or equal) `b`?
    ///
    /// The global lifetime (`None`) outlives everything; nothing named
    /// outlives it.
    pub fn outlives(&self, a: Option<Symbol>, b: Option<Symbol>) -> bool {
        match (a, b) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => {
                a == b
                    || self
                        .enclosing
                        .get(&b)
                        .is_some_and(|above| above.contains(&a))
            }
        }
    }
}
