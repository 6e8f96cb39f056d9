//! String interning.
//!
//! Every name in a Wick compilation (variables, fields, lifetimes, unit
//! paths) is interned once and referred to by a [`Symbol`] afterwards.
//! Symbols are 4-byte copyable handles, so name equality is an integer
//! compare and the heap's items never own string storage.

use std::collections::HashMap;

/// An interned string handle.
///
/// Symbols are only meaningful together with the [`Interner`] that issued
/// them; two symbols from different interners must never be compared.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// The empty string, pre-interned at slot zero.
    pub const EMPTY: Symbol = Symbol(0);

    /// Raw slot of this symbol in its interner.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs a symbol from a raw slot, as stored in serialized form.
    ///
    /// The caller is responsible for the slot being valid in the target
    /// interner.
    pub fn from_index(index: u32) -> Self {
        Symbol(index)
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Deduplicating string store.
///
/// Slot 0 always holds the empty string so that `Symbol::default()` resolves.
pub struct Interner {
    map: HashMap<String, Symbol>,
    vec: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Interner {
            map: HashMap::new(),
            vec: Vec::new(),
        };
        interner.vec.push(String::new());
        interner
    }

    /// Interns `s`, returning the existing symbol if it was seen before.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if s.is_empty() {
            return Symbol::EMPTY;
        }
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Symbol(self.vec.len() as u32);
        self.vec.push(s.to_string());
        self.map.insert(s.to_string(), sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.vec[sym.0 as usize]
    }

    /// Looks up an already-interned string without inserting.
    pub fn lookup(&self, s: &str) -> Option<Symbol> {
        if s.is_empty() {
            return Some(Symbol::EMPTY);
        }
        self.map.get(s).copied()
    }

    /// Compares two symbols by the text they resolve to.
    ///
    /// Used wherever a canonical order over names is required, such as
    /// sorting record fields before serialization.
    pub fn compare(&self, a: Symbol, b: Symbol) -> std::cmp::Ordering {
        self.resolve(a).cmp(self.resolve(b))
    }

    /// Number of distinct strings, counting the pre-interned empty string.
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.len() <= 1
    }

    /// Iterates over all interned strings in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &str)> {
        self.vec
            .iter()
            .enumerate()
            .map(|(i, s)| (Symbol(i as u32), s.as_str()))
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_twice_yields_same_symbol() {
        let mut interner = Interner::new();
        let a = interner.intern("xs");
        let b = interner.intern("xs");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_strings_yield_distinct_symbols() {
        let mut interner = Interner::new();
        assert_ne!(interner.intern("x"), interner.intern("y"));
    }

    #[test]
    fn resolve_round_trips() {
        let mut interner = Interner::new();
        let sym = interner.intern("invariant");
        assert_eq!(interner.resolve(sym), "invariant");
    }

    #[test]
    fn empty_string_is_the_reserved_symbol() {
        let mut interner = Interner::new();
        assert_eq!(interner.intern(""), Symbol::EMPTY);
        assert_eq!(interner.resolve(Symbol::EMPTY), "");
    }

    #[test]
    fn lookup_does_not_insert() {
        let mut interner = Interner::new();
        assert_eq!(interner.lookup("ghost"), None);
        let len = interner.len();
        interner.intern("real");
        assert_eq!(interner.len(), len + 1);
    }

    #[test]
    fn compare_orders_by_text_not_slot() {
        let mut interner = Interner::new();
        let z = interner.intern("zebra");
        let a = interner.intern("aardvark");
        assert_eq!(interner.compare(a, z), std::cmp::Ordering::Less);
    }
}
