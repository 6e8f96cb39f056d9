//! Candidate selection for implicit coercions.
//!
//! A value flowing into a union-typed position must be tagged with the
//! member it inhabits, so the compiler has to pick exactly one. Two union
//! members with distinct shapes have distinct runtime representations even
//! when one is semantically contained in the other, which means precision
//! comparisons between candidates cannot fall back on the (coercing)
//! subtype operator: a source type matching more than one member is
//! genuinely ambiguous and is reported as such rather than silently
//! resolved.

use wick_heap::ItemHeap;

use crate::lifetime::LifetimeRelation;
use crate::sem::Type;
use crate::subtype::is_subtype;

/// Outcome of selecting a union member for a coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Exactly one candidate admits the source type.
    Selected(Type),
    /// More than one candidate admits the source type; the coercion has no
    /// canonical tag.
    Ambiguous(Vec<Type>),
    /// No candidate admits the source type.
    NoMatch,
}

/// Picks the member of `candidates` that a value of type `source` coerces
/// into.
///
/// Deterministic: identical inputs always yield the same selection.
pub fn select_candidate(
    heap: &ItemHeap,
    lifetimes: &LifetimeRelation,
    candidates: &[Type],
    source: &Type,
) -> Selection {
    let matches: Vec<&Type> = candidates
        .iter()
        .filter(|candidate| is_subtype(heap, lifetimes, candidate, source))
        .collect();
    match matches.as_slice() {
        [] => Selection::NoMatch,
        [only] => Selection::Selected((*only).clone()),
        several => Selection::Ambiguous(several.iter().map(|t| (*t).clone()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_base::Symbol;

    fn fixture() -> (ItemHeap, LifetimeRelation) {
        (ItemHeap::new(), LifetimeRelation::new())
    }

    #[test]
    fn unique_match_is_selected() {
        let (heap, rel) = fixture();
        let candidates = [Type::Int, Type::Null];
        assert_eq!(
            select_candidate(&heap, &rel, &candidates, &Type::Int),
            Selection::Selected(Type::Int)
        );
    }

    #[test]
    fn no_match_is_reported() {
        let (heap, rel) = fixture();
        let candidates = [Type::Int, Type::Null];
        assert_eq!(
            select_candidate(&heap, &rel, &candidates, &Type::Bool),
            Selection::NoMatch
        );
    }

    #[test]
    fn overlapping_records_are_ambiguous() {
        let (heap, rel) = fixture();
        let k = Symbol::from_index(1);
        let p = Symbol::from_index(2);
        let narrow = Type::record(vec![(k, Type::Int), (p, Type::Int)], false);
        let wide = Type::record(
            vec![(k, Type::Int), (p, Type::Union(vec![Type::Int, Type::Null]))],
            false,
        );
        let candidates = [narrow.clone(), wide];
        // the source matches both members, so there is no canonical tag
        match select_candidate(&heap, &rel, &candidates, &narrow) {
            Selection::Ambiguous(types) => assert_eq!(types.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn selection_is_deterministic() {
        let (heap, rel) = fixture();
        let candidates = [Type::Union(vec![Type::Int, Type::Bool]), Type::Null];
        let first = select_candidate(&heap, &rel, &candidates, &Type::Int);
        let second = select_candidate(&heap, &rel, &candidates, &Type::Int);
        assert_eq!(first, second);
    }
}
