//! The structural subtype operator.
//!
//! `is_subtype(upper, lower)` holds exactly when `Difference(lower, upper)`
//! is empty. The emptiness test works on conjunctions of positively- and
//! negatively-occurring types:
//!
//! 1. differences and intersections are canonicalized away
//!    (`A − (B ∪ C) = (A − B) ∩ (A − C)`, `¬(B ∩ C) = ¬B ∪ ¬C`, ...),
//! 2. unions are distributed, branching the query,
//! 3. nominal aliases and recursive back-references are expanded under an
//!    assumption stack keyed by item indices; re-encountering a pair means
//!    the co-inductive hypothesis applies and the query is answered
//!    without further unfolding,
//! 4. what remains is decided by pairwise case analysis on atoms.
//!
//! The pairwise analysis is deliberately not complete: it will not prove,
//! for instance, that a record of a union is covered by a union of records.
//! Method subtyping compares parameter and return tuples by structural
//! equality only, a known incompleteness kept from the source language.
//!
//! A depth bound backstops pathological queries (polymorphic recursion can
//! produce ever-new nominal instantiations); exceeding it answers
//! "not provably empty", which makes the subtype claim fail rather than
//! lie.

use std::collections::HashSet;

use wick_heap::view::LinkView;
use wick_heap::{ItemHeap, Opcode};

use crate::convert::lift;
use crate::lifetime::LifetimeRelation;
use crate::sem::{Nominal, Record, Type};

const MAX_DEPTH: usize = 256;
const NO_KEY: u32 = u32::MAX;

/// Is `lower` a subtype of `upper`?
pub fn is_subtype(
    heap: &ItemHeap,
    lifetimes: &LifetimeRelation,
    upper: &Type,
    lower: &Type,
) -> bool {
    let mut engine = Emptiness::new(heap, lifetimes);
    let result = engine.check(vec![lower.clone()], vec![upper.clone()]);
    log::trace!("subtype {:?} <: {:?} = {}", lower, upper, result);
    result
}

/// Does `ty` contain no values?
pub fn is_empty(heap: &ItemHeap, lifetimes: &LifetimeRelation, ty: &Type) -> bool {
    Emptiness::new(heap, lifetimes).check(vec![ty.clone()], vec![])
}

/// Are the two types mutual subtypes?
pub fn is_equivalent(heap: &ItemHeap, lifetimes: &LifetimeRelation, a: &Type, b: &Type) -> bool {
    is_subtype(heap, lifetimes, a, b) && is_subtype(heap, lifetimes, b, a)
}

struct Emptiness<'a> {
    heap: &'a ItemHeap,
    lifetimes: &'a LifetimeRelation,
    /// Expansion pairs currently assumed empty: (positive key, negative
    /// key), each a heap item index or `NO_KEY`.
    assumptions: HashSet<(u32, u32)>,
    depth: usize,
}

impl<'a> Emptiness<'a> {
    fn new(heap: &'a ItemHeap, lifetimes: &'a LifetimeRelation) -> Self {
        Self {
            heap,
            lifetimes,
            assumptions: HashSet::new(),
            depth: 0,
        }
    }

    /// Is `⋂ pos ∩ ⋂ ¬neg` empty?
    fn check(&mut self, pos: Vec<Type>, neg: Vec<Type>) -> bool {
        if self.depth >= MAX_DEPTH {
            log::warn!("subtype query exceeded depth bound; answering not-empty");
            return false;
        }
        self.depth += 1;
        let result = self.run(pos, neg);
        self.depth -= 1;
        result
    }

    fn run(&mut self, mut pos: Vec<Type>, mut neg: Vec<Type>) -> bool {
        // p ∩ ¬p is empty whatever p is.
        if pos.iter().any(|p| neg.contains(p)) {
            return true;
        }

        // Normalize the positive side.
        let mut i = 0;
        while i < pos.len() {
            match &pos[i] {
                Type::Void => return true,
                Type::Any => {
                    pos.swap_remove(i);
                }
                Type::Union(members) => {
                    let members = members.clone();
                    return members.into_iter().all(|member| {
                        let mut branch = pos.clone();
                        branch[i] = member;
                        self.check(branch, neg.clone())
                    });
                }
                Type::Intersection(members) => {
                    let members = members.clone();
                    pos.swap_remove(i);
                    pos.extend(members);
                }
                Type::Difference(left, right) => {
                    let (left, right) = ((**left).clone(), (**right).clone());
                    pos[i] = left;
                    neg.push(right);
                }
                Type::Nominal(nominal) => {
                    let nominal = nominal.clone();
                    match self.expand_nominal(&nominal) {
                        Some((key, expanded)) => {
                            let pair = (key, first_expansion_key(self.heap, &neg));
                            if !self.assumptions.insert(pair) {
                                return true; // co-inductive hypothesis
                            }
                            pos[i] = expanded;
                            let result = self.check(pos, neg);
                            self.assumptions.remove(&pair);
                            return result;
                        }
                        None => i += 1, // unresolvable; treat as an opaque atom
                    }
                }
                Type::Recursive(target) => {
                    let target = *target;
                    let pair = (target.raw(), first_expansion_key(self.heap, &neg));
                    if !self.assumptions.insert(pair) {
                        return true;
                    }
                    pos[i] = lift(self.heap, target);
                    let result = self.check(pos, neg);
                    self.assumptions.remove(&pair);
                    return result;
                }
                _ => i += 1,
            }
        }

        // Normalize the negative side.
        let mut j = 0;
        while j < neg.len() {
            match &neg[j] {
                Type::Any => return true, // ¬any is empty
                Type::Void => {
                    neg.swap_remove(j);
                }
                Type::Union(members) => {
                    // ¬(B ∪ C) = ¬B ∩ ¬C
                    let members = members.clone();
                    neg.swap_remove(j);
                    neg.extend(members);
                }
                Type::Intersection(members) => {
                    // ¬(B ∩ C) = ¬B ∪ ¬C: both residues must be empty
                    let members = members.clone();
                    return members.into_iter().all(|member| {
                        let mut branch = neg.clone();
                        branch[j] = member;
                        self.check(pos.clone(), branch)
                    });
                }
                Type::Difference(left, right) => {
                    // ¬(X − Y) = ¬X ∪ Y
                    let (left, right) = ((**left).clone(), (**right).clone());
                    let with_left = {
                        let mut branch = neg.clone();
                        branch[j] = left;
                        self.check(pos.clone(), branch)
                    };
                    if !with_left {
                        return false;
                    }
                    let mut with_right = pos.clone();
                    with_right.push(right);
                    neg.swap_remove(j);
                    return self.check(with_right, neg);
                }
                Type::Nominal(nominal) => {
                    let nominal = nominal.clone();
                    match self.expand_nominal(&nominal) {
                        Some((key, expanded)) => {
                            let pair = (first_expansion_key(self.heap, &pos), key);
                            if !self.assumptions.insert(pair) {
                                return true;
                            }
                            neg[j] = expanded;
                            let result = self.check(pos, neg);
                            self.assumptions.remove(&pair);
                            return result;
                        }
                        None => j += 1,
                    }
                }
                Type::Recursive(target) => {
                    let target = *target;
                    let pair = (first_expansion_key(self.heap, &pos), target.raw());
                    if !self.assumptions.insert(pair) {
                        return true;
                    }
                    neg[j] = lift(self.heap, target);
                    let result = self.check(pos, neg);
                    self.assumptions.remove(&pair);
                    return result;
                }
                _ => j += 1,
            }
        }

        // Atom phase: pairwise analysis.
        for (i, a) in pos.iter().enumerate() {
            for b in &pos[i + 1..] {
                if self.disjoint(a, b) {
                    return true;
                }
            }
        }
        for p in &pos {
            if self.composite_empty(p) {
                return true;
            }
            for n in &neg {
                if self.covered(p, n) {
                    return true;
                }
            }
        }
        false
    }

    /// Expands a nominal to its (substituted) aliased type, returning the
    /// alias declaration's index as the expansion key.
    fn expand_nominal(&self, nominal: &Nominal) -> Option<(u32, Type)> {
        let (target, expanded) = crate::convert::expand_nominal(self.heap, nominal)?;
        Some((target.raw(), expanded))
    }

    /// Can the two positive atoms be shown to share no value?
    fn disjoint(&mut self, a: &Type, b: &Type) -> bool {
        match (a, b) {
            (Type::Variable(_), _) | (_, Type::Variable(_)) => false,
            (Type::Nominal(x), Type::Nominal(y)) => {
                // both unexpandable here; distinct opaque nominals overlap
                // for all we know
                let _ = (x, y);
                false
            }
            (Type::Nominal(_), _) | (_, Type::Nominal(_)) => false,
            (Type::Array(x), Type::Array(y)) => {
                self.check(vec![(**x).clone(), (**y).clone()], vec![])
            }
            (Type::Record(x), Type::Record(y)) => self.records_disjoint(x, y),
            (Type::Reference(x, lx), Type::Reference(y, ly)) => {
                lx != ly || !self.equivalent(x, y)
            }
            (Type::Callable(x), Type::Callable(y)) => x != y,
            (x, y) if discriminant_eq(x, y) => false,
            _ => true, // atoms of different kinds never share a value
        }
    }

    fn records_disjoint(&mut self, a: &Record, b: &Record) -> bool {
        match (a.open, b.open) {
            (false, false) if !a.same_fields(b) => return true,
            (false, true) if !a.contains_fields_of(b) => return true,
            (true, false) if !b.contains_fields_of(a) => return true,
            _ => {}
        }
        a.fields.iter().any(|(name, ta)| match b.field(*name) {
            Some(tb) => self.check(vec![ta.clone(), tb.clone()], vec![]),
            None => false,
        })
    }

    /// Is the positive atom `p` entirely inside the negative atom `n`
    /// (making `p ∩ ¬n` empty)?
    fn covered(&mut self, p: &Type, n: &Type) -> bool {
        match (p, n) {
            (Type::Array(pe), Type::Array(ne)) => {
                self.check(vec![(**pe).clone()], vec![(**ne).clone()])
            }
            (Type::Record(pr), Type::Record(nr)) => {
                let fields_ok = if nr.open {
                    pr.contains_fields_of(nr)
                } else {
                    !pr.open && pr.same_fields(nr)
                };
                fields_ok
                    && nr.fields.iter().all(|(name, nt)| match pr.field(*name) {
                        Some(pt) => self.check(vec![pt.clone()], vec![nt.clone()]),
                        None => false,
                    })
            }
            (Type::Reference(pe, pl), Type::Reference(ne, nl)) => {
                // references are invariant in their element
                self.equivalent(pe, ne) && self.lifetimes.outlives(*pl, *nl)
            }
            (Type::Callable(pc), Type::Callable(nc)) => pc == nc,
            (x, y) => x == y,
        }
    }

    /// A composite positive atom with an uninhabitable component is itself
    /// empty.
    fn composite_empty(&mut self, p: &Type) -> bool {
        match p {
            Type::Array(element) | Type::Reference(element, _) => {
                self.check(vec![(**element).clone()], vec![])
            }
            Type::Record(record) => record
                .fields
                .values()
                .any(|field| self.check(vec![field.clone()], vec![])),
            _ => false,
        }
    }

    fn equivalent(&mut self, a: &Type, b: &Type) -> bool {
        self.check(vec![a.clone()], vec![b.clone()])
            && self.check(vec![b.clone()], vec![a.clone()])
    }
}

fn discriminant_eq(a: &Type, b: &Type) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// The first expandable type's key in a conjunction side, for the
/// assumption pair.
fn first_expansion_key(heap: &ItemHeap, side: &[Type]) -> u32 {
    for ty in side {
        match ty {
            Type::Recursive(target) => return target.raw(),
            Type::Nominal(nominal) if heap.opcode(nominal.link) == Opcode::Link => {
                if let Some(target) = LinkView::new(heap, nominal.link).target() {
                    return target.raw();
                }
            }
            _ => {}
        }
    }
    NO_KEY
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_base::Symbol;
    use wick_heap::build::ModuleBuilder;
    use wick_heap::ItemIndex;

    fn fixture() -> (ItemHeap, LifetimeRelation) {
        (ItemHeap::new(), LifetimeRelation::new())
    }

    fn subtype(heap: &ItemHeap, rel: &LifetimeRelation, upper: &Type, lower: &Type) -> bool {
        is_subtype(heap, rel, upper, lower)
    }

    #[test]
    fn subtyping_is_reflexive() {
        let (heap, rel) = fixture();
        let samples = [
            Type::Int,
            Type::array(Type::Bool),
            Type::Union(vec![Type::Int, Type::Null]),
            Type::record(vec![(Symbol::from_index(1), Type::Int)], false),
        ];
        for ty in &samples {
            assert!(subtype(&heap, &rel, ty, ty), "{:?} <: itself", ty);
        }
    }

    #[test]
    fn distinct_primitives_are_unrelated() {
        let (heap, rel) = fixture();
        assert!(!subtype(&heap, &rel, &Type::Bool, &Type::Int));
        assert!(!subtype(&heap, &rel, &Type::Int, &Type::Byte));
        assert!(subtype(&heap, &rel, &Type::Any, &Type::Int));
        assert!(subtype(&heap, &rel, &Type::Int, &Type::Void));
    }

    #[test]
    fn union_introduction_holds() {
        let (heap, rel) = fixture();
        let u = Type::Union(vec![Type::Int, Type::Null, Type::Bool]);
        for member in u.union_members() {
            assert!(subtype(&heap, &rel, &u, member));
        }
        // and a subtype of a member is a subtype of the union
        let v = Type::Union(vec![Type::Int, Type::Null]);
        assert!(subtype(&heap, &rel, &u, &v));
    }

    #[test]
    fn record_width_and_depth() {
        let (heap, rel) = fixture();
        let k = Symbol::from_index(1);
        let p = Symbol::from_index(2);
        let narrow = Type::record(vec![(k, Type::Int), (p, Type::Int)], false);
        let wide = Type::record(
            vec![(k, Type::Int), (p, Type::Union(vec![Type::Int, Type::Null]))],
            false,
        );
        assert!(subtype(&heap, &rel, &wide, &narrow));
        assert!(!subtype(&heap, &rel, &narrow, &wide));
    }

    #[test]
    fn closed_record_is_not_subtype_of_strictly_larger_open_record() {
        let (heap, rel) = fixture();
        let x = Symbol::from_index(1);
        let y = Symbol::from_index(2);
        let closed = Type::record(vec![(x, Type::Int)], false);
        let open_larger = Type::record(vec![(x, Type::Int), (y, Type::Int)], true);
        assert!(!subtype(&heap, &rel, &open_larger, &closed));
        // but a closed record is a subtype of an open record over fewer fields
        let open_smaller = Type::record(vec![(x, Type::Int)], true);
        let closed_larger = Type::record(vec![(x, Type::Int), (y, Type::Int)], false);
        assert!(subtype(&heap, &rel, &open_smaller, &closed_larger));
    }

    #[test]
    fn arrays_are_covariant() {
        let (heap, rel) = fixture();
        let ints = Type::array(Type::Int);
        let maybe_ints = Type::array(Type::Union(vec![Type::Int, Type::Null]));
        assert!(subtype(&heap, &rel, &maybe_ints, &ints));
        assert!(!subtype(&heap, &rel, &ints, &maybe_ints));
    }

    #[test]
    fn references_are_invariant_in_their_element() {
        let (heap, rel) = fixture();
        let r_int = Type::reference(Type::Int);
        let r_union = Type::reference(Type::Union(vec![Type::Int, Type::Null]));
        assert!(subtype(&heap, &rel, &r_int, &r_int));
        assert!(!subtype(&heap, &rel, &r_union, &r_int));
        assert!(!subtype(&heap, &rel, &r_int, &r_union));
    }

    #[test]
    fn reference_lifetimes_follow_the_relation() {
        let heap = ItemHeap::new();
        let mut rel = LifetimeRelation::new();
        let outer = Symbol::from_index(1);
        let inner = Symbol::from_index(2);
        rel.nest(inner, outer);
        let r_outer = Type::reference_in(Type::Int, outer);
        let r_inner = Type::reference_in(Type::Int, inner);
        // a longer-lived reference satisfies a shorter-lived expectation
        assert!(subtype(&heap, &rel, &r_inner, &r_outer));
        assert!(!subtype(&heap, &rel, &r_outer, &r_inner));
        // the global lifetime satisfies everything
        let r_global = Type::reference(Type::Int);
        assert!(subtype(&heap, &rel, &r_inner, &r_global));
    }

    #[test]
    fn callables_compare_structurally_only() {
        let (heap, rel) = fixture();
        let f1 = Type::Callable(crate::sem::Callable::Function {
            parameters: vec![Type::Int],
            returns: vec![Type::Int],
        });
        let f2 = Type::Callable(crate::sem::Callable::Function {
            parameters: vec![Type::Union(vec![Type::Int, Type::Null])],
            returns: vec![Type::Int],
        });
        assert!(subtype(&heap, &rel, &f1, &f1));
        // no contravariance: structurally different means unrelated
        assert!(!subtype(&heap, &rel, &f2, &f1));
        assert!(!subtype(&heap, &rel, &f1, &f2));
    }

    #[test]
    fn transitivity_spot_checks() {
        let (heap, rel) = fixture();
        let a = Type::record(vec![(Symbol::from_index(1), Type::Int)], false);
        let b = Type::record(
            vec![(
                Symbol::from_index(1),
                Type::Union(vec![Type::Int, Type::Null]),
            )],
            false,
        );
        let c = Type::record(
            vec![(
                Symbol::from_index(1),
                Type::Union(vec![Type::Int, Type::Null, Type::Bool]),
            )],
            false,
        );
        assert!(subtype(&heap, &rel, &b, &a));
        assert!(subtype(&heap, &rel, &c, &b));
        assert!(subtype(&heap, &rel, &c, &a));
    }

    /// Builds `type list is null | {list next}` and returns the nominal.
    fn recursive_list(heap: &mut ItemHeap, name: &str) -> Type {
        let mut builder = ModuleBuilder::new(heap);
        let null = builder.type_null();
        let rec = builder.type_recursive(null);
        let next = builder.type_record(&[("next", rec)], false);
        let union = builder.type_union(&[null, next]);
        let var = builder.variable("self", union);
        let alias = builder.type_alias(name, var, &[]);
        let link = builder.link(name, &[alias]);
        builder.heap().replace_operand(rec, 0, union).unwrap();
        Type::Nominal(Nominal {
            link,
            arguments: vec![],
        })
    }

    #[test]
    fn recursive_alias_is_subtype_of_itself() {
        let mut heap = ItemHeap::new();
        let rel = LifetimeRelation::new();
        let list = recursive_list(&mut heap, "list");
        assert!(subtype(&heap, &rel, &list, &list));
    }

    #[test]
    fn structurally_identical_recursive_aliases_are_subtypes() {
        let mut heap = ItemHeap::new();
        let rel = LifetimeRelation::new();
        let list1 = recursive_list(&mut heap, "list1");
        let list2 = recursive_list(&mut heap, "list2");
        assert!(subtype(&heap, &rel, &list2, &list1));
        assert!(subtype(&heap, &rel, &list1, &list2));
    }

    #[test]
    fn recursive_alias_relates_to_its_unfolding() {
        let mut heap = ItemHeap::new();
        let rel = LifetimeRelation::new();
        let list = recursive_list(&mut heap, "list");
        // null is a member of the union, hence a subtype of the alias
        assert!(subtype(&heap, &rel, &list, &Type::Null));
        assert!(!subtype(&heap, &rel, &Type::Null, &list));
    }

    #[test]
    fn alias_with_no_base_case_is_empty() {
        let mut heap = ItemHeap::new();
        let rel = LifetimeRelation::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        // type loop is {loop next} — no value has finite depth
        let null = builder.type_null();
        let rec = builder.type_recursive(null);
        let record = builder.type_record(&[("next", rec)], false);
        let var = builder.variable("self", record);
        let alias = builder.type_alias("loop", var, &[]);
        let link = builder.link("loop", &[alias]);
        builder.heap().replace_operand(rec, 0, record).unwrap();
        let looping = Type::Nominal(Nominal {
            link,
            arguments: vec![],
        });
        assert!(is_empty(&heap, &rel, &looping));
    }

    #[test]
    fn templated_alias_expands_through_its_arguments() {
        let mut heap = ItemHeap::new();
        let rel = LifetimeRelation::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        // type box<T> is {T value}
        let t = builder.template_type("T");
        let tv = builder.type_variable("T");
        let record = builder.type_record(&[("value", tv)], false);
        let var = builder.variable("self", record);
        let alias = builder.type_alias_templated("box", &[t], var, &[]);
        let link = builder.link("box", &[alias]);
        let value_sym = heap.intern("value");
        let boxed_int = Type::Nominal(Nominal {
            link,
            arguments: vec![Type::Int],
        });
        let expanded = Type::record(vec![(value_sym, Type::Int)], false);
        assert!(subtype(&heap, &rel, &expanded, &boxed_int));
        assert!(subtype(&heap, &rel, &boxed_int, &expanded));
    }

    #[test]
    fn equivalence_is_mutual_subtyping() {
        let (heap, rel) = fixture();
        let a = Type::Union(vec![Type::Int, Type::Null]);
        let b = Type::Union(vec![Type::Null, Type::Int]);
        assert!(is_equivalent(&heap, &rel, &a, &b));
        assert!(!is_equivalent(&heap, &rel, &a, &Type::Int));
    }

    #[test]
    fn difference_with_void_and_any_canonicalizes() {
        let (heap, rel) = fixture();
        // A − void = A (non-empty for int)
        assert!(!is_empty(
            &heap,
            &rel,
            &Type::difference(Type::Int, Type::Void)
        ));
        // any − any = void
        assert!(is_empty(
            &heap,
            &rel,
            &Type::difference(Type::Any, Type::Any)
        ));
        // int − (int | null) = void
        assert!(is_empty(
            &heap,
            &rel,
            &Type::difference(Type::Int, Type::Union(vec![Type::Int, Type::Null]))
        ));
    }

    #[test]
    fn intersections_distribute_over_unions() {
        let (heap, rel) = fixture();
        // (int | null) ∩ bool = void
        assert!(is_empty(
            &heap,
            &rel,
            &Type::Intersection(vec![
                Type::Union(vec![Type::Int, Type::Null]),
                Type::Bool
            ])
        ));
        // (int | null) ∩ int = int ≠ void
        assert!(!is_empty(
            &heap,
            &rel,
            &Type::Intersection(vec![
                Type::Union(vec![Type::Int, Type::Null]),
                Type::Int
            ])
        ));
    }

    #[test]
    fn unresolved_nominals_are_opaque_but_reflexive() {
        let (heap, rel) = fixture();
        let ghost = Type::Nominal(Nominal {
            link: ItemIndex::new(0),
            arguments: vec![],
        });
        // an identical nominal pair is decided by the p ∩ ¬p fast path
        // before any expansion is attempted
        let ghost2 = ghost.clone();
        let mut engine = Emptiness::new(&heap, &rel);
        assert!(engine.run(vec![ghost], vec![ghost2]));
    }
}
