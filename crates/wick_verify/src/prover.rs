//! The prover contract.
//!
//! A prover consumes an assertion module and answers each obligation with
//! valid, invalid (optionally carrying a counterexample binding), or
//! unknown. The real engine is an external collaborator; this module also
//! ships [`TautologyProver`], a small structural decision procedure used by
//! the test suite and as a fast pre-pass: equality rewriting plus
//! difference-bound reasoning over integer atoms. It is deliberately
//! incomplete: anything outside that fragment is answered `Unknown`, never
//! guessed.

use std::collections::{BTreeMap, HashMap, HashSet};

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::ast::Term;
use crate::module::{AssertionModule, Obligation};

/// A concrete assignment demonstrating an invalid obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterExample {
    /// Variable name → value, rendered decimally.
    pub bindings: BTreeMap<String, String>,
}

/// A prover's answer for one obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(Option<CounterExample>),
    Unknown,
}

/// The decision procedure contract.
pub trait Prover {
    fn check_obligation(&self, module: &AssertionModule, obligation: &Obligation) -> Verdict;

    /// Checks every obligation, in document order.
    fn check(&self, module: &AssertionModule) -> Vec<(String, Verdict)> {
        module
            .obligations
            .iter()
            .map(|obligation| {
                (
                    obligation.name.clone(),
                    self.check_obligation(module, obligation),
                )
            })
            .collect()
    }
}

/// A structural decision procedure for the linear fragment.
///
/// Handles conjunctions of equalities and integer comparisons whose sides
/// are an atom plus a constant (difference bounds), with `Length(_) ≥ 0`
/// built in. Sound: `Valid` and `Invalid` are only answered when the
/// fragment fully captures the obligation.
#[derive(Debug, Default)]
pub struct TautologyProver;

impl TautologyProver {
    pub fn new() -> Self {
        Self
    }
}

impl Prover for TautologyProver {
    fn check_obligation(&self, _module: &AssertionModule, obligation: &Obligation) -> Verdict {
        let verdict = decide(&obligation.context, &obligation.goal);
        log::trace!("obligation {}: {:?}", obligation.name, verdict);
        verdict
    }
}

// ---- the decision procedure ----

const SUBSTITUTION_ROUNDS: usize = 8;

fn decide(context: &[Term], goal: &Term) -> Verdict {
    // flatten conjunctions
    let mut facts = Vec::new();
    for term in context {
        flatten(term, &mut facts);
    }
    let mut goals = Vec::new();
    flatten(goal, &mut goals);

    // rewrite by equalities `v == t` (with v not in t)
    for _ in 0..SUBSTITUTION_ROUNDS {
        let Some((name, replacement, position)) = find_definition(&facts) else {
            break;
        };
        facts.remove(position);
        facts = facts
            .iter()
            .map(|fact| fact.substitute(&name, &replacement))
            .collect();
        goals = goals
            .iter()
            .map(|g| g.substitute(&name, &replacement))
            .collect();
    }

    let mut bounds = Bounds::default();
    let mut lossy = false;
    for fact in &facts {
        if !bounds.assume(fact) {
            lossy = true;
        }
    }
    bounds.close();
    if bounds.inconsistent() {
        // the path is infeasible; everything holds along it
        return Verdict::Valid;
    }

    let mut all_proven = true;
    let mut refutable = None;
    for g in &goals {
        match prove_one(&facts, &bounds, g) {
            Proof::Proven => continue,
            Proof::Open => {}
        }
        // complete for the fragment: the goal holds exactly when the
        // context plus its negation is infeasible
        if let Some(negated) = negate_comparison(g) {
            let mut refutation = bounds.clone();
            if refutation.assume(&negated) {
                refutation.close();
                if refutation.inconsistent() {
                    continue; // proven
                }
                refutable = Some(refutation);
            }
        }
        all_proven = false;
    }
    if all_proven {
        return Verdict::Valid;
    }

    // a single comparison goal is refuted exactly when nothing was dropped
    // on the way into the bound matrix and its negation stays satisfiable
    if !lossy && goals.len() == 1 {
        if let Some(refutation) = refutable {
            return Verdict::Invalid(refutation.witness());
        }
    }
    Verdict::Unknown
}

fn flatten(term: &Term, out: &mut Vec<Term>) {
    match term {
        Term::And(terms) => {
            for inner in terms {
                flatten(inner, out);
            }
        }
        Term::Bool(true) => {}
        Term::Not(inner) => match negate_comparison(inner) {
            Some(negated) => out.push(negated),
            None => out.push(term.clone()),
        },
        other => out.push(other.clone()),
    }
}

/// The integer negation of a comparison (`¬(a < b)` is `a ≥ b`, ...).
fn negate_comparison(term: &Term) -> Option<Term> {
    Some(match term {
        Term::Lt(a, b) => Term::Ge(a.clone(), b.clone()),
        Term::Le(a, b) => Term::Gt(a.clone(), b.clone()),
        Term::Gt(a, b) => Term::Le(a.clone(), b.clone()),
        Term::Ge(a, b) => Term::Lt(a.clone(), b.clone()),
        Term::Eq(a, b) => Term::Ne(a.clone(), b.clone()),
        Term::Ne(a, b) => Term::Eq(a.clone(), b.clone()),
        Term::Not(inner) => (**inner).clone(),
        Term::Bool(value) => Term::Bool(!value),
        _ => return None,
    })
}

/// Finds a fact of the form `v == t` (or `t == v`) usable as a rewrite.
fn find_definition(facts: &[Term]) -> Option<(String, Term, usize)> {
    for (position, fact) in facts.iter().enumerate() {
        let Term::Eq(a, b) = fact else { continue };
        if let Term::Var(name) = &**a {
            if !occurs(name, b) {
                return Some((name.clone(), (**b).clone(), position));
            }
        }
        if let Term::Var(name) = &**b {
            if !occurs(name, a) {
                return Some((name.clone(), (**a).clone(), position));
            }
        }
    }
    None
}

fn occurs(name: &str, term: &Term) -> bool {
    let mut free = std::collections::BTreeSet::new();
    term.free_vars(&mut free);
    free.contains(name)
}

enum Proof {
    Proven,
    Open,
}

fn prove_one(facts: &[Term], bounds: &Bounds, goal: &Term) -> Proof {
    match goal {
        Term::Bool(true) => Proof::Proven,
        _ if facts.contains(goal) => Proof::Proven,
        Term::Eq(a, b) if a == b => Proof::Proven,
        Term::Implies(antecedent, consequent) => {
            // prove the consequent under the strengthened context
            let mut extended: Vec<Term> = facts.to_vec();
            flatten(antecedent, &mut extended);
            match decide(&extended, consequent) {
                Verdict::Valid => Proof::Proven,
                _ => Proof::Open,
            }
        }
        _ => {
            if bounds.entails(goal) {
                Proof::Proven
            } else {
                Proof::Open
            }
        }
    }
}

// ---- difference bounds ----

/// The canonical key of a non-arithmetic atom.
fn atom_key(term: &Term) -> String {
    serde_json::to_string(term).expect("terms serialize")
}

const ZERO: &str = "$zero";

/// A term decomposed as `sign · atom + offset`.
struct Linear {
    atom: Option<String>,
    sign: i8,
    offset: BigInt,
}

fn linearize(term: &Term) -> Option<Linear> {
    match term {
        Term::Int(value) => Some(Linear {
            atom: None,
            sign: 1,
            offset: value.clone(),
        }),
        Term::Var(_) | Term::App { .. } | Term::Length(_) | Term::Select(_, _)
        | Term::Field(_, _) => Some(Linear {
            atom: Some(atom_key(term)),
            sign: 1,
            offset: BigInt::from(0),
        }),
        Term::Neg(inner) => {
            let linear = linearize(inner)?;
            Some(Linear {
                atom: linear.atom,
                sign: -linear.sign,
                offset: -linear.offset,
            })
        }
        Term::Add(a, b) => combine(linearize(a)?, linearize(b)?),
        Term::Sub(a, b) => {
            let right = linearize(b)?;
            combine(
                linearize(a)?,
                Linear {
                    atom: right.atom,
                    sign: -right.sign,
                    offset: -right.offset,
                },
            )
        }
        _ => None,
    }
}

fn combine(a: Linear, b: Linear) -> Option<Linear> {
    match (&a.atom, &b.atom) {
        (_, None) => Some(Linear {
            atom: a.atom,
            sign: a.sign,
            offset: a.offset + b.offset,
        }),
        (None, _) => Some(Linear {
            atom: b.atom,
            sign: b.sign,
            offset: a.offset + b.offset,
        }),
        _ => None, // two atoms on one side is beyond difference bounds
    }
}

/// A difference-bound store: entries `a - b ≤ k` over atom keys.
#[derive(Debug, Clone, Default)]
struct Bounds {
    edges: HashMap<(String, String), BigInt>,
    atoms: HashSet<String>,
    closed: bool,
}

impl Bounds {
    /// Absorbs a fact; `false` when it is outside the fragment.
    fn assume(&mut self, fact: &Term) -> bool {
        self.closed = false;
        match fact {
            Term::Eq(a, b) => {
                let first = self.comparison(a, b, BigInt::from(0));
                let second = self.comparison(b, a, BigInt::from(0));
                first && second
            }
            Term::Le(a, b) => self.comparison(a, b, BigInt::from(0)),
            Term::Lt(a, b) => self.comparison(a, b, BigInt::from(-1)),
            Term::Ge(a, b) => self.comparison(b, a, BigInt::from(0)),
            Term::Gt(a, b) => self.comparison(b, a, BigInt::from(-1)),
            _ => false,
        }
    }

    /// Records `lhs ≤ rhs + slack`.
    fn comparison(&mut self, lhs: &Term, rhs: &Term, slack: BigInt) -> bool {
        let Some(left) = linearize(lhs) else {
            return false;
        };
        let Some(right) = linearize(rhs) else {
            return false;
        };
        // sign-normalized: left.sign·A - right.sign·B ≤ right.offset -
        // left.offset + slack
        let bound = right.offset - left.offset + slack;
        let (from, to) = match (
            (&left.atom, left.sign),
            (&right.atom, right.sign),
        ) {
            ((Some(a), 1), (Some(b), 1)) => (a.clone(), b.clone()),
            ((Some(a), 1), (None, _)) => (a.clone(), ZERO.to_string()),
            ((None, _), (Some(b), 1)) => (ZERO.to_string(), b.clone()),
            ((Some(a), -1), (None, _)) => (ZERO.to_string(), a.clone()),
            ((None, _), (Some(b), -1)) => (b.clone(), ZERO.to_string()),
            ((Some(a), -1), (Some(b), -1)) => (b.clone(), a.clone()),
            ((None, _), (None, _)) => {
                // a ground comparison: either trivially true or an
                // inconsistency marker
                if BigInt::from(0) <= bound {
                    return true;
                }
                self.record(ZERO.to_string(), ZERO.to_string(), bound);
                return true;
            }
            _ => return false, // octagonal shapes are out of scope
        };
        self.record(from, to, bound);
        true
    }

    fn record(&mut self, from: String, to: String, bound: BigInt) {
        self.atoms.insert(from.clone());
        self.atoms.insert(to.clone());
        let entry = self.edges.entry((from, to)).or_insert_with(|| bound.clone());
        if bound < *entry {
            *entry = bound;
        }
    }

    /// Shortest-path closure, with `Length(_) ≥ 0` built in.
    fn close(&mut self) {
        // lengths are non-negative
        let length_atoms: Vec<String> = self
            .atoms
            .iter()
            .filter(|key| key.contains("\"Length\""))
            .cloned()
            .collect();
        for atom in length_atoms {
            self.record(ZERO.to_string(), atom, BigInt::from(0));
        }
        self.atoms.insert(ZERO.to_string());

        let atoms: Vec<String> = self.atoms.iter().cloned().collect();
        for k in &atoms {
            for i in &atoms {
                let Some(first) = self.edges.get(&(i.clone(), k.clone())).cloned() else {
                    continue;
                };
                for j in &atoms {
                    let Some(second) = self.edges.get(&(k.clone(), j.clone())).cloned() else {
                        continue;
                    };
                    let through = first.clone() + second;
                    let entry = self
                        .edges
                        .entry((i.clone(), j.clone()))
                        .or_insert_with(|| through.clone());
                    if through < *entry {
                        *entry = through;
                    }
                }
            }
        }
        self.closed = true;
    }

    fn inconsistent(&self) -> bool {
        self.atoms.iter().any(|atom| {
            self.edges
                .get(&(atom.clone(), atom.clone()))
                .is_some_and(|weight| *weight < BigInt::from(0))
        })
    }

    /// Is the comparison entailed by the closed store?
    fn entails(&self, goal: &Term) -> bool {
        debug_assert!(self.closed, "entailment requires a closed store");
        let (lhs, rhs, slack) = match goal {
            Term::Le(a, b) => (a, b, BigInt::from(0)),
            Term::Lt(a, b) => (a, b, BigInt::from(-1)),
            Term::Ge(a, b) => (b, a, BigInt::from(0)),
            Term::Gt(a, b) => (b, a, BigInt::from(-1)),
            Term::Eq(a, b) => {
                return self.entails(&Term::Le(a.clone(), b.clone()))
                    && self.entails(&Term::Le(b.clone(), a.clone()));
            }
            Term::Ne(a, b) => {
                return self.entails(&Term::Lt(a.clone(), b.clone()))
                    || self.entails(&Term::Lt(b.clone(), a.clone()));
            }
            _ => return false,
        };
        let Some(left) = linearize(lhs) else {
            return false;
        };
        let Some(right) = linearize(rhs) else {
            return false;
        };
        let bound = right.offset - left.offset + slack;
        let (from, to) = match ((&left.atom, left.sign), (&right.atom, right.sign)) {
            ((Some(a), 1), (Some(b), 1)) => (a.clone(), b.clone()),
            ((Some(a), 1), (None, _)) => (a.clone(), ZERO.to_string()),
            ((None, _), (Some(b), 1)) => (ZERO.to_string(), b.clone()),
            ((Some(a), -1), (None, _)) => (ZERO.to_string(), a.clone()),
            ((None, _), (Some(b), -1)) => (b.clone(), ZERO.to_string()),
            ((Some(a), -1), (Some(b), -1)) => (b.clone(), a.clone()),
            ((None, _), (None, _)) => return BigInt::from(0) <= bound,
            _ => return false,
        };
        if from == to {
            return BigInt::from(0) <= bound;
        }
        self.edges
            .get(&(from, to))
            .is_some_and(|weight| *weight <= bound)
    }

    /// A satisfying assignment of the (feasible, closed) store, rendered
    /// as a counterexample when the constrained atoms are plain variables.
    fn witness(&self) -> Option<CounterExample> {
        let mut bindings = BTreeMap::new();
        for atom in &self.atoms {
            if atom == ZERO {
                continue;
            }
            // only plain variables make presentable witnesses
            let Ok(Term::Var(name)) = serde_json::from_str::<Term>(atom) else {
                return None;
            };
            // after closure, the tightest upper bound against zero is a
            // valid potential; an atom without one has no finite
            // assignment we can defend
            let value = self.edges.get(&(atom.clone(), ZERO.to_string()))?;
            bindings.insert(name, value.to_string());
        }
        Some(CounterExample { bindings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Sort;
    use crate::module::ObligationKind;
    use wick_base::Span;

    fn obligation(context: Vec<Term>, goal: Term) -> Obligation {
        Obligation {
            name: "t#0".to_string(),
            kind: ObligationKind::Assertion,
            span: Span::default(),
            variables: vec![("x$0".to_string(), Sort::Int)],
            context,
            goal,
        }
    }

    fn check(context: Vec<Term>, goal: Term) -> Verdict {
        let module = AssertionModule::new("test");
        TautologyProver::new().check_obligation(&module, &obligation(context, goal))
    }

    #[test]
    fn ground_comparisons_evaluate() {
        assert_eq!(
            check(vec![], Term::ge(Term::int(5), Term::int(0))),
            Verdict::Valid
        );
        assert!(matches!(
            check(vec![], Term::ge(Term::int(-1), Term::int(0))),
            Verdict::Invalid(_)
        ));
    }

    #[test]
    fn facts_entail_weaker_facts() {
        let x = Term::var("x$0");
        assert_eq!(
            check(
                vec![Term::ge(x.clone(), Term::int(1))],
                Term::ge(x.clone(), Term::int(0)),
            ),
            Verdict::Valid
        );
        // the converse has a genuine counterexample at the boundary
        match check(
            vec![Term::ge(x.clone(), Term::int(0))],
            Term::ge(x, Term::int(1)),
        ) {
            Verdict::Invalid(Some(counterexample)) => {
                assert_eq!(counterexample.bindings["x$0"], "0");
            }
            other => panic!("expected a boundary counterexample, got {:?}", other),
        }
    }

    #[test]
    fn equalities_rewrite_the_goal() {
        let (x, y) = (Term::var("x$0"), Term::var("y$1"));
        // y == x ∧ x >= 0 ⊢ y >= 0
        assert_eq!(
            check(
                vec![
                    Term::eq(y.clone(), x.clone()),
                    Term::ge(x.clone(), Term::int(0)),
                ],
                Term::ge(y, Term::int(0)),
            ),
            Verdict::Valid
        );
    }

    #[test]
    fn negated_guards_reason_over_integers() {
        let (x, y) = (Term::var("x$0"), Term::var("y$1"));
        // ¬(x >= 0) ∧ y == -x ⊢ y >= 0  (the else branch of abs)
        assert_eq!(
            check(
                vec![
                    Term::not(Term::ge(x.clone(), Term::int(0))),
                    Term::eq(y.clone(), Term::Neg(Box::new(x))),
                ],
                Term::ge(y, Term::int(0)),
            ),
            Verdict::Valid
        );
    }

    #[test]
    fn chained_differences_close_transitively() {
        let (i, n) = (Term::var("i$1"), Term::var("n$0"));
        // i < n ⊢ i + 1 <= n
        assert_eq!(
            check(
                vec![Term::lt(i.clone(), n.clone())],
                Term::le(Term::Add(Box::new(i), Box::new(Term::int(1))), n),
            ),
            Verdict::Valid
        );
    }

    #[test]
    fn array_lengths_are_nonnegative_by_construction() {
        let xs = Term::var("xs$0");
        assert_eq!(
            check(
                vec![],
                Term::le(Term::int(0), Term::Length(Box::new(xs))),
            ),
            Verdict::Valid
        );
    }

    #[test]
    fn unconstrained_goals_are_invalid_with_a_witness() {
        let x = Term::var("x$0");
        match check(vec![], Term::ge(x, Term::int(0))) {
            Verdict::Invalid(Some(counterexample)) => {
                let value: i64 = counterexample.bindings["x$0"].parse().unwrap();
                assert!(value < 0);
            }
            other => panic!("expected a counterexample, got {:?}", other),
        }
    }

    #[test]
    fn contradictory_contexts_validate_everything() {
        let x = Term::var("x$0");
        assert_eq!(
            check(
                vec![
                    Term::ge(x.clone(), Term::int(1)),
                    Term::le(x.clone(), Term::int(0)),
                ],
                Term::eq(x, Term::int(42)),
            ),
            Verdict::Valid
        );
    }

    #[test]
    fn non_linear_contexts_stay_unknown_rather_than_guessing() {
        let (x, y) = (Term::var("x$0"), Term::var("y$1"));
        let product = Term::Mul(Box::new(x.clone()), Box::new(x.clone()));
        assert_eq!(
            check(vec![Term::eq(y.clone(), product)], Term::ge(y, Term::int(0))),
            Verdict::Unknown
        );
    }
}
