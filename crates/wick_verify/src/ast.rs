//! The assertion language.
//!
//! A minimal first-order logic: versioned variables, integer and boolean
//! constants, linear arithmetic, comparisons, connectives, bounded
//! quantifiers, and uninterpreted function application for everything the
//! logic does not interpret (pure source functions, array stores, type
//! tests). Terms serialize with `serde`, so an assertion module is a plain
//! structured document to an external prover.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Sorts of the assertion language.
///
/// `Value` is the uninterpreted sort covering every source type the logic
/// does not model arithmetically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sort {
    Int,
    Bool,
    Value,
}

/// A term or formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A versioned program variable, e.g. `x$1`.
    Var(String),
    Int(BigInt),
    Bool(bool),
    Null,
    /// Uninterpreted application: pure function results, array stores,
    /// record stores, type tests.
    App { function: String, arguments: Vec<Term> },

    // ---- integer arithmetic ----
    Neg(Box<Term>),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    Div(Box<Term>, Box<Term>),
    Rem(Box<Term>, Box<Term>),

    // ---- comparison ----
    Eq(Box<Term>, Box<Term>),
    Ne(Box<Term>, Box<Term>),
    Lt(Box<Term>, Box<Term>),
    Le(Box<Term>, Box<Term>),
    Gt(Box<Term>, Box<Term>),
    Ge(Box<Term>, Box<Term>),

    // ---- connectives ----
    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Box<Term>, Box<Term>),
    Iff(Box<Term>, Box<Term>),

    // ---- bounded quantifiers ----
    Forall {
        bound: Vec<(String, Sort)>,
        body: Box<Term>,
    },
    Exists {
        bound: Vec<(String, Sort)>,
        body: Box<Term>,
    },

    // ---- collections ----
    /// Array length; always a non-negative integer.
    Length(Box<Term>),
    /// Array element selection.
    Select(Box<Term>, Box<Term>),
    /// Record field selection.
    Field(Box<Term>, String),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Term {
        Term::Var(name.into())
    }

    pub fn int(value: impl Into<BigInt>) -> Term {
        Term::Int(value.into())
    }

    pub fn app(function: impl Into<String>, arguments: Vec<Term>) -> Term {
        Term::App {
            function: function.into(),
            arguments,
        }
    }

    pub fn eq(left: Term, right: Term) -> Term {
        Term::Eq(Box::new(left), Box::new(right))
    }

    pub fn ne(left: Term, right: Term) -> Term {
        Term::Ne(Box::new(left), Box::new(right))
    }

    pub fn lt(left: Term, right: Term) -> Term {
        Term::Lt(Box::new(left), Box::new(right))
    }

    pub fn le(left: Term, right: Term) -> Term {
        Term::Le(Box::new(left), Box::new(right))
    }

    pub fn ge(left: Term, right: Term) -> Term {
        Term::Ge(Box::new(left), Box::new(right))
    }

    pub fn not(term: Term) -> Term {
        match term {
            Term::Not(inner) => *inner,
            other => Term::Not(Box::new(other)),
        }
    }

    /// A conjunction, flattening nested conjunctions and dropping `true`.
    pub fn and(terms: Vec<Term>) -> Term {
        let mut flat = Vec::new();
        for term in terms {
            match term {
                Term::Bool(true) => {}
                Term::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Term::Bool(true),
            1 => flat.pop().unwrap(),
            _ => Term::And(flat),
        }
    }

    pub fn implies(antecedent: Term, consequent: Term) -> Term {
        Term::Implies(Box::new(antecedent), Box::new(consequent))
    }

    /// Free variable names, excluding quantifier-bound ones.
    pub fn free_vars(&self, out: &mut std::collections::BTreeSet<String>) {
        self.free_vars_excluding(out, &mut Vec::new());
    }

    fn free_vars_excluding(
        &self,
        out: &mut std::collections::BTreeSet<String>,
        bound: &mut Vec<String>,
    ) {
        match self {
            Term::Var(name) => {
                if !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            Term::Int(_) | Term::Bool(_) | Term::Null => {}
            Term::App { arguments, .. } => {
                for argument in arguments {
                    argument.free_vars_excluding(out, bound);
                }
            }
            Term::Neg(a) | Term::Not(a) | Term::Length(a) => a.free_vars_excluding(out, bound),
            Term::Field(a, _) => a.free_vars_excluding(out, bound),
            Term::Add(a, b)
            | Term::Sub(a, b)
            | Term::Mul(a, b)
            | Term::Div(a, b)
            | Term::Rem(a, b)
            | Term::Eq(a, b)
            | Term::Ne(a, b)
            | Term::Lt(a, b)
            | Term::Le(a, b)
            | Term::Gt(a, b)
            | Term::Ge(a, b)
            | Term::Implies(a, b)
            | Term::Iff(a, b)
            | Term::Select(a, b) => {
                a.free_vars_excluding(out, bound);
                b.free_vars_excluding(out, bound);
            }
            Term::And(terms) | Term::Or(terms) => {
                for term in terms {
                    term.free_vars_excluding(out, bound);
                }
            }
            Term::Forall { bound: names, body } | Term::Exists { bound: names, body } => {
                let depth = bound.len();
                bound.extend(names.iter().map(|(name, _)| name.clone()));
                body.free_vars_excluding(out, bound);
                bound.truncate(depth);
            }
        }
    }

    /// Replaces every free occurrence of `name` by `replacement`.
    pub fn substitute(&self, name: &str, replacement: &Term) -> Term {
        match self {
            Term::Var(v) if v == name => replacement.clone(),
            Term::Var(_) | Term::Int(_) | Term::Bool(_) | Term::Null => self.clone(),
            Term::App {
                function,
                arguments,
            } => Term::App {
                function: function.clone(),
                arguments: arguments
                    .iter()
                    .map(|argument| argument.substitute(name, replacement))
                    .collect(),
            },
            Term::Neg(a) => Term::Neg(Box::new(a.substitute(name, replacement))),
            Term::Not(a) => Term::Not(Box::new(a.substitute(name, replacement))),
            Term::Length(a) => Term::Length(Box::new(a.substitute(name, replacement))),
            Term::Field(a, field) => {
                Term::Field(Box::new(a.substitute(name, replacement)), field.clone())
            }
            Term::Add(a, b) => binary(Term::Add, a, b, name, replacement),
            Term::Sub(a, b) => binary(Term::Sub, a, b, name, replacement),
            Term::Mul(a, b) => binary(Term::Mul, a, b, name, replacement),
            Term::Div(a, b) => binary(Term::Div, a, b, name, replacement),
            Term::Rem(a, b) => binary(Term::Rem, a, b, name, replacement),
            Term::Eq(a, b) => binary(Term::Eq, a, b, name, replacement),
            Term::Ne(a, b) => binary(Term::Ne, a, b, name, replacement),
            Term::Lt(a, b) => binary(Term::Lt, a, b, name, replacement),
            Term::Le(a, b) => binary(Term::Le, a, b, name, replacement),
            Term::Gt(a, b) => binary(Term::Gt, a, b, name, replacement),
            Term::Ge(a, b) => binary(Term::Ge, a, b, name, replacement),
            Term::Implies(a, b) => binary(Term::Implies, a, b, name, replacement),
            Term::Iff(a, b) => binary(Term::Iff, a, b, name, replacement),
            Term::Select(a, b) => binary(Term::Select, a, b, name, replacement),
            Term::And(terms) => Term::And(
                terms
                    .iter()
                    .map(|term| term.substitute(name, replacement))
                    .collect(),
            ),
            Term::Or(terms) => Term::Or(
                terms
                    .iter()
                    .map(|term| term.substitute(name, replacement))
                    .collect(),
            ),
            Term::Forall { bound, body } => {
                if bound.iter().any(|(bound_name, _)| bound_name == name) {
                    self.clone()
                } else {
                    Term::Forall {
                        bound: bound.clone(),
                        body: Box::new(body.substitute(name, replacement)),
                    }
                }
            }
            Term::Exists { bound, body } => {
                if bound.iter().any(|(bound_name, _)| bound_name == name) {
                    self.clone()
                } else {
                    Term::Exists {
                        bound: bound.clone(),
                        body: Box::new(body.substitute(name, replacement)),
                    }
                }
            }
        }
    }
}

fn binary(
    constructor: fn(Box<Term>, Box<Term>) -> Term,
    a: &Term,
    b: &Term,
    name: &str,
    replacement: &Term,
) -> Term {
    constructor(
        Box::new(a.substitute(name, replacement)),
        Box::new(b.substitute(name, replacement)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_and_drops_trivial_conjuncts() {
        let term = Term::and(vec![
            Term::Bool(true),
            Term::and(vec![Term::var("a"), Term::var("b")]),
            Term::var("c"),
        ]);
        assert_eq!(
            term,
            Term::And(vec![Term::var("a"), Term::var("b"), Term::var("c")])
        );
        assert_eq!(Term::and(vec![]), Term::Bool(true));
        assert_eq!(Term::and(vec![Term::var("x")]), Term::var("x"));
    }

    #[test]
    fn double_negation_cancels() {
        let term = Term::not(Term::not(Term::var("p")));
        assert_eq!(term, Term::var("p"));
    }

    #[test]
    fn free_vars_respect_quantifier_binding() {
        let term = Term::Forall {
            bound: vec![("i".to_string(), Sort::Int)],
            body: Box::new(Term::lt(Term::var("i"), Term::var("n"))),
        };
        let mut free = std::collections::BTreeSet::new();
        term.free_vars(&mut free);
        assert!(free.contains("n"));
        assert!(!free.contains("i"));
    }

    #[test]
    fn substitution_stops_at_shadowing_binders() {
        let inner = Term::Forall {
            bound: vec![("x".to_string(), Sort::Int)],
            body: Box::new(Term::var("x")),
        };
        assert_eq!(inner.substitute("x", &Term::int(1)), inner);
        let open = Term::ge(Term::var("x"), Term::int(0));
        assert_eq!(
            open.substitute("x", &Term::var("y")),
            Term::ge(Term::var("y"), Term::int(0))
        );
    }

    #[test]
    fn terms_serialize_as_structured_json() {
        let term = Term::ge(Term::var("x$0"), Term::int(0));
        let json = serde_json::to_string(&term).unwrap();
        assert!(json.contains("x$0"));
        let back: Term = serde_json::from_str(&json).unwrap();
        assert_eq!(back, term);
    }
}
