//! Assertion modules.
//!
//! The generator's output: declarations mirroring the source (uninterpreted
//! functions with their contracts as axioms, type-invariant predicates) and
//! one obligation per program proof obligation, in document order. The
//! whole module serializes as one JSON document a prover consumes
//! obligation by obligation.

use serde::{Deserialize, Serialize};
use wick_base::Span;

use crate::ast::{Sort, Term};

/// Why an obligation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationKind {
    /// An explicit `assert`.
    Assertion,
    /// A callable's `ensures` at a return.
    Postcondition,
    /// A callee's `requires` at a call site.
    Precondition,
    /// A type invariant at a coercion into a constrained alias.
    TypeInvariant,
    /// An array index within bounds.
    ArrayBounds,
    /// A divisor distinct from zero.
    DivisionByZero,
    /// An array generator's length non-negative.
    NegativeSize,
    /// A loop invariant holds on entry.
    InvariantEstablished,
    /// A loop invariant is preserved by the body.
    InvariantPreserved,
}

/// One closed proof obligation: `∀ variables. context ⇒ goal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    /// Stable name, unique within the module (`abs#2`).
    pub name: String,
    pub kind: ObligationKind,
    /// The source range the obligation originates from; counterexamples
    /// are pinned here.
    pub span: Span,
    /// The versioned variables live at the obligation point.
    pub variables: Vec<(String, Sort)>,
    /// The path context Γ.
    pub context: Vec<Term>,
    pub goal: Term,
}

impl Obligation {
    /// The obligation as a single closed formula.
    pub fn closed(&self) -> Term {
        let implication = Term::implies(Term::and(self.context.clone()), self.goal.clone());
        if self.variables.is_empty() {
            implication
        } else {
            Term::Forall {
                bound: self.variables.clone(),
                body: Box::new(implication),
            }
        }
    }
}

/// A declaration mirrored from the source module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    /// A pure function as an uninterpreted symbol with its contract as
    /// axioms.
    Function {
        name: String,
        parameters: Vec<(String, Sort)>,
        returns: Vec<(String, Sort)>,
        requires: Vec<Term>,
        ensures: Vec<Term>,
    },
    /// A type alias's invariant as a predicate over one value.
    Invariant {
        name: String,
        parameter: (String, Sort),
        body: Term,
    },
    /// A static variable as a constant symbol.
    Constant { name: String, sort: Sort },
}

/// The generator's output document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AssertionModule {
    pub name: String,
    pub declarations: Vec<Declaration>,
    pub obligations: Vec<Obligation>,
}

impl AssertionModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declarations: Vec::new(),
            obligations: Vec::new(),
        }
    }

    pub fn obligation(&self, name: &str) -> Option<&Obligation> {
        self.obligations.iter().find(|o| o.name == name)
    }

    /// Serializes the module as the document handed to provers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("assertion modules always serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Obligation {
        Obligation {
            name: "f#0".to_string(),
            kind: ObligationKind::Assertion,
            span: Span::new(10, 20),
            variables: vec![("x$0".to_string(), Sort::Int)],
            context: vec![Term::ge(Term::var("x$0"), Term::int(0))],
            goal: Term::ge(Term::var("x$0"), Term::int(-1)),
        }
    }

    #[test]
    fn closed_form_quantifies_the_live_variables() {
        let closed = sample().closed();
        match closed {
            Term::Forall { bound, .. } => assert_eq!(bound[0].0, "x$0"),
            other => panic!("expected a closed formula, got {:?}", other),
        }
    }

    #[test]
    fn closed_form_without_variables_is_bare_implication() {
        let mut obligation = sample();
        obligation.variables.clear();
        assert!(matches!(obligation.closed(), Term::Implies(_, _)));
    }

    #[test]
    fn module_round_trips_through_json() {
        let mut module = AssertionModule::new("main");
        module.obligations.push(sample());
        module.declarations.push(Declaration::Constant {
            name: "limit".to_string(),
            sort: Sort::Int,
        });
        let json = module.to_json();
        let back: AssertionModule = serde_json::from_value(json).unwrap();
        assert_eq!(back, module);
    }
}
