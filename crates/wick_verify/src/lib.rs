//! # wick-verify
//!
//! The verification side of the middle-end:
//!
//! - [`ast`] — the assertion language, a minimal first-order logic over the
//!   source type algebra
//! - [`module`] — assertion modules: declarations plus obligations, each a
//!   closed formula `∀ v̄. Γ ⇒ φ`, serializable as a single structured
//!   document
//! - [`vcg`] — the generator walking versioned callable bodies and
//!   accumulating the path context Γ
//! - [`prover`] — the contract an external decision procedure implements,
//!   and a small built-in procedure for tests

pub mod ast;
pub mod module;
pub mod prover;
pub mod vcg;

pub use ast::{Sort, Term};
pub use module::{AssertionModule, Declaration, Obligation, ObligationKind};
pub use prover::{CounterExample, Prover, TautologyProver, Verdict};
pub use vcg::generate;
