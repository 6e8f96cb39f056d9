//! # wick-base
//!
//! Foundational types for the Wick compiler:
//!
//! - [`Interner`]/[`Symbol`] — string interning for O(1) name equality
//! - [`Span`] — byte-offset source locations
//! - [`Identifier`]/[`Name`] — simple and qualified names
//! - [`ErrorCode`]/[`Severity`] — the stable diagnostic code table
//!
//! This crate has no knowledge of the WIL heap or the type algebra. Higher
//! layers (`wick-heap`, `wick-types`, `wick-check`, `wick-verify`) build on
//! these atoms; keeping them here avoids dependency cycles between passes.

pub mod diagnostic;
pub mod intern;
pub mod name;
pub mod span;

pub use diagnostic::{ErrorCode, Severity};
pub use intern::{Interner, Symbol};
pub use name::{Identifier, Name};
pub use span::Span;
