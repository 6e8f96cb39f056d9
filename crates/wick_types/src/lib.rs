//! # wick-types
//!
//! The semantic type algebra.
//!
//! Heap type items are *lifted* into [`Type`] value trees for analysis and
//! *lowered* back when a pass records an inferred type. The semantic lattice
//! extends the user-visible forms with [`Type::Intersection`] and
//! [`Type::Difference`], which exist only during checking and are never
//! written to disk.
//!
//! The three central operations:
//!
//! - [`substitute`] — replaces template variables under a [`Binding`],
//!   preserving structure where nothing changes
//! - [`is_subtype`] — the structural subtype operator, implemented as an
//!   emptiness test on a difference type
//! - [`select_candidate`] — picks the union member an implicit coercion
//!   targets, or reports the ambiguity

pub mod convert;
pub mod lifetime;
pub mod select;
pub mod sem;
pub mod subst;
pub mod subtype;

pub use convert::{expand_nominal, lift, lower};
pub use lifetime::LifetimeRelation;
pub use select::{select_candidate, Selection};
pub use sem::{Callable, Nominal, Record, Type};
pub use subst::{substitute, Binding};
pub use subtype::{is_empty, is_equivalent, is_subtype};
