//! # wick-check
//!
//! The analysis passes of the Wick middle-end, in the order the pipeline
//! runs them:
//!
//! 1. [`resolve`] — binds partial names to declarations through the unit's
//!    imports, rewriting `Link` items in the heap
//! 2. [`flow`] — flow-sensitive type checking; writes inferred types back
//!    into expression items
//! 3. [`assign`] — definite assignment and unassignment
//! 4. [`coercion`] — the ambiguous implicit coercion check
//! 5. [`purity`] — functions must stay functional
//! 6. [`statics`] — cyclic static initialiser detection
//! 7. [`version`] — variable versioning, producing the SSA-style view the
//!    verification-condition generator consumes
//!
//! Each pass is a producer–consumer traversal: statement handlers take an
//! environment value and hand back an updated one, and user-facing problems
//! accumulate as diagnostics on the module rather than unwinding.

pub mod assign;
pub mod coercion;
pub mod env;
pub mod flow;
pub mod modified;
pub mod purity;
pub mod resolve;
pub mod statics;
pub mod version;

pub use resolve::resolve_module;
pub use version::{version_module, VersionMap};

use wick_heap::ItemHeap;

/// Runs the flow analyses (everything between resolution and versioning)
/// over every callable in the module.
pub fn check_module(heap: &mut ItemHeap) {
    flow::check_module(heap);
    assign::check_module(heap);
    coercion::check_module(heap);
    purity::check_module(heap);
    statics::check_module(heap);
}
