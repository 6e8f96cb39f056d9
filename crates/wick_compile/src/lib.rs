//! # wick-compile
//!
//! The middle-end pipeline over one module heap:
//!
//! ```text
//! parse (external)
//!      │
//!      ▼
//! ┌────────────┐   ┌──────────────────┐   ┌────────────┐   ┌─────────┐
//! │ resolution │ ─▶ │ flow analyses    │ ─▶ │ versioning │ ─▶ │  VCG    │
//! └────────────┘   │ typing, assign,  │   └────────────┘   └─────────┘
//!                  │ coercion, purity,│
//!                  │ statics          │
//!                  └──────────────────┘
//! ```
//!
//! Ordering guarantees: resolution completes before any flow analysis
//! begins; versioning runs only when the flow analyses reported no errors;
//! the VCG consumes the versioned heap and emits obligations in document
//! order. Diagnostics accumulate on the module and never unwind;
//! serialization is attempted even when they are present.
//!
//! The driver may pass a [`CancelToken`]; the pipeline checks it between
//! phases (individual phases are short-lived by design) and returns
//! [`CompileError::Cancelled`] when set.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wick_base::ErrorCode;
use wick_heap::{Diagnostic, ItemHeap};
use wick_verify::{AssertionModule, Prover, Verdict};

pub use wick_check::VersionMap;

/// A cooperative cancellation flag shared with the driver.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Pipeline failures. User-facing problems are diagnostics on the heap,
/// not errors; this type covers only cancellation and internal misuse.
#[derive(Debug)]
pub enum CompileError {
    Cancelled,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Cancelled => write!(f, "compilation cancelled"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Generate the assertion module after the analyses succeed.
    pub verify: bool,
    pub cancel: CancelToken,
}

impl CompileOptions {
    pub fn verified() -> Self {
        Self {
            verify: true,
            cancel: CancelToken::new(),
        }
    }
}

/// What the pipeline produced.
pub struct CompileOutcome {
    /// Diagnostics attached to the module, in report order.
    pub diagnostics: Vec<Diagnostic>,
    /// The versioning result, when the analyses succeeded.
    pub versions: Option<VersionMap>,
    /// The assertion module, when requested and the analyses succeeded.
    pub assertion: Option<AssertionModule>,
}

impl CompileOutcome {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Runs the middle-end over a parsed module heap.
///
/// The heap is mutated in place: links resolve, inferred types land in
/// expression type slots, loop modified tuples fill in, and diagnostics
/// attach to the module. Callers may serialize the heap afterwards whether
/// or not diagnostics are present.
pub fn compile_module(
    heap: &mut ItemHeap,
    options: &CompileOptions,
) -> Result<CompileOutcome, CompileError> {
    let checkpoint = |token: &CancelToken| -> Result<(), CompileError> {
        if token.is_cancelled() {
            Err(CompileError::Cancelled)
        } else {
            Ok(())
        }
    };

    checkpoint(&options.cancel)?;
    wick_check::resolve_module(heap);

    checkpoint(&options.cancel)?;
    wick_check::check_module(heap);

    let diagnostics = heap.diagnostics();
    if !diagnostics.is_empty() {
        // later phases depend on facts only known good on success
        log::debug!(
            "short-circuiting after analyses: {} diagnostics",
            diagnostics.len()
        );
        return Ok(CompileOutcome {
            diagnostics,
            versions: None,
            assertion: None,
        });
    }

    checkpoint(&options.cancel)?;
    let versions = wick_check::version_module(heap);

    checkpoint(&options.cancel)?;
    let assertion = options.verify.then(|| wick_verify::generate(heap));

    Ok(CompileOutcome {
        diagnostics: heap.diagnostics(),
        versions: Some(versions),
        assertion,
    })
}

/// Discharges a compiled module's obligations with the given prover and
/// pins every invalid obligation back onto the heap as a diagnostic at the
/// obligation's source range.
///
/// Returns the verdicts in document order.
pub fn discharge(
    heap: &mut ItemHeap,
    module: &AssertionModule,
    prover: &dyn Prover,
) -> Vec<(String, Verdict)> {
    let verdicts = prover.check(module);
    for (name, verdict) in &verdicts {
        if let Verdict::Invalid(counterexample) = verdict {
            let obligation = module
                .obligation(name)
                .expect("verdicts name module obligations");
            log::debug!(
                "obligation {} failed{}",
                name,
                counterexample
                    .as_ref()
                    .map(|c| format!(" with counterexample over {} variables", c.bindings.len()))
                    .unwrap_or_default()
            );
            heap.report(Diagnostic::new(ErrorCode::SubtypeError, obligation.span));
        }
    }
    verdicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_heap::build::ModuleBuilder;

    fn trivial_module(heap: &mut ItemHeap) {
        let mut builder = ModuleBuilder::new(heap);
        let unit = builder.unit("main", &[]);
        builder.module("main", &[unit]);
    }

    #[test]
    fn cancellation_is_observed_between_phases() {
        let mut heap = ItemHeap::new();
        trivial_module(&mut heap);
        let options = CompileOptions {
            verify: false,
            cancel: CancelToken::new(),
        };
        options.cancel.cancel();
        assert!(matches!(
            compile_module(&mut heap, &options),
            Err(CompileError::Cancelled)
        ));
    }

    #[test]
    fn clean_modules_version_and_optionally_verify() {
        let mut heap = ItemHeap::new();
        trivial_module(&mut heap);
        let outcome = compile_module(&mut heap, &CompileOptions::verified()).unwrap();
        assert!(outcome.is_clean());
        assert!(outcome.versions.is_some());
        assert!(outcome.assertion.is_some());
    }

    #[test]
    fn diagnostics_short_circuit_versioning() {
        let mut heap = ItemHeap::new();
        let mut builder = ModuleBuilder::new(&mut heap);
        let int = builder.type_int();
        let y = builder.variable("y", int);
        let body = builder.block(&[]); // missing return
        let f = builder.function("f", &[], &[y], &[], &[], body);
        let unit = builder.unit("main", &[f]);
        builder.module("main", &[unit]);

        let outcome = compile_module(&mut heap, &CompileOptions::verified()).unwrap();
        assert!(!outcome.is_clean());
        assert!(outcome.versions.is_none());
        assert!(outcome.assertion.is_none());
    }
}
