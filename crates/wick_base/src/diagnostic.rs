//! The stable diagnostic code table.
//!
//! Every user-facing problem the middle-end can report has a four-digit
//! numeric code that stays fixed across compiler versions: 4xx for type
//! errors, 5xx for statement errors, 6xx for expression errors. Messages are
//! looked up from the code, never embedded at the reporting site, so wording
//! can evolve without touching the passes.
//!
//! The statement range keeps the historically sparse numbering (500, 504,
//! 506..509); renumbering would break stored diagnostics.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    // ---- Type errors (400-410) ----
    SubtypeError = 400,
    EmptyType = 401,
    ExpectedArray = 402,
    ExpectedRecord = 403,
    ExpectedReference = 404,
    ExpectedLambda = 405,
    InvalidField = 406,
    ResolutionError = 407,
    AmbiguousCoercion = 408,
    MissingTemplateParameters = 409,
    TooManyTemplateParameters = 410,

    // ---- Statement errors (500-509) ----
    MissingReturn = 500,
    UnreachableCode = 504,
    BranchAlwaysTaken = 506,
    TooManyReturns = 507,
    InsufficientReturns = 508,
    CyclicStaticInitialiser = 509,

    // ---- Expression errors (601-610) ----
    VariablePossiblyUninitialised = 601,
    IncomparableOperands = 602,
    InsufficientArguments = 603,
    AmbiguousCallable = 604,
    ParameterReassigned = 605,
    FinalVariableReassigned = 606,
    AllocationNotPermitted = 607,
    MethodCallNotPermitted = 608,
    ReferenceAccessNotPermitted = 609,
    InvalidLVal = 610,
}

/// How serious a diagnostic is.
///
/// The middle-end currently only emits errors; warnings are reserved for
/// lint-like passes layered on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

static MESSAGES: Lazy<HashMap<ErrorCode, &'static str>> = Lazy::new(|| {
    use ErrorCode::*;
    HashMap::from([
        (SubtypeError, "expected type is not satisfied by the actual type"),
        (EmptyType, "type contains no values"),
        (ExpectedArray, "expected an array type"),
        (ExpectedRecord, "expected a record type"),
        (ExpectedReference, "expected a reference type"),
        (ExpectedLambda, "expected a callable type"),
        (InvalidField, "record has no field of this name"),
        (ResolutionError, "unable to resolve name"),
        (AmbiguousCoercion, "implicit coercion is ambiguous"),
        (MissingTemplateParameters, "too few template parameters supplied"),
        (TooManyTemplateParameters, "too many template parameters supplied"),
        (MissingReturn, "control may reach the end of a callable that must return a value"),
        (UnreachableCode, "statement can never be executed"),
        (BranchAlwaysTaken, "branch condition is always determined"),
        (TooManyReturns, "too many return values"),
        (InsufficientReturns, "not enough return values"),
        (CyclicStaticInitialiser, "static variable initialiser depends on itself"),
        (VariablePossiblyUninitialised, "variable may be used before it is assigned"),
        (IncomparableOperands, "operand types cannot be compared"),
        (InsufficientArguments, "not enough arguments for this callable"),
        (AmbiguousCallable, "more than one callable matches these arguments"),
        (ParameterReassigned, "parameters may not be reassigned"),
        (FinalVariableReassigned, "final variables may only be assigned once"),
        (AllocationNotPermitted, "functions may not allocate"),
        (MethodCallNotPermitted, "functions may not invoke methods"),
        (ReferenceAccessNotPermitted, "functions may not dereference references"),
        (InvalidLVal, "expression cannot be assigned to"),
    ])
});

impl ErrorCode {
    /// The stable numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// The human-readable message for this code.
    pub fn message(self) -> &'static str {
        MESSAGES[&self]
    }

    pub fn severity(self) -> Severity {
        Severity::Error
    }

    /// Reconstructs a code from its stable number, for diagnostics read back
    /// from serialized heaps.
    pub fn from_code(code: u16) -> Option<ErrorCode> {
        MESSAGES.keys().copied().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:03}: {}", self.code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::SubtypeError.code(), 400);
        assert_eq!(ErrorCode::AmbiguousCoercion.code(), 408);
        assert_eq!(ErrorCode::CyclicStaticInitialiser.code(), 509);
        assert_eq!(ErrorCode::FinalVariableReassigned.code(), 606);
        assert_eq!(ErrorCode::InvalidLVal.code(), 610);
    }

    #[test]
    fn every_code_has_a_message() {
        for code in MESSAGES.keys() {
            assert!(!code.message().is_empty());
        }
    }

    #[test]
    fn from_code_round_trips() {
        assert_eq!(ErrorCode::from_code(404), Some(ErrorCode::ExpectedReference));
        assert_eq!(ErrorCode::from_code(999), None);
    }

    #[test]
    fn display_includes_code_and_message() {
        let shown = ErrorCode::MissingReturn.to_string();
        assert!(shown.contains("500"));
        assert!(shown.contains("return"));
    }
}
