//! Error types raised by the evaluator.
//!
//! Mirrors the error kinds named in the design's error-handling section: one
//! flat enum, one variant per kind, hand-rolled [`fmt::Display`] and
//! [`std::error::Error`] impls rather than a derive macro.

use std::fmt;

/// Everything that can go wrong while reducing a term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// A name was looked up but is not bound, or a binding target is
    /// otherwise malformed.
    BadIdentifier(String),
    /// A special form's operand tree does not have the shape that form
    /// requires.
    InvalidSyntax(String),
    /// A combiner was called with the wrong number of operands.
    ArityMismatch { operator: String, expected: String, found: usize },
    /// A value was used as if it had a different, incompatible type.
    TypeError(String),
    /// A list was expected where an atom appeared, or a non-empty list was
    /// expected where an empty one appeared (or vice versa).
    ListTypeError(String),
    /// A formal parameter tree and an operand tree disagree in shape.
    ParameterMismatch { formal: String, operand: String },
    /// A reference's environment has already been destroyed.
    InvalidReference(String),
    /// An operation required an lvalue / modifiable reference and did not
    /// get one.
    ValueCategoryError(String),
    /// An invariant was violated: a recursive binding resolved before it was
    /// assigned, a frozen environment was mutated, a cycle was detected
    /// where one is disallowed, or an anchor-accounting check failed.
    InvariantViolation(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::BadIdentifier(name) => {
                write!(f, "unbound identifier: {name}")
            }
            KernelError::InvalidSyntax(msg) => write!(f, "invalid syntax: {msg}"),
            KernelError::ArityMismatch { operator, expected, found } => write!(
                f,
                "{operator}: expected {expected} operand(s), found {found}"
            ),
            KernelError::TypeError(msg) => write!(f, "type error: {msg}"),
            KernelError::ListTypeError(msg) => write!(f, "list type error: {msg}"),
            KernelError::ParameterMismatch { formal, operand } => write!(
                f,
                "parameter tree {formal} does not match operand tree {operand}"
            ),
            KernelError::InvalidReference(msg) => write!(f, "invalid reference: {msg}"),
            KernelError::ValueCategoryError(msg) => write!(f, "value category error: {msg}"),
            KernelError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for KernelError {}

/// Result alias used throughout the crate.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_identifier_name() {
        let err = KernelError::BadIdentifier("foo".into());
        assert_eq!(err.to_string(), "unbound identifier: foo");
    }

    #[test]
    fn arity_mismatch_formats_operator_and_counts() {
        let err = KernelError::ArityMismatch {
            operator: "$if".into(),
            expected: "2 or 3".into(),
            found: 1,
        };
        assert_eq!(err.to_string(), "$if: expected 2 or 3 operand(s), found 1");
    }

    #[test]
    fn is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&KernelError::TypeError("x".into()));
    }
}
