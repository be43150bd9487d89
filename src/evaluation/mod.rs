//! Pure evaluation helpers used by the protocol checks.
//!
//! Nothing in here performs I/O; each helper takes already-fetched data and
//! decides whether it satisfies a monitor's expectations.

pub mod conditions;
pub mod json_query;
pub mod status_codes;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Invalid JSON query expression: {0}")]
    InvalidExpression(String),
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("Cannot compare non-numeric values: {0}")]
    NonNumeric(String),
    #[error("Invalid conditions payload")]
    InvalidConditions,
    #[error("Unknown condition variable: {0}")]
    UnknownVariable(String),
}
