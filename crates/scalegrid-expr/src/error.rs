//! Expression error types.

use thiserror::Error;

/// Errors raised while parsing an expression. Offsets are byte offsets
/// into the source text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },

    #[error("expression nested deeper than {limit} levels at offset {offset}")]
    TooDeep { limit: usize, offset: usize },
}

/// Errors raised while evaluating a parsed expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression produced a non-finite value: {0}")]
    NonFinite(f64),
}
