//! Error types raised by the mapping engine

use thiserror::Error;

/// A mapping that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line} column {column}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Failure while applying a compiled mapping to one part.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("failed to parse payload as JSON: {reason}")]
    InvalidPayload { reason: String },

    #[error("{operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to parse '{value}' as a number")]
    NumberParse { value: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{context}: value is null")]
    NullValue { context: String },

    #[error("cannot use {what} as a value in {operation}")]
    InvalidOperand {
        what: &'static str,
        operation: String,
    },

    #[error("cannot set field '{path}': parent is {found}, not an object")]
    InvalidTarget { path: String, found: &'static str },

    #[error("part index {index} out of range for batch of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("failed to serialize result: {reason}")]
    Serialization { reason: String },
}

impl EvaluationError {
    pub fn type_mismatch(
        operation: impl Into<String>,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            operation: operation.into(),
            expected,
            found,
        }
    }
}
