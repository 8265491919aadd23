//! Runtime errors.
//!
//! A [`RunError`] terminates the coroutine that raised it; it never unwinds
//! across the scheduler boundary. Internal invariant violations are panics,
//! not `RunError`s, and are converted to a status code at the embedding
//! boundary.

use std::fmt;

use strum::{Display, IntoStaticStr};

pub type RunResult<T> = Result<T, RunError>;

/// Classification of runtime errors raised from bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ErrorKind {
    BadArgument,
    TypeMismatch,
    OutOfBounds,
    DivideByZero,
    IntegerOverflow,
    AssertionFailed,
    UnknownMember,
    NoSuchMethod,
    WrongArity,
    /// An imported module could not be found at resolution time.
    UnresolvedImport,
    /// Reading the wrong variant of a result value.
    WrongResultVariant,
    /// A value that does not support the attempted operation.
    UnsupportedOperation,
    /// Use of the undefined poison value.
    UndefinedValue,
}

/// A runtime error with its classification and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RunError {}
