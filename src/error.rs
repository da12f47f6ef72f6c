//! Error types.
//!
//! Structural problems with an image (bad magic, dangling table links,
//! undersized notes) are [`Error::Format`]. Queries against a loaded code
//! object report the closed set of [`QueryError`] outcomes instead.

use std::fmt;

/// Errors produced while building, parsing or saving an image.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bytes do not form a valid image.
    #[error("invalid code object: {0}")]
    Format(String),

    /// Underlying file system error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A byte range falls outside a section's declared size.
    #[error("range {offset:#x}+{len:#x} is outside section of size {size:#x}")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    /// A build-path operation was attempted on a finalized or loaded image.
    #[error("image is finalized and can no longer be modified")]
    Finalized,

    /// A value does not fit in the fields of a 32-bit image.
    #[error("value {0:#x} does not fit in a 32-bit image")]
    Overflow(u64),

    /// A relocation could not be applied.
    #[error("relocation error: {0}")]
    Relocation(String),

    /// A builder call was given parameters it cannot honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn format(msg: impl fmt::Display) -> Self {
        Error::Format(msg.to_string())
    }

    /// Prefixes the message of a format error with `ctx`.
    pub(crate) fn in_context(self, ctx: impl fmt::Display) -> Self {
        match self {
            Error::Format(msg) => Error::Format(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

impl From<object::read::Error> for Error {
    fn from(err: object::read::Error) -> Self {
        Error::Format(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of a code object or symbol query. Success is `Ok(_)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Unknown attribute code, wrong symbol kind for the attribute, or an
    /// output buffer of the wrong size.
    #[error("invalid argument")]
    InvalidArgument,
    /// No symbol with the requested qualified name.
    #[error("invalid symbol name")]
    InvalidSymbolName,
    /// The code object is not queryable or lacks required metadata.
    #[error("invalid code object")]
    InvalidCodeObject,
    /// Any other failure.
    #[error("error")]
    Error,
}

impl From<Error> for QueryError {
    fn from(err: Error) -> Self {
        match err {
            Error::Format(_) => QueryError::InvalidCodeObject,
            Error::InvalidArgument(_) | Error::OutOfRange { .. } => QueryError::InvalidArgument,
            _ => QueryError::Error,
        }
    }
}
