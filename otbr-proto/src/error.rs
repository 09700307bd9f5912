use thiserror::Error;

/// Result codes shared by the commissioner, diagnostics and action layers.
///
/// Several variants double as "not done yet" signals rather than failures:
/// [`Error::Pending`] is returned by status polls while an operation is
/// still in flight, and callers are expected to poll again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The operation is already in progress or the item already exists
    #[error("already in progress")]
    Already,
    /// The operation is not valid in the current state
    #[error("invalid state")]
    InvalidState,
    /// An argument failed validation
    #[error("invalid arguments")]
    InvalidArgs,
    /// The referenced item does not exist
    #[error("not found")]
    NotFound,
    /// The operation has started but has not finished
    #[error("pending")]
    Pending,
    /// The operation ran and did not succeed
    #[error("failed")]
    Failed,
    /// A required resource is occupied by another operation
    #[error("busy")]
    Busy,
    /// No buffer space to queue the message
    #[error("no buffer space available")]
    NoBufs,
    /// Malformed input could not be decoded
    #[error("parse error")]
    Parse,
    /// The peer did not answer within the response window
    #[error("no response received")]
    ResponseTimeout,
    /// The operation was cancelled before it finished
    #[error("aborted")]
    Abort,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
