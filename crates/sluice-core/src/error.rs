//! Error taxonomy shared by every sluice component.
//!
//! Local failures are reported through [`Result`]; non-local conditions
//! (allocation failure inside a pipe, end of flow, missing managers) travel
//! upstream through the probe chain instead — see the `upipe` module.

/// Failure kinds for buffer, dictionary, record and pipe operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Pool and heap are both exhausted.
    Alloc,
    /// A precondition on an argument was violated (alignment, size, …).
    BadArg,
    /// An offset or size falls outside the buffer.
    OutOfRange,
    /// An attribute exists under this name but with another type.
    WrongType,
    /// No attribute exists under this name.
    NotFound,
    /// Write access to a buffer whose backing region is still shared.
    NotSingle,
    /// The operation is invalid in the object's current state.
    WrongState,
    /// The operation is recognized but deliberately not implemented.
    Unsupported,
    /// A wrapped foreign-library failure.
    External(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alloc => write!(f, "allocation failed"),
            Self::BadArg => write!(f, "invalid argument"),
            Self::OutOfRange => write!(f, "offset or size out of range"),
            Self::WrongType => write!(f, "attribute type mismatch"),
            Self::NotFound => write!(f, "attribute not found"),
            Self::NotSingle => write!(f, "buffer is shared, write refused"),
            Self::WrongState => write!(f, "invalid state for this operation"),
            Self::Unsupported => write!(f, "operation not supported"),
            Self::External(msg) => write!(f, "external library error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        assert_eq!(Error::Alloc.to_string(), "allocation failed");
        assert_eq!(
            Error::External("boom".into()).to_string(),
            "external library error: boom"
        );
    }

    #[test]
    fn errors_compare_by_kind() {
        assert_eq!(Error::NotSingle, Error::NotSingle);
        assert_ne!(Error::WrongType, Error::NotFound);
    }
}
