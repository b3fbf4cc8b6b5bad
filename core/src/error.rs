use thiserror::Error;

/// Errors raised by index mutation and engine construction.
///
/// Queries never fail: malformed queries produce empty results instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A configuration value is out of range.
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A container reached its configured capacity.
    #[error("{what} capacity of {limit} exceeded")]
    CapacityExceeded { what: &'static str, limit: usize },

    /// A document with this id is already indexed.
    #[error("document {0:?} is already indexed")]
    DuplicateDocument(String),

    /// The suggestion is empty after normalization.
    #[error("suggestion is empty after normalization")]
    EmptySuggestion,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig { field, reason: reason.into() }
    }
}
