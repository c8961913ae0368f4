//! Paging argument errors.

use graft_core::{ErrorCode, GraphQLError};
use thiserror::Error;

/// Errors caused by caller-supplied paging arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PagingError {
    /// The cursor is not valid base64 or does not hold a cursor payload.
    #[error("The cursor `{0}` is not a valid cursor.")]
    InvalidCursor(String),

    /// The cursor was created for a different sort definition.
    #[error("The cursor was created for the sort `{found}` but the connection is sorted by `{expected}`.")]
    CursorMismatch { expected: String, found: String },

    /// `first` and `last` were both given.
    #[error("The arguments `first` and `last` cannot be combined.")]
    AmbiguousDirection,

    /// Neither `first` nor `last` was given and boundaries are required.
    #[error("You must provide a `first` or `last` value to properly paginate the connection.")]
    BoundariesRequired,

    /// The requested page size exceeds the maximum.
    #[error("The requested number of values per page must be at most {max}, but was {requested}.")]
    MaxPageSizeExceeded { requested: usize, max: usize },

    /// A cursor carries a relative offset but relative cursors are disabled.
    #[error("Relative cursors are not enabled for this connection.")]
    RelativeCursorsDisabled,

    /// A relative offset points outside the sequence.
    #[error("The cursor offset {offset} points outside of the available items.")]
    OffsetOutOfRange { offset: i64 },
}

impl From<PagingError> for GraphQLError {
    fn from(error: PagingError) -> Self {
        GraphQLError::from_error(error).with_code(ErrorCode::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_graphql_error() {
        let error: GraphQLError = PagingError::AmbiguousDirection.into();
        assert_eq!(error.code(), Some("INVALID_ARGUMENT"));
        assert_eq!(
            error.message(),
            "The arguments `first` and `last` cannot be combined."
        );
    }

    #[test]
    fn test_messages() {
        let error = PagingError::MaxPageSizeExceeded {
            requested: 100,
            max: 50,
        };
        assert_eq!(
            error.to_string(),
            "The requested number of values per page must be at most 50, but was 100."
        );
    }
}
