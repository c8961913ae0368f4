//! GraphQL error model.
//!
//! [`GraphQLError`] is the immutable record that ends up in the `errors` list
//! of a response. Mutable construction goes through [`ErrorBuilder`]; the
//! `with_*` methods on a finished error return a modified copy.

use crate::path::Path;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Message of every [`AggregateError`].
pub const AGGREGATE_ERROR_MESSAGE: &str = "Multiple errors occurred.";

/// Message substituted when an error is created with an empty message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unexpected execution error.";

/// Errors raised while constructing error records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorModelError {
    /// The message was empty.
    #[error("an error message must not be empty")]
    EmptyMessage,

    /// An aggregate was built from zero errors.
    #[error("an aggregate error requires at least one error")]
    EmptyAggregate,

    /// A source location was not 1-based.
    #[error("invalid source location {line}:{column}, line and column start at 1")]
    InvalidLocation {
        /// The rejected line.
        line: u32,
        /// The rejected column.
        column: u32,
    },
}

/// Machine-readable error codes, reported as `extensions.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Resolver errors
    ResolverError,
    ResolverTimeout,
    ResolverPanicked,

    // Completion errors
    NonNullViolation,
    InvalidValue,
    TypeResolutionFailed,

    // Argument errors
    InvalidArgument,

    // Batching errors
    BatchLoadFailed,
    Cancelled,

    // Internal errors
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ResolverError => "RESOLVER_ERROR",
            Self::ResolverTimeout => "RESOLVER_TIMEOUT",
            Self::ResolverPanicked => "RESOLVER_PANICKED",
            Self::NonNullViolation => "NON_NULL_VIOLATION",
            Self::InvalidValue => "INVALID_VALUE",
            Self::TypeResolutionFailed => "TYPE_RESOLUTION_FAILED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::BatchLoadFailed => "BATCH_LOAD_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A position in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLocation")]
pub struct Location {
    line: u32,
    column: u32,
}

#[derive(Deserialize)]
struct RawLocation {
    line: u32,
    column: u32,
}

impl TryFrom<RawLocation> for Location {
    type Error = ErrorModelError;

    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        Self::new(raw.line, raw.column)
    }
}

impl Location {
    /// Creates a location. Both coordinates are 1-based.
    pub fn new(line: u32, column: u32) -> Result<Self, ErrorModelError> {
        if line == 0 || column == 0 {
            return Err(ErrorModelError::InvalidLocation { line, column });
        }
        Ok(Self { line, column })
    }

    /// The 1-based line.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The 1-based column.
    pub fn column(&self) -> u32 {
        self.column
    }
}

/// The underlying cause of an error, if any.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// An immutable GraphQL error record.
#[derive(Debug, Clone)]
pub struct GraphQLError {
    message: String,
    path: Option<Path>,
    locations: Vec<Location>,
    extensions: IndexMap<String, serde_json::Value>,
    source: Option<ErrorSource>,
}

impl GraphQLError {
    /// Creates an error with a message.
    ///
    /// An empty message is replaced with [`DEFAULT_ERROR_MESSAGE`]; use
    /// [`ErrorBuilder`] to reject empty messages instead.
    pub fn new(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = DEFAULT_ERROR_MESSAGE.to_string();
        }
        Self {
            message,
            path: None,
            locations: Vec::new(),
            extensions: IndexMap::new(),
            source: None,
        }
    }

    /// Creates an error from a Rust error, keeping it as the source.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut this = Self::new(error.to_string());
        this.source = Some(Arc::new(error));
        this
    }

    /// Starts a builder.
    pub fn builder() -> ErrorBuilder {
        ErrorBuilder::new()
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The result path the error is attributed to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    /// The source locations.
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// The extensions map.
    pub fn extensions(&self) -> &IndexMap<String, serde_json::Value> {
        &self.extensions
    }

    /// The `code` extension, if set.
    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(|v| v.as_str())
    }

    /// The underlying cause.
    pub fn error_source(&self) -> Option<&ErrorSource> {
        self.source.as_ref()
    }

    /// Returns a copy attributed to `path`.
    #[must_use]
    pub fn with_path(&self, path: Path) -> Self {
        let mut copy = self.clone();
        copy.path = Some(path);
        copy
    }

    /// Returns a copy with the given locations.
    #[must_use]
    pub fn with_locations(&self, locations: impl IntoIterator<Item = Location>) -> Self {
        let mut copy = self.clone();
        copy.locations = locations.into_iter().collect();
        copy
    }

    /// Returns a copy with an extension entry set.
    #[must_use]
    pub fn with_extension(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let mut copy = self.clone();
        copy.extensions.insert(key.into(), value.into());
        copy
    }

    /// Returns a copy with the `code` extension set.
    #[must_use]
    pub fn with_code(&self, code: ErrorCode) -> Self {
        self.with_extension("code", code.as_str())
    }

    /// Returns a copy with a different message.
    #[must_use]
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        let mut copy = Self::new(message);
        copy.path = self.path.clone();
        copy.locations = self.locations.clone();
        copy.extensions = self.extensions.clone();
        copy.source = self.source.clone();
        copy
    }

    /// Returns a copy without the underlying cause.
    #[must_use]
    pub fn without_source(&self) -> Self {
        let mut copy = self.clone();
        copy.source = None;
        copy
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} (at {path})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for GraphQLError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl Serialize for GraphQLError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("message", &self.message)?;
        if !self.locations.is_empty() {
            map.serialize_entry("locations", &self.locations)?;
        }
        if let Some(path) = &self.path {
            map.serialize_entry("path", path)?;
        }
        if !self.extensions.is_empty() {
            map.serialize_entry("extensions", &self.extensions)?;
        }
        map.end()
    }
}

/// Mutable accumulator for a [`GraphQLError`].
#[derive(Debug, Clone, Default)]
pub struct ErrorBuilder {
    message: Option<String>,
    path: Option<Path>,
    locations: Vec<Location>,
    extensions: IndexMap<String, serde_json::Value>,
    source: Option<ErrorSource>,
}

impl ErrorBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from an existing error.
    pub fn from_error(error: &GraphQLError) -> Self {
        Self {
            message: Some(error.message.clone()),
            path: error.path.clone(),
            locations: error.locations.clone(),
            extensions: error.extensions.clone(),
            source: error.source.clone(),
        }
    }

    /// Sets the message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the path.
    pub fn path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    /// Clears the path.
    pub fn clear_path(mut self) -> Self {
        self.path = None;
        self
    }

    /// Adds a location.
    pub fn location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    /// Clears all locations.
    pub fn clear_locations(mut self) -> Self {
        self.locations.clear();
        self
    }

    /// Sets an extension entry.
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Removes an extension entry.
    pub fn remove_extension(mut self, key: &str) -> Self {
        self.extensions.shift_remove(key);
        self
    }

    /// Sets the `code` extension.
    pub fn code(self, code: ErrorCode) -> Self {
        self.extension("code", code.as_str())
    }

    /// Sets the underlying cause.
    pub fn source<E>(mut self, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(error));
        self
    }

    /// Freezes the builder into an error.
    pub fn build(self) -> Result<GraphQLError, ErrorModelError> {
        let message = match self.message {
            Some(message) if !message.is_empty() => message,
            _ => return Err(ErrorModelError::EmptyMessage),
        };
        Ok(GraphQLError {
            message,
            path: self.path,
            locations: self.locations,
            extensions: self.extensions,
            source: self.source,
        })
    }
}

/// Several independent errors reported as one unit.
#[derive(Debug, Clone)]
pub struct AggregateError {
    errors: Vec<GraphQLError>,
}

impl AggregateError {
    /// Bundles `errors`. Fails when there are none.
    pub fn new(errors: impl IntoIterator<Item = GraphQLError>) -> Result<Self, ErrorModelError> {
        let errors: Vec<GraphQLError> = errors.into_iter().collect();
        if errors.is_empty() {
            return Err(ErrorModelError::EmptyAggregate);
        }
        Ok(Self { errors })
    }

    /// The aggregate message, always [`AGGREGATE_ERROR_MESSAGE`].
    pub fn message(&self) -> &'static str {
        AGGREGATE_ERROR_MESSAGE
    }

    /// The bundled errors.
    pub fn errors(&self) -> &[GraphQLError] {
        &self.errors
    }

    /// Number of bundled errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false; an aggregate holds at least one error.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Unbundles the errors.
    pub fn into_errors(self) -> Vec<GraphQLError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(AGGREGATE_ERROR_MESSAGE)
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_is_one_based() {
        assert!(Location::new(1, 1).is_ok());
        assert_eq!(
            Location::new(0, 4),
            Err(ErrorModelError::InvalidLocation { line: 0, column: 4 })
        );
        assert!(Location::new(3, 0).is_err());

        let parsed: Location = serde_json::from_str(r#"{"line": 2, "column": 5}"#).unwrap();
        assert_eq!(parsed, Location::new(2, 5).unwrap());
        assert!(serde_json::from_str::<Location>(r#"{"line": 0, "column": 5}"#).is_err());
    }

    #[test]
    fn test_with_operations_copy() {
        let error = GraphQLError::new("boom");
        let located = error
            .with_path(Path::root().append_field("user"))
            .with_code(ErrorCode::ResolverError);

        assert!(error.path().is_none());
        assert!(error.extensions().is_empty());
        assert_eq!(located.path().unwrap().print(), "/user");
        assert_eq!(located.code(), Some("RESOLVER_ERROR"));
        assert_eq!(located.message(), "boom");
    }

    #[test]
    fn test_empty_message_defaults() {
        assert_eq!(GraphQLError::new("").message(), DEFAULT_ERROR_MESSAGE);
        assert_eq!(
            ErrorBuilder::new().build().unwrap_err(),
            ErrorModelError::EmptyMessage
        );
        assert_eq!(
            ErrorBuilder::new().message("").build().unwrap_err(),
            ErrorModelError::EmptyMessage
        );
    }

    #[test]
    fn test_builder() {
        let error = GraphQLError::builder()
            .message("Not found")
            .path(Path::root().append_field("book"))
            .location(Location::new(2, 5).unwrap())
            .code(ErrorCode::InvalidValue)
            .extension("id", 42)
            .build()
            .unwrap();

        assert_eq!(error.locations().len(), 1);
        assert_eq!(error.extensions().len(), 2);

        let rebuilt = ErrorBuilder::from_error(&error)
            .remove_extension("id")
            .clear_path()
            .build()
            .unwrap();
        assert!(rebuilt.path().is_none());
        assert_eq!(rebuilt.extensions().len(), 1);
    }

    #[test]
    fn test_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = GraphQLError::from_error(io);
        assert_eq!(error.message(), "disk on fire");
        assert!(std::error::Error::source(&error).is_some());
        assert!(error.without_source().error_source().is_none());
    }

    #[test]
    fn test_serialize_response_shape() {
        let error = GraphQLError::new("bad")
            .with_path(Path::parse("/a[1]/b").unwrap())
            .with_locations([Location::new(1, 3).unwrap()])
            .with_code(ErrorCode::NonNullViolation);

        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({
                "message": "bad",
                "locations": [{"line": 1, "column": 3}],
                "path": ["a", 1, "b"],
                "extensions": {"code": "NON_NULL_VIOLATION"}
            })
        );
        assert_eq!(
            serde_json::to_value(GraphQLError::new("plain")).unwrap(),
            serde_json::json!({"message": "plain"})
        );
    }

    #[test]
    fn test_aggregate_requires_errors() {
        assert_eq!(
            AggregateError::new(Vec::new()).unwrap_err(),
            ErrorModelError::EmptyAggregate
        );

        let aggregate =
            AggregateError::new([GraphQLError::new("a"), GraphQLError::new("b")]).unwrap();
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate.errors().len(), 2);
        assert_eq!(aggregate.message(), AGGREGATE_ERROR_MESSAGE);
        assert_eq!(aggregate.to_string(), AGGREGATE_ERROR_MESSAGE);
    }
}
