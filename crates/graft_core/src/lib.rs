//! Core types for graft.
//!
//! This crate provides the types shared by the execution runtime and the
//! pagination engine:
//! - `path`: Persistent result-tree paths
//! - `error`: GraphQL error records, builders and aggregates

pub mod error;
pub mod path;

pub use error::{
    AggregateError, ErrorBuilder, ErrorCode, ErrorModelError, ErrorSource, GraphQLError, Location,
    AGGREGATE_ERROR_MESSAGE, DEFAULT_ERROR_MESSAGE,
};
pub use path::{Path, PathError, PathSegment};
