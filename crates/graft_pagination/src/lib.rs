//! Cursor pagination for graft.
//!
//! This crate slices ordered sequences into pages addressed by opaque
//! cursors:
//! - `sort`: Sort definitions and the key values cursors carry
//! - `cursor`: The cursor wire format
//! - `paginate`: Paging arguments, options and the slicing algorithm
//! - `page`: Pages and cursor creation
//! - `connection`: Relay-style connection shaping
//! - `error`: Paging argument errors

pub mod connection;
pub mod cursor;
pub mod error;
pub mod page;
pub mod paginate;
pub mod sort;

pub use connection::{Connection, Edge, PageInfo};
pub use cursor::Cursor;
pub use error::PagingError;
pub use page::Page;
pub use paginate::{paginate, PagingArguments, PagingOptions};
pub use sort::{CursorValue, SortDefinition, SortDirection};
