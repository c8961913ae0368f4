//! Result-tree paths.
//!
//! A [`Path`] is a persistent linked list of segments. Appending never copies
//! the parent: every node holds an `Arc` to its parent, so sibling fields
//! share their common prefix and errors or batch keys can hold a path without
//! cloning its segments.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while building or parsing a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A list index was appended directly onto the root.
    #[error("a list index cannot be appended to the root path (index {0})")]
    IndexOnRoot(usize),

    /// A printed path did not start with `/`.
    #[error("path must start with '/', got {0:?}")]
    MissingLeadingSlash(String),

    /// A segment could not be split into a name and indices.
    #[error("malformed path segment {0:?}")]
    MalformedSegment(String),

    /// A field segment is not a valid GraphQL name.
    #[error("invalid field name {0:?} in path")]
    InvalidName(String),

    /// An index segment is not a number.
    #[error("path index {0:?} is not a number")]
    NonNumericIndex(String),

    /// An index segment is negative.
    #[error("path index {0} is negative")]
    NegativeIndex(String),
}

/// A single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A response key (field name or alias).
    Field(Arc<str>),
    /// A list index.
    Index(usize),
}

impl PathSegment {
    /// Returns the field name, if this is a field segment.
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name),
            Self::Index(_) => None,
        }
    }

    /// Returns the list index, if this is an index segment.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Field(_) => None,
            Self::Index(index) => Some(*index),
        }
    }
}

impl Ord for PathSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Index(a), Self::Index(b)) => a.cmp(b),
            (Self::Field(a), Self::Field(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::Index(_), Self::Field(_)) => Ordering::Less,
            (Self::Field(_), Self::Index(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for PathSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl Serialize for PathSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Field(name) => serializer.serialize_str(name),
            Self::Index(index) => serializer.serialize_u64(*index as u64),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(Arc::from(s))
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(Arc::from(s))
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

struct PathNode {
    parent: Path,
    segment: PathSegment,
    depth: usize,
}

/// A location in the result tree.
///
/// The root path has no segments and prints as `/`. Equality is structural:
/// two independently built paths with the same segments are equal.
#[derive(Clone, Default)]
pub struct Path {
    node: Option<Arc<PathNode>>,
}

impl Path {
    /// Returns the root path.
    pub const fn root() -> Self {
        Self { node: None }
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.node.is_none()
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.node.as_ref().map_or(0, |node| node.depth)
    }

    /// Returns true if the path has no segments (i.e. it is the root).
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<&Path> {
        self.node.as_ref().map(|node| &node.parent)
    }

    /// Returns the last segment, or `None` for the root.
    pub fn last(&self) -> Option<&PathSegment> {
        self.node.as_ref().map(|node| &node.segment)
    }

    /// Appends a field segment.
    #[must_use]
    pub fn append_field(&self, name: impl Into<Arc<str>>) -> Path {
        self.push(PathSegment::Field(name.into()))
    }

    /// Appends a list index segment.
    ///
    /// Fails on the root: a root has no list index.
    pub fn append_index(&self, index: usize) -> Result<Path, PathError> {
        if self.is_root() {
            return Err(PathError::IndexOnRoot(index));
        }
        Ok(self.push(PathSegment::Index(index)))
    }

    /// Splices the segments of `other` onto this path.
    ///
    /// `other` never starts with an index (it could not have been built), so
    /// the splice cannot produce an index on the root.
    #[must_use]
    pub fn append_path(&self, other: &Path) -> Path {
        other
            .to_list()
            .into_iter()
            .fold(self.clone(), |path, segment| path.push(segment))
    }

    fn push(&self, segment: PathSegment) -> Path {
        Path {
            node: Some(Arc::new(PathNode {
                parent: self.clone(),
                segment,
                depth: self.len() + 1,
            })),
        }
    }

    /// Returns the segments ordered from the root to the leaf.
    pub fn to_list(&self) -> Vec<PathSegment> {
        let mut segments = Vec::with_capacity(self.len());
        let mut current = self;
        while let Some(node) = &current.node {
            segments.push(node.segment.clone());
            current = &node.parent;
        }
        segments.reverse();
        segments
    }

    /// Renders the path as `/field[0]/child`.
    pub fn print(&self) -> String {
        self.to_string()
    }

    /// Parses a printed path. Inverse of [`Path::print`].
    pub fn parse(input: &str) -> Result<Path, PathError> {
        let Some(rest) = input.strip_prefix('/') else {
            return Err(PathError::MissingLeadingSlash(input.to_string()));
        };
        if rest.is_empty() {
            return Ok(Path::root());
        }

        let mut path = Path::root();
        for raw in rest.split('/') {
            let (name, mut indices) = match raw.find('[') {
                Some(pos) => (&raw[..pos], &raw[pos..]),
                None => (raw, ""),
            };
            if name.is_empty() {
                if indices.is_empty() {
                    return Err(PathError::MalformedSegment(raw.to_string()));
                }
                if !path.is_root() {
                    return Err(PathError::MalformedSegment(raw.to_string()));
                }
                let index = parse_index(indices.trim_start_matches('[').split(']').next())?;
                return Err(PathError::IndexOnRoot(index));
            }
            if !is_valid_name(name) {
                return Err(PathError::InvalidName(name.to_string()));
            }
            path = path.append_field(name);

            while !indices.is_empty() {
                let Some(body) = indices.strip_prefix('[') else {
                    return Err(PathError::MalformedSegment(raw.to_string()));
                };
                let Some(end) = body.find(']') else {
                    return Err(PathError::MalformedSegment(raw.to_string()));
                };
                let index = parse_index(Some(&body[..end]))?;
                path = path.append_index(index)?;
                indices = &body[end + 1..];
            }
        }
        Ok(path)
    }

    fn ancestor_at(&self, depth: usize) -> &Path {
        let mut current = self;
        while current.len() > depth {
            match &current.node {
                Some(node) => current = &node.parent,
                None => break,
            }
        }
        current
    }

    // Both paths have the same depth.
    fn cmp_aligned(a: &Path, b: &Path) -> Ordering {
        match (&a.node, &b.node) {
            (None, None) => Ordering::Equal,
            (Some(x), Some(y)) if Arc::ptr_eq(x, y) => Ordering::Equal,
            (Some(x), Some(y)) => Self::cmp_aligned(&x.parent, &y.parent)
                .then_with(|| x.segment.cmp(&y.segment)),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }
}

fn parse_index(raw: Option<&str>) -> Result<usize, PathError> {
    let raw = raw.unwrap_or_default();
    if let Some(digits) = raw.strip_prefix('-') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PathError::NegativeIndex(raw.to_string()));
        }
    }
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathError::NonNumericIndex(raw.to_string()));
    }
    raw.parse()
        .map_err(|_| PathError::NonNumericIndex(raw.to_string()))
}

fn is_valid_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b == b'_' || b.is_ascii_alphabetic() => {}
        _ => return false,
    }
    bytes.all(|b| b == b'_' || b.is_ascii_alphanumeric())
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        match (&self.node, &other.node) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.depth == b.depth && a.segment == b.segment && a.parent == b.parent)
            }
            _ => false,
        }
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        let mut current = self;
        while let Some(node) = &current.node {
            node.segment.hash(state);
            current = &node.parent;
        }
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        let depth = self.len().min(other.len());
        Self::cmp_aligned(self.ancestor_at(depth), other.ancestor_at(depth))
            .then_with(|| self.len().cmp(&other.len()))
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in self.to_list() {
            match segment {
                PathSegment::Field(name) => write!(f, "/{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let segments = self.to_list();
        let mut seq = serializer.serialize_seq(Some(segments.len()))?;
        for segment in &segments {
            seq.serialize_element(segment)?;
        }
        seq.end()
    }
}
