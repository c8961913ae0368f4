//! Sort definitions.
//!
//! A [`SortDefinition`] orders items by a list of named keys. Cursors carry
//! the key values of their boundary item, so the definition is also what
//! decides where a cursor points.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A sort key value stored in cursors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl CursorValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::String(_) => 3,
        }
    }

    /// Total order over values. Nulls sort first; integers and floats
    /// compare exactly by numeric value, with NaN after every number (or
    /// before, when its sign bit is set).
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => compare_floats(*a, *b),
            (Self::Int(a), Self::Float(b)) => compare_int_float(*a, *b),
            (Self::Float(a), Self::Int(b)) => compare_int_float(*b, *a).reverse(),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn nan_rank(value: f64) -> i8 {
    match (value.is_nan(), value.is_sign_negative()) {
        (false, _) => 0,
        (true, true) => -1,
        (true, false) => 1,
    }
}

fn compare_floats(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering,
        None => nan_rank(a).cmp(&nan_rank(b)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn compare_int_float(int: i64, float: f64) -> Ordering {
    // 2^63, the first float above every i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return 0.cmp(&nan_rank(float));
    }
    if float >= LIMIT {
        return Ordering::Less;
    }
    if float < -LIMIT {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    let fraction = float - whole;
    int.cmp(&(whole as i64))
        .then_with(|| 0.0_f64.partial_cmp(&fraction).unwrap_or(Ordering::Equal))
}

impl From<bool> for CursorValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CursorValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for CursorValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for CursorValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for CursorValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for CursorValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for CursorValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl<T: Into<CursorValue>> From<Option<T>> for CursorValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Sort direction of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Short name used in signatures.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

type KeyExtractor<T> = Arc<dyn Fn(&T) -> CursorValue + Send + Sync>;

struct SortKey<T> {
    name: String,
    direction: SortDirection,
    extract: KeyExtractor<T>,
}

impl<T> Clone for SortKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            direction: self.direction,
            extract: Arc::clone(&self.extract),
        }
    }
}

/// An ordered list of sort keys.
///
/// ```
/// use graft_pagination::SortDefinition;
///
/// struct Book { title: String, id: i64 }
///
/// let sort = SortDefinition::new()
///     .ascending("title", |book: &Book| book.title.as_str().into())
///     .ascending("id", |book: &Book| book.id.into());
/// assert_eq!(sort.signature(), "title:asc,id:asc");
/// ```
pub struct SortDefinition<T> {
    keys: Vec<SortKey<T>>,
}

impl<T> SortDefinition<T> {
    /// Creates a definition without keys. Items then keep their input order.
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Adds an ascending key.
    #[must_use]
    pub fn ascending<F>(self, name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&T) -> CursorValue + Send + Sync + 'static,
    {
        self.key(name, SortDirection::Ascending, extract)
    }

    /// Adds a descending key.
    #[must_use]
    pub fn descending<F>(self, name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&T) -> CursorValue + Send + Sync + 'static,
    {
        self.key(name, SortDirection::Descending, extract)
    }

    /// Adds a key.
    #[must_use]
    pub fn key<F>(mut self, name: impl Into<String>, direction: SortDirection, extract: F) -> Self
    where
        F: Fn(&T) -> CursorValue + Send + Sync + 'static,
    {
        self.keys.push(SortKey {
            name: name.into(),
            direction,
            extract: Arc::new(extract),
        });
        self
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key names and directions in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, SortDirection)> {
        self.keys.iter().map(|key| (key.name.as_str(), key.direction))
    }

    /// Identifies the definition inside cursors, e.g. `name:asc,id:desc`.
    pub fn signature(&self) -> String {
        self.columns()
            .map(|(name, direction)| format!("{name}:{}", direction.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Extracts the key values of `item`.
    pub fn values_of(&self, item: &T) -> Vec<CursorValue> {
        self.keys.iter().map(|key| (key.extract)(item)).collect()
    }

    /// Compares two items.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        for key in &self.keys {
            let ordering = key
                .direction
                .apply((key.extract)(a).compare(&(key.extract)(b)));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compares an item with the key values of a cursor.
    pub fn compare_values(&self, item: &T, values: &[CursorValue]) -> Ordering {
        for (key, value) in self.keys.iter().zip(values) {
            let ordering = key.direction.apply((key.extract)(item).compare(value));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl<T> Default for SortDefinition<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SortDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<T> fmt::Debug for SortDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SortDefinition")
            .field(&self.signature())
            .finish()
    }
}
