//! The slicing algorithm.
//!
//! Items are ordered by the sort definition, narrowed to those strictly
//! between the `after` and `before` cursors, and sliced from the front
//! (`first`) or the back (`last`). A cursor's relative offset shifts the
//! window by whole pages in the direction of travel before slicing.

use crate::cursor::Cursor;
use crate::error::PagingError;
use crate::page::Page;
use crate::sort::SortDefinition;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Caller-supplied paging arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingArguments {
    /// Number of items to take from the front of the window.
    pub first: Option<usize>,
    /// Cursor the window starts strictly after.
    pub after: Option<String>,
    /// Number of items to take from the back of the window.
    pub last: Option<usize>,
    /// Cursor the window ends strictly before.
    pub before: Option<String>,
}

impl PagingArguments {
    /// Creates empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages forward by `first` items.
    pub fn forward(first: usize) -> Self {
        Self {
            first: Some(first),
            ..Self::default()
        }
    }

    /// Pages backward by `last` items.
    pub fn backward(last: usize) -> Self {
        Self {
            last: Some(last),
            ..Self::default()
        }
    }

    /// Sets the `after` cursor.
    #[must_use]
    pub fn with_after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Sets the `before` cursor.
    #[must_use]
    pub fn with_before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// Paging options of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingOptions {
    /// Page size used when neither `first` nor `last` is given. `None`
    /// returns every item between the cursors.
    pub default_page_size: Option<usize>,
    /// Largest page size a caller may request.
    pub max_page_size: Option<usize>,
    /// Report the number of items in the sequence.
    pub include_total_count: bool,
    /// Accept cursors carrying a relative offset.
    pub enable_relative_cursors: bool,
    /// Reject requests without `first` or `last`.
    pub require_paging_boundaries: bool,
}

impl Default for PagingOptions {
    fn default() -> Self {
        Self {
            default_page_size: Some(10),
            max_page_size: Some(50),
            include_total_count: false,
            enable_relative_cursors: false,
            require_paging_boundaries: false,
        }
    }
}

impl PagingOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default page size.
    #[must_use]
    pub fn with_default_page_size(mut self, size: Option<usize>) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the maximum page size.
    #[must_use]
    pub fn with_max_page_size(mut self, size: Option<usize>) -> Self {
        self.max_page_size = size;
        self
    }

    /// Enables or disables the total count.
    #[must_use]
    pub fn with_total_count(mut self, enabled: bool) -> Self {
        self.include_total_count = enabled;
        self
    }

    /// Enables or disables relative cursors.
    #[must_use]
    pub fn with_relative_cursors(mut self, enabled: bool) -> Self {
        self.enable_relative_cursors = enabled;
        self
    }

    /// Requires `first` or `last` on every request.
    #[must_use]
    pub fn with_required_boundaries(mut self, required: bool) -> Self {
        self.require_paging_boundaries = required;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Slices `items` into a page.
///
/// Items are sorted by `sort` first; the sort is stable, so items with equal
/// keys keep their input order. Errors are argument errors meant for the
/// caller that supplied `args`.
pub fn paginate<T>(
    items: impl IntoIterator<Item = T>,
    sort: &SortDefinition<T>,
    args: &PagingArguments,
    options: &PagingOptions,
) -> Result<Page<T>, PagingError> {
    if args.first.is_some() && args.last.is_some() {
        return Err(PagingError::AmbiguousDirection);
    }
    let requested = args.first.or(args.last);
    if requested.is_none() && options.require_paging_boundaries {
        return Err(PagingError::BoundariesRequired);
    }
    if let (Some(requested), Some(max)) = (requested, options.max_page_size) {
        if requested > max {
            return Err(PagingError::MaxPageSizeExceeded { requested, max });
        }
    }
    let size = requested.or(options.default_page_size);

    let after = decode(args.after.as_deref(), sort, options)?;
    let before = decode(args.before.as_deref(), sort, options)?;

    let backward_only = args.first.is_none() && before.is_some() && after.is_none();
    let direction = if args.last.is_some() || backward_only {
        Direction::Backward
    } else {
        Direction::Forward
    };
    // Only the cursor the window is measured from may carry an offset.
    let (offset, stray) = match direction {
        Direction::Forward => (offset_of(after.as_ref()), offset_of(before.as_ref())),
        Direction::Backward => (offset_of(before.as_ref()), offset_of(after.as_ref())),
    };
    if stray != 0 {
        return Err(PagingError::OffsetOutOfRange { offset: stray });
    }

    let mut items: Vec<T> = items.into_iter().collect();
    if !sort.is_empty() {
        items.sort_by(|a, b| sort.compare(a, b));
    }
    let len = items.len();

    let lower = after.as_ref().map_or(0, |cursor| {
        items.partition_point(|item| sort.compare_values(item, &cursor.values) != Ordering::Greater)
    });
    let upper = before.as_ref().map_or(len, |cursor| {
        items.partition_point(|item| sort.compare_values(item, &cursor.values) == Ordering::Less)
    });
    let upper = upper.max(lower);

    let (start, end, has_next_page, has_previous_page) = match size {
        None if offset != 0 => return Err(PagingError::OffsetOutOfRange { offset }),
        None => (lower, upper, upper < len, lower > 0),
        Some(size) => {
            let shift = i64::try_from(size)
                .ok()
                .and_then(|size| size.checked_mul(offset))
                .ok_or(PagingError::OffsetOutOfRange { offset })?;
            match direction {
                Direction::Forward => {
                    let start = shifted(lower, shift, offset)?;
                    if offset != 0 && start >= upper {
                        return Err(PagingError::OffsetOutOfRange { offset });
                    }
                    let end = upper.min(start.saturating_add(size));
                    (start, end, end < upper, start > 0)
                }
                Direction::Backward => {
                    let back = shift
                        .checked_neg()
                        .ok_or(PagingError::OffsetOutOfRange { offset })?;
                    let end = shifted(upper, back, offset)?;
                    // A shifted window must fit above the lower bound.
                    let fits = end > lower && end >= lower.saturating_add(size) && end <= len;
                    if offset != 0 && !fits {
                        return Err(PagingError::OffsetOutOfRange { offset });
                    }
                    let start = lower.max(end.saturating_sub(size));
                    (start, end, end < len, start > lower)
                }
            }
        }
    };

    tracing::trace!(
        start,
        end,
        total = len,
        has_next_page,
        has_previous_page,
        "computed page window"
    );

    let total_count = options.include_total_count.then_some(len);
    let window: Vec<T> = items.into_iter().skip(start).take(end - start).collect();
    Ok(Page::new(
        window,
        sort.clone(),
        start,
        has_next_page,
        has_previous_page,
        total_count,
    ))
}

fn decode<T>(
    input: Option<&str>,
    sort: &SortDefinition<T>,
    options: &PagingOptions,
) -> Result<Option<Cursor>, PagingError> {
    let Some(input) = input else {
        return Ok(None);
    };
    let cursor = Cursor::decode_for(input, sort)?;
    if cursor.offset != 0 && !options.enable_relative_cursors {
        return Err(PagingError::RelativeCursorsDisabled);
    }
    Ok(Some(cursor))
}

fn offset_of(cursor: Option<&Cursor>) -> i64 {
    cursor.map_or(0, |cursor| cursor.offset)
}

fn shifted(position: usize, shift: i64, offset: i64) -> Result<usize, PagingError> {
    i64::try_from(position)
        .ok()
        .and_then(|position| position.checked_add(shift))
        .and_then(|position| usize::try_from(position).ok())
        .ok_or(PagingError::OffsetOutOfRange { offset })
}
