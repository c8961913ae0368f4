//! Pages.

use crate::connection::{Connection, Edge, PageInfo};
use crate::cursor::Cursor;
use crate::sort::SortDefinition;

/// One slice of a sorted sequence.
#[derive(Debug, Clone)]
pub struct Page<T> {
    items: Vec<T>,
    sort: SortDefinition<T>,
    index: usize,
    has_next_page: bool,
    has_previous_page: bool,
    total_count: Option<usize>,
}

impl<T> Page<T> {
    pub(crate) fn new(
        items: Vec<T>,
        sort: SortDefinition<T>,
        index: usize,
        has_next_page: bool,
        has_previous_page: bool,
        total_count: Option<usize>,
    ) -> Self {
        Self {
            items,
            sort,
            index,
            has_next_page,
            has_previous_page,
            total_count,
        }
    }

    /// The items of the page.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the page, returning its items.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Number of items on the page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The first item of the page.
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// The last item of the page.
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// True if items follow the page.
    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    /// True if items precede the page.
    pub fn has_previous_page(&self) -> bool {
        self.has_previous_page
    }

    /// Position of the first item within the sorted sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of items in the sequence, when requested.
    pub fn total_count(&self) -> Option<usize> {
        self.total_count
    }

    /// The sort definition the page was sliced with.
    pub fn sort(&self) -> &SortDefinition<T> {
        &self.sort
    }

    /// Creates a cursor pointing at `item`, shifted by `offset` pages.
    pub fn create_cursor(&self, item: &T, offset: i64) -> String {
        Cursor::for_item(&self.sort, item, offset).encode()
    }

    /// Shapes the page into a connection.
    pub fn into_connection(self) -> Connection<T> {
        self.into_connection_with(|item| item)
    }

    /// Shapes the page into a connection, mapping every item to a node.
    pub fn into_connection_with<U>(self, mut node: impl FnMut(T) -> U) -> Connection<U> {
        let cursors: Vec<String> = self
            .items
            .iter()
            .map(|item| self.create_cursor(item, 0))
            .collect();
        let page_info = PageInfo {
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            start_cursor: cursors.first().cloned(),
            end_cursor: cursors.last().cloned(),
        };
        let edges = self
            .items
            .into_iter()
            .zip(cursors)
            .map(|(item, cursor)| Edge {
                node: node(item),
                cursor,
            })
            .collect();
        Connection {
            edges,
            page_info,
            total_count: self.total_count,
        }
    }
}
