//! Page requests pushed down to each billing source

use serde::Serialize;

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// One page of a source query. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Build a request, clamping page to at least 1 and page size to 1..=200
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn first(page_size: u32) -> Self {
        Self::new(1, page_size)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Rows to skip in the source query
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// Alias for page_size
    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn next(&self) -> Self {
        Self::new(self.page.saturating_add(1), self.page_size)
    }

    /// A source that filled the page may have more rows behind it
    pub fn is_full(&self, returned: usize) -> bool {
        returned >= self.page_size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}
