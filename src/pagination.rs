use thiserror::Error;
use tracing::trace;

pub const PAGE_SIZES: [usize; 4] = [10, 20, 50, 100];
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("page size {0} is not one of the configured sizes")]
    UnsupportedPageSize(usize),
}

/// Page position of a table, independent of filters and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    page: usize,
    page_size: usize,
    total: usize,
    page_sizes: Vec<usize>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(PAGE_SIZES.to_vec(), DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    /// Falls back to the first configured size if `page_size` is not listed.
    pub fn new(page_sizes: Vec<usize>, page_size: usize) -> Self {
        let mut page_sizes: Vec<usize> = page_sizes.into_iter().filter(|&s| s > 0).collect();
        if page_sizes.is_empty() {
            page_sizes = PAGE_SIZES.to_vec();
        }
        let page_size = if page_sizes.contains(&page_size) {
            page_size
        } else {
            page_sizes[0]
        };
        Self {
            page: 1,
            page_size,
            total: 0,
            page_sizes,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn page_sizes(&self) -> &[usize] {
        &self.page_sizes
    }

    /// Number of pages, at least one.
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size).max(1)
    }

    /// Row offset of the first row on the current page.
    pub fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }

    /// Total as reported by the data source.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    /// Moves to `page`, clamped to the first page and, once a total is
    /// known, to the last one.
    pub fn set_page(&mut self, page: usize) {
        let mut page = page.max(1);
        if self.total > 0 {
            page = page.min(self.total_pages());
        }
        trace!("Page {} -> {}", self.page, page);
        self.page = page;
    }

    pub fn set_page_size(&mut self, page_size: usize) -> Result<(), PaginationError> {
        if !self.page_sizes.contains(&page_size) {
            return Err(PaginationError::UnsupportedPageSize(page_size));
        }
        self.page_size = page_size;
        self.page = 1;
        Ok(())
    }

    /// Switches to the next configured page size, wrapping around.
    pub fn cycle_page_size(&mut self) {
        let idx = self
            .page_sizes
            .iter()
            .position(|&s| s == self.page_size)
            .unwrap_or(0);
        self.page_size = self.page_sizes[(idx + 1) % self.page_sizes.len()];
        self.page = 1;
    }

    pub fn reset(&mut self) {
        self.page = 1;
    }

    /// Returns to a page and size that were shown before, e.g. when the load
    /// for a new position failed. Sizes outside the configured set are ignored.
    pub fn restore(&mut self, page: usize, page_size: usize) {
        if self.page_sizes.contains(&page_size) {
            self.page_size = page_size;
        }
        trace!("Restoring page {} -> {}", self.page, page);
        self.page = page.max(1);
    }

    pub fn can_go_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn can_go_prev(&self) -> bool {
        self.page > 1
    }

    pub fn next(&mut self) -> bool {
        if self.can_go_next() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev(&mut self) -> bool {
        if self.can_go_prev() {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    pub fn first(&mut self) -> bool {
        let changed = self.page != 1;
        self.page = 1;
        changed
    }

    pub fn last(&mut self) -> bool {
        let last = self.total_pages();
        let changed = self.page != last;
        self.page = last;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_change_resets_page() {
        let mut pagination = Pagination::default();
        pagination.set_page(3);
        assert_eq!(pagination.page(), 3);

        pagination.set_page_size(50).unwrap();
        assert_eq!(pagination.page(), 1);
        assert_eq!(pagination.page_size(), 50);
    }

    #[test]
    fn unsupported_page_size_is_rejected() {
        let mut pagination = Pagination::default();
        pagination.set_page(2);
        assert_eq!(
            pagination.set_page_size(33),
            Err(PaginationError::UnsupportedPageSize(33))
        );
        assert_eq!(pagination.page(), 2);
        assert_eq!(pagination.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn reset_keeps_page_size() {
        let mut pagination = Pagination::new(vec![10, 25], 25);
        pagination.set_page(4);
        pagination.reset();
        assert_eq!((pagination.page(), pagination.page_size()), (1, 25));
    }

    #[test]
    fn navigation_respects_total() {
        let mut pagination = Pagination::new(vec![10], 10);
        pagination.set_total(25);
        assert_eq!(pagination.total_pages(), 3);

        pagination.set_page(0);
        assert_eq!(pagination.page(), 1);
        assert!(!pagination.prev());
        assert!(pagination.last());
        assert_eq!(pagination.offset(), 20);
        assert!(!pagination.next());
        pagination.set_page(9);
        assert_eq!(pagination.page(), 3);
        assert!(pagination.first());
    }

    #[test]
    fn cycling_wraps_around() {
        let mut pagination = Pagination::new(vec![10, 20], 20);
        pagination.set_page(2);
        pagination.cycle_page_size();
        assert_eq!((pagination.page(), pagination.page_size()), (1, 10));
        pagination.cycle_page_size();
        assert_eq!(pagination.page_size(), 20);
    }

    #[test]
    fn unknown_default_size_falls_back() {
        let pagination = Pagination::new(vec![15, 30], 20);
        assert_eq!(pagination.page_size(), 15);
        assert_eq!(pagination.total(), 0);
        assert_eq!(pagination.total_pages(), 1);
    }
}
