use crate::backend::RowRange;

/// Page size of the public room list
pub const LISTING_PAGE_SIZE: u32 = 5;

/// Page size of the admin room table
pub const ADMIN_PAGE_SIZE: u32 = 10;

/// Page index over a server-reported row count.
///
/// `page` is 1-based. Controls keep it inside `[1, total_pages]`; a count
/// update alone never moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    page_size: u32,
    total: u64,
}

impl Pagination {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            total: 0,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// `max(1, ceil(total / page_size))`
    pub fn total_pages(&self) -> u32 {
        let pages = self.total.div_ceil(self.page_size as u64).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    /// Returns whether the page moved.
    pub fn next_page(&mut self) -> bool {
        if self.page < self.total_pages() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.page > 1 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    /// Move to `page`, clamped into range. Returns whether the page moved.
    pub fn jump_to(&mut self, page: u32) -> bool {
        let target = page.clamp(1, self.total_pages());
        let moved = target != self.page;
        self.page = target;
        moved
    }

    /// Back to page 1 after a filter or sort change
    pub fn reset(&mut self) {
        self.page = 1;
    }

    /// Record the authoritative row count from the latest fetch.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// Zero-based inclusive rows of `page`
    pub fn range_for(&self, page: u32) -> RowRange {
        let size = self.page_size as u64;
        let from = (page.max(1) as u64 - 1) * size;
        RowRange {
            from,
            to: from + size - 1,
        }
    }

    pub fn range(&self) -> RowRange {
        self.range_for(self.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_never_below_one() {
        let mut pagination = Pagination::new(5);
        assert_eq!(pagination.total_pages(), 1);
        for (total, pages) in [(1, 1), (5, 1), (6, 2), (10, 2), (11, 3), (12, 3)] {
            pagination.set_total(total);
            assert_eq!(pagination.total_pages(), pages, "total {}", total);
        }
    }

    #[test]
    fn jump_clamps_to_last_page() {
        let mut pagination = Pagination::new(5);
        pagination.set_total(12);
        assert_eq!(pagination.total_pages(), 3);
        assert!(pagination.jump_to(4));
        assert_eq!(pagination.page(), 3);
        assert!(!pagination.jump_to(3));
        assert!(pagination.jump_to(0));
        assert_eq!(pagination.page(), 1);
    }

    #[test]
    fn next_and_prev_stay_in_range() {
        let mut pagination = Pagination::new(5);
        pagination.set_total(7);
        assert!(!pagination.prev_page());
        assert!(pagination.next_page());
        assert!(!pagination.next_page());
        assert_eq!(pagination.page(), 2);
        assert!(pagination.prev_page());
        assert_eq!(pagination.page(), 1);
    }

    #[test]
    fn count_update_does_not_reclamp() {
        let mut pagination = Pagination::new(5);
        pagination.set_total(20);
        pagination.jump_to(4);
        pagination.set_total(6);
        assert_eq!(pagination.page(), 4);
        assert_eq!(pagination.total_pages(), 2);
    }

    #[test]
    fn ranges_are_zero_based_inclusive() {
        let pagination = Pagination::new(5);
        assert_eq!(pagination.range_for(1), RowRange { from: 0, to: 4 });
        assert_eq!(pagination.range_for(3), RowRange { from: 10, to: 14 });
        assert_eq!(Pagination::new(10).range_for(2), RowRange { from: 10, to: 19 });
    }
}
