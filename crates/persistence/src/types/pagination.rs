//! Offset pagination arithmetic for search and history results.

use serde::{Deserialize, Serialize};

/// Number of the last page holding `total_count` results, i.e.
/// `ceil(total_count / page_size)`. Zero when there are no results.
pub fn last_page_number(total_count: i64, page_size: u32) -> u32 {
    if total_count <= 0 || page_size == 0 {
        return 0;
    }
    let size = i64::from(page_size);
    ((total_count + size - 1) / size) as u32
}

/// Row offset of the first result on `page_number` (1-based).
pub fn page_offset(page_number: u32, page_size: u32) -> i64 {
    i64::from(page_number.max(1) - 1) * i64::from(page_size)
}

/// Paging state reported alongside search and history results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    page_number: u32,
    page_size: u32,
    total_count: i64,
    last_page_number: u32,
}

impl PageInfo {
    pub fn new(page_number: u32, page_size: u32, total_count: i64) -> Self {
        Self {
            page_number: page_number.max(1),
            page_size,
            total_count,
            last_page_number: last_page_number(total_count, page_size),
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total_count(&self) -> i64 {
        self.total_count
    }

    pub fn last_page_number(&self) -> u32 {
        self.last_page_number
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.page_number, self.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.last_page_number
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_page_number() {
        assert_eq!(last_page_number(101, 10), 11);
        assert_eq!(last_page_number(100, 10), 10);
        assert_eq!(last_page_number(1, 10), 1);
        assert_eq!(last_page_number(0, 10), 0);
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(3, 10), 20);
        assert_eq!(page_offset(1, 10), 0);
        assert_eq!(page_offset(0, 10), 0);
    }

    #[test]
    fn test_page_info_navigation() {
        let page = PageInfo::new(3, 10, 101);
        assert_eq!(page.last_page_number(), 11);
        assert_eq!(page.offset(), 20);
        assert!(page.has_next());
        assert!(page.has_previous());

        let last = PageInfo::new(11, 10, 101);
        assert!(!last.has_next());
    }
}
