// Page/per-page handling shared by the admin listings

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page request as received from the admin surface
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Clamp to page >= 1 and per_page to 1..=MAX_PAGE_SIZE, 0 meaning the default
    pub fn validate(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: Self::page_size(self.per_page),
        }
    }

    fn page_size(per_page: u32) -> u32 {
        if per_page < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            per_page.min(MAX_PAGE_SIZE)
        }
    }

    /// Row offset of the first entry on this page
    pub fn offset(&self) -> u64 {
        let page = self.page.max(1) as u64;
        (page - 1) * self.limit()
    }

    pub fn limit(&self) -> u64 {
        Self::page_size(self.per_page) as u64
    }
}

/// One page of results plus the total number of matching rows
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, total: u64) -> Self {
        Self { content, total }
    }
}
