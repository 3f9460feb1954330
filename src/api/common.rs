//! Common API utilities and shared types

use serde::Deserialize;

use crate::models::ListParams;

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for public APIs
pub fn default_page_size() -> u32 {
    10
}

/// Basic pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamp() {
        let query: PaginationQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.params(), ListParams::new(1, 10));

        let query: PaginationQuery =
            serde_json::from_str(r#"{"page": 0, "page_size": 1000}"#).unwrap();
        assert_eq!(query.params(), ListParams::new(1, 100));
    }
}
