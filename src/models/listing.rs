//! Shapes handed to the HTML renderer.

use crate::services::sort::SortSpec;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    /// Absolute link target, without query string. `None` renders plain text.
    pub href: Option<String>,
    pub name: String,
    pub size: Option<u64>,
    pub description: Option<String>,
}

/// Everything the renderer needs to format one page.
#[derive(Debug, Clone)]
pub struct ListingPage {
    /// Path shown in the "Index of" heading.
    pub path: String,

    /// Link to the parent directory, if any.
    pub parent: Option<String>,

    pub rows: Vec<ListingRow>,

    /// Number of matches before truncation.
    pub total_matched: usize,

    /// Human description of the active filter, if one narrows the listing.
    pub filter_description: Option<String>,

    /// Per-source failures tolerated during a fan-out.
    pub errors: Vec<String>,

    /// Active sort, used to build the column header links.
    pub sort: SortSpec,

    /// Query parameters every generated link must carry.
    pub carried_query: Vec<(&'static str, String)>,
}

impl ListingPage {
    pub fn displayed(&self) -> usize {
        self.rows.len()
    }

    pub fn is_partial(&self) -> bool {
        self.rows.len() < self.total_matched
    }
}
