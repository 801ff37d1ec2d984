//! Listing search: which rows stay visible for a query.

/// One row of a map listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub label: String,
    pub description: String,
}

impl ListingRow {
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.label.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

/// Visibility of each row, in order.
///
/// A row is visible when the trimmed, lower-cased query is empty or occurs
/// in the row's lower-cased label or description.
pub fn filter_rows(query: &str, rows: &[ListingRow]) -> Vec<bool> {
    let needle = query.trim().to_lowercase();
    rows.iter()
        .map(|row| needle.is_empty() || row.matches(&needle))
        .collect()
}
