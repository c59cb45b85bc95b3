//! Filename-based category detection.

use contextflow_core::DocCategory;

/// Keyword table, checked in order. First substring hit wins.
const KEYWORDS: &[(&str, DocCategory)] = &[
    ("architecture", DocCategory::Architecture),
    ("arch", DocCategory::Architecture),
    ("prd", DocCategory::Prd),
    ("brd", DocCategory::Brd),
    ("chat", DocCategory::Chat),
    ("conversation", DocCategory::Chat),
];

/// Guess a category from a file name (case-insensitive), or `fallback`.
pub fn detect_category(file_name: &str, fallback: DocCategory) -> DocCategory {
    let lower = file_name.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(fallback)
}
