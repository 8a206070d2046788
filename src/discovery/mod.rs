//! URL discovery module
//!
//! Turns a seed URL into the pages worth scanning and the PDF candidates
//! found on them, using breadth-first crawling, sitemaps, archive-section
//! heuristics, and on-site search forms.

mod browser;
mod engine;
mod heuristics;
mod sitemap;

pub use browser::BrowserAutomation;
pub use engine::{ComprehensiveDiscovery, DiscoveryEngine};
pub use heuristics::{
    dedup_preserving_order, extract_archive_links, extract_pdf_links, find_search_input,
    has_pdf_extension, is_pdf_link, text_suggests_pdf, DEFAULT_SEARCH_TERMS,
};
pub use sitemap::{parse_sitemap, sitemap_locations, SitemapEntries, SitemapIndex};
