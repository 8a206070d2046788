//! PDF-likelihood and archive heuristics over parsed pages
//!
//! These deliberately over-approximate. Every candidate is confirmed later by
//! a HEAD probe and a byte-signature check before anything is stored.

use crate::crawler::{resolve_link, FormInput, FormSpec, ParsedPage};
use crate::url::same_domain;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

lazy_static! {
    // Path and query shapes that commonly serve documents
    static ref PDF_URL_PATTERN: Regex = Regex::new(
        r"(?i)/download/|/documents?/|/files?/|/publications?/|/resources?/|/attachments?/|\.pdf\?|\.pdf&|filetype=pdf|format=pdf|type=pdf"
    ).unwrap();

    // Quoted string literal naming a .pdf inside a javascript: href
    static ref JS_PDF_LITERAL: Regex = Regex::new(
        r#"(?i)['"]([^'"]+?\.pdf(?:[?#][^'"]*)?)['"]"#
    ).unwrap();

    static ref YEAR_TOKEN: Regex = Regex::new(r"\b(19|20)\d{2}\b").unwrap();
}

const PDF_TEXT_KEYWORDS: &[&str] = &[
    "pdf",
    "download",
    "document",
    "report",
    "manual",
    "guide",
    "handbook",
    "publication",
    "circular",
    "notice",
    "code",
    "standard",
];

const PDF_TEXT_EXCLUSIONS: &[&str] = &["html", "webpage", "page"];

const ARCHIVE_KEYWORDS: &[&str] = &[
    "archive",
    "archives",
    "historical",
    "history",
    "past",
    "previous",
    "old",
    "legacy",
    "back-issues",
    "publications",
];

const SEARCH_FIELD_HINTS: &[&str] = &["search", "query", "keyword"];

/// Search terms used when none are supplied
pub const DEFAULT_SEARCH_TERMS: &[&str] = &[
    "PDF",
    "document",
    "publication",
    "report",
    "manual",
    "guide",
    "handbook",
    "circular",
    "notice",
    "code",
];

/// Whether a URL path ends in `.pdf`
pub fn has_pdf_extension(url: &Url) -> bool {
    url.path().to_lowercase().ends_with(".pdf")
}

/// Whether anchor text suggests a document download
///
/// Text that also mentions an HTML page is rejected even if it carries a
/// keyword ("Guide (HTML version)").
pub fn text_suggests_pdf(text: &str) -> bool {
    let lower = text.to_lowercase();
    PDF_TEXT_KEYWORDS.iter().any(|k| lower.contains(k))
        && !PDF_TEXT_EXCLUSIONS.iter().any(|e| lower.contains(e))
}

/// Checks if a URL likely points to a PDF
///
/// `.pdf` anywhere in the URL counts, so `download.aspx?doc=report.pdf`
/// is a candidate even without helpful link text.
///
/// # Arguments
///
/// * `url` - Absolute candidate URL
/// * `link_text` - Anchor text, or empty when there is none
pub fn is_pdf_link(url: &Url, link_text: &str) -> bool {
    has_pdf_extension(url)
        || url.as_str().to_lowercase().contains(".pdf")
        || PDF_URL_PATTERN.is_match(url.as_str())
        || (!link_text.is_empty() && text_suggests_pdf(link_text))
}

/// Extracts the PDF path named by a `javascript:` href, if any
fn javascript_target(href: &str, base_url: &Url) -> Option<Url> {
    if !href.trim_start().to_lowercase().starts_with("javascript:") {
        return None;
    }

    let literal = JS_PDF_LITERAL.captures(href)?.get(1)?.as_str();
    resolve_link(literal, base_url)
}

/// Extracts the real document behind a viewer URL's `file=` parameter
fn viewer_target(resolved: &Url, base_url: &Url) -> Option<Url> {
    let (_, file) = resolved.query_pairs().find(|(k, _)| k == "file")?;
    resolve_link(&file, base_url)
}

/// Classifies one link-bearing attribute value
fn classify(raw: &str, text: &str, base_url: &Url) -> Option<Url> {
    if let Some(target) = javascript_target(raw, base_url) {
        return Some(target);
    }

    let resolved = resolve_link(raw, base_url)?;

    if let Some(target) = viewer_target(&resolved, base_url) {
        if is_pdf_link(&target, text) {
            return Some(target);
        }
    }

    if is_pdf_link(&resolved, text) {
        Some(resolved)
    } else {
        None
    }
}

/// Extracts PDF candidates from a parsed page
///
/// Anchors are examined in document order, then iframe sources, then
/// `data-url` attributes. For each element the first rule that applies wins:
/// a `.pdf` literal inside a `javascript:` href, a viewer's decoded `file=`
/// target, then the URL/text heuristics of [`is_pdf_link`]. Duplicates are
/// removed keeping the first occurrence.
pub fn extract_pdf_links(page: &ParsedPage, base_url: &Url) -> Vec<String> {
    let anchors = page
        .anchors
        .iter()
        .filter_map(|a| classify(&a.href, &a.text, base_url));
    let embeds = page
        .iframes
        .iter()
        .chain(page.data_urls.iter())
        .filter_map(|raw| classify(raw, "", base_url));

    dedup_preserving_order(anchors.chain(embeds).map(String::from))
}

/// Extracts same-domain links that look like archive or year-indexed sections
///
/// Links to `.pdf` files are documents, not sections, and are left out.
pub fn extract_archive_links(page: &ParsedPage, base_url: &Url) -> Vec<String> {
    let candidates = page.anchors.iter().filter_map(|anchor| {
        let text = anchor.text.to_lowercase();
        let href = anchor.href.to_lowercase();

        let keyword_hit = ARCHIVE_KEYWORDS
            .iter()
            .any(|k| text.contains(k) || href.contains(k));
        let year_hit = YEAR_TOKEN.is_match(&anchor.text) || YEAR_TOKEN.is_match(&anchor.href);

        if !keyword_hit && !year_hit {
            return None;
        }

        resolve_link(&anchor.href, base_url)
            .filter(|url| same_domain(url, base_url) && !has_pdf_extension(url))
    });

    dedup_preserving_order(candidates.map(String::from))
}

/// Picks the input of `form` that accepts a search query
///
/// An input qualifies when it has a name and either its name is `q` or its
/// name or placeholder mentions search, query, or keyword.
pub fn find_search_input(form: &FormSpec) -> Option<&FormInput> {
    form.text_inputs.iter().find(|input| {
        let Some(name) = input.name.as_deref() else {
            return false;
        };
        let name = name.to_lowercase();
        let placeholder = input
            .placeholder
            .as_deref()
            .unwrap_or("")
            .to_lowercase();

        name == "q"
            || SEARCH_FIELD_HINTS
                .iter()
                .any(|hint| name.contains(hint) || placeholder.contains(hint))
    })
}

/// Removes duplicates, keeping first-seen order
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
