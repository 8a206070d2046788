//! HTML parser for extracting links, embeds, and forms
//!
//! A document is parsed once into an owned [`ParsedPage`]; discovery
//! heuristics then work on that plain data. `scraper::Html` is not `Send`,
//! so it never outlives this module's functions.

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// An `<a href>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// The attribute exactly as written
    pub href: String,
    /// Whitespace-collapsed text content
    pub text: String,
}

/// A text-like `<input>` inside a form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormInput {
    pub name: Option<String>,
    pub placeholder: Option<String>,
    pub input_type: String,
}

/// A `<form>` with the fields needed to submit it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    pub action: Option<String>,
    /// Lowercased method; `get` when absent
    pub method: String,
    /// Hidden fields carried on every submission
    pub hidden: Vec<(String, String)>,
    /// `type="text"` and `type="search"` inputs, in document order
    pub text_inputs: Vec<FormInput>,
}

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,
    pub anchors: Vec<Anchor>,
    /// Raw `src` values of `<iframe>` elements
    pub iframes: Vec<String>,
    /// Raw `data-url` values from any element
    pub data_urls: Vec<String>,
    pub forms: Vec<FormSpec>,
}

impl ParsedPage {
    /// Absolute HTTP(S) targets of all navigable anchors, in document order
    pub fn links(&self, base_url: &Url) -> Vec<Url> {
        self.anchors
            .iter()
            .filter_map(|a| resolve_link(&a.href, base_url))
            .collect()
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn attr(element: &ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses HTML content into links, embeds, and forms
///
/// # Example
///
/// ```
/// use govdoc_crawler::crawler::parse_html;
///
/// let html = r#"<html><head><title>Notices</title></head>
///     <body><a href="/a.pdf">Annual Report</a></body></html>"#;
/// let parsed = parse_html(html);
/// assert_eq!(parsed.title.as_deref(), Some("Notices"));
/// assert_eq!(parsed.anchors[0].text, "Annual Report");
/// ```
pub fn parse_html(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        anchors: extract_anchors(&document),
        iframes: extract_attr_values(&document, "iframe[src]", "src"),
        data_urls: extract_attr_values(&document, "[data-url]", "data-url"),
        forms: extract_forms(&document),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = selector("title")?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element_text(&element))
        .filter(|s| !s.is_empty())
}

fn extract_anchors(document: &Html) -> Vec<Anchor> {
    let Some(a_selector) = selector("a[href]") else {
        return Vec::new();
    };

    document
        .select(&a_selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?.trim().to_string();
            Some(Anchor {
                href,
                text: element_text(&element),
            })
        })
        .collect()
}

fn extract_attr_values(document: &Html, css: &str, name: &str) -> Vec<String> {
    let Some(sel) = selector(css) else {
        return Vec::new();
    };

    document
        .select(&sel)
        .filter_map(|element| attr(&element, name))
        .collect()
}

fn extract_forms(document: &Html) -> Vec<FormSpec> {
    let (Some(form_selector), Some(input_selector)) = (selector("form"), selector("input")) else {
        return Vec::new();
    };

    document
        .select(&form_selector)
        .map(|form| {
            let mut hidden = Vec::new();
            let mut text_inputs = Vec::new();

            for input in form.select(&input_selector) {
                let input_type = attr(&input, "type")
                    .map(|t| t.to_lowercase())
                    .unwrap_or_else(|| "text".to_string());
                let name = attr(&input, "name");

                match input_type.as_str() {
                    "hidden" => {
                        if let Some(name) = name {
                            let value = input.value().attr("value").unwrap_or("").to_string();
                            hidden.push((name, value));
                        }
                    }
                    "text" | "search" => text_inputs.push(FormInput {
                        name,
                        placeholder: attr(&input, "placeholder"),
                        input_type,
                    }),
                    _ => {}
                }
            }

            FormSpec {
                action: attr(&form, "action"),
                method: attr(&form, "method")
                    .map(|m| m.to_lowercase())
                    .unwrap_or_else(|| "get".to_string()),
                hidden,
                text_inputs,
            }
        })
        .collect()
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute)
}
