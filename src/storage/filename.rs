use lazy_static::lazy_static;
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

/// Longest filename stem kept, in characters
const MAX_STEM_CHARS: usize = 100;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s-]").unwrap();
    static ref SEPARATOR_RUN: Regex = Regex::new(r"[-\s]+").unwrap();
}

/// Strips punctuation and joins words with single hyphens
///
/// ```
/// use govdoc_crawler::storage::slugify;
///
/// assert_eq!(slugify("  Annual Report (2023) -- Final "), "Annual-Report-2023-Final");
/// ```
pub fn slugify(text: &str) -> String {
    let cleaned = NON_WORD.replace_all(text.trim(), "");
    SEPARATOR_RUN
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}

/// Directory / key component for a department
pub fn department_slug(department: &str) -> String {
    let slug = slugify(department);
    if slug.is_empty() {
        "unknown-department".to_string()
    } else {
        slug
    }
}

/// Derives a filesystem-safe `.pdf` filename for a document
///
/// Preference order: the title, the last URL path segment without its
/// extension, `{domain}-{last two path segments}`, `{domain}-document`,
/// and finally `document-{unix seconds}`.
pub fn generate_filename(url: &str, title: Option<&str>) -> String {
    let raw = match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => stem_from_url(url),
    };

    let mut stem = slugify(&raw);
    if stem.is_empty() {
        stem = format!("document-{}", chrono::Utc::now().timestamp());
    }

    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    format!("{}.pdf", stem)
}

fn stem_from_url(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => {
            let last = url.rsplit('/').next().unwrap_or_default();
            return strip_extension(&decode(last)).to_string();
        }
    };

    let path = decode(parsed.path());
    let basename = path.rsplit('/').next().unwrap_or_default();
    if !basename.is_empty() {
        return strip_extension(basename).to_string();
    }

    let host = parsed.host_str().unwrap_or_default();
    let domain = host.strip_prefix("www.").unwrap_or(host);
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        format!("{}-document", domain)
    } else {
        let tail = &parts[parts.len().saturating_sub(2)..];
        format!("{}-{}", domain, tail.join("-"))
    }
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Removes a trailing `.ext`; leading-dot names keep their dot
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
