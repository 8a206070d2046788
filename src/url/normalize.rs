use crate::UrlError;
use url::form_urlencoded;
use url::Url;

/// Query parameters that never change which document a URL points at
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "_ga"];

/// Normalizes a URL into its cache identity
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host and drop a default port (done by the parser)
/// 3. Collapse repeated slashes and dot segments; drop a trailing slash
///    except on the root path
/// 4. Remove the fragment
/// 5. Remove tracking query parameters and sort the rest by key
///
/// The scheme and any `www.` prefix are preserved: government sites serve
/// different content from `www.` and bare hosts often enough that merging
/// them would lose documents.
///
/// # Examples
///
/// ```
/// use govdoc_crawler::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EPD.GOV.HK/eng/reports//#top").unwrap();
/// assert_eq!(url.as_str(), "https://www.epd.gov.hk/eng/reports");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    let path = normalize_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            url.set_query(Some(&query));
        }
    }

    Ok(url)
}

/// Stable identity key for a URL: the MD5 hex digest of its normalized form
///
/// URLs that fail to normalize are hashed verbatim so every string still
/// gets a key.
pub fn url_hash(url: &str) -> String {
    let canonical = match normalize_url(url) {
        Ok(normalized) => normalized.to_string(),
        Err(_) => url.to_string(),
    };
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
