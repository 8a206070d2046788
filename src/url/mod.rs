//! URL handling module
//!
//! Domain extraction, allow-list wildcard matching, and the normalization
//! that gives every URL a stable identity in the discovery cache and the
//! file registry.

mod domain;
mod matcher;
mod normalize;

pub use domain::{domain_of, extract_domain, same_domain};
pub use matcher::{matches_any, matches_wildcard};
pub use normalize::{normalize_url, url_hash};
