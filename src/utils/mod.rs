//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod rate;

pub use rate::RateGate;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Strip currency punctuation and whitespace from a price string.
///
/// `"$4,500 "` becomes `"4500"`.
pub fn normalize_price(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_normalize_price() {
        assert_eq!(normalize_price("$4,500"), "4500");
        assert_eq!(normalize_price(" 4 000 "), "4000");
        assert_eq!(normalize_price(""), "");
    }
}
