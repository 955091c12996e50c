//! URL canonicalization for scan de-duplication.
//!
//! Two requests are considered the same target iff their canonical forms are
//! byte-equal, so normalization must be deterministic and idempotent:
//! `normalize_url(normalize_url(x)) == normalize_url(x)` for every accepted
//! input.

use url::Url;

/// Return the canonical, normalized representation of a URL string.
///
/// Rules, applied in order:
/// - lower-case the scheme and host (done by the parser)
/// - drop default ports (http:80, https:443), keep non-default ports
/// - ensure the path is present; empty path becomes `/`
/// - collapse duplicate slashes and resolve `.`/`..` segments
/// - remove the trailing slash, except for the root path
/// - sort query parameters by key, and values within a key
/// - remove the fragment
pub fn normalize_url(raw: &str) -> Result<String, url::ParseError> {
    let mut u = Url::parse(raw)?;

    if !u.cannot_be_a_base() {
        let cleaned = clean_path(u.path());
        u.set_path(&cleaned);
    }

    let mut pairs: Vec<(String, String)> = u
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        u.set_query(None);
    } else {
        pairs.sort();
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        u.set_query(Some(&encoded));
    }

    u.set_fragment(None);

    Ok(u.into())
}

/// Resolve `.`/`..` segments, collapse duplicate slashes, and strip the
/// trailing slash. Always returns an absolute path; the empty path maps to
/// `/`.
fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}
