//! Canonical request construction for AWS Signature Version 4.
//!
//! The canonical request format:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Because this is the signing side, the query string is built here from
//! key/value pairs and the exact same encoding is used for the request
//! URL, so the server reconstructs an identical canonical form.

/// Digits for the uppercase percent-escapes SigV4 requires.
const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Build the full canonical request string from its components.
///
/// `canonical_uri` and `canonical_query` must already be in canonical
/// form (see [`canonical_uri`] and [`canonical_query`]).
///
/// # Examples
///
/// ```
/// use penstock_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/test.txt",
///     "",
///     &[("host", "examplebucket.s3.amazonaws.com")],
///     &["host"],
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// );
/// assert!(canonical.starts_with("GET\n/test.txt\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &[(&str, &str)],
    signed_headers: &[&str],
    payload_hash: &str,
) -> String {
    let canonical_headers = build_canonical_headers(headers, signed_headers);
    let signed_headers_str = build_signed_headers_string(signed_headers);

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers_str}\n{payload_hash}"
    )
}

/// URI-encode an object key into a canonical path.
///
/// Each `/`-separated segment is encoded individually; slashes are
/// preserved. Empty paths normalize to `/`.
///
/// # Examples
///
/// ```
/// use penstock_auth::canonical::canonical_uri;
///
/// assert_eq!(canonical_uri("/test.txt"), "/test.txt");
/// assert_eq!(canonical_uri("/enc test"), "/enc%20test");
/// assert_eq!(canonical_uri(""), "/");
/// ```
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the canonical query string from key/value pairs.
///
/// Keys and values are percent-encoded, then the pairs are sorted by
/// key and, for duplicate keys, by value. The returned string is also
/// what the request URL must carry.
///
/// # Examples
///
/// ```
/// use penstock_auth::canonical::canonical_query;
///
/// let pairs = [("uploadId".to_owned(), "ab/cd".to_owned()),
///              ("partNumber".to_owned(), "3".to_owned())];
/// assert_eq!(canonical_query(&pairs), "partNumber=3&uploadId=ab%2Fcd");
/// ```
#[must_use]
pub fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort_unstable();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical headers string.
///
/// Only headers listed in `signed_headers` are included. Names are
/// lowercased, values trimmed with internal whitespace runs collapsed,
/// and entries sorted by name; repeated names fold into one line with
/// comma-joined values. No trailing newline; the caller adds the
/// separating blank line.
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    let mut entries: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), collapse_whitespace(value)))
        .filter(|(name, _)| signed_headers.iter().any(|signed| signed == name))
        .collect();
    // Stable by name, so repeated headers keep their wire order.
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut lines: Vec<String> = Vec::with_capacity(entries.len());
    let mut last_name: Option<String> = None;
    for (name, value) in entries {
        if last_name.as_deref() == Some(name.as_str()) {
            if let Some(line) = lines.last_mut() {
                line.push(',');
                line.push_str(&value);
            }
        } else {
            lines.push(format!("{name}:{value}"));
            last_name = Some(name);
        }
    }
    lines.join("\n")
}

/// The semicolon-separated, sorted list of lowercase signed header
/// names, deduplicated.
///
/// # Examples
///
/// ```
/// use penstock_auth::canonical::build_signed_headers_string;
///
/// assert_eq!(
///     build_signed_headers_string(&["x-amz-date", "host"]),
///     "host;x-amz-date"
/// );
/// ```
#[must_use]
pub fn build_signed_headers_string(signed_headers: &[&str]) -> String {
    let names: std::collections::BTreeSet<&str> = signed_headers.iter().copied().collect();
    names.into_iter().collect::<Vec<_>>().join(";")
}

/// Percent-encode a single path segment or query component.
///
/// Everything outside the RFC 3986 unreserved set (A-Z, a-z, 0-9, `-`,
/// `_`, `.`, `~`) becomes an uppercase `%XX` escape.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push('%');
            out.push(char::from(HEX_UPPER[usize::from(byte >> 4)]));
            out.push(char::from(HEX_UPPER[usize::from(byte & 0x0f)]));
        }
    }
    out
}

/// Squeeze runs of whitespace down to single spaces and drop the ends.
fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
