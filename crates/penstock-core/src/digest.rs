//! Content digests for transfer integrity.
//!
//! Uploads carry a per-part MD5 as `Content-MD5` and verify the
//! server's composite multipart ETag, `md5(concat(md5(part_i)))-N`,
//! against the locally accumulated part digests. Downloads keep a
//! running MD5 over the byte stream and verify it against a
//! non-multipart ETag or an `x-amz-meta-md5` header on close.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use md5::{Digest, Md5};

/// Hex-encoded MD5 digest of `data`.
///
/// # Examples
///
/// ```
/// use penstock_core::digest::md5_hex;
///
/// assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
/// ```
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Base64-encoded MD5 digest of `data`, the `Content-MD5` header value.
#[must_use]
pub fn md5_base64(data: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(data))
}

/// Compute the composite ETag of a multipart upload.
///
/// The composite is the MD5 of the concatenated binary part digests,
/// rendered `<hex>-<part_count>` (unquoted; see [`etag_matches`]).
///
/// # Examples
///
/// ```
/// use penstock_core::digest::{md5_hex, multipart_etag};
///
/// let parts = [md5_hex(b"hello")];
/// assert!(multipart_etag(&parts).ends_with("-1"));
/// ```
#[must_use]
pub fn multipart_etag(part_md5_hexes: &[impl AsRef<str>]) -> String {
    let mut combined = Vec::with_capacity(part_md5_hexes.len() * 16);
    for hex_str in part_md5_hexes {
        if let Ok(bytes) = hex::decode(hex_str.as_ref()) {
            combined.extend_from_slice(&bytes);
        }
    }
    let final_md5 = hex::encode(Md5::digest(&combined));
    format!("{final_md5}-{}", part_md5_hexes.len())
}

/// Whether a server ETag denotes a multipart object (`<hex>-<N>`).
#[must_use]
pub fn is_multipart_etag(etag: &str) -> bool {
    etag.trim_matches('"').contains('-')
}

/// Compare a server ETag against a locally computed digest, ignoring
/// the quoting servers apply.
#[must_use]
pub fn etag_matches(server_etag: &str, computed: &str) -> bool {
    server_etag.trim_matches('"') == computed.trim_matches('"')
}

/// Incremental MD5 over a byte stream.
#[derive(Debug, Default)]
pub struct RunningMd5 {
    hasher: Md5,
}

impl RunningMd5 {
    /// Start a fresh digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    /// Finalize, returning the hex digest.
    #[must_use]
    pub fn finish_hex(self) -> String {
        hex::encode(Digest::finalize(self.hasher))
    }
}
