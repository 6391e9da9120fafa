//! The wire messages exchanged during a multipart transfer.

/// One entry of a `CompleteMultipartUpload` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: i32,
    /// ETag the server returned for the part PUT.
    pub etag: String,
}

/// The `CompleteMultipartUpload` request body.
///
/// Parts must be listed in strictly ascending part-number order.
#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUpload {
    /// The uploaded parts, in ascending order.
    pub parts: Vec<CompletedPart>,
}

/// Response body of `InitiateMultipartUpload`.
#[derive(Debug, Clone, Default)]
pub struct InitiateMultipartUploadResult {
    /// Bucket the upload was initiated in.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Server-issued upload identifier.
    pub upload_id: String,
}

/// Response body of a successful `CompleteMultipartUpload`.
#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadResult {
    /// URL of the assembled object.
    pub location: String,
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Final object ETag, of form `"<hex>-<N>"` for multipart objects.
    pub etag: String,
}

/// An S3 `<Error>` document.
#[derive(Debug, Clone, Default)]
pub struct ErrorDocument {
    /// Machine-readable error code, e.g. `NoSuchKey`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// The resource the error refers to.
    pub resource: Option<String>,
    /// Request ID for support correlation.
    pub request_id: Option<String>,
}
