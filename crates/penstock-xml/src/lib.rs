//! S3 RestXml codec for the multipart protocol messages penstock speaks.
//!
//! This crate covers exactly the documents the streaming client needs:
//! the `CompleteMultipartUpload` request body on the way out, and
//! `InitiateMultipartUploadResult`, `CompleteMultipartUploadResult`, and
//! `<Error>` documents on the way in. Serialization follows the AWS S3
//! RestXml conventions (namespace `http://s3.amazonaws.com/doc/2006-03-01/`,
//! UTF-8 declaration).

pub mod deserialize;
pub mod error;
pub mod serialize;
pub mod types;

pub use deserialize::{S3Deserialize, from_xml, root_name};
pub use error::XmlError;
pub use serialize::{S3Serialize, to_xml};
pub use types::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, CompletedPart, ErrorDocument,
    InitiateMultipartUploadResult,
};
