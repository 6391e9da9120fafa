//! Parsing S3 XML response documents into typed values.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::XmlError;
use crate::types::{CompleteMultipartUploadResult, ErrorDocument, InitiateMultipartUploadResult};

/// Trait for deserializing types from S3 XML.
///
/// The root element has already been consumed by the caller; the
/// implementation reads child elements until the matching end tag.
pub trait S3Deserialize: Sized {
    /// Deserialize an instance from the given XML reader.
    ///
    /// The reader is positioned just after the opening tag of this
    /// element.
    ///
    /// # Errors
    ///
    /// Returns [`XmlError`] if the XML is malformed or required fields
    /// are missing.
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError>;
}

/// Deserialize an S3 XML document into a typed value.
///
/// Skips the declaration, finds the root element, and delegates to the
/// type's [`S3Deserialize`] implementation.
///
/// # Errors
///
/// Returns [`XmlError`] if the XML is malformed or deserialization fails.
pub fn from_xml<T: S3Deserialize>(xml: &[u8]) -> Result<T, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(_) => {
                return T::deserialize_xml(&mut reader);
            }
            Event::Eof => {
                return Err(XmlError::MissingElement("root element".to_owned()));
            }
            _ => {}
        }
    }
}

/// Name of the document's root element.
///
/// Used to distinguish a success body from an `<Error>` document the
/// server may return with a 200 status.
///
/// # Errors
///
/// Returns [`XmlError`] if the document has no root element.
pub fn root_name(xml: &[u8]) -> Result<String, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                return std::str::from_utf8(name.as_ref())
                    .map(ToOwned::to_owned)
                    .map_err(|err| XmlError::Parse(err.to_string()));
            }
            Event::Eof => {
                return Err(XmlError::MissingElement("root element".to_owned()));
            }
            _ => {}
        }
    }
}

/// Read the text content of the current element and consume its end tag.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let unescaped = e.unescape().map_err(|err| XmlError::Parse(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => {
                return Ok(text);
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while reading text content".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Skip over an element and all its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), XmlError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(XmlError::UnexpectedElement(
                    "unexpected EOF while skipping element".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Name of a start tag as a string.
fn tag_name(e: &quick_xml::events::BytesStart<'_>) -> Result<String, XmlError> {
    let name = e.name();
    std::str::from_utf8(name.as_ref())
        .map(ToOwned::to_owned)
        .map_err(|err| XmlError::Parse(err.to_string()))
}

impl S3Deserialize for InitiateMultipartUploadResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = Self::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) => match tag_name(&e)?.as_str() {
                    "Bucket" => result.bucket = read_text_content(reader)?,
                    "Key" => result.key = read_text_content(reader)?,
                    "UploadId" => result.upload_id = read_text_content(reader)?,
                    _ => skip_element(reader)?,
                },
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in InitiateMultipartUploadResult".to_owned(),
                    ));
                }
                _ => {}
            }
        }

        if result.upload_id.is_empty() {
            return Err(XmlError::MissingElement("UploadId".to_owned()));
        }
        Ok(result)
    }
}

impl S3Deserialize for CompleteMultipartUploadResult {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = Self::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) => match tag_name(&e)?.as_str() {
                    "Location" => result.location = read_text_content(reader)?,
                    "Bucket" => result.bucket = read_text_content(reader)?,
                    "Key" => result.key = read_text_content(reader)?,
                    "ETag" => result.etag = read_text_content(reader)?,
                    _ => skip_element(reader)?,
                },
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in CompleteMultipartUploadResult".to_owned(),
                    ));
                }
                _ => {}
            }
        }
        Ok(result)
    }
}

impl S3Deserialize for ErrorDocument {
    fn deserialize_xml(reader: &mut Reader<&[u8]>) -> Result<Self, XmlError> {
        let mut result = Self::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) => match tag_name(&e)?.as_str() {
                    "Code" => result.code = read_text_content(reader)?,
                    "Message" => result.message = read_text_content(reader)?,
                    "Resource" => result.resource = Some(read_text_content(reader)?),
                    "RequestId" => result.request_id = Some(read_text_content(reader)?),
                    _ => skip_element(reader)?,
                },
                Event::End(_) => break,
                Event::Eof => {
                    return Err(XmlError::UnexpectedElement(
                        "unexpected EOF in Error document".to_owned(),
                    ));
                }
                _ => {}
            }
        }
        Ok(result)
    }
}
