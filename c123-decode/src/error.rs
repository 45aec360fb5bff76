use thiserror::Error;

pub use c123_protocol::FrameError;

/// Errors from `XmlDecoder` translating a frame into `DecodedRecord`s.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("xml attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("record shape error: missing required attribute '{0}' on <{1}>")]
    MissingAttribute(String, String),

    #[error("document had no root element")]
    UnexpectedRoot(String),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
