use thiserror::Error;

/// Errors produced by `FramedStreamReader` while accumulating bytes into
/// delimited frames (C1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeded {limit} bytes without a delimiter")]
    FrameTooLarge { limit: usize },

    #[error("frame was not valid UTF-8")]
    MalformedFrame,
}

/// Errors produced while validating a frame's source-level shape, before
/// handing it to the decoder (missing magic prefix, wrong root element).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceFrameError {
    #[error("frame did not start with the expected magic prefix")]
    MissingMagicPrefix,

    #[error("xml document root was not '{expected}'")]
    UnexpectedRoot { expected: String },
}
