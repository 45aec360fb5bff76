//! # c123-decode
//!
//! Frame reader and XML decoder for the Canoe123 timing-engine protocol.
//!
//! ## Overview
//!
//! This library turns raw transport bytes into [`DecodedRecord`]s:
//!
//! - [`FramedStreamReader`] (C1) accumulates bytes and yields complete,
//!   delimiter-stripped frames.
//! - [`decode_frame`] (C6) parses a frame's XML and translates each
//!   top-level element into a [`DecodedRecord`].
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use c123_decode::{FramedStreamReader, decode_frame};
//!
//! let mut reader = FramedStreamReader::new();
//! for frame in reader.feed(&bytes) {
//!     let frame = frame?;
//!     for record in decode_frame(&frame)? {
//!         // apply record to EventState
//!     }
//! }
//! ```

pub mod decoder;
pub mod error;
pub mod record;
pub mod stream;
pub mod xml_tree;

pub use decoder::{decode_frame, validate_root};
pub use error::*;
pub use record::*;
pub use stream::FramedStreamReader;
pub use xml_tree::{Element, parse_document};
