//! # c123-protocol
//!
//! Wire-level constants and error types shared by the ingestion and decode
//! layers of the gateway: the TCP frame delimiter, the engine's magic
//! prefixes, default ports/timeouts/backoff schedule, and the XML tag names
//! `XmlDecoder` and `ChangeDetector` look for.
//!
//! This is a pure logic library with zero I/O dependencies — message
//! framing lives in `c123-decode`, networking in `c123-server`.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
