//! HTTP/1.1 message framing ([RFC9112]).
//!
//! [`Request`] emission, response header scanning and the three body
//! delivery modes (chunked, length-delimited, read-to-EOF). Body bytes are
//! routed through a [`crate::decomp::Decompressor`] into a caller supplied
//! [`BodySink`].
//!
//! [RFC9112]: <https://www.rfc-editor.org/rfc/rfc9112.html>

pub mod date;
mod error;
mod request;
mod response;

pub mod body;

pub use body::{BodySink, ChunkedDecoder, CollectSink, WriteSink};
pub use error::HttpError;
pub use response::{ResponseOpts, get_response};

use bytes::Bytes;

use crate::headers::{
    Challenge, ContentEncoding, Digest, HstsInfo, LinkEntry, SetCookie, TransferEncoding,
};
use crate::uri::Uri;

// ===== Method =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
}

impl Method {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

// ===== Request =====

/// An outgoing request: method, target URL and an ordered header list
/// appended verbatim.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(uri: Uri, method: Method) -> Request {
        Request {
            method,
            uri,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_owned(), value.into()));
    }
}

// ===== Response =====

/// A parsed response header plus the decoded body when collected.
#[derive(Debug, Default)]
pub struct Response {
    pub major: u8,
    pub minor: u8,
    pub code: u16,
    pub reason: String,

    /// Raw header block, kept on request.
    pub header: Option<Bytes>,
    /// Decoded body, filled by the caller's collect sink.
    pub body: Bytes,

    pub content_length: u64,
    pub content_length_valid: bool,
    pub content_type: Option<String>,
    pub content_type_charset: Option<String>,
    pub content_filename: Option<String>,
    pub location: Option<String>,
    pub last_modified: i64,
    pub etag: Option<String>,
    pub content_encoding: ContentEncoding,
    pub transfer_encoding: TransferEncoding,
    pub keep_alive: bool,
    pub cookies: Vec<SetCookie>,
    pub challenges: Vec<Challenge>,
    pub digests: Vec<Digest>,
    pub links: Vec<LinkEntry>,
    pub hsts: Option<HstsInfo>,
}

impl Response {
    /// Media type equals `mime`, ASCII-case-insensitively.
    pub fn is_content_type(&self, mime: &str) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case(mime))
    }
}
