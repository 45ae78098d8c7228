use std::io;

/// A possible error value when exchanging an HTTP/1.1 message.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The status line does not match `HTTP/x.y NNN reason`.
    #[error("malformed status line")]
    BadStatusLine,
    /// No `CRLF CRLF` within the header size cap.
    #[error("response header too large")]
    HeaderTooLarge,
    /// Connection closed mid-message.
    #[error("unexpected end of stream")]
    UnexpectedEof,
    /// Chunk size line unreadable.
    #[error("invalid chunked framing")]
    BadChunk,
    /// The CRLF closing a chunk is missing.
    #[error("expected end-of-chunk not found")]
    BadChunkEnd,
    /// Content-Encoding names a codec no decoder is registered for.
    #[error("content decoding not supported: {0}")]
    UnsupportedEncoding(&'static str),
    /// Delivering body bytes (sink write or decode) failed.
    #[error("body delivery failed: {0}")]
    Body(#[source] io::Error),
    /// The per-connection or process-wide abort flag fired.
    #[error("transfer aborted")]
    Aborted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Transient errors allow a retry; the rest are final for the URL.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::UnexpectedEof
            | HttpError::BadChunk
            | HttpError::BadChunkEnd
            | HttpError::Body(_)
            | HttpError::Io(_) => true,
            HttpError::BadStatusLine
            | HttpError::HeaderTooLarge
            | HttpError::UnsupportedEncoding(_)
            | HttpError::Aborted => false,
        }
    }
}
