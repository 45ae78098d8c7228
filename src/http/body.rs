//! Response body delivery.
//!
//! The framer pushes decoded body bytes into a [`BodySink`]; the built-in
//! sinks collect into a buffer or forward to any [`io::Write`] (a file
//! opened for append covers `206 Partial Content` resumes).
//!
//! [`ChunkedDecoder`] implements RFC 2616 Section 3.6.1 framing as an
//! incremental state machine: the input buffer may straddle chunk
//! boundaries at any byte, including inside the end-of-chunk CRLF, and
//! already-delivered bytes are never re-parsed.

use std::io;

use bytes::{Buf, BytesMut};

use super::{HttpError, Response};

// chunk-size lines and trailer lines never legitimately grow this far
const MAX_LINE: usize = 4096;

// ===== BodySink =====

/// Receiver of decoded body bytes.
pub trait BodySink {
    /// Called once after the header block is parsed, before any body byte.
    fn on_header(&mut self, _resp: &Response) -> io::Result<()> {
        Ok(())
    }

    /// Called for every decoded body fragment, in order.
    fn on_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Called once after the last body byte.
    fn on_eof(&mut self) {}
}

/// Collect the body into a buffer.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub buf: BytesMut,
}

impl BodySink for CollectSink {
    fn on_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }
}

/// Forward the body to a writer.
#[derive(Debug)]
pub struct WriteSink<W: io::Write> {
    writer: W,
}

impl<W: io::Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write> BodySink for WriteSink<W> {
    fn on_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn on_eof(&mut self) {
        let _ = self.writer.flush();
    }
}

// ===== Chunked framing =====

#[derive(Debug)]
pub enum Progress {
    /// More input is required to make progress.
    NeedMore,
    /// The terminating chunk and trailer have been consumed.
    Done,
}

/// Incremental chunked-body decoder.
#[derive(Debug)]
pub struct ChunkedDecoder {
    phase: Phase,
}

#[derive(Debug)]
enum Phase {
    /// Expecting `chunk-size [ chunk-extension ] CRLF`.
    Size,
    /// Inside chunk data, n bytes to go.
    Data(u64),
    /// Expecting the CR of the end-of-chunk CRLF.
    DataEndCr,
    /// Expecting the LF of the end-of-chunk CRLF.
    DataEndLf,
    /// Consuming `*(entity-header CRLF) CRLF`.
    Trailer,
    Done,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { phase: Phase::Size }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Consume as much of `buf` as possible, emitting chunk data through
    /// `out`. Unconsumed framing bytes stay in `buf`.
    pub fn push(
        &mut self,
        buf: &mut BytesMut,
        out: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<Progress, HttpError> {
        loop {
            match self.phase {
                Phase::Size => {
                    let Some(nl) = memchr::memchr(b'\n', buf) else {
                        if buf.len() > MAX_LINE {
                            return Err(HttpError::BadChunk);
                        }
                        return Ok(Progress::NeedMore);
                    };
                    let line = &buf[..nl];
                    let line = line.strip_suffix(b"\r").unwrap_or(line);

                    let digits = line
                        .iter()
                        .position(|b| !b.is_ascii_hexdigit())
                        .unwrap_or(line.len());
                    if digits == 0 {
                        return Err(HttpError::BadChunk);
                    }
                    // extensions after ';' are ignored
                    let mut size = 0u64;
                    for &b in &line[..digits] {
                        size = size
                            .checked_mul(16)
                            .and_then(|s| s.checked_add(unhex(b)))
                            .ok_or(HttpError::BadChunk)?;
                    }
                    buf.advance(nl + 1);
                    self.phase = if size == 0 { Phase::Trailer } else { Phase::Data(size) };
                }
                Phase::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(Progress::NeedMore);
                    }
                    let take = remaining.min(buf.len() as u64) as usize;
                    out(&buf[..take]).map_err(HttpError::Body)?;
                    buf.advance(take);
                    if take as u64 == remaining {
                        self.phase = Phase::DataEndCr;
                    } else {
                        self.phase = Phase::Data(remaining - take as u64);
                        return Ok(Progress::NeedMore);
                    }
                }
                Phase::DataEndCr => match buf.first() {
                    None => return Ok(Progress::NeedMore),
                    Some(b'\r') => {
                        buf.advance(1);
                        self.phase = Phase::DataEndLf;
                    }
                    Some(_) => return Err(HttpError::BadChunkEnd),
                },
                Phase::DataEndLf => match buf.first() {
                    None => return Ok(Progress::NeedMore),
                    Some(b'\n') => {
                        buf.advance(1);
                        self.phase = Phase::Size;
                    }
                    Some(_) => return Err(HttpError::BadChunkEnd),
                },
                Phase::Trailer => {
                    let Some(nl) = memchr::memchr(b'\n', buf) else {
                        if buf.len() > MAX_LINE {
                            return Err(HttpError::BadChunk);
                        }
                        return Ok(Progress::NeedMore);
                    };
                    let line = &buf[..nl];
                    let empty = line.is_empty() || line == b"\r";
                    buf.advance(nl + 1);
                    if empty {
                        self.phase = Phase::Done;
                    }
                    // trailer headers are consumed and dropped
                }
                Phase::Done => return Ok(Progress::Done),
            }
        }
    }
}

#[inline]
fn unhex(byte: u8) -> u64 {
    match byte {
        b'0'..=b'9' => (byte - b'0') as u64,
        b'a'..=b'f' => (byte - b'a' + 10) as u64,
        _ => (byte - b'A' + 10) as u64,
    }
}
