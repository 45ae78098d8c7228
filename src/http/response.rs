use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;

use super::body::{BodySink, ChunkedDecoder, Progress};
use super::{HttpError, Method, Response};
use crate::conn::Connection;
use crate::decomp::{CodecFactory, Decompressor};
use crate::headers::{self, ContentEncoding, SetCookie, TransferEncoding};
use crate::log::{debug, warning};

const MAX_HEADER: usize = 64 * 1024;

/// Framing options for one response exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseOpts {
    /// Keep the raw header block on the response.
    pub keep_header: bool,
    /// Treat `Content-Encoding: gzip` on `application/x-gzip` bodies as
    /// identity (workaround for servers that double-tag their archives).
    pub gzip_workaround: bool,
}

/// Read one response off `conn`, routing the decoded body into `sink`.
///
/// The scratch buffer travels with the connection so bytes read past the
/// end of this response are kept for the next one.
pub fn get_response(
    conn: &mut Connection,
    method: Method,
    opts: ResponseOpts,
    sink: &mut dyn BodySink,
    codecs: Option<&dyn CodecFactory>,
    now: i64,
) -> Result<Response, HttpError> {
    let mut buf = std::mem::take(&mut conn.buf);

    // ===== header scan =====

    let header_end = {
        let mut searched = 0usize;
        loop {
            if buf.len() >= 4 {
                // re-scan the 3 bytes preceding fresh data so a terminator
                // straddling two reads is still found
                let from = searched.saturating_sub(3);
                if let Some(at) = memmem::find(&buf[from..], b"\r\n\r\n") {
                    break from + at;
                }
                searched = buf.len();
            }
            if buf.len() > MAX_HEADER {
                return Err(HttpError::HeaderTooLarge);
            }
            if conn.read_some(&mut buf)? == 0 {
                return Err(HttpError::UnexpectedEof);
            }
        }
    };

    let mut header_block = buf.split_to(header_end + 4);
    let raw = opts
        .keep_header
        .then(|| Bytes::copy_from_slice(&header_block));
    let mut resp = parse_response_header(&mut header_block, now)?;
    resp.header = raw;

    sink.on_header(&resp).map_err(HttpError::Body)?;

    // ===== body =====

    // RFC 2616 4.3/4.4: no body on HEAD, 1xx, 204, 304, or an identity
    // body declared empty
    let no_body = method == Method::Head
        || resp.code / 100 == 1
        || resp.code == 204
        || resp.code == 304
        || (resp.transfer_encoding == TransferEncoding::Identity
            && resp.content_length_valid
            && resp.content_length == 0);
    if no_body {
        sink.on_eof();
        conn.buf = buf;
        return Ok(resp);
    }

    if opts.gzip_workaround
        && resp.content_encoding == ContentEncoding::Gzip
        && resp.is_content_type("application/x-gzip")
    {
        debug!("broken server configuration gzip workaround triggered");
        resp.content_encoding = ContentEncoding::Identity;
    }

    let mut dc = Decompressor::open(resp.content_encoding, &mut *sink, codecs)?;

    let delivered = match resp.transfer_encoding {
        TransferEncoding::Chunked => relay_chunked(conn, &mut buf, &mut dc)?,
        TransferEncoding::Identity if resp.content_length_valid => {
            let (delivered, complete) = relay_sized(conn, &mut buf, &mut dc, resp.content_length)?;
            if !complete {
                resp.keep_alive = false;
            }
            delivered
        }
        TransferEncoding::Identity => {
            let delivered = relay_eof(conn, &mut buf, &mut dc)?;
            resp.keep_alive = false;
            delivered
        }
    };

    dc.close().map_err(HttpError::Body)?;
    sink.on_eof();

    resp.content_length = delivered;
    resp.content_length_valid = true;

    conn.buf = buf;
    Ok(resp)
}

fn relay_chunked(
    conn: &mut Connection,
    buf: &mut BytesMut,
    dc: &mut Decompressor<'_>,
) -> Result<u64, HttpError> {
    let mut decoder = ChunkedDecoder::new();
    let mut delivered = 0u64;
    loop {
        let progress = {
            let mut out = |data: &[u8]| {
                delivered += data.len() as u64;
                dc.write(data)
            };
            decoder.push(buf, &mut out)?
        };
        match progress {
            Progress::Done => return Ok(delivered),
            Progress::NeedMore => {
                if conn.read_some(buf)? == 0 {
                    return Err(HttpError::UnexpectedEof);
                }
            }
        }
    }
}

fn relay_sized(
    conn: &mut Connection,
    buf: &mut BytesMut,
    dc: &mut Decompressor<'_>,
    expected: u64,
) -> Result<(u64, bool), HttpError> {
    let mut delivered = 0u64;

    // bytes received past the header terminator are the body prefix
    if !buf.is_empty() {
        let take = (buf.len() as u64).min(expected) as usize;
        dc.write(&buf[..take]).map_err(HttpError::Body)?;
        delivered += take as u64;
        buf.advance(take);
        if !buf.is_empty() {
            warning!("body larger than Content-Length, keeping {} bytes", buf.len());
        }
    }

    while delivered < expected {
        // never read past the declared length; trailing bytes belong to
        // the next response on this connection
        let remaining = (expected - delivered).min(usize::MAX as u64) as usize;
        let n = conn.read_capped(buf, remaining)?;
        if n == 0 {
            warning!("just got {delivered} of {expected} bytes");
            return Ok((delivered, false));
        }
        dc.write(&buf[..]).map_err(HttpError::Body)?;
        delivered += buf.len() as u64;
        buf.clear();
    }

    Ok((delivered, true))
}

fn relay_eof(
    conn: &mut Connection,
    buf: &mut BytesMut,
    dc: &mut Decompressor<'_>,
) -> Result<u64, HttpError> {
    let mut delivered = 0u64;
    if !buf.is_empty() {
        dc.write(&buf[..]).map_err(HttpError::Body)?;
        delivered += buf.len() as u64;
        buf.clear();
    }
    loop {
        let n = conn.read_some(buf)?;
        if n == 0 {
            return Ok(delivered);
        }
        dc.write(&buf[..]).map_err(HttpError::Body)?;
        delivered += buf.len() as u64;
        buf.clear();
    }
}

// ===== Header parsing =====

/// Parse the status line and header block. Header folding (continuation
/// lines starting with SP/HT) is flattened by overwriting the folding CRLF
/// with spaces in place.
pub(crate) fn parse_response_header(
    block: &mut BytesMut,
    now: i64,
) -> Result<Response, HttpError> {
    // flatten folded lines
    let len = block.len();
    for i in 0..len.saturating_sub(2) {
        if block[i] == b'\r' && block[i + 1] == b'\n' && (block[i + 2] == b' ' || block[i + 2] == b'\t')
        {
            block[i] = b' ';
            block[i + 1] = b' ';
        }
    }

    let mut resp = Response::default();

    let mut lines = LineIter { rest: &block[..] };
    let status = lines.next().ok_or(HttpError::BadStatusLine)?;
    parse_status_line(status, &mut resp)?;

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        dispatch_header(&mut resp, name, value, now);
    }

    Ok(resp)
}

struct LineIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for LineIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match memchr::memchr(b'\n', self.rest) {
            Some(nl) => {
                let line = &self.rest[..nl];
                self.rest = &self.rest[nl + 1..];
                Some(line.strip_suffix(b"\r").unwrap_or(line))
            }
            None => Some(std::mem::take(&mut self.rest)),
        }
    }
}

fn parse_status_line(line: &[u8], resp: &mut Response) -> Result<(), HttpError> {
    let line = std::str::from_utf8(line).map_err(|_| HttpError::BadStatusLine)?;
    let rest = line.trim_start().strip_prefix("HTTP/").ok_or(HttpError::BadStatusLine)?;

    let (version, rest) = rest.split_once(' ').ok_or(HttpError::BadStatusLine)?;
    let (major, minor) = version.split_once('.').ok_or(HttpError::BadStatusLine)?;
    resp.major = major.parse().map_err(|_| HttpError::BadStatusLine)?;
    resp.minor = minor.parse().map_err(|_| HttpError::BadStatusLine)?;

    let rest = rest.trim_start();
    let (code, reason) = rest.split_at(rest.find(' ').unwrap_or(rest.len()));
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpError::BadStatusLine);
    }
    resp.code = code.parse().map_err(|_| HttpError::BadStatusLine)?;
    resp.reason = reason.trim().to_owned();
    Ok(())
}

fn dispatch_header(resp: &mut Response, name: &str, value: &str, now: i64) {
    if name.eq_ignore_ascii_case("Content-Encoding") {
        resp.content_encoding = headers::parse_content_encoding(value);
    } else if name.eq_ignore_ascii_case("Content-Type") {
        let (mime, charset) = headers::parse_content_type(value);
        if !mime.is_empty() {
            resp.content_type = Some(mime);
        }
        resp.content_type_charset = charset;
    } else if name.eq_ignore_ascii_case("Content-Length") {
        match headers::parse_content_length(value) {
            Some(length) => {
                resp.content_length = length;
                resp.content_length_valid = true;
            }
            None => resp.content_length_valid = false,
        }
    } else if name.eq_ignore_ascii_case("Content-Disposition") {
        resp.content_filename = headers::parse_content_disposition(value);
    } else if name.eq_ignore_ascii_case("Connection") {
        resp.keep_alive = headers::parse_connection(value);
    } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
        resp.transfer_encoding = headers::parse_transfer_encoding(value);
    } else if name.eq_ignore_ascii_case("Last-Modified") {
        resp.last_modified = super::date::parse_http_date(value);
    } else if name.eq_ignore_ascii_case("Location") && resp.code / 100 == 3 {
        resp.location = Some(headers::parse_location(value));
    } else if name.eq_ignore_ascii_case("Link") && resp.code / 100 == 3 {
        if let Some(link) = headers::parse_link(value) {
            resp.links.push(link);
        }
    } else if name.eq_ignore_ascii_case("Set-Cookie") {
        if let Some(cookie) = SetCookie::parse(value, now) {
            resp.cookies.push(cookie);
        }
    } else if name.eq_ignore_ascii_case("Strict-Transport-Security") {
        resp.hsts = Some(headers::parse_hsts(value, now));
    } else if name.eq_ignore_ascii_case("WWW-Authenticate") {
        resp.challenges.extend(headers::parse_challenges(value));
    } else if name.eq_ignore_ascii_case("Digest") {
        if let Some(digest) = headers::parse_digest(value) {
            resp.digests.push(digest);
        }
    } else if name.eq_ignore_ascii_case("ETag") {
        resp.etag = headers::parse_etag(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Response {
        let mut block = BytesMut::from(s.as_bytes());
        parse_response_header(&mut block, 1_000_000).unwrap()
    }

    #[test]
    fn test_status_line() {
        let resp = parse("HTTP/1.1 206 Partial Content\r\n\r\n");
        assert_eq!((resp.major, resp.minor, resp.code), (1, 1, 206));
        assert_eq!(resp.reason, "Partial Content");

        let mut bad = BytesMut::from(&b"ICY 200 OK\r\n\r\n"[..]);
        assert!(parse_response_header(&mut bad, 0).is_err());
    }

    #[test]
    fn test_folded_header() {
        let resp = parse(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html;\r\n  charset=utf-8\r\n\r\n",
        );
        assert_eq!(resp.content_type.as_deref(), Some("text/html"));
        assert_eq!(resp.content_type_charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_fields() {
        let resp = parse(
            "HTTP/1.1 200 OK\r\n\
             Content-Length: 42\r\n\
             Connection: keep-alive\r\n\
             Content-Encoding: x-gzip\r\n\
             ETag: \"abc123\"\r\n\
             Last-Modified: Thu, 01 Jan 1970 00:01:00 GMT\r\n\
             Set-Cookie: a=1; Path=/; Secure\r\n\
             \r\n",
        );
        assert!(resp.content_length_valid);
        assert_eq!(resp.content_length, 42);
        assert!(resp.keep_alive);
        assert_eq!(resp.content_encoding, ContentEncoding::Gzip);
        assert_eq!(resp.etag.as_deref(), Some("\"abc123\""));
        assert_eq!(resp.last_modified, 60);
        assert_eq!(resp.cookies.len(), 1);
        assert!(resp.cookies[0].secure);
    }

    #[test]
    fn test_location_only_on_redirects() {
        let resp = parse("HTTP/1.1 200 OK\r\nLocation: /elsewhere\r\n\r\n");
        assert_eq!(resp.location, None);
        let resp = parse("HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\n\r\n");
        assert_eq!(resp.location.as_deref(), Some("/elsewhere"));
    }

    #[test]
    fn test_challenges() {
        let resp = parse(
            "HTTP/1.1 401 Unauthorized\r\n\
             WWW-Authenticate: Basic realm=\"files\", Digest realm=\"files\", nonce=\"xyz\"\r\n\
             \r\n",
        );
        assert_eq!(resp.challenges.len(), 2);
        assert_eq!(resp.challenges[0].scheme, "Basic");
        assert_eq!(resp.challenges[1].scheme, "Digest");
        assert_eq!(resp.challenges[1].param("nonce"), Some("xyz"));
    }
}
