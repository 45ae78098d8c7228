use super::{params, parse_token, parse_value};
use crate::uri::percent_decode;

// ===== Content-Type =====

/// Parse `type/subtype` plus an optional `charset` parameter, both
/// lowercased.
pub fn parse_content_type(s: &str) -> (String, Option<String>) {
    let s = s.trim_start();
    let end = s
        .bytes()
        .position(|b| !(super::is_token(b) || b == b'/'))
        .unwrap_or(s.len());
    let mime = s[..end].to_ascii_lowercase();

    let mut charset = None;
    for (name, value) in params(&s[end..]) {
        if name.eq_ignore_ascii_case("charset") {
            charset = value.map(|v| v.to_ascii_lowercase());
        }
    }
    (mime, charset)
}

// ===== Content-Length =====

/// Non-negative integer; `None` marks the header invalid.
pub fn parse_content_length(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ===== Content-Encoding =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Bzip2,
    Lzma,
}

impl ContentEncoding {
    pub const fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Bzip2 => "bzip2",
            ContentEncoding::Lzma => "lzma",
        }
    }
}

/// Unknown codings decode as identity.
pub fn parse_content_encoding(s: &str) -> ContentEncoding {
    let (token, _) = parse_token(s.trim_start());
    let Some(token) = token else {
        return ContentEncoding::Identity;
    };
    if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
        ContentEncoding::Gzip
    } else if token.eq_ignore_ascii_case("deflate") {
        ContentEncoding::Deflate
    } else if token.eq_ignore_ascii_case("bzip2") {
        ContentEncoding::Bzip2
    } else if token.eq_ignore_ascii_case("xz")
        || token.eq_ignore_ascii_case("lzma")
        || token.eq_ignore_ascii_case("x-lzma")
    {
        ContentEncoding::Lzma
    } else {
        ContentEncoding::Identity
    }
}

// ===== Transfer-Encoding =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    Identity,
    Chunked,
}

/// Everything that is not literally `identity` transfers chunked.
pub fn parse_transfer_encoding(s: &str) -> TransferEncoding {
    if s.trim().eq_ignore_ascii_case("identity") {
        TransferEncoding::Identity
    } else {
        TransferEncoding::Chunked
    }
}

// ===== Connection =====

/// `true` iff the value is `keep-alive`.
pub fn parse_connection(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("keep-alive")
}

// ===== Location =====

pub fn parse_location(s: &str) -> String {
    s.trim().to_owned()
}

// ===== ETag =====

pub fn parse_etag(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_owned()) }
}

// ===== Content-Disposition =====

/// Extract the attachment filename, preferring the RFC 5987 `filename*`
/// form over plain `filename`. Only the last path segment survives.
pub fn parse_content_disposition(s: &str) -> Option<String> {
    let mut filename = None;

    for (name, value) in params(s) {
        let Some(value) = value else { continue };

        if name.eq_ignore_ascii_case("filename*") {
            // ext-value = charset "'" [ language ] "'" value-chars
            let mut it = value.splitn(3, '\'');
            let charset = it.next().unwrap_or_default();
            let _language = it.next();
            if let Some(encoded) = it.next() {
                let decoded = percent_decode(encoded);
                let text = if charset.eq_ignore_ascii_case("utf-8") {
                    String::from_utf8(decoded.clone())
                        .unwrap_or_else(|_| latin1_to_utf8(&decoded))
                } else {
                    // anything else is treated as ISO-8859-1
                    latin1_to_utf8(&decoded)
                };
                return Some(last_segment(&text).to_owned());
            }
        } else if name.eq_ignore_ascii_case("filename") && filename.is_none() {
            let decoded = percent_decode(&value);
            let text = match String::from_utf8(decoded) {
                Ok(text) => text,
                Err(err) => latin1_to_utf8(err.as_bytes()),
            };
            filename = Some(last_segment(&text).to_owned());
        }
    }

    filename
}

fn last_segment(s: &str) -> &str {
    s.rsplit(['/', '\\']).next().unwrap_or(s)
}

/// ISO-8859-1 maps one-to-one onto the first 256 code points.
pub(crate) fn latin1_to_utf8(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

// ===== Strict-Transport-Security =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HstsInfo {
    /// Absolute expiry in POSIX seconds; 0 signals removal.
    pub max_age: i64,
    pub include_subdomains: bool,
}

pub fn parse_hsts(s: &str, now: i64) -> HstsInfo {
    let mut info = HstsInfo { max_age: 0, include_subdomains: false };
    for (name, value) in params(s) {
        match value {
            Some(value) if name.eq_ignore_ascii_case("max-age") => {
                let offset: i64 = value.trim().parse().unwrap_or(0);
                info.max_age = if offset > 0 { now + offset } else { 0 };
            }
            None if name.eq_ignore_ascii_case("includeSubDomains") => {
                info.include_subdomains = true;
            }
            _ => {}
        }
    }
    info
}

// ===== WWW-Authenticate =====

/// One authentication challenge: scheme plus an insertion-ordered
/// parameter bag with case-insensitive names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: Vec<(String, String)>,
}

impl Challenge {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse one or more comma-separated challenges.
pub fn parse_challenges(s: &str) -> Vec<Challenge> {
    let mut challenges = Vec::new();
    let mut s = s.trim_start();

    while !s.is_empty() {
        let (scheme, rest) = parse_token(s);
        let Some(scheme) = scheme else { break };
        s = rest;

        let mut challenge = Challenge { scheme: scheme.to_owned(), params: Vec::new() };

        loop {
            let checkpoint = s;
            s = s.trim_start_matches([',', ' ', '\t']);
            let (name, rest) = parse_token(s);
            let Some(name) = name else {
                s = checkpoint;
                break;
            };
            match rest.strip_prefix('=') {
                Some(rest) => {
                    let (value, rest) = parse_value(rest);
                    challenge
                        .params
                        .push((name.to_owned(), value.unwrap_or_default()));
                    s = rest;
                }
                None => {
                    // a bare token starts the next challenge
                    s = checkpoint;
                    break;
                }
            }
        }

        challenges.push(challenge);
        s = s.trim_start_matches([',', ' ', '\t']);
    }

    challenges
}

// ===== Digest (RFC 3230) =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub algorithm: String,
    pub encoded: String,
}

pub fn parse_digest(s: &str) -> Option<Digest> {
    let (algorithm, value) = s.trim().split_once('=')?;
    let algorithm = algorithm.trim();
    if algorithm.is_empty() {
        return None;
    }
    Some(Digest {
        algorithm: algorithm.to_owned(),
        encoded: value.trim().to_owned(),
    })
}

// ===== Link (RFC 5988) =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkRel {
    #[default]
    Other,
    DescribedBy,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub uri: String,
    pub rel: LinkRel,
    pub pri: u32,
    pub media_type: Option<String>,
}

pub fn parse_link(s: &str) -> Option<LinkEntry> {
    let s = s.trim_start();
    let rest = s.strip_prefix('<')?;
    let close = rest.find('>')?;
    let mut link = LinkEntry {
        uri: rest[..close].to_owned(),
        rel: LinkRel::Other,
        pri: 0,
        media_type: None,
    };

    for (name, value) in params(&rest[close + 1..]) {
        let Some(value) = value else { continue };
        if name.eq_ignore_ascii_case("rel") {
            link.rel = if value.eq_ignore_ascii_case("describedby") {
                LinkRel::DescribedBy
            } else if value.eq_ignore_ascii_case("duplicate") {
                LinkRel::Duplicate
            } else {
                LinkRel::Other
            };
        } else if name.eq_ignore_ascii_case("pri") {
            link.pri = value.trim().parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("type") {
            link.media_type = Some(value);
        }
    }

    Some(link)
}
