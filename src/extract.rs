//! Link extraction.
//!
//! An extractor is a pure function from response bytes to link spans: the
//! attribute name, the containing tag and a byte range into the input.
//! The engine owns everything after that — raw-text dedup, `<base>`
//! handling, charset conversion and resolution against the base URL —
//! so extractors stay swappable behind [`LinkExtractor`].

use std::borrow::Cow;
use std::ops::Range;

use crate::headers::latin1_to_utf8;

/// One candidate reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan {
    /// Containing tag, lowercased (`a`, `img`, `base`, ...); empty for
    /// formats without tags (CSS, text sitemaps).
    pub tag: String,
    /// Attribute the value came from (`href`, `src`, ...); empty for text
    /// content.
    pub attr: String,
    /// Byte range of the link text within the input.
    pub range: Range<usize>,
}

pub trait LinkExtractor: Send + Sync {
    fn extract(&self, data: &[u8]) -> Vec<LinkSpan>;
}

/// Pick the extractor for a media type. Sitemap jobs parse XML and plain
/// text regardless of what the server claims.
pub fn for_content_type(mime: &str, sitemap_job: bool) -> Option<&'static dyn LinkExtractor> {
    if mime.eq_ignore_ascii_case("text/html") || mime.eq_ignore_ascii_case("application/xhtml+xml")
    {
        Some(&HtmlExtractor)
    } else if mime.eq_ignore_ascii_case("text/css") {
        Some(&CssExtractor)
    } else if mime.eq_ignore_ascii_case("application/atom+xml")
        || mime.eq_ignore_ascii_case("application/rss+xml")
    {
        Some(&FeedExtractor)
    } else if sitemap_job && mime.eq_ignore_ascii_case("application/xml") {
        Some(&SitemapXmlExtractor)
    } else if sitemap_job && mime.eq_ignore_ascii_case("text/plain") {
        Some(&SitemapTextExtractor)
    } else {
        None
    }
}

/// Media types worth a GET after a HEAD probe said so.
pub fn is_parseable(mime: &str, sitemap_job: bool) -> bool {
    for_content_type(mime, sitemap_job).is_some() || sitemap_job && mime.eq_ignore_ascii_case("application/x-gzip")
}

/// Convert extracted bytes using the document charset hint. UTF-8 and
/// ASCII pass through; single-byte charsets fall back to ISO-8859-1.
pub fn decode_text<'a>(bytes: &'a [u8], charset: Option<&str>) -> Cow<'a, str> {
    let utf8ish = charset.is_none_or(|cs| {
        cs.eq_ignore_ascii_case("utf-8")
            || cs.eq_ignore_ascii_case("utf8")
            || cs.eq_ignore_ascii_case("us-ascii")
            || cs.eq_ignore_ascii_case("ascii")
    });
    if utf8ish {
        String::from_utf8_lossy(bytes)
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) => Cow::Borrowed(s),
            Err(_) => Cow::Owned(latin1_to_utf8(bytes)),
        }
    }
}

/// Page-requisites leaf rule: at the recursion limit only embedded assets
/// are followed, so `href` on `a`, `area` and `embed` is dropped.
pub fn is_src_style(tag: &str, attr: &str) -> bool {
    !(attr.eq_ignore_ascii_case("href") && matches!(tag, "a" | "area" | "embed"))
}

// ===== HTML =====

const HTML_LINK_ATTRS: [&str; 6] = ["href", "src", "data", "poster", "background", "cite"];

/// Attribute scanner for HTML and XHTML. Comments and `<script>`/`<style>`
/// content are skipped; both quoted and bare attribute values are
/// understood.
#[derive(Debug)]
pub struct HtmlExtractor;

impl LinkExtractor for HtmlExtractor {
    fn extract(&self, data: &[u8]) -> Vec<LinkSpan> {
        let mut spans = Vec::new();
        let mut i = 0;

        while let Some(lt) = memchr::memchr(b'<', &data[i..]) {
            let mut p = i + lt + 1;

            if data[p..].starts_with(b"!--") {
                p = match memchr::memmem::find(&data[p + 3..], b"-->") {
                    Some(at) => p + 3 + at + 3,
                    None => data.len(),
                };
                i = p;
                continue;
            }
            if matches!(data.get(p), Some(b'!' | b'?' | b'/')) {
                i = skip_to(data, p, b'>');
                continue;
            }

            let tag_start = p;
            while data.get(p).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':') {
                p += 1;
            }
            if p == tag_start {
                i = p;
                continue;
            }
            let tag = String::from_utf8_lossy(&data[tag_start..p]).to_ascii_lowercase();

            p = scan_attrs(data, p, &tag, &mut spans);

            // raw text elements hide their content from the scanner
            if tag == "script" || tag == "style" {
                let close: &[u8] = if tag == "script" { b"</script" } else { b"</style" };
                p = match find_ignore_case(&data[p..], close) {
                    Some(at) => p + at + close.len(),
                    None => data.len(),
                };
            }
            i = p;
        }

        spans
    }
}

fn skip_to(data: &[u8], from: usize, byte: u8) -> usize {
    match memchr::memchr(byte, &data[from..]) {
        Some(at) => from + at + 1,
        None => data.len(),
    }
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Scan attributes after a tag name; returns the position past `>`.
fn scan_attrs(data: &[u8], mut p: usize, tag: &str, spans: &mut Vec<LinkSpan>) -> usize {
    loop {
        while data.get(p).is_some_and(u8::is_ascii_whitespace) {
            p += 1;
        }
        match data.get(p) {
            None => return data.len(),
            Some(b'>') => return p + 1,
            Some(b'/') | Some(b'\'') | Some(b'"') | Some(b'=') => {
                p += 1;
                continue;
            }
            Some(_) => {}
        }

        let name_start = p;
        while data
            .get(p)
            .is_some_and(|b| b.is_ascii_alphanumeric() || matches!(*b, b'-' | b'_' | b':'))
        {
            p += 1;
        }
        if p == name_start {
            p += 1;
            continue;
        }
        let attr = String::from_utf8_lossy(&data[name_start..p]).to_ascii_lowercase();

        while data.get(p).is_some_and(u8::is_ascii_whitespace) {
            p += 1;
        }
        if data.get(p) != Some(&b'=') {
            continue; // bare attribute
        }
        p += 1;
        while data.get(p).is_some_and(u8::is_ascii_whitespace) {
            p += 1;
        }

        let range = match data.get(p) {
            Some(&quote) if quote == b'"' || quote == b'\'' => {
                let start = p + 1;
                let end = match memchr::memchr(quote, &data[start..]) {
                    Some(at) => start + at,
                    None => data.len(),
                };
                p = (end + 1).min(data.len());
                start..end
            }
            _ => {
                let start = p;
                while data
                    .get(p)
                    .is_some_and(|b| !b.is_ascii_whitespace() && *b != b'>')
                {
                    p += 1;
                }
                start..p
            }
        };

        if !range.is_empty() && HTML_LINK_ATTRS.iter().any(|a| attr == *a) {
            spans.push(LinkSpan { tag: tag.to_owned(), attr, range });
        }
    }
}

// ===== CSS =====

/// `url(...)` and `@import "..."` scanner.
#[derive(Debug)]
pub struct CssExtractor;

impl LinkExtractor for CssExtractor {
    fn extract(&self, data: &[u8]) -> Vec<LinkSpan> {
        let mut spans = Vec::new();

        let mut i = 0;
        while let Some(at) = find_ignore_case(&data[i..], b"url(") {
            let mut p = i + at + 4;
            while data.get(p).is_some_and(u8::is_ascii_whitespace) {
                p += 1;
            }
            let range = match data.get(p) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let start = p + 1;
                    match memchr::memchr(quote, &data[start..]) {
                        Some(end) => start..start + end,
                        None => break,
                    }
                }
                _ => {
                    let start = p;
                    match memchr::memchr(b')', &data[start..]) {
                        Some(end) => start..start + end,
                        None => break,
                    }
                }
            };
            i = range.end + 1;
            if !range.is_empty() {
                spans.push(LinkSpan { tag: String::new(), attr: "url".to_owned(), range });
            }
        }

        let mut i = 0;
        while let Some(at) = find_ignore_case(&data[i..], b"@import") {
            let mut p = i + at + 7;
            while data.get(p).is_some_and(u8::is_ascii_whitespace) {
                p += 1;
            }
            match data.get(p) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let start = p + 1;
                    match memchr::memchr(quote, &data[start..]) {
                        Some(end) => {
                            spans.push(LinkSpan {
                                tag: String::new(),
                                attr: "import".to_owned(),
                                range: start..start + end,
                            });
                            i = start + end + 1;
                        }
                        None => break,
                    }
                }
                // `@import url(...)` is already covered
                _ => i = p.min(data.len()),
            }
            if i >= data.len() {
                break;
            }
        }

        spans.sort_by_key(|span| span.range.start);
        spans.dedup_by(|a, b| a.range == b.range);
        spans
    }
}

// ===== Sitemaps and feeds =====

/// `<loc>` text spans for XML sitemaps and sitemap indexes.
#[derive(Debug)]
pub struct SitemapXmlExtractor;

impl LinkExtractor for SitemapXmlExtractor {
    fn extract(&self, data: &[u8]) -> Vec<LinkSpan> {
        element_text_spans(data, "loc")
    }
}

/// `href` attributes plus `<link>` text content for Atom and RSS feeds.
#[derive(Debug)]
pub struct FeedExtractor;

impl LinkExtractor for FeedExtractor {
    fn extract(&self, data: &[u8]) -> Vec<LinkSpan> {
        let mut spans: Vec<LinkSpan> = HtmlExtractor
            .extract(data)
            .into_iter()
            .filter(|span| span.attr == "href")
            .collect();
        spans.extend(element_text_spans(data, "link"));
        spans.sort_by_key(|span| span.range.start);
        spans
    }
}

fn element_text_spans(data: &[u8], element: &str) -> Vec<LinkSpan> {
    let open = format!("<{element}>");
    let close = format!("</{element}>");
    let mut spans = Vec::new();
    let mut i = 0;
    while let Some(at) = find_ignore_case(&data[i..], open.as_bytes()) {
        let start = i + at + open.len();
        let Some(end) = find_ignore_case(&data[start..], close.as_bytes()) else {
            break;
        };
        let mut range = start..start + end;
        // trim surrounding whitespace out of the span
        while range.start < range.end && data[range.start].is_ascii_whitespace() {
            range.start += 1;
        }
        while range.start < range.end && data[range.end - 1].is_ascii_whitespace() {
            range.end -= 1;
        }
        if !range.is_empty() {
            spans.push(LinkSpan { tag: element.to_owned(), attr: String::new(), range });
        }
        i = start + end + close.len();
    }
    spans
}

/// One URL per line.
#[derive(Debug)]
pub struct SitemapTextExtractor;

impl LinkExtractor for SitemapTextExtractor {
    fn extract(&self, data: &[u8]) -> Vec<LinkSpan> {
        let mut spans = Vec::new();
        let mut start = 0;
        for line in data.split(|&b| b == b'\n') {
            let mut range = start..start + line.len();
            start = range.end + 1;
            while range.start < range.end && data[range.start].is_ascii_whitespace() {
                range.start += 1;
            }
            while range.start < range.end && data[range.end - 1].is_ascii_whitespace() {
                range.end -= 1;
            }
            if !range.is_empty() {
                spans.push(LinkSpan { tag: String::new(), attr: String::new(), range });
            }
        }
        spans
    }
}
