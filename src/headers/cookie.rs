//! `Set-Cookie` grammar ([RFC6265 Section 4.1]).
//!
//! [RFC6265 Section 4.1]: <https://www.rfc-editor.org/rfc/rfc6265.html#section-4.1>

use crate::http::date::parse_http_date;

/// One cookie as received, before normalization against the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// Absolute expiry in POSIX seconds; 0 keeps it a session cookie.
    pub expires: i64,
    /// Domain attribute, leading dots collapsed.
    pub domain: Option<String>,
    /// A leading dot was present on the domain attribute.
    pub domain_dot: bool,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    /// Set once the cookie passed normalization.
    pub normalized: bool,
}

impl SetCookie {
    /// Parse one `Set-Cookie` value. Unknown attributes are ignored.
    /// `now` anchors relative `Max-Age` values.
    pub fn parse(s: &str, now: i64) -> Option<SetCookie> {
        let (pair, attrs) = match s.split_once(';') {
            Some((pair, attrs)) => (pair, attrs),
            None => (s, ""),
        };
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() || !name.bytes().all(super::is_token) {
            return None;
        }
        let value = value.trim().trim_matches('"');

        let mut cookie = SetCookie {
            name: name.to_owned(),
            value: value.to_owned(),
            expires: 0,
            domain: None,
            domain_dot: false,
            path: None,
            secure: false,
            http_only: false,
            normalized: false,
        };

        let mut max_age = None;
        for attr in attrs.split(';') {
            let (name, value) = match attr.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim())),
                None => (attr.trim(), None),
            };
            if name.eq_ignore_ascii_case("expires") {
                if let Some(value) = value {
                    cookie.expires = parse_http_date(value);
                }
            } else if name.eq_ignore_ascii_case("max-age") {
                if let Some(Ok(secs)) = value.map(|v| v.parse::<i64>()) {
                    max_age = Some(secs);
                }
            } else if name.eq_ignore_ascii_case("domain") {
                if let Some(value) = value {
                    let stripped = value.trim_start_matches('.');
                    cookie.domain_dot = stripped.len() != value.len();
                    if !stripped.is_empty() {
                        cookie.domain = Some(stripped.to_ascii_lowercase());
                    }
                }
            } else if name.eq_ignore_ascii_case("path") {
                if let Some(value) = value {
                    cookie.path = Some(value.to_owned());
                }
            } else if name.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if name.eq_ignore_ascii_case("httponly") {
                cookie.http_only = true;
            }
        }

        // Max-Age wins over Expires
        if let Some(secs) = max_age {
            cookie.expires = if secs > 0 { now + secs } else { now - 1 };
        }

        Some(cookie)
    }

    /// Expired relative to `now`. Session cookies never expire here.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires != 0 && self.expires < now
    }
}
