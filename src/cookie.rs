//! Cookie store.
//!
//! Received cookies are normalized against their request URL (domain
//! matching, path defaulting to the current directory, secure-flag
//! validation) before they are stored; on request emission the matching
//! cookies are serialized into a single `Cookie` header. Persistence uses
//! the Netscape `cookies.txt` layout via [`crate::state::update_file`].

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::headers::SetCookie;
use crate::log::debug;
use crate::uri::Uri;

#[derive(Debug, Default)]
pub struct CookieDb {
    entries: Mutex<Vec<SetCookie>>,
    keep_session: bool,
}

impl CookieDb {
    pub fn new(keep_session: bool) -> CookieDb {
        CookieDb {
            entries: Mutex::new(Vec::new()),
            keep_session,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SetCookie>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Sanitize `cookies` against the request URL. Cookies failing the
    /// domain rules are dropped in place.
    pub fn normalize(&self, uri: &Uri, cookies: &mut Vec<SetCookie>) {
        cookies.retain_mut(|cookie| {
            match &cookie.domain {
                None => {
                    // host-only cookie
                    cookie.domain = Some(uri.host().to_owned());
                    cookie.domain_dot = false;
                }
                Some(domain) => {
                    if !domain_match(domain, uri.host()) {
                        debug!("cookie '{}' dropped, domain mismatch '{domain}'", cookie.name);
                        return false;
                    }
                }
            }
            match &cookie.path {
                Some(path) if path.starts_with('/') => {}
                _ => {
                    // default to the directory of the request path
                    let dir = &uri.path()[..uri.dirlen().max(1)];
                    cookie.path = Some(dir.trim_end_matches('/').to_owned());
                    if cookie.path.as_deref() == Some("") {
                        cookie.path = Some("/".to_owned());
                    }
                }
            }
            if cookie.secure && !uri.is_https() {
                debug!("secure cookie '{}' over http dropped", cookie.name);
                return false;
            }
            cookie.normalized = true;
            true
        });
    }

    /// Store normalized cookies, replacing same `(domain, path, name)`
    /// entries. An expired cookie deletes its predecessor.
    pub fn store(&self, cookies: Vec<SetCookie>, now: i64) {
        let mut entries = self.lock();
        for cookie in cookies {
            if !cookie.normalized {
                continue;
            }
            entries.retain(|old| {
                !(old.name == cookie.name
                    && old.domain == cookie.domain
                    && old.path == cookie.path)
            });
            if !cookie.is_expired(now) {
                entries.push(cookie);
            }
        }
    }

    /// Serialized `Cookie` header value for a request to `uri`, or `None`
    /// when nothing matches.
    pub fn request_header_for(&self, uri: &Uri, now: i64) -> Option<String> {
        let entries = self.lock();
        let mut header = String::new();
        for cookie in entries.iter() {
            if cookie.is_expired(now) {
                continue;
            }
            if cookie.secure && !uri.is_https() {
                continue;
            }
            let Some(domain) = &cookie.domain else { continue };
            let host_ok = if cookie.domain_dot {
                domain_match(domain, uri.host())
            } else {
                domain == uri.host()
            };
            if !host_ok {
                continue;
            }
            let path = cookie.path.as_deref().unwrap_or("/");
            if !path_match(path, uri.path()) {
                continue;
            }
            if !header.is_empty() {
                header.push_str("; ");
            }
            header.push_str(&cookie.name);
            header.push('=');
            header.push_str(&cookie.value);
        }
        (!header.is_empty()).then_some(header)
    }

    /// Load a Netscape-format cookies file, merging into the store.
    pub fn load(&self, path: &Path) -> io::Result<()> {
        crate::state::load_file(path, |reader| self.read_from(reader))
    }

    /// Persist the store, dropping session cookies unless configured to
    /// keep them.
    pub fn save(&self, path: &Path, now: i64) -> io::Result<()> {
        crate::state::save_file(path, |writer| self.write_to(writer, now))
    }

    fn read_from(&self, reader: &mut dyn BufRead) -> io::Result<()> {
        let mut entries = self.lock();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // domain \t include-subdomains \t path \t secure \t expires \t name \t value
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 7 {
                continue;
            }
            entries.push(SetCookie {
                name: fields[5].to_owned(),
                value: fields[6].to_owned(),
                expires: fields[4].parse().unwrap_or(0),
                domain: Some(fields[0].trim_start_matches('.').to_ascii_lowercase()),
                domain_dot: fields[1].eq_ignore_ascii_case("TRUE") || fields[0].starts_with('.'),
                path: Some(fields[2].to_owned()),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                http_only: false,
                normalized: true,
            });
        }
        Ok(())
    }

    fn write_to(&self, writer: &mut dyn Write, now: i64) -> io::Result<()> {
        writeln!(writer, "# HTTP Cookie File")?;
        let entries = self.lock();
        for cookie in entries.iter() {
            if cookie.is_expired(now) {
                continue;
            }
            if cookie.expires == 0 && !self.keep_session {
                continue;
            }
            let domain = cookie.domain.as_deref().unwrap_or_default();
            writeln!(
                writer,
                "{}{}\t{}\t{}\t{}\t{}\t{}\t{}",
                if cookie.domain_dot { "." } else { "" },
                domain,
                if cookie.domain_dot { "TRUE" } else { "FALSE" },
                cookie.path.as_deref().unwrap_or("/"),
                if cookie.secure { "TRUE" } else { "FALSE" },
                cookie.expires,
                cookie.name,
                cookie.value,
            )?;
        }
        Ok(())
    }
}

/// RFC 6265 domain-match: equal, or `host` ends with `.domain`.
fn domain_match(domain: &str, host: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// RFC 6265 path-match.
fn path_match(cookie_path: &str, request_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(db: &CookieDb, uri: &str, header: &str) -> Vec<SetCookie> {
        let uri = Uri::parse(uri).unwrap();
        let mut cookies = vec![SetCookie::parse(header, 0).unwrap()];
        db.normalize(&uri, &mut cookies);
        cookies
    }

    #[test]
    fn test_normalize_defaults() {
        let db = CookieDb::default();
        let got = normalized(&db, "http://example.com/a/b/page.html", "sid=1");
        assert_eq!(got[0].domain.as_deref(), Some("example.com"));
        assert_eq!(got[0].path.as_deref(), Some("/a/b"));
        assert!(got[0].normalized);
    }

    #[test]
    fn test_normalize_rejects() {
        let db = CookieDb::default();
        // foreign domain
        assert!(normalized(&db, "http://example.com/", "sid=1; Domain=other.org").is_empty());
        // secure cookie over http
        assert!(normalized(&db, "http://example.com/", "sid=1; Secure").is_empty());
        // parent domain is fine
        assert!(!normalized(&db, "http://www.example.com/", "sid=1; Domain=example.com").is_empty());
    }

    #[test]
    fn test_request_header() {
        let db = CookieDb::default();
        let uri = Uri::parse("http://www.example.com/app/page").unwrap();

        let mut cookies = vec![
            SetCookie::parse("a=1; Domain=.example.com; Path=/", 0).unwrap(),
            SetCookie::parse("b=2; Path=/app", 0).unwrap(),
            SetCookie::parse("c=3; Path=/other", 0).unwrap(),
        ];
        db.normalize(&uri, &mut cookies);
        db.store(cookies, 100);

        assert_eq!(
            db.request_header_for(&uri, 100).as_deref(),
            Some("a=1; b=2")
        );
        // host-only cookie does not leak to sibling hosts
        let other = Uri::parse("http://other.example.com/app/").unwrap();
        assert_eq!(db.request_header_for(&other, 100).as_deref(), Some("a=1"));
    }

    #[test]
    fn test_store_replaces_and_expires(){
        let db = CookieDb::default();
        let uri = Uri::parse("http://example.com/").unwrap();

        let mut first = vec![SetCookie::parse("a=old", 0).unwrap()];
        db.normalize(&uri, &mut first);
        db.store(first, 100);

        let mut second = vec![SetCookie::parse("a=new", 0).unwrap()];
        db.normalize(&uri, &mut second);
        db.store(second, 100);
        assert_eq!(db.request_header_for(&uri, 100).as_deref(), Some("a=new"));

        // max-age 0 deletes
        let mut gone = vec![SetCookie::parse("a=x; Max-Age=0", 100).unwrap()];
        db.normalize(&uri, &mut gone);
        db.store(gone, 100);
        assert_eq!(db.request_header_for(&uri, 100), None);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");

        let db = CookieDb::default();
        let uri = Uri::parse("https://example.com/x/").unwrap();
        let mut cookies = vec![
            SetCookie::parse("keep=1; Max-Age=1000; Domain=.example.com; Secure", 50).unwrap(),
            SetCookie::parse("session=2", 50).unwrap(),
        ];
        db.normalize(&uri, &mut cookies);
        db.store(cookies, 50);
        db.save(&path, 60).unwrap();

        let restored = CookieDb::default();
        restored.load(&path).unwrap();
        // session cookie was not persisted
        let header = restored.request_header_for(&uri, 60).unwrap();
        assert_eq!(header, "keep=1");
    }
}
