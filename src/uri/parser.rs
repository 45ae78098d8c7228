use super::{Scheme, Uri, UriError};

impl Uri {
    /// Parse an absolute `http`/`https` URL.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tarik::uri::Uri;
    /// let uri = Uri::parse("http://Example.COM/users/all?page=1#top").unwrap();
    /// assert_eq!(uri.host(), "example.com");
    /// assert_eq!(uri.port(), 80);
    /// assert_eq!(uri.path(), "/users/all");
    /// assert_eq!(uri.query(), Some("page=1"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the input is not an absolute HTTP URL.
    pub fn parse(s: &str) -> Result<Uri, UriError> {
        let s = s.trim();
        let (scheme, rest) = split_scheme(s)?;
        let rest = rest.strip_prefix("//").ok_or(UriError::MissingHost)?;

        let authority_end = rest
            .find(['/', '?', '#'])
            .unwrap_or(rest.len());
        let (authority, rest) = rest.split_at(authority_end);

        // userinfo is accepted but not part of the canonical form
        let authority = match authority.rfind('@') {
            Some(at) => &authority[at + 1..],
            None => authority,
        };
        if authority.is_empty() {
            return Err(UriError::MissingHost);
        }

        let (host, port) = split_host_port(authority)?;
        let port = match port {
            Some(p) => p,
            None => scheme.default_port(),
        };

        let (path, query, fragment) = split_path(rest);

        Ok(Uri {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path: remove_dot_segments(path),
            query: query.map(str::to_owned),
            fragment: fragment.map(str::to_owned),
        })
    }

    /// Parse `s` against an optional base, absolute URLs pass through.
    pub fn parse_base(base: Option<&Uri>, s: &str) -> Result<Uri, UriError> {
        match base {
            Some(base) => base.resolve(s),
            None => Uri::parse(s),
        }
    }

    /// Resolve a reference against `self` ([RFC3986 Section 5.2]).
    ///
    /// [RFC3986 Section 5.2]: <https://www.rfc-editor.org/rfc/rfc3986.html#section-5.2>
    pub fn resolve(&self, reference: &str) -> Result<Uri, UriError> {
        let reference = reference.trim();

        if has_scheme(reference) {
            return Uri::parse(reference);
        }

        if let Some(rest) = reference.strip_prefix("//") {
            let mut abs = String::with_capacity(reference.len() + 8);
            abs.push_str(self.scheme.as_str());
            abs.push_str("://");
            abs.push_str(rest);
            return Uri::parse(&abs);
        }

        let mut out = self.clone();
        out.fragment = None;

        if reference.is_empty() {
            return Ok(out);
        }

        let (refpath, query, fragment) = split_path(reference);
        out.query = query.map(str::to_owned);
        out.fragment = fragment.map(str::to_owned);

        if refpath.is_empty() {
            // query-only or fragment-only reference keeps the base path;
            // a bare fragment also keeps the base query
            if query.is_none() {
                out.query = self.query.clone();
            }
            return Ok(out);
        }

        if refpath.starts_with('/') {
            out.path = remove_dot_segments(refpath);
        } else {
            // merge with the base directory
            let dir = &self.path[..self.dirlen()];
            let mut merged = String::with_capacity(dir.len() + refpath.len());
            merged.push_str(if dir.is_empty() { "/" } else { dir });
            merged.push_str(refpath);
            out.path = remove_dot_segments(&merged);
        }

        Ok(out)
    }
}

// ===== Logic =====

fn split_scheme(s: &str) -> Result<(Scheme, &str), UriError> {
    let colon = s.find(':').ok_or(UriError::UnsupportedScheme)?;
    let (scheme, rest) = s.split_at(colon);
    let scheme = if scheme.eq_ignore_ascii_case("http") {
        Scheme::Http
    } else if scheme.eq_ignore_ascii_case("https") {
        Scheme::Https
    } else {
        return Err(UriError::UnsupportedScheme);
    };
    Ok((scheme, &rest[1..]))
}

/// `true` when the reference begins with a `scheme:` production.
fn has_scheme(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => {}
        _ => return false,
    }
    for b in bytes {
        match b {
            b':' => return true,
            b if b.is_ascii_alphanumeric() => {}
            b'+' | b'-' | b'.' => {}
            _ => return false,
        }
    }
    false
}

fn split_host_port(authority: &str) -> Result<(&str, Option<u16>), UriError> {
    // bracketed IPv6 literal
    if let Some(rest) = authority.strip_prefix('[') {
        let close = rest.find(']').ok_or(UriError::Char)?;
        let host = &authority[..close + 2];
        let rest = &rest[close + 1..];
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if rest.is_empty() => Ok((host, None)),
            None => Err(UriError::Char),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((authority, None)),
    }
}

fn parse_port(s: &str) -> Result<u16, UriError> {
    if s.is_empty() || s.len() > 5 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UriError::InvalidPort);
    }
    s.parse().map_err(|_| UriError::InvalidPort)
}

fn split_path(s: &str) -> (&str, Option<&str>, Option<&str>) {
    let (s, fragment) = match s.split_once('#') {
        Some((s, f)) => (s, Some(f)),
        None => (s, None),
    };
    let (path, query) = match s.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (s, None),
    };
    (path, query, fragment)
}

/// Remove `.` and `..` segments ([RFC3986 Section 5.2.4]). Output always
/// begins with `/`.
///
/// [RFC3986 Section 5.2.4]: <https://www.rfc-editor.org/rfc/rfc3986.html#section-5.2.4>
fn remove_dot_segments(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let trailing_slash = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            seg => out.push(seg),
        }
    }

    let mut s = String::with_capacity(path.len());
    for seg in &out {
        s.push('/');
        s.push_str(seg);
    }
    if s.is_empty() || trailing_slash {
        s.push('/');
    }
    s
}
