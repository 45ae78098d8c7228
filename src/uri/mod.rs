//! Canonical URLs.
//!
//! A [`Uri`] is the normalized form of an `http`/`https` URL used for
//! blacklist equality and request emission: the scheme and host are
//! lowercased, the port is resolved to a number, dot segments are removed
//! from the path, and the fragment is kept but ignored by comparisons.
//!
//! ```not_rust
//!   http://example.com:8042/over/there?name=ferret#nose
//!   \__/   \______________/\_________/ \_________/ \__/
//!    |            |            |            |        |
//! scheme      authority       path        query   fragment
//! ```
//!
//! Other schemes fail early with [`UriError::UnsupportedScheme`].

mod error;
mod escape;
mod parser;
#[cfg(test)]
mod test;

use std::fmt;
use std::hash::{Hash, Hasher};

pub use error::UriError;
pub use escape::{percent_decode, percent_encode};

// ===== Scheme =====

/// URL scheme. Only the two HTTP schemes are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    #[inline]
    pub const fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===== Uri =====

/// Canonical HTTP URL.
#[derive(Debug, Clone)]
pub struct Uri {
    pub(crate) scheme: Scheme,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) fragment: Option<String>,
}

impl Uri {
    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn is_https(&self) -> bool {
        matches!(self.scheme, Scheme::Https)
    }

    /// Lowercased host name.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Resolved numeric port, default applied.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Absolute path, always starting with `/`, dot segments removed.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Length of the directory portion of the path, through the last `/`.
    ///
    /// Zero when the path holds no directory part.
    pub fn dirlen(&self) -> usize {
        match self.path.rfind('/') {
            Some(at) => at + 1,
            None => 0,
        }
    }

    /// Last path segment, possibly empty for directory URLs.
    pub fn filename(&self) -> &str {
        &self.path[self.dirlen()..]
    }

    /// Switch the scheme, keeping the default port rule intact.
    ///
    /// Used by the HSTS upgrade: a pinned `http` host is re-dialed as
    /// `https`. A port that was the old scheme default follows to the new
    /// scheme default.
    pub fn with_scheme(&self, scheme: Scheme) -> Uri {
        let port = if self.port == self.scheme.default_port() {
            scheme.default_port()
        } else {
            self.port
        };
        Uri {
            scheme,
            host: self.host.clone(),
            port,
            path: self.path.clone(),
            query: self.query.clone(),
            fragment: self.fragment.clone(),
        }
    }

    /// `host` or `host:port` when the port differs from the scheme default.
    pub fn host_port(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            let mut buf = itoa::Buffer::new();
            let mut s = String::with_capacity(self.host.len() + 6);
            s.push_str(&self.host);
            s.push(':');
            s.push_str(buf.format(self.port));
            s
        }
    }

    /// Escaped path plus query, the request target for origin-form.
    pub fn escaped_resource(&self) -> String {
        let mut s = escape::escape_path(&self.path).into_owned();
        if let Some(q) = &self.query {
            s.push('?');
            s.push_str(&escape::escape_query(q));
        }
        s
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host_port(), self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{q}")?;
        }
        Ok(())
    }
}

// fragment does not take part in equality

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.port == other.port
            && self.host == other.host
            && self.path == other.path
            && self.query == other.query
    }
}

impl Eq for Uri {}

impl Hash for Uri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        self.path.hash(state);
        self.query.hash(state);
    }
}
