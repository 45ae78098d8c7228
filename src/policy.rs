//! Recursion-scope policy pieces.
//!
//! Accept/reject and domain lists follow the historic matching rule: a
//! pattern carrying one of the glob metacharacters `*?[` matches the whole
//! subject as a glob, anything else is a suffix test (for URL patterns)
//! or an exact host compare (for domain patterns). `--ignore-case` makes
//! all of it ASCII-case-insensitive.

use std::sync::{Arc, Mutex};

use globset::{GlobBuilder, GlobMatcher};

use crate::uri::Uri;

fn has_glob_chars(s: &str) -> bool {
    s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}

fn compile_glob(pattern: &str, ignore_case: bool) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .literal_separator(false)
        .build()?
        .compile_matcher())
}

#[derive(Debug)]
enum Pattern {
    Suffix(String),
    Exact(String),
    Glob(GlobMatcher),
}

// ===== Accept / reject =====

/// URL and filename patterns for `--accept` / `--reject`.
#[derive(Debug, Default)]
pub struct PatternList {
    entries: Vec<Pattern>,
    ignore_case: bool,
}

impl PatternList {
    pub fn compile(patterns: &[String], ignore_case: bool) -> Result<PatternList, globset::Error> {
        let mut entries = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            entries.push(if has_glob_chars(pattern) {
                Pattern::Glob(compile_glob(pattern, ignore_case)?)
            } else {
                Pattern::Suffix(pattern.clone())
            });
        }
        Ok(PatternList { entries, ignore_case })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.entries.iter().any(|pattern| match pattern {
            Pattern::Glob(glob) => glob.is_match(subject),
            Pattern::Suffix(suffix) => {
                if self.ignore_case {
                    subject.len() >= suffix.len()
                        && subject.as_bytes()[subject.len() - suffix.len()..]
                            .eq_ignore_ascii_case(suffix.as_bytes())
                } else {
                    subject.ends_with(suffix.as_str())
                }
            }
            Pattern::Exact(_) => false,
        })
    }
}

// ===== Domains =====

/// Host patterns for `--domains` / `--exclude-domains`.
#[derive(Debug, Default)]
pub struct HostPatterns {
    entries: Vec<Pattern>,
}

impl HostPatterns {
    pub fn compile(patterns: &[String], ignore_case: bool) -> Result<HostPatterns, globset::Error> {
        let mut entries = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            entries.push(if has_glob_chars(pattern) {
                Pattern::Glob(compile_glob(pattern, ignore_case)?)
            } else {
                Pattern::Exact(pattern.to_ascii_lowercase())
            });
        }
        Ok(HostPatterns { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, host: &str) -> bool {
        self.entries.iter().any(|pattern| match pattern {
            Pattern::Glob(glob) => glob.is_match(host),
            Pattern::Exact(exact) => host.eq_ignore_ascii_case(exact),
            Pattern::Suffix(_) => false,
        })
    }
}

// ===== Parents =====

/// Directory anchors for `--no-parent`: a candidate must live at or below
/// some seed's `(host, directory)`.
#[derive(Debug, Default)]
pub struct Parents {
    list: Mutex<Vec<ParentRef>>,
}

#[derive(Debug)]
struct ParentRef {
    host: String,
    dir: String,
}

impl Parents {
    pub fn add(&self, uri: &Arc<Uri>) {
        let dir = uri.path()[..uri.dirlen()].to_owned();
        let mut list = match self.list.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        list.push(ParentRef { host: uri.host().to_owned(), dir });
    }

    /// At least one stored parent prefixes the candidate.
    pub fn allows(&self, uri: &Uri) -> bool {
        let list = match self.list.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        list.iter().any(|parent| {
            parent.host == uri.host()
                && (parent.dir.is_empty() || uri.path().starts_with(parent.dir.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(patterns: &[&str], ignore_case: bool) -> PatternList {
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        PatternList::compile(&patterns, ignore_case).unwrap()
    }

    #[test]
    fn test_suffix_patterns() {
        let accept = list(&[".jpeg"], false);
        assert!(accept.matches("http://example.com/picture_a.jpeg"));
        assert!(accept.matches("picture_A.jpeg"));
        assert!(!accept.matches("picture_B.JpeG"));
        assert!(!accept.matches("picture_c.png"));
    }

    #[test]
    fn test_suffix_ignore_case() {
        let accept = list(&[".jpeg"], true);
        assert!(accept.matches("picture_B.JpeG"));
        assert!(!accept.matches("picture_c.png"));
    }

    #[test]
    fn test_glob_patterns() {
        let reject = list(&["*picture_[ab]*"], false);
        assert!(reject.matches("http://example.com/picture_a.jpeg"));
        assert!(reject.matches("secondpage/picture_b.jpeg"));
        assert!(!reject.matches("picture_A.jpeg"));
        assert!(!reject.matches("index.html"));

        let reject = list(&["*picture_[ab]*"], true);
        assert!(reject.matches("picture_A.jpeg"));
    }

    #[test]
    fn test_host_patterns() {
        let patterns: Vec<String> = vec!["example.com".into(), "*.cdn.net".into()];
        let domains = HostPatterns::compile(&patterns, false).unwrap();
        assert!(domains.matches("example.com"));
        assert!(domains.matches("EXAMPLE.COM"));
        assert!(!domains.matches("sub.example.com"));
        assert!(domains.matches("images.cdn.net"));
        assert!(!domains.matches("cdn.net"));
    }

    #[test]
    fn test_parents() {
        let parents = Parents::default();
        parents.add(&Arc::new(Uri::parse("http://example.com/docs/index.html").unwrap()));

        assert!(parents.allows(&Uri::parse("http://example.com/docs/a/b.html").unwrap()));
        assert!(!parents.allows(&Uri::parse("http://example.com/other/b.html").unwrap()));
        assert!(!parents.allows(&Uri::parse("http://other.org/docs/x").unwrap()));
    }
}
