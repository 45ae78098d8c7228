//! Local filename materialization.
//!
//! Derives the on-disk path for a URL under the active naming policy.
//! The stages run in a fixed order, each conditional on its option:
//! directory prefix, protocol and host directories, `--cut-dirs`,
//! the basename with the query folded in, and finally the
//! `--restrict-file-names` escaping.

use std::path::PathBuf;

use crate::config::{Config, RestrictNames};
use crate::log::debug;
use crate::uri::Uri;

const DEFAULT_PAGE: &str = "index.html";

/// Derive the local path for `uri`, or `None` when no file will be
/// written (spider mode, `--delete-after`, or `-O` capturing everything).
pub fn local_filename(uri: &Uri, config: &Config) -> Option<PathBuf> {
    if (config.spider || config.output_document.is_some()) && !config.continue_download {
        return None;
    }
    if config.delete_after {
        return None;
    }

    let directories = match (config.force_directories, config.directories) {
        (true, _) => true,
        (_, false) => false,
        _ => config.recursive,
    };

    let mut name = String::new();

    if let Some(prefix) = &config.directory_prefix {
        name.push_str(&prefix.to_string_lossy());
        if !name.ends_with('/') {
            name.push('/');
        }
    }

    if directories {
        if config.protocol_directories {
            name.push_str(uri.scheme().as_str());
            name.push('/');
        }
        if config.host_directories {
            name.push_str(uri.host());
        }

        let path = cut_dirs(uri.path(), config.cut_directories);
        name.push_str(path);
        if name.is_empty() || name.ends_with('/') {
            name.push_str(DEFAULT_PAGE);
        }
        if let Some(query) = uri.query() {
            name.push('?');
            name.push_str(query);
        }
    } else {
        let base = uri.filename();
        if base.is_empty() {
            name.push_str(DEFAULT_PAGE);
        } else {
            name.push_str(base);
        }
        if let Some(query) = uri.query() {
            name.push('?');
            name.push_str(query);
        }
    }

    let name = restrict_file_name(name, config.restrict_file_names);

    debug!("local filename = '{name}'");
    Some(PathBuf::from(name))
}

/// Drop `cut` leading path segments; when more would be cut than exist,
/// fall back to the basename.
fn cut_dirs(path: &str, cut: u32) -> &str {
    if cut == 0 {
        return path;
    }
    let mut rest = path;
    for _ in 0..cut {
        let trimmed = rest.strip_prefix('/').unwrap_or(rest);
        match trimmed.find('/') {
            Some(at) => rest = &trimmed[at..],
            None => {
                // cannot strip this many elements, just use the filename
                return match path.rfind('/') {
                    Some(at) => &path[at..],
                    None => path,
                };
            }
        }
    }
    rest
}

fn restrict_file_name(name: String, policy: RestrictNames) -> String {
    fn escape(name: &str, needs_escape: impl Fn(u8) -> bool) -> String {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        if !name.bytes().any(&needs_escape) {
            return name.to_owned();
        }
        let mut out = String::with_capacity(name.len() + 8);
        for byte in name.bytes() {
            if needs_escape(byte) {
                out.push('%');
                out.push(HEX[(byte >> 4) as usize] as char);
                out.push(HEX[(byte & 0xf) as usize] as char);
            } else {
                out.push(byte as char);
            }
        }
        out
    }

    match policy {
        RestrictNames::NoControl => name,
        RestrictNames::Unix => escape(&name, |b| (1..=31).contains(&b)),
        RestrictNames::Ascii => escape(&name, |b| b <= 31 || b >= 128),
        RestrictNames::Windows => {
            escape(&name, |b| b <= 31 || matches!(b, b'\\' | b'|' | b':' | b'?' | b'"' | b'*' | b'<' | b'>'))
        }
        RestrictNames::Uppercase => name.to_ascii_uppercase(),
        RestrictNames::Lowercase => name.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    #[test]
    fn test_flat_names() {
        let mut config = Config::default();
        config.directories = false;
        assert_eq!(
            local_filename(&uri("http://example.com/a/b/pic.jpeg"), &config),
            Some(PathBuf::from("pic.jpeg"))
        );
        assert_eq!(
            local_filename(&uri("http://example.com/"), &config),
            Some(PathBuf::from("index.html"))
        );
        assert_eq!(
            local_filename(&uri("http://example.com/cgi?a=1"), &config),
            Some(PathBuf::from("cgi?a=1"))
        );
    }

    #[test]
    fn test_recursive_tree() {
        let mut config = Config::default();
        config.recursive = true;
        assert_eq!(
            local_filename(&uri("http://example.com/a/b/x.html"), &config),
            Some(PathBuf::from("example.com/a/b/x.html"))
        );
        // -nH drops the host directory
        config.host_directories = false;
        assert_eq!(
            local_filename(&uri("http://example.com/a/b/x.html"), &config),
            Some(PathBuf::from("/a/b/x.html"))
        );
        // directory URLs land on the default page
        config.host_directories = true;
        assert_eq!(
            local_filename(&uri("http://example.com/a/"), &config),
            Some(PathBuf::from("example.com/a/index.html"))
        );
    }

    #[test]
    fn test_prefix_protocol_cut() {
        let mut config = Config::default();
        config.recursive = true;
        config.directory_prefix = Some(PathBuf::from("out"));
        config.protocol_directories = true;
        assert_eq!(
            local_filename(&uri("https://example.com/d1/d2/f"), &config),
            Some(PathBuf::from("out/https/example.com/d1/d2/f"))
        );

        config.protocol_directories = false;
        config.cut_directories = 2;
        assert_eq!(
            local_filename(&uri("https://example.com/d1/d2/f"), &config),
            Some(PathBuf::from("out/example.com/f"))
        );
        // cutting more than exists falls back to the basename
        config.cut_directories = 9;
        assert_eq!(
            local_filename(&uri("https://example.com/d1/d2/f"), &config),
            Some(PathBuf::from("out/example.com/f"))
        );
    }

    #[test]
    fn test_no_file_modes() {
        let mut config = Config::default();
        config.spider = true;
        assert_eq!(local_filename(&uri("http://example.com/x"), &config), None);

        let mut config = Config::default();
        config.delete_after = true;
        assert_eq!(local_filename(&uri("http://example.com/x"), &config), None);

        let mut config = Config::default();
        config.output_document = Some(PathBuf::from("-"));
        assert_eq!(local_filename(&uri("http://example.com/x"), &config), None);
    }

    #[test]
    fn test_restrict_names() {
        let ctl = "a\u{1}b".to_string();
        assert_eq!(restrict_file_name(ctl.clone(), RestrictNames::Unix), "a%01b");
        assert_eq!(restrict_file_name(ctl.clone(), RestrictNames::NoControl), ctl);
        assert_eq!(
            restrict_file_name("k\u{f6}ln".into(), RestrictNames::Ascii),
            "k%C3%B6ln"
        );
        assert_eq!(
            restrict_file_name("a:b?c".into(), RestrictNames::Windows),
            "a%3Ab%3Fc"
        );
        assert_eq!(
            restrict_file_name("MiXeD.TXT".into(), RestrictNames::Lowercase),
            "mixed.txt"
        );
        assert_eq!(
            restrict_file_name("MiXeD.txt".into(), RestrictNames::Uppercase),
            "MIXED.TXT"
        );
    }
}
