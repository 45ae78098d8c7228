//! Engine configuration.
//!
//! A plain value mirroring the CLI surface; the option parser that fills
//! it lives outside this crate. Field defaults match the historic
//! downloader behavior: clobbering on, robots honored, 5 workers, 20
//! tries.

use std::path::PathBuf;
use std::time::Duration;

/// `--restrict-file-names` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestrictNames {
    /// Escape control characters (1..=31) as `%XX` upper-hex.
    #[default]
    Unix,
    /// Additionally escape the Windows-special punctuation.
    Windows,
    /// Keep everything.
    NoControl,
    /// Escape control characters and non-ASCII bytes.
    Ascii,
    Uppercase,
    Lowercase,
}

#[derive(Debug, Clone)]
pub struct Config {
    // ===== recursion =====
    pub recursive: bool,
    /// Maximum recursion depth; 0 means unlimited.
    pub level: u32,
    pub page_requisites: bool,
    pub span_hosts: bool,
    pub domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    /// `false` is `--no-parent`: never ascend above seed directories.
    pub parent: bool,
    pub robots: bool,

    // ===== naming =====
    pub directory_prefix: Option<PathBuf>,
    /// `false` is `-nd`: no directory tree, basenames only.
    pub directories: bool,
    pub force_directories: bool,
    /// `false` is `-nH`: omit the host directory.
    pub host_directories: bool,
    pub protocol_directories: bool,
    pub cut_directories: u32,
    pub restrict_file_names: RestrictNames,
    pub content_disposition: bool,
    pub trust_server_names: bool,

    // ===== write policy =====
    /// `false` is `--no-clobber`.
    pub clobber: bool,
    pub backups: u32,
    pub delete_after: bool,
    /// `-O`; `-` writes to standard output.
    pub output_document: Option<PathBuf>,
    pub adjust_extension: bool,
    pub timestamping: bool,
    pub continue_download: bool,
    pub save_headers: bool,

    // ===== protocol =====
    pub tries: u32,
    pub wait: Option<Duration>,
    pub random_wait: bool,
    /// Cap on the linear retry backoff.
    pub waitretry: Duration,
    pub user_agent: String,
    pub referer: Option<String>,
    pub keep_alive: bool,
    /// `false` is `--no-cache`: send `Pragma: no-cache`.
    pub cache: bool,
    /// Extra request headers, sent verbatim.
    pub headers: Vec<(String, String)>,
    pub post_data: Option<String>,
    pub post_file: Option<PathBuf>,
    pub max_redirect: u32,
    /// Split downloads larger than this into ranged parts; 0 disables.
    pub chunk_size: u64,
    /// Stop issuing new fetches once this many bytes hit the disk; 0
    /// disables.
    pub quota: u64,
    /// Per-socket I/O timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub http_proxies: Vec<String>,
    pub https_proxies: Vec<String>,

    // ===== policy =====
    pub accept: Vec<String>,
    pub reject: Vec<String>,
    pub ignore_case: bool,
    pub https_only: bool,
    pub spider: bool,
    pub http_username: Option<String>,
    pub http_password: Option<String>,
    pub netrc_file: Option<PathBuf>,

    // ===== persistent state =====
    pub cookies: bool,
    pub cookie_file: Option<PathBuf>,
    pub keep_session_cookies: bool,
    pub hsts: bool,
    pub hsts_file: Option<PathBuf>,

    // ===== workers =====
    pub max_threads: usize,

    // ===== wire quirks =====
    pub remote_encoding: Option<String>,
    /// Opt-in: treat `Content-Encoding: gzip` on `application/x-gzip` as
    /// identity (broken double-gzip servers).
    pub broken_server_gzip_workaround: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            recursive: false,
            level: 5,
            page_requisites: false,
            span_hosts: false,
            domains: Vec::new(),
            exclude_domains: Vec::new(),
            parent: true,
            robots: true,
            directory_prefix: None,
            directories: true,
            force_directories: false,
            host_directories: true,
            protocol_directories: false,
            cut_directories: 0,
            restrict_file_names: RestrictNames::default(),
            content_disposition: false,
            trust_server_names: false,
            clobber: true,
            backups: 0,
            delete_after: false,
            output_document: None,
            adjust_extension: false,
            timestamping: false,
            continue_download: false,
            save_headers: false,
            tries: 20,
            wait: None,
            random_wait: false,
            waitretry: Duration::from_secs(10),
            user_agent: concat!("tarik/", env!("CARGO_PKG_VERSION")).to_owned(),
            referer: None,
            keep_alive: true,
            cache: true,
            headers: Vec::new(),
            post_data: None,
            post_file: None,
            max_redirect: 20,
            chunk_size: 0,
            quota: 0,
            timeout: None,
            connect_timeout: Some(Duration::from_secs(60)),
            http_proxies: Vec::new(),
            https_proxies: Vec::new(),
            accept: Vec::new(),
            reject: Vec::new(),
            ignore_case: false,
            https_only: false,
            spider: false,
            http_username: None,
            http_password: None,
            netrc_file: None,
            cookies: true,
            cookie_file: None,
            keep_session_cookies: false,
            hsts: true,
            hsts_file: None,
            max_threads: 5,
            remote_encoding: None,
            broken_server_gzip_workaround: false,
        }
    }
}
