//! Shared engine state.
//!
//! There are no process-wide singletons: everything the workers share
//! lives in one [`Context`] value threaded through all APIs, so tests can
//! construct a fresh one per case. Collaborators hold non-owning
//! references.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use fnv::FnvHashSet;

use crate::blacklist::{Blacklist, EtagSet, KnownUrls};
use crate::config::Config;
use crate::conn::{Dialer, ProxyRing, TcpDialer};
use crate::cookie::CookieDb;
use crate::decomp::CodecFactory;
use crate::hosts::HostRegistry;
use crate::hsts::HstsDb;
use crate::netrc::Netrc;
use crate::policy::{HostPatterns, Parents, PatternList};
use crate::queue::JobQueue;
use crate::stats::Stats;

/// Exit codes, lowest non-zero wins.
pub mod exit {
    /// Hard init failure.
    pub const INIT: i32 = 1;
    /// Filesystem write failure.
    pub const IO: i32 = 3;
    /// Network failure after all retries.
    pub const NETWORK: i32 = 4;
    /// TLS handshake or certificate failure.
    pub const TLS: i32 = 5;
    /// HTTP 4xx on a non-robots job.
    pub const HTTP: i32 = 8;
}

pub struct Context {
    pub config: Config,
    pub queue: JobQueue,
    pub blacklist: Blacklist,
    pub known_urls: KnownUrls,
    pub etags: EtagSet,
    pub hosts: HostRegistry,
    pub parents: Parents,

    pub accept: PatternList,
    pub reject: PatternList,
    pub domains: HostPatterns,
    pub exclude_domains: HostPatterns,
    /// Seed hosts auto-allowed when not spanning hosts.
    pub auto_domains: Mutex<FnvHashSet<String>>,

    pub cookies: CookieDb,
    pub hsts: HstsDb,
    netrc: OnceLock<Option<Netrc>>,

    pub dialer: Arc<dyn Dialer>,
    pub codecs: Option<Arc<dyn CodecFactory>>,
    pub proxies: ProxyRing,

    pub stats: Stats,
    /// Cumulative bytes handed to the writer, fetch-and-add.
    quota_used: AtomicU64,
    /// Serializes workers racing on the same save target.
    pub savefile_lock: Mutex<()>,
    /// Process-wide soft abort; consulted at every suspension point.
    pub abort: Arc<AtomicBool>,
    exit_status: AtomicI32,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("queue", &self.queue.len())
            .field("blacklist", &self.blacklist.len())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        config: Config,
        dialer: Option<Arc<dyn Dialer>>,
        codecs: Option<Arc<dyn CodecFactory>>,
    ) -> Result<Context, globset::Error> {
        let accept = PatternList::compile(&config.accept, config.ignore_case)?;
        let reject = PatternList::compile(&config.reject, config.ignore_case)?;
        let domains = HostPatterns::compile(&config.domains, config.ignore_case)?;
        let exclude_domains = HostPatterns::compile(&config.exclude_domains, config.ignore_case)?;
        let proxies = ProxyRing::new(
            parse_proxies(&config.http_proxies),
            parse_proxies(&config.https_proxies),
        );
        let cookies = CookieDb::new(config.keep_session_cookies);

        Ok(Context {
            accept,
            reject,
            domains,
            exclude_domains,
            auto_domains: Mutex::new(FnvHashSet::default()),
            queue: JobQueue::new(),
            blacklist: Blacklist::default(),
            known_urls: KnownUrls::default(),
            etags: EtagSet::default(),
            hosts: HostRegistry::default(),
            parents: Parents::default(),
            cookies,
            hsts: HstsDb::default(),
            netrc: OnceLock::new(),
            dialer: dialer.unwrap_or_else(|| Arc::new(TcpDialer)),
            codecs,
            proxies,
            stats: Stats::default(),
            quota_used: AtomicU64::new(0),
            savefile_lock: Mutex::new(()),
            abort: Arc::new(AtomicBool::new(false)),
            exit_status: AtomicI32::new(0),
            config,
        })
    }

    /// Seconds since the epoch, once per call site.
    pub fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Candidate host allowed by the domain gates?
    pub fn host_allowed(&self, host: &str) -> bool {
        if self.config.span_hosts {
            return self.exclude_domains.is_empty() || !self.exclude_domains.matches(host);
        }
        if self.domains.matches(host) {
            return true;
        }
        let auto = match self.auto_domains.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        auto.contains(host)
    }

    pub fn allow_seed_host(&self, host: &str) {
        if self.exclude_domains.matches(host) {
            return;
        }
        let mut auto = match self.auto_domains.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        auto.insert(host.to_owned());
    }

    /// Lazily loaded netrc database.
    pub fn netrc(&self) -> Option<&Netrc> {
        self.netrc
            .get_or_init(|| {
                let path = self.config.netrc_file.as_ref()?;
                Netrc::load(path).ok()
            })
            .as_ref()
    }

    // ===== quota =====

    /// Add `n` read bytes, returning the previous total. Callers compare
    /// the old value against the quota, so the write that crosses the
    /// line still lands.
    pub fn quota_add(&self, n: u64) -> u64 {
        self.quota_used.fetch_add(n, Ordering::Relaxed)
    }

    pub fn quota_used(&self) -> u64 {
        self.quota_used.load(Ordering::Relaxed)
    }

    /// Quota configured and already crossed: suppress new fetches.
    pub fn quota_reached(&self) -> bool {
        self.config.quota > 0 && self.quota_used() >= self.config.quota
    }

    // ===== lifecycle =====

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// The explicit shutdown entry point: sets the global abort flag and
    /// drains the queue.
    pub fn shutdown(&self) {
        self.abort.store(true, Ordering::Relaxed);
        self.queue.terminate();
    }

    /// Record an exit status; the lowest non-zero code wins.
    pub fn set_exit_status(&self, status: i32) {
        let mut current = self.exit_status.load(Ordering::Relaxed);
        loop {
            if current != 0 && status >= current {
                return;
            }
            match self.exit_status.compare_exchange(
                current,
                status,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Relaxed)
    }
}

fn parse_proxies(list: &[String]) -> Vec<(String, u16)> {
    list.iter()
        .filter_map(|entry| {
            let entry = entry.trim().trim_start_matches("http://");
            let (host, port) = match entry.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().ok()?),
                None => (entry, 8080),
            };
            (!host.is_empty()).then(|| (host.to_owned(), port))
        })
        .collect()
}
