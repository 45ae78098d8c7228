//! The all-in-one download engine.
//!
//! [`Engine::run`] spawns N worker threads over one shared queue and
//! blocks until the queue drains (including an optional asynchronous
//! input producer). Candidate URLs enter through [`add_url`], the ordered
//! filter pipeline: scheme, https-only, parent, host span/domain gates,
//! robots, blacklist dedup and the redirect cap.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::conn::Dialer;
use crate::context::Context;
use crate::decomp::CodecFactory;
use crate::fname;
use crate::hosts::{Deferred, HostId};
use crate::job::Job;
use crate::log::{debug, error, info};
use crate::uri::{Uri, UriError};
use crate::worker::Worker;

/// A possible error value when building an [`Engine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An accept/reject/domain pattern does not compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// What a candidate link knows about the job that found it.
#[derive(Debug)]
pub(crate) struct ParentJob {
    pub uri: Arc<Uri>,
    pub referer: Option<Arc<Uri>>,
    pub level: u32,
    pub redirect_level: u32,
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AddFlags {
    pub redirect: bool,
    pub sitemap: bool,
}

// ===== Engine =====

#[derive(Debug)]
pub struct Engine {
    ctx: Arc<Context>,
}

/// Clonable handle exposing the explicit shutdown entry point.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    ctx: Arc<Context>,
}

impl ShutdownHandle {
    /// Soft-abort: running transfers stop at their next suspension point
    /// and the queue drains.
    pub fn shutdown(&self) {
        self.ctx.shutdown();
    }
}

impl Engine {
    pub fn new(config: Config) -> Result<Engine, EngineError> {
        Engine::with_transport(config, None, None)
    }

    /// Build an engine with a TLS-capable dialer and/or extra body
    /// codecs.
    pub fn with_transport(
        config: Config,
        dialer: Option<Arc<dyn Dialer>>,
        codecs: Option<Arc<dyn CodecFactory>>,
    ) -> Result<Engine, EngineError> {
        let ctx = Arc::new(Context::new(config, dialer, codecs)?);

        if let Some(path) = ctx.config.cookie_file.clone() {
            if let Err(err) = ctx.cookies.load(&path) {
                info!("no cookies loaded from '{}' ({err})", path.display());
            }
        }
        if ctx.config.hsts {
            if let Some(path) = ctx.config.hsts_file.clone() {
                if let Err(err) = ctx.hsts.load(&path) {
                    info!("no HSTS data loaded from '{}' ({err})", path.display());
                }
            }
        }

        Ok(Engine { ctx })
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle { ctx: Arc::clone(&self.ctx) }
    }

    /// Queue one seed URL.
    pub fn queue_seed(&self, url: &str) -> Result<(), UriError> {
        add_seed(&self.ctx, url)
    }

    /// Queue many seeds; parse failures are logged and skipped.
    pub fn queue_seeds<'a>(&self, urls: impl IntoIterator<Item = &'a str>) {
        for url in urls {
            if let Err(err) = self.queue_seed(url) {
                error!("failed to queue URL '{url}' ({err})");
            }
        }
    }

    /// Feed seeds from a line-based reader on a separate thread; the
    /// engine keeps running until the reader is exhausted.
    pub fn spawn_input<R>(&self, reader: R)
    where
        R: BufRead + Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        ctx.queue.set_input_alive(true);
        let input_ctx = Arc::clone(&self.ctx);
        thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let url = line.trim();
                if url.is_empty() {
                    continue;
                }
                if let Err(err) = add_seed(&input_ctx, url) {
                    error!("failed to queue URL '{url}' ({err})");
                }
            }
            input_ctx.queue.set_input_alive(false);
        });
    }

    /// Run the download: spawn workers, wait for the queue to drain, join
    /// everyone, persist cookie/HSTS state. Returns the process exit
    /// status.
    pub fn run(&self) -> i32 {
        let ctx = &self.ctx;
        let config = &ctx.config;

        // a fixed seed list needs no more workers than jobs, except when
        // recursion or chunk splitting will fan out
        let threads = if config.recursive || config.chunk_size > 0 {
            config.max_threads.max(1)
        } else {
            config.max_threads.clamp(1, ctx.queue.len().max(1))
        };

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let ctx = Arc::clone(&self.ctx);
            let builder = thread::Builder::new().name(format!("downloader-{id}"));
            match builder.spawn(move || Worker::new(id, ctx).run()) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    error!("failed to start downloader #{id} ({err})");
                    self.ctx.set_exit_status(crate::context::exit::INIT);
                }
            }
        }

        ctx.queue.wait_drained();
        ctx.queue.terminate();

        for (id, worker) in workers.into_iter().enumerate() {
            if worker.join().is_err() {
                error!("failed to wait for downloader #{id}");
            }
        }

        let (downloads, chunks, redirects, not_modified, errors) = ctx.stats.snapshot();
        info!(
            "downloaded: {downloads} files, {chunks} chunks, {} bytes, {redirects} redirects, {not_modified} not-modified, {errors} errors",
            ctx.quota_used(),
        );

        let now = ctx.now();
        if let Some(path) = &config.cookie_file {
            if let Err(err) = ctx.cookies.save(path, now) {
                error!("failed to save cookies to '{}' ({err})", path.display());
            }
        }
        if config.hsts {
            if let Some(path) = &config.hsts_file {
                if let Err(err) = ctx.hsts.save(path, now) {
                    error!("failed to save HSTS data to '{}' ({err})", path.display());
                }
            }
        }

        ctx.exit_status()
    }
}

// ===== candidate intake =====

/// Queue a seed URL: blacklist it, widen the allowed-host set, register
/// the parent anchor and create the job (or park it behind a fresh robots
/// fetch).
pub(crate) fn add_seed(ctx: &Context, url: &str) -> Result<(), UriError> {
    let config = &ctx.config;
    let uri = Arc::new(Uri::parse(url)?);

    if config.https_only && !uri.is_https() {
        info!("URL '{url}' not followed (https-only requested)");
        return Ok(());
    }

    if !ctx.blacklist.add(&uri) {
        return Ok(());
    }

    if config.recursive {
        if !config.span_hosts {
            // only download content from hosts given on the command line
            // or from the input file
            ctx.allow_seed_host(uri.host());
        }
        if !config.parent {
            ctx.parents.add(&uri);
        }
        if config.robots && defer_for_robots(ctx, &uri, None, 0, true) {
            return Ok(());
        }
    }

    enqueue(ctx, uri, None, 0, 0, false);
    Ok(())
}

/// The filter pipeline for extracted candidates and redirect targets.
/// `url` is an absolute URL, already resolved against its base.
pub(crate) fn add_url(ctx: &Context, parent: Option<&ParentJob>, url: &str, flags: AddFlags) {
    let config = &ctx.config;

    if flags.redirect && config.max_redirect > 0 {
        if let Some(parent) = parent {
            if parent.redirect_level >= config.max_redirect {
                info!("URL '{url}' not followed (redirect cap reached)");
                return;
            }
        }
    }

    let uri = match Uri::parse(url) {
        Ok(uri) => Arc::new(uri),
        Err(err) => {
            info!("URL '{url}' not followed ({err})");
            return;
        }
    };

    if config.https_only && !uri.is_https() {
        info!("URL '{url}' not followed (https-only requested)");
        return;
    }

    if config.recursive {
        if !config.parent && !ctx.parents.allows(&uri) {
            info!("URL '{url}' not followed (parent ascending not allowed)");
            return;
        }
        if !ctx.host_allowed(uri.host()) {
            let reason = if config.span_hosts {
                "domain explicitly excluded"
            } else {
                "no host-spanning requested"
            };
            info!("URL '{url}' not followed ({reason})");
            return;
        }
    }

    let (level, redirect_level, referer, inherited_path) = match parent {
        Some(parent) => {
            if flags.redirect {
                // a redirect target keeps the level and referer of the
                // job that bounced
                (parent.level, parent.redirect_level + 1, parent.referer.clone(), parent.local_path.clone())
            } else {
                (parent.level + 1, 0, Some(Arc::clone(&parent.uri)), None)
            }
        }
        None => (0, 0, None, None),
    };

    if config.recursive && config.robots {
        if defer_for_robots(ctx, &uri, referer.clone(), level, false) {
            return;
        }
        // host exists with parsed rules: enforce them
        if let Some(host) = ctx.hosts.get(uri.host()) {
            if ctx.hosts.disallowed(host, uri.path()) {
                info!("URL '{url}' not followed (disallowed by robots.txt)");
                return;
            }
        }
    }

    if !ctx.blacklist.add(&uri) {
        debug!("URL '{uri}' already known");
        return;
    }

    let local_path = if config.output_document.is_some() {
        None
    } else if !flags.redirect || config.trust_server_names || parent.is_none() {
        fname::local_filename(&uri, config)
    } else {
        inherited_path
    };

    let id = ctx.queue.next_id();
    let mut job = Job::new(id, uri);
    job.referer = referer;
    job.level = level;
    job.redirect_level = redirect_level;
    job.local_path = local_path;
    job.sitemap = flags.sitemap;
    ctx.queue.add(job);
}

/// Park `uri` behind its host's robots fetch when that is still pending.
/// On a first sighting the robots job itself is synthesized and queued.
/// Returns `true` when the candidate was deferred (and blacklisted).
fn defer_for_robots(
    ctx: &Context,
    uri: &Arc<Uri>,
    referer: Option<Arc<Uri>>,
    level: u32,
    already_blacklisted: bool,
) -> bool {
    // the robots fetch itself must not recurse into deferral
    if uri.path() == "/robots.txt" {
        return false;
    }

    match ctx.hosts.add(uri.host()) {
        Ok(host_id) => {
            // a new host entry has been created
            if !already_blacklisted && !ctx.blacklist.add(uri) {
                return true;
            }
            let robots_uri = match uri.resolve("/robots.txt") {
                Ok(robots_uri) => Arc::new(robots_uri),
                Err(_) => return false,
            };
            let id = ctx.queue.next_id();
            let mut job = Job::new(id, Arc::clone(&robots_uri));
            job.robots = true;
            job.host = Some(host_id);
            job.local_path = fname::local_filename(&robots_uri, &ctx.config);
            ctx.hosts.with(host_id, |record| {
                record.robots_job = Some(id);
                record.deferred.push(Deferred {
                    uri: Arc::clone(uri),
                    referer,
                    level,
                });
            });
            ctx.queue.add(job);
            true
        }
        Err(host_id) => {
            let pending = ctx.hosts.with(host_id, |record| record.robots_job.is_some());
            if pending {
                if !already_blacklisted && !ctx.blacklist.add(uri) {
                    return true;
                }
                ctx.hosts.with(host_id, |record| {
                    record.deferred.push(Deferred {
                        uri: Arc::clone(uri),
                        referer,
                        level,
                    });
                });
                return true;
            }
            false
        }
    }
}

/// Re-enter a deferred candidate once its host's robots rules landed.
/// The URL was blacklisted when it was parked, so only the fresh
/// disallow rules are checked here.
pub(crate) fn release_deferred(ctx: &Context, host: HostId, entry: Deferred) {
    if ctx.hosts.disallowed(host, entry.uri.path()) {
        info!("URL '{}' not followed (disallowed by robots.txt)", entry.uri);
        return;
    }
    enqueue(ctx, entry.uri, entry.referer, entry.level, 0, false);
}

fn enqueue(
    ctx: &Context,
    uri: Arc<Uri>,
    referer: Option<Arc<Uri>>,
    level: u32,
    redirect_level: u32,
    sitemap: bool,
) {
    let local_path = if ctx.config.output_document.is_some() {
        None
    } else {
        fname::local_filename(&uri, &ctx.config)
    };
    let id = ctx.queue.next_id();
    let mut job = Job::new(id, uri);
    job.referer = referer;
    job.level = level;
    job.redirect_level = redirect_level;
    job.local_path = local_path;
    job.sitemap = sitemap;
    ctx.queue.add(job);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(mutate: impl FnOnce(&mut Config)) -> Context {
        let mut config = Config::default();
        config.robots = false;
        mutate(&mut config);
        Context::new(config, None, None).unwrap()
    }

    fn parent(ctx: &Context, url: &str) -> ParentJob {
        let uri = Arc::new(Uri::parse(url).unwrap());
        ctx.blacklist.add(&uri);
        ParentJob {
            uri,
            referer: None,
            level: 0,
            redirect_level: 0,
            local_path: None,
        }
    }

    #[test]
    fn test_add_url_dedup() {
        let ctx = context(|_| {});
        let parent = parent(&ctx, "http://example.com/");
        add_url(&ctx, Some(&parent), "http://example.com/a", AddFlags::default());
        add_url(&ctx, Some(&parent), "http://example.com/a#frag", AddFlags::default());
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_scheme_and_https_only() {
        let ctx = context(|config| config.https_only = true);
        let parent = parent(&ctx, "https://example.com/");
        add_url(&ctx, Some(&parent), "http://example.com/a", AddFlags::default());
        add_url(&ctx, Some(&parent), "ftp://example.com/b", AddFlags::default());
        assert!(ctx.queue.is_empty());
        add_url(&ctx, Some(&parent), "https://example.com/c", AddFlags::default());
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_host_gate() {
        let ctx = context(|config| config.recursive = true);
        ctx.allow_seed_host("example.com");
        let parent = parent(&ctx, "http://example.com/");
        add_url(&ctx, Some(&parent), "http://example.com/ok", AddFlags::default());
        add_url(&ctx, Some(&parent), "http://elsewhere.org/no", AddFlags::default());
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_parent_gate() {
        let ctx = context(|config| {
            config.recursive = true;
            config.parent = false;
            config.span_hosts = true;
        });
        let seed = Arc::new(Uri::parse("http://example.com/docs/index.html").unwrap());
        ctx.parents.add(&seed);
        let parent = parent(&ctx, "http://example.com/docs/index.html");

        add_url(&ctx, Some(&parent), "http://example.com/docs/sub/page.html", AddFlags::default());
        add_url(&ctx, Some(&parent), "http://example.com/outside.html", AddFlags::default());
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_redirect_cap() {
        let ctx = context(|config| config.max_redirect = 3);
        let uri = Arc::new(Uri::parse("http://example.com/loop").unwrap());
        let capped = ParentJob {
            uri: Arc::clone(&uri),
            referer: None,
            level: 0,
            redirect_level: 3,
            local_path: None,
        };
        add_url(&ctx, Some(&capped), "http://example.com/loop2", AddFlags {
            redirect: true,
            sitemap: false,
        });
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_robots_defers_jobs() {
        let ctx = context(|config| {
            config.recursive = true;
            config.robots = true;
            config.span_hosts = true;
        });
        let parent = parent(&ctx, "http://example.com/");

        add_url(&ctx, Some(&parent), "http://example.com/a", AddFlags::default());
        add_url(&ctx, Some(&parent), "http://example.com/b", AddFlags::default());

        // only the synthesized robots job is dispatchable
        assert_eq!(ctx.queue.len(), 1);
        let host = ctx.hosts.get("example.com").unwrap();
        assert_eq!(ctx.hosts.with(host, |record| record.deferred.len()), 2);

        // robots resolves with one path closed
        let robots = crate::robots::Robots::parse("User-agent: *\nDisallow: /b\n");
        let deferred = ctx.hosts.finish_robots(host, Some(robots));
        for entry in deferred {
            release_deferred(&ctx, host, entry);
        }
        assert_eq!(ctx.queue.len(), 2); // robots job still queued + /a
    }

    #[test]
    fn test_seed_rejects_scheme() {
        let ctx = context(|_| {});
        assert!(add_seed(&ctx, "gopher://example.com/").is_err());
        assert!(add_seed(&ctx, "http://example.com/").is_ok());
        assert_eq!(ctx.queue.len(), 1);
    }
}
