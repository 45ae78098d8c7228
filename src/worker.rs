//! The per-thread download state machine.
//!
//! A worker loops: claim a job (or one part of a fanned-out job), probe
//! with HEAD when the mode asks for it, fetch, dispatch the body to an
//! extractor, save, complete. Retries are linear backoff capped by
//! `--waitretry`; TLS failures are final and never retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use sha2::Digest as _;

use crate::auth;
use crate::config::Config;
use crate::conn::Connection;
use crate::context::{Context, exit};
use crate::engine::{self, AddFlags, ParentJob};
use crate::extract::{self, LinkExtractor, SitemapXmlExtractor};
use crate::headers::{Challenge, LinkRel};
use crate::http::{CollectSink, HttpError, Method, Request, Response, ResponseOpts, get_response};
use crate::job::{Metalink, Part};
use crate::log::{debug, error, info, warning};
use crate::queue::{Claim, Slot};
use crate::robots::Robots;
use crate::save::{self, SaveMode};
use crate::uri::{Scheme, Uri};

/// Snapshot of the claimed job, taken under the job mutex once.
#[derive(Debug, Clone)]
struct JobView {
    id: u64,
    uri: Arc<Uri>,
    referer: Option<Arc<Uri>>,
    level: u32,
    redirect_level: u32,
    local_path: Option<PathBuf>,
    head_first: bool,
    sitemap: bool,
    robots: bool,
    host: Option<usize>,
}

impl JobView {
    fn parent(&self) -> ParentJob {
        ParentJob {
            uri: Arc::clone(&self.uri),
            referer: self.referer.clone(),
            level: self.level,
            redirect_level: self.redirect_level,
            local_path: self.local_path.clone(),
        }
    }
}

pub(crate) struct Worker {
    id: usize,
    ctx: Arc<Context>,
    conn: Option<Connection>,
    via_proxy: bool,
    final_error: bool,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<Context>) -> Worker {
        Worker { id, ctx, conn: None, via_proxy: false, final_error: false }
    }

    /// Thread body: claim, work, repeat until terminated.
    pub fn run(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let mut do_wait = false;

        while let Some(claim) = ctx.queue.claim() {
            // inter-request politeness wait
            if let Some(wait) = ctx.config.wait {
                if do_wait {
                    std::thread::sleep(politeness_wait(wait, ctx.config.random_wait));
                    if ctx.queue.is_terminated() {
                        break;
                    }
                } else {
                    do_wait = true;
                }
            }

            match claim {
                Claim::Part { slot, part } => self.download_part(&slot, part),
                Claim::Whole(slot) => self.process_job(&slot),
            }
        }

        self.conn = None;
    }

    // ===== whole jobs =====

    fn process_job(&mut self, slot: &Arc<Slot>) {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;

        let view = snapshot(slot);

        let mut head_first = view.head_first;
        if config.recursive && !view.robots {
            // a pattern miss on the URL alone is not final: probe the
            // mime type before discarding e.g. a linking html page
            let url = view.uri.to_string();
            if (!ctx.accept.is_empty() && !ctx.accept.matches(&url)) || ctx.reject.matches(&url) {
                head_first = true;
                lock_job(slot).head_first = true;
            }
        }

        if ctx.quota_reached() && !view.robots {
            debug!("[{}] skipped '{}' (quota reached)", self.id, view.uri);
            ctx.queue.remove(view.id);
            return;
        }

        if (config.spider || config.chunk_size > 0 || head_first) && !view.robots {
            info!("[{}] Checking '{}' ...", self.id, view.uri);
            let Some(resp) = self.fetch_retrying(&view, &view.uri, None, Some(Method::Head)) else {
                if !self.final_error {
                    ctx.set_exit_status(exit::NETWORK);
                }
                ctx.queue.remove(view.id);
                return;
            };

            if resp.code / 100 == 4 {
                ctx.set_exit_status(exit::HTTP);
            }

            if config.spider || head_first {
                let parseable = resp.code == 200
                    && resp
                        .content_type
                        .as_deref()
                        .is_some_and(|ct| extract::is_parseable(ct, view.sitemap));
                if !parseable {
                    ctx.queue.remove(view.id);
                    return;
                }
                if let Some(etag) = resp.etag.clone() {
                    if !ctx.etags.add(etag) {
                        info!("not scanning '{}' (known ETag)", view.uri);
                        ctx.queue.remove(view.id);
                        return;
                    }
                }
            } else if config.chunk_size > 0
                && resp.content_length_valid
                && resp.content_length > config.chunk_size
            {
                if let Some(name) = view.local_path.clone() {
                    let mut metalink = Metalink::chunked(
                        name,
                        Arc::clone(&view.uri),
                        resp.content_length,
                        config.chunk_size,
                    );
                    metalink.digests = resp.digests.clone();
                    {
                        let mut job = lock_job(slot);
                        job.metalink = Some(metalink);
                    }
                    // keep the job queued, let everyone claim parts
                    ctx.queue.release(slot);
                    return;
                }
            }
        }

        info!("[{}] Downloading '{}' ...", self.id, view.uri);
        let Some(resp) = self.fetch_retrying(&view, &view.uri, None, None) else {
            info!("[{}] failed to download '{}'", self.id, view.uri);
            if !self.final_error {
                ctx.set_exit_status(exit::NETWORK);
            }
            if view.robots {
                self.finish_robots(&view, None);
            }
            ctx.queue.remove(view.id);
            return;
        };

        if view.robots {
            if resp.code == 200 {
                save::save_response(&ctx, &resp, view.local_path.as_deref(), SaveMode::Truncate);
            }
            self.finish_robots(&view, Some(&resp));
        } else {
            self.handle_response(&view, &resp);
        }

        ctx.queue.remove(view.id);
    }

    fn handle_response(&mut self, view: &JobView, resp: &Response) {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;

        if resp.code / 100 == 4 {
            ctx.set_exit_status(exit::HTTP);
        }

        // RFC 6249 Metalink/HTTP answer: chase the description document,
        // or the best mirror
        if !resp.links.is_empty() && self.follow_metalink_links(view, resp) {
            return;
        }

        let named: Option<PathBuf> = if config.content_disposition {
            resp.content_filename.as_deref().map(PathBuf::from)
        } else {
            None
        };
        let target: Option<PathBuf> = named.or_else(|| {
            config
                .output_document
                .clone()
                .or_else(|| view.local_path.clone())
        });

        match resp.code {
            200 => {
                save::save_response(&ctx, resp, target.as_deref(), SaveMode::Truncate);
                if self.should_parse(view.level) {
                    self.parse_response(view, resp);
                }
            }
            206 if config.continue_download => {
                save::save_response(&ctx, resp, target.as_deref(), SaveMode::Append);
            }
            304 if config.timestamping => {
                // local document is up-to-date, walk its links as if just
                // downloaded
                if self.should_parse(view.level) {
                    self.parse_local(view, target.as_deref());
                }
            }
            _ => {}
        }
    }

    fn should_parse(&self, level: u32) -> bool {
        let config = &self.ctx.config;
        config.recursive
            && (config.level == 0 || level < config.level + config.page_requisites as u32)
    }

    // ===== link extraction =====

    fn parse_response(&mut self, view: &JobView, resp: &Response) {
        let Some(ct) = resp.content_type.as_deref() else { return };
        let charset = resp
            .content_type_charset
            .clone()
            .or_else(|| self.ctx.config.remote_encoding.clone());

        if view.sitemap && ct.eq_ignore_ascii_case("application/x-gzip") {
            match gunzip(&resp.body) {
                Some(data) => {
                    self.process_links(view, &data, charset.as_deref(), &SitemapXmlExtractor)
                }
                None => warning!("malformed gzipped sitemap '{}'", view.uri),
            }
            return;
        }

        let Some(extractor) = extract::for_content_type(ct, view.sitemap) else {
            return;
        };
        self.process_links(view, &resp.body, charset.as_deref(), extractor);
    }

    fn parse_local(&mut self, view: &JobView, path: Option<&std::path::Path>) {
        let Some(path) = path else { return };
        let ext = path.extension().map(|e| e.to_ascii_lowercase());
        let extractor: &dyn LinkExtractor = match ext.as_deref().and_then(|e| e.to_str()) {
            Some("html") | Some("htm") => &extract::HtmlExtractor,
            Some("css") => &extract::CssExtractor,
            _ => return,
        };
        match std::fs::read(path) {
            Ok(data) => self.process_links(view, &data, None, extractor),
            Err(err) => debug!("cannot re-parse '{}' ({err})", path.display()),
        }
    }

    fn process_links(
        &mut self,
        view: &JobView,
        data: &[u8],
        charset: Option<&str>,
        extractor: &dyn LinkExtractor,
    ) {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let spans = extractor.extract(data);
        if spans.is_empty() {
            return;
        }
        debug!("found {} link(s) in '{}'", spans.len(), view.uri);

        // at the recursion limit only page requisites are pulled
        let leaf_src_only = config.level > 0 && view.level >= config.level;
        let parent = view.parent();
        let mut base = (*view.uri).clone();

        for span in spans {
            let raw = extract::decode_text(&data[span.range.clone()], charset);
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            if span.tag == "base" && span.attr == "href" {
                if let Ok(new_base) = base.resolve(raw) {
                    base = new_base;
                }
                continue;
            }
            if leaf_src_only && !extract::is_src_style(&span.tag, &span.attr) {
                continue;
            }
            // a raw link text is considered at most once, process-wide
            if !ctx.known_urls.add(raw) {
                continue;
            }

            match base.resolve(raw) {
                Ok(resolved) => {
                    let sitemap = view.sitemap && looks_like_sitemap(&resolved);
                    engine::add_url(
                        &ctx,
                        Some(&parent),
                        &resolved.to_string(),
                        AddFlags { redirect: false, sitemap },
                    );
                }
                Err(err) => info!("URL '{raw}' not followed ({err})"),
            }
        }
    }

    // ===== robots =====

    fn finish_robots(&mut self, view: &JobView, resp: Option<&Response>) {
        let ctx = Arc::clone(&self.ctx);
        let Some(host_id) = view.host else { return };

        let robots = resp.and_then(|resp| {
            (resp.code == 200 && resp.is_content_type("text/plain")).then(|| {
                debug!("scanning robots.txt of '{}'", view.uri);
                Robots::parse(&String::from_utf8_lossy(&resp.body))
            })
        });
        let sitemaps = robots.as_ref().map(|r| r.sitemaps.clone()).unwrap_or_default();

        // store the rules first so the sitemap and deferred enqueues below
        // run against them instead of parking again
        let deferred = ctx.hosts.finish_robots(host_id, robots);

        let parent = view.parent();
        for sitemap in sitemaps {
            info!("adding sitemap '{sitemap}'");
            if ctx.known_urls.add(&sitemap) {
                engine::add_url(&ctx, Some(&parent), &sitemap, AddFlags {
                    redirect: false,
                    sitemap: true,
                });
            }
        }

        for entry in deferred {
            engine::release_deferred(&ctx, host_id, entry);
        }
    }

    // ===== metalink =====

    /// `true` when a Link-header metalink answer replaced this job.
    fn follow_metalink_links(&mut self, view: &JobView, resp: &Response) -> bool {
        let mut top_link = None;
        for link in &resp.links {
            match link.rel {
                LinkRel::DescribedBy => {
                    let is_meta = link.media_type.as_deref().is_some_and(|t| {
                        t.eq_ignore_ascii_case("application/metalink4+xml")
                            || t.eq_ignore_ascii_case("application/metalink+xml")
                    });
                    if is_meta {
                        engine::add_url(
                            &self.ctx,
                            Some(&view.parent()),
                            &link.uri,
                            AddFlags::default(),
                        );
                        return true;
                    }
                }
                LinkRel::Duplicate => {
                    let better = match top_link {
                        None => true,
                        Some((pri, _)) => link.pri < pri,
                    };
                    if better {
                        top_link = Some((link.pri, link.uri.clone()));
                    }
                }
                LinkRel::Other => {}
            }
        }
        if let Some((_, uri)) = top_link {
            engine::add_url(&self.ctx, Some(&view.parent()), &uri, AddFlags::default());
            return true;
        }
        false
    }

    // ===== parts =====

    fn download_part(&mut self, slot: &Arc<Slot>, part_idx: usize) {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;
        let view = snapshot(slot);

        let (part, mirrors, name, total_parts) = {
            let job = lock_job(slot);
            let Some(metalink) = job.metalink.as_ref() else { return };
            (
                metalink.parts[part_idx].clone(),
                metalink.mirrors.clone(),
                metalink.name.clone(),
                metalink.parts.len(),
            )
        };

        let mut mirror_index = self.id % mirrors.len();
        let mut done = false;

        'tries: for tries in 0..config.tries {
            std::thread::sleep(backoff(tries, config.waitretry));
            if ctx.queue.is_terminated() {
                break;
            }

            for _ in 0..mirrors.len() {
                let mirror = &mirrors[mirror_index];
                info!(
                    "downloading part {}/{} ({}-{}) {} from {} (mirror {})",
                    part.id + 1,
                    total_parts,
                    part.position,
                    part.position + part.length - 1,
                    name.display(),
                    mirror.host(),
                    mirror_index,
                );
                mirror_index = (mirror_index + 1) % mirrors.len();

                let Some(resp) = self.http_get(&view, mirror, Some(&part), Some(Method::Get))
                else {
                    continue;
                };

                ctx.quota_add(resp.body.len() as u64);

                if resp.code != 200 && resp.code != 206 {
                    info!("part {} download error {}", part.id + 1, resp.code);
                } else if resp.body.len() as u64 != part.length {
                    info!(
                        "part {} download error '{} bytes of {} expected'",
                        part.id + 1,
                        resp.body.len(),
                        part.length,
                    );
                } else if let Err(err) = save::write_part(&name, part.position, &resp.body) {
                    error!("failed to write {} bytes at pos {} ({err})", resp.body.len(), part.position);
                    ctx.set_exit_status(exit::IO);
                } else {
                    info!("part {} downloaded", part.id + 1);
                    done = true;
                    break 'tries;
                }
            }
        }

        if !done {
            info!("part {} failed", part.id + 1);
            // something was wrong, reload again later
            ctx.queue.unclaim_part(slot, part_idx);
            return;
        }

        let all_done = {
            let mut job = lock_job(slot);
            if let Some(metalink) = job.metalink.as_mut() {
                metalink.parts[part_idx].done = true;
                metalink.all_done()
            } else {
                false
            }
        };

        if all_done {
            info!("{} checking...", name.display());
            let digests = {
                let job = lock_job(slot);
                job.metalink.as_ref().map(|m| m.digests.clone()).unwrap_or_default()
            };
            if validate_file(&name, &digests) {
                debug!("checksum ok");
            } else {
                // leave the assembled file for the user to inspect
                error!("checksum failed for '{}'", name.display());
            }
            ctx.queue.remove(view.id);
        }
    }

    // ===== the protocol exchange =====

    fn fetch_retrying(
        &mut self,
        view: &JobView,
        uri: &Arc<Uri>,
        part: Option<&Part>,
        method: Option<Method>,
    ) -> Option<Response> {
        let tries_total = self.ctx.config.tries;
        let waitretry = self.ctx.config.waitretry;
        for tries in 0..tries_total {
            std::thread::sleep(backoff(tries, waitretry));
            if self.ctx.queue.is_terminated() {
                return None;
            }
            if let Some(resp) = self.http_get(view, uri, part, method) {
                info!("HTTP response {} {}", resp.code, resp.reason);
                // server errors are worth another attempt, client errors
                // are final
                if resp.code / 100 == 5 && tries + 1 < tries_total {
                    continue;
                }
                return Some(resp);
            }
            if self.final_error {
                return None;
            }
        }
        None
    }

    /// One full request/response exchange against `uri`, following auth
    /// retries and (for parts) redirects in place. Ordinary redirects are
    /// re-entered through the recursion filters instead.
    fn http_get(
        &mut self,
        view: &JobView,
        uri: &Arc<Uri>,
        part: Option<&Part>,
        method_override: Option<Method>,
    ) -> Option<Response> {
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;

        self.final_error = false;

        let mut iri = Arc::clone(uri);
        if let Some(upgraded) = self.hsts_upgrade(&iri) {
            iri = upgraded;
        }

        let mut challenges: Option<Vec<Challenge>> = None;
        let mut tries = 0;

        while tries < config.tries.max(1) {
            tries += 1;

            let via_proxy = match self.ensure_connection(&iri) {
                Ok(via_proxy) => via_proxy,
                Err(()) => return None,
            };

            let req = self.build_request(view, &iri, part, method_override, challenges.as_deref());

            let exchanged = self.exchange(&req, via_proxy);
            let mut resp = match exchanged {
                Ok(resp) => resp,
                Err(HttpError::Aborted) => return None,
                Err(err) => {
                    debug!("request to '{iri}' failed ({err})");
                    self.conn = None;
                    return None;
                }
            };

            // cookie and HSTS bookkeeping applies to every hop
            if config.cookies {
                let now = ctx.now();
                let mut cookies = std::mem::take(&mut resp.cookies);
                ctx.cookies.normalize(&iri, &mut cookies);
                ctx.cookies.store(cookies, now);
            }
            if config.hsts && iri.is_https() {
                if let Some(hsts) = resp.hsts {
                    ctx.hsts
                        .add(iri.host(), iri.port(), hsts.max_age, hsts.include_subdomains);
                }
            }

            if !resp.keep_alive {
                debug!("closing connection to {}", iri.host());
                self.conn = None;
            }

            ctx.stats.count(resp.code, part.is_some());

            // 302 with Metalink information is final here, the caller
            // inspects the Link headers
            if resp.code == 302 && !resp.links.is_empty() && !resp.digests.is_empty() {
                return Some(resp);
            }

            if resp.code == 401 && challenges.is_none() {
                if resp.challenges.is_empty() {
                    return Some(resp);
                }
                challenges = Some(std::mem::take(&mut resp.challenges));
                continue; // try again with credentials
            }

            if resp.code / 100 == 2 || resp.code / 100 >= 4 || resp.code == 304 {
                return Some(resp);
            }

            // 3xx
            let Some(location) = resp.location.clone() else {
                return Some(resp);
            };
            let Ok(target) = iri.resolve(&location) else {
                info!("redirect target '{location}' of '{iri}' not followed (unparsable)");
                return Some(resp);
            };

            if part.is_none() {
                engine::add_url(
                    &ctx,
                    Some(&view.parent()),
                    &target.to_string(),
                    AddFlags { redirect: true, sitemap: false },
                );
                return Some(resp);
            }

            // metalink parts follow directly
            iri = Arc::new(target);
            if let Some(upgraded) = self.hsts_upgrade(&iri) {
                iri = upgraded;
            }
        }

        None
    }

    fn hsts_upgrade(&self, iri: &Arc<Uri>) -> Option<Arc<Uri>> {
        let ctx = &self.ctx;
        if ctx.config.hsts
            && !iri.is_https()
            && ctx.hsts.host_match(iri.host(), iri.port(), ctx.now())
        {
            info!("HSTS in effect for {}:{}", iri.host(), iri.port());
            Some(Arc::new(iri.with_scheme(Scheme::Https)))
        } else {
            None
        }
    }

    fn ensure_connection(&mut self, iri: &Uri) -> Result<bool, ()> {
        let ctx = &self.ctx;
        if let Some(conn) = &self.conn {
            if conn.matches(iri) {
                debug!("reuse connection {}", conn.host());
                return Ok(self.via_proxy);
            }
            debug!("close connection {}", conn.host());
        }
        self.conn = None;

        let proxy = ctx.proxies.pick(iri.scheme());
        let (dial_host, dial_port, via_proxy) = match &proxy {
            Some((host, port)) => (host.as_str(), *port, true),
            None => (iri.host(), iri.port(), false),
        };

        match ctx
            .dialer
            .dial(iri.scheme(), dial_host, dial_port, ctx.config.connect_timeout)
        {
            Ok(transport) => {
                debug!("opened connection {}", iri.host());
                self.conn = Some(Connection::new(
                    transport,
                    iri.scheme(),
                    iri.host().to_owned(),
                    iri.port(),
                    ctx.config.timeout,
                    Arc::clone(&ctx.abort),
                ));
                self.via_proxy = via_proxy;
                Ok(via_proxy)
            }
            Err(err) => {
                debug!("failed to connect to {} ({err})", iri.host());
                if err.is_final() {
                    self.final_error = true;
                    ctx.set_exit_status(exit::TLS);
                }
                Err(())
            }
        }
    }

    fn build_request(
        &self,
        view: &JobView,
        iri: &Arc<Uri>,
        part: Option<&Part>,
        method_override: Option<Method>,
        challenges: Option<&[Challenge]>,
    ) -> Request {
        let config = &self.ctx.config;

        let body = if method_override.is_none() {
            post_body(config)
        } else {
            None
        };
        let method = method_override.unwrap_or(if body.is_some() {
            Method::Post
        } else {
            Method::Get
        });

        let mut req = Request::new((**iri).clone(), method);

        if part.is_none() && (config.continue_download || config.timestamping) {
            if let Some(local) = &view.local_path {
                if config.continue_download {
                    let mut buf = itoa::Buffer::new();
                    req.add_header("Range", format!("bytes={}-", buf.format(save::file_size(local))));
                }
                if config.timestamping {
                    let mtime = save::file_mtime(local);
                    if mtime > 0 {
                        req.add_header(
                            "If-Modified-Since",
                            crate::http::date::print_http_date(mtime + 1),
                        );
                    }
                }
            }
        }

        req.add_header("Accept-Encoding", "gzip, deflate");
        req.add_header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        );
        req.add_header("User-Agent", config.user_agent.clone());
        if config.keep_alive {
            req.add_header("Connection", "keep-alive");
        }
        if !config.cache {
            req.add_header("Pragma", "no-cache");
        }

        if let Some(referer) = &config.referer {
            req.add_header("Referer", referer.clone());
        } else if let Some(referer) = &view.referer {
            req.add_header("Referer", referer.to_string());
        }

        if let Some(challenges) = challenges {
            if let Some(challenge) = auth::select_challenge(challenges) {
                let (username, password) = self.credentials(iri.host());
                if let Some(value) = auth::authorization(
                    challenge,
                    method.as_str(),
                    &iri.escaped_resource(),
                    &username,
                    &password,
                ) {
                    req.add_header("Authorization", value);
                }
            }
        }

        if let Some(part) = part {
            let mut from = itoa::Buffer::new();
            let mut to = itoa::Buffer::new();
            req.add_header(
                "Range",
                format!(
                    "bytes={}-{}",
                    from.format(part.position),
                    to.format(part.position + part.length - 1)
                ),
            );
        }

        if config.cookies {
            if let Some(cookies) = self.ctx.cookies.request_header_for(iri, self.ctx.now()) {
                req.add_header("Cookie", cookies);
            }
        }

        for (name, value) in &config.headers {
            req.add_header(name, value.clone());
        }

        if let Some(body) = body {
            let mut buf = itoa::Buffer::new();
            req.add_header("Content-Type", "application/x-www-form-urlencoded");
            req.add_header("Content-Length", buf.format(body.len()).to_owned());
            req.body = Some(body);
        }

        req
    }

    fn credentials(&self, host: &str) -> (String, String) {
        let config = &self.ctx.config;
        if let Some(username) = &config.http_username {
            return (
                username.clone(),
                config.http_password.clone().unwrap_or_default(),
            );
        }
        if let Some(netrc) = self.ctx.netrc() {
            if let Some((login, password)) = netrc.lookup(host) {
                return (login.to_owned(), password.to_owned());
            }
        }
        (String::new(), String::new())
    }

    fn exchange(&mut self, req: &Request, via_proxy: bool) -> Result<Response, HttpError> {
        let ctx = Arc::clone(&self.ctx);
        let Some(conn) = self.conn.as_mut() else {
            return Err(HttpError::Io(std::io::ErrorKind::NotConnected.into()));
        };

        conn.write_all(&req.emit(via_proxy))?;

        let mut sink = CollectSink::default();
        let opts = ResponseOpts {
            keep_header: ctx.config.save_headers,
            gzip_workaround: ctx.config.broken_server_gzip_workaround,
        };
        let mut resp = get_response(
            conn,
            req.method,
            opts,
            &mut sink,
            ctx.codecs.as_deref(),
            ctx.now(),
        )?;
        resp.body = sink.buf.freeze();
        Ok(resp)
    }
}

// ===== helpers =====

fn snapshot(slot: &Slot) -> JobView {
    let job = lock_job(slot);
    JobView {
        id: job.id,
        uri: Arc::clone(&job.uri),
        referer: job.referer.clone(),
        level: job.level,
        redirect_level: job.redirect_level,
        local_path: job.local_path.clone(),
        head_first: job.head_first,
        sitemap: job.sitemap,
        robots: job.robots,
        host: job.host,
    }
}

fn lock_job(slot: &Slot) -> std::sync::MutexGuard<'_, crate::job::Job> {
    match slot.job.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// `min(attempt * 1s, waitretry)`; the first attempt never sleeps.
fn backoff(tries: u32, waitretry: Duration) -> Duration {
    Duration::from_secs(tries as u64).min(waitretry)
}

/// `--random-wait` spreads the configured wait over 0.5x..1.5x.
fn politeness_wait(wait: Duration, random: bool) -> Duration {
    if !random {
        return wait;
    }
    use rand::Rng;
    let ms = wait.as_millis().max(1) as u64;
    Duration::from_millis(rand::rng().random_range(0..ms) + ms / 2)
}

fn post_body(config: &Config) -> Option<Vec<u8>> {
    if let Some(data) = &config.post_data {
        return Some(data.clone().into_bytes());
    }
    if let Some(path) = &config.post_file {
        match std::fs::read(path) {
            Ok(data) => return Some(data),
            Err(err) => error!("failed to read post file '{}' ({err})", path.display()),
        }
    }
    None
}

fn gunzip(data: &Bytes) -> Option<Vec<u8>> {
    use std::io::Write;
    let mut decoder = flate2::write::GzDecoder::new(Vec::new());
    decoder.write_all(data).ok()?;
    decoder.finish().ok()
}

/// Nested sitemaps keep the sitemap treatment; ordinary pages do not.
fn looks_like_sitemap(uri: &Uri) -> bool {
    let path = uri.path().to_ascii_lowercase();
    path.ends_with(".xml") || path.ends_with(".xml.gz") || path.ends_with("sitemap")
}

/// Compare the assembled file against the strongest available digest.
/// Nothing to check counts as valid.
fn validate_file(path: &std::path::Path, digests: &[crate::headers::Digest]) -> bool {
    if digests.is_empty() {
        return true;
    }
    let Ok(data) = std::fs::read(path) else {
        return false;
    };

    let pick = |name: &str| {
        digests
            .iter()
            .find(|digest| digest.algorithm.eq_ignore_ascii_case(name))
    };

    if let Some(digest) = pick("sha-256") {
        let hash: [u8; 32] = sha2::Sha256::digest(&data).into();
        return digest_matches(&digest.encoded, &hash);
    }
    if let Some(digest) = pick("md5") {
        let hash = md5::compute(&data).0;
        return digest_matches(&digest.encoded, &hash);
    }
    warning!("no supported digest among {} entries, skipping check", digests.len());
    true
}

/// RFC 3230 digests are base64; accept hex spellings too.
fn digest_matches(encoded: &str, hash: &[u8]) -> bool {
    if let Ok(decoded) = BASE64.decode(encoded.trim()) {
        if decoded == hash {
            return true;
        }
    }
    let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
    encoded.trim().eq_ignore_ascii_case(&hex)
}
