//! Work items.
//!
//! A [`Job`] is constructed when a URL passes the recursion filters, owned
//! by the queue until a worker claims it, mutated only by its claimant and
//! destroyed after completion. Chunked parallel downloads attach a
//! [`Metalink`] whose [`Part`]s are claimed individually by workers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::headers::Digest;
use crate::hosts::HostId;
use crate::uri::Uri;

pub type JobId = u64;

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub uri: Arc<Uri>,
    pub referer: Option<Arc<Uri>>,
    /// Length of the redirect chain that led here.
    pub redirect_level: u32,
    /// Recursion depth, 0 for seeds.
    pub level: u32,
    pub local_path: Option<PathBuf>,
    /// Probe with HEAD before deciding on a GET.
    pub head_first: bool,
    /// Parse the body as a sitemap regardless of Content-Type.
    pub sitemap: bool,
    /// This is a synthetic `/robots.txt` fetch holding back a host.
    pub robots: bool,
    pub host: Option<HostId>,
    pub metalink: Option<Metalink>,
}

impl Job {
    pub fn new(id: JobId, uri: Arc<Uri>) -> Job {
        Job {
            id,
            uri,
            referer: None,
            redirect_level: 0,
            level: 0,
            local_path: None,
            head_first: false,
            sitemap: false,
            robots: false,
            host: None,
            metalink: None,
        }
    }
}

/// A byte range of a larger resource downloaded independently.
#[derive(Debug, Clone)]
pub struct Part {
    pub id: usize,
    pub position: u64,
    pub length: u64,
    pub done: bool,
    pub inuse: bool,
}

/// Mirror list plus piece table for a parallel download.
#[derive(Debug)]
pub struct Metalink {
    pub name: PathBuf,
    pub size: u64,
    pub mirrors: Vec<Arc<Uri>>,
    pub parts: Vec<Part>,
    pub digests: Vec<Digest>,
}

impl Metalink {
    /// Synthesize a single-mirror metalink for `--chunk-size` splitting:
    /// `ceil(size / chunk_size)` parts over the current URL.
    pub fn chunked(name: PathBuf, uri: Arc<Uri>, size: u64, chunk_size: u64) -> Metalink {
        let npieces = size.div_ceil(chunk_size);
        let parts = (0..npieces)
            .map(|it| Part {
                id: it as usize,
                position: it * chunk_size,
                length: chunk_size.min(size - it * chunk_size),
                done: false,
                inuse: false,
            })
            .collect();
        Metalink {
            name,
            size,
            mirrors: vec![uri],
            parts,
            digests: Vec::new(),
        }
    }

    pub fn all_done(&self) -> bool {
        self.parts.iter().all(|p| p.done)
    }
}
