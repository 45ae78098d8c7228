//! Download statistics, updated with atomic fetch-and-add.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub downloads: AtomicU64,
    pub chunks: AtomicU64,
    pub redirects: AtomicU64,
    pub not_modified: AtomicU64,
    pub errors: AtomicU64,
}

impl Stats {
    pub fn count(&self, code: u16, is_part: bool) {
        match code {
            200 if is_part => self.chunks.fetch_add(1, Ordering::Relaxed),
            200 | 206 => self.downloads.fetch_add(1, Ordering::Relaxed),
            301 | 302 | 303 | 307 | 308 => self.redirects.fetch_add(1, Ordering::Relaxed),
            304 => self.not_modified.fetch_add(1, Ordering::Relaxed),
            _ => self.errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.downloads.load(Ordering::Relaxed),
            self.chunks.load(Ordering::Relaxed),
            self.redirects.load(Ordering::Relaxed),
            self.not_modified.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}
