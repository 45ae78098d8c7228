//! Per-host robots state.
//!
//! Hosts live in an arena indexed by hostname; jobs refer to their host by
//! [`HostId`], never by pointer, which keeps the host ↔ robots-job cycle
//! out of the ownership graph. While a host's `/robots.txt` is in flight,
//! every other candidate for that host parks on the host's deferred list.

use std::sync::{Arc, Mutex, MutexGuard};

use fnv::FnvHashMap;

use crate::job::JobId;
use crate::robots::Robots;
use crate::uri::Uri;

pub type HostId = usize;

/// A candidate held back until robots resolves. Carries what a re-filtered
/// enqueue needs.
#[derive(Debug, Clone)]
pub struct Deferred {
    pub uri: Arc<Uri>,
    pub referer: Option<Arc<Uri>>,
    pub level: u32,
}

#[derive(Debug, Default)]
pub struct HostRecord {
    pub key: String,
    /// Parsed robots rules, once the fetch completed.
    pub robots: Option<Robots>,
    /// The robots response (any status) has been processed.
    pub robots_done: bool,
    pub robots_job: Option<JobId>,
    pub deferred: Vec<Deferred>,
}

#[derive(Debug, Default)]
struct Inner {
    arena: Vec<HostRecord>,
    index: FnvHashMap<String, HostId>,
}

#[derive(Debug, Default)]
pub struct HostRegistry {
    inner: Mutex<Inner>,
}

impl HostRegistry {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `host` if unseen. `Ok(id)` on first sighting (the caller
    /// owes the arena a robots job), `Err(id)` when already present.
    pub fn add(&self, host: &str) -> Result<HostId, HostId> {
        let mut inner = self.lock();
        if let Some(&id) = inner.index.get(host) {
            return Err(id);
        }
        let id = inner.arena.len();
        inner.arena.push(HostRecord {
            key: host.to_owned(),
            ..HostRecord::default()
        });
        inner.index.insert(host.to_owned(), id);
        Ok(id)
    }

    pub fn get(&self, host: &str) -> Option<HostId> {
        self.lock().index.get(host).copied()
    }

    /// Run `f` over the host record.
    pub fn with<R>(&self, id: HostId, f: impl FnOnce(&mut HostRecord) -> R) -> R {
        let mut inner = self.lock();
        f(&mut inner.arena[id])
    }

    /// Robots resolved for `id`: store the rules and hand the deferred
    /// list back for release.
    pub fn finish_robots(&self, id: HostId, robots: Option<Robots>) -> Vec<Deferred> {
        let mut inner = self.lock();
        let record = &mut inner.arena[id];
        record.robots = robots;
        record.robots_done = true;
        record.robots_job = None;
        std::mem::take(&mut record.deferred)
    }

    /// Candidate path blocked by this host's disallow rules?
    pub fn disallowed(&self, id: HostId, path: &str) -> bool {
        let inner = self.lock();
        inner.arena[id]
            .robots
            .as_ref()
            .is_some_and(|robots| robots.disallows(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting() {
        let hosts = HostRegistry::default();
        let id = hosts.add("example.com").unwrap();
        assert_eq!(hosts.add("example.com"), Err(id));
        assert_eq!(hosts.get("example.com"), Some(id));
        assert_eq!(hosts.get("other.org"), None);
    }

    #[test]
    fn test_deferred_release() {
        let hosts = HostRegistry::default();
        let id = hosts.add("example.com").unwrap();
        let uri = Arc::new(Uri::parse("http://example.com/a").unwrap());
        hosts.with(id, |record| {
            record.robots_job = Some(7);
            record.deferred.push(Deferred { uri, referer: None, level: 1 });
        });

        let robots = Robots::parse("User-agent: *\nDisallow: /private/\n");
        let released = hosts.finish_robots(id, Some(robots));
        assert_eq!(released.len(), 1);
        assert!(hosts.with(id, |record| record.robots_done));
        assert!(hosts.with(id, |record| record.robots_job.is_none()));
        assert!(hosts.disallowed(id, "/private/x"));
        assert!(!hosts.disallowed(id, "/a"));
    }
}
