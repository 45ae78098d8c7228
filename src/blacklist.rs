//! Process-wide dedup sets.
//!
//! The [`Blacklist`] holds every canonical URL ever enqueued: an insert
//! that returns `false` means some worker already owns that URL and the
//! candidate is dropped. [`KnownUrls`] short-circuits earlier, on the raw
//! extracted link text, before relative-to-absolute resolution is even
//! attempted. [`EtagSet`] deduplicates spider probes by validator.

use std::sync::{Arc, Mutex};

use fnv::FnvHashSet;

use crate::uri::Uri;

/// Canonical URLs already queued, for the lifetime of the process.
#[derive(Debug, Default)]
pub struct Blacklist {
    set: Mutex<FnvHashSet<Arc<Uri>>>,
}

impl Blacklist {
    /// `true` when `uri` was new; `false` drops the duplicate.
    pub fn add(&self, uri: &Arc<Uri>) -> bool {
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.insert(Arc::clone(uri))
    }

    pub fn contains(&self, uri: &Uri) -> bool {
        let set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.contains(uri)
    }

    pub fn len(&self) -> usize {
        match self.set.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw link texts already considered.
#[derive(Debug, Default)]
pub struct KnownUrls {
    set: Mutex<FnvHashSet<String>>,
}

impl KnownUrls {
    /// `true` when `text` enters the candidate pipeline for the first
    /// time.
    pub fn add(&self, text: &str) -> bool {
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if set.contains(text) {
            return false;
        }
        set.insert(text.to_owned())
    }
}

/// ETags seen by spider probes.
#[derive(Debug, Default)]
pub struct EtagSet {
    set: Mutex<FnvHashSet<String>>,
}

impl EtagSet {
    /// `false` when the validator was already recorded.
    pub fn add(&self, etag: String) -> bool {
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.insert(etag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_once() {
        let blacklist = Blacklist::default();
        let a = Arc::new(Uri::parse("http://example.com/x").unwrap());
        // same canonical URL spelled differently
        let b = Arc::new(Uri::parse("http://EXAMPLE.com:80/x#frag").unwrap());

        assert!(blacklist.add(&a));
        assert!(!blacklist.add(&a));
        assert!(!blacklist.add(&b));
        assert_eq!(blacklist.len(), 1);
    }

    #[test]
    fn test_known_urls() {
        let known = KnownUrls::default();
        assert!(known.add("../pic.jpeg"));
        assert!(!known.add("../pic.jpeg"));
        assert!(known.add("pic.jpeg"));
    }

    #[test]
    fn test_concurrent_single_winner() {
        let blacklist = Arc::new(Blacklist::default());
        let uri = Arc::new(Uri::parse("http://example.com/race").unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let blacklist = Arc::clone(&blacklist);
            let uri = Arc::clone(&uri);
            handles.push(std::thread::spawn(move || blacklist.add(&uri) as usize));
        }
        let winners: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(winners, 1);
    }
}
