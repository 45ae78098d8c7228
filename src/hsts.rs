//! HSTS store ([RFC6797]).
//!
//! Hosts that sent `Strict-Transport-Security` over https are pinned: a
//! later plain-http URL for a matching host is upgraded to https before
//! dialing. Saving merges with the on-disk file so parallel processes do
//! not lose each other's pins.
//!
//! [RFC6797]: <https://www.rfc-editor.org/rfc/rfc6797.html>

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use fnv::FnvHashMap;

use crate::log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    expires: i64,
    include_subdomains: bool,
}

#[derive(Debug, Default)]
pub struct HstsDb {
    entries: Mutex<FnvHashMap<(String, u16), Entry>>,
}

impl HstsDb {
    fn lock(&self) -> MutexGuard<'_, FnvHashMap<(String, u16), Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a pin. `max_age` is the absolute expiry; 0 removes the
    /// entry.
    pub fn add(&self, host: &str, port: u16, max_age: i64, include_subdomains: bool) {
        let key = (host.to_ascii_lowercase(), effective_port(port));
        let mut entries = self.lock();
        if max_age == 0 {
            if entries.remove(&key).is_some() {
                debug!("hsts removed {}:{}", key.0, key.1);
            }
        } else {
            entries.insert(
                key,
                Entry { expires: max_age, include_subdomains },
            );
        }
    }

    /// Is `host:port` pinned (directly, or as subdomain of an
    /// `includeSubDomains` pin)?
    pub fn host_match(&self, host: &str, port: u16, now: i64) -> bool {
        let host = host.to_ascii_lowercase();
        let port = effective_port(port);
        let entries = self.lock();

        if let Some(entry) = entries.get(&(host.clone(), port)) {
            if entry.expires > now {
                return true;
            }
        }
        // walk parent domains for includeSubDomains pins
        let mut rest = host.as_str();
        while let Some(at) = rest.find('.') {
            rest = &rest[at + 1..];
            if let Some(entry) = entries.get(&(rest.to_owned(), port)) {
                if entry.include_subdomains && entry.expires > now {
                    return true;
                }
            }
        }
        false
    }

    /// Merge the on-disk entries and write back the union, atomically.
    pub fn save(&self, path: &Path, now: i64) -> io::Result<()> {
        crate::state::update_file(
            path,
            |reader| self.merge_from(reader, now),
            |writer| self.write_to(writer, now),
        )
    }

    pub fn load(&self, path: &Path) -> io::Result<()> {
        let now = 0;
        crate::state::load_file(path, |reader| self.merge_from(reader, now))
    }

    fn merge_from(&self, reader: &mut dyn BufRead, now: i64) -> io::Result<()> {
        let mut entries = self.lock();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // host port expires include-subdomains
            let mut fields = line.split_whitespace();
            let (Some(host), Some(port), Some(expires), Some(incl)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let (Ok(port), Ok(expires)) = (port.parse::<u16>(), expires.parse::<i64>()) else {
                continue;
            };
            if expires <= now {
                continue;
            }
            entries
                .entry((host.to_ascii_lowercase(), port))
                .or_insert(Entry { expires, include_subdomains: incl == "1" });
        }
        Ok(())
    }

    fn write_to(&self, writer: &mut dyn Write, now: i64) -> io::Result<()> {
        writeln!(writer, "# HSTS 1.0 file")?;
        let entries = self.lock();
        for ((host, port), entry) in entries.iter() {
            if entry.expires <= now {
                continue;
            }
            writeln!(
                writer,
                "{host} {port} {} {}",
                entry.expires,
                if entry.include_subdomains { 1 } else { 0 }
            )?;
        }
        Ok(())
    }
}

/// Pins recorded for the https default port apply to the http default
/// port lookup as well.
fn effective_port(port: u16) -> u16 {
    if port == 80 { 443 } else { port }
}
