//! Atomic persisted-state files.
//!
//! Cookie and HSTS files are rewritten with load-modify-save under an
//! advisory lock so concurrent processes do not shred each other: the
//! lock file lives in the system temp directory, named from the target's
//! basename and the calling user's id, and the new content lands via
//! write-to-temp-then-rename.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::log::error;

fn tempdir() -> PathBuf {
    for var in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
        if let Some(dir) = std::env::var_os(var) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
    }
    PathBuf::from("/tmp")
}

struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(target: &Path) -> io::Result<FileLock> {
        let basename = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let uid = unsafe { libc::getuid() };
        let path = tempdir().join(format!("{basename}_lck_{uid}"));

        let file = File::create(&path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

/// Reload `fname` through `load`, then atomically replace it with what
/// `save` writes, all under the advisory lock.
pub fn update_file(
    fname: &Path,
    load: impl FnOnce(&mut dyn BufRead) -> io::Result<()>,
    save: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> io::Result<()> {
    let lock = FileLock::acquire(fname)?;
    load_locked(fname, load)?;
    save_locked(fname, save, lock)
}

/// Read `fname` under the lock without rewriting it.
pub fn load_file(fname: &Path, load: impl FnOnce(&mut dyn BufRead) -> io::Result<()>) -> io::Result<()> {
    let _lock = FileLock::acquire(fname)?;
    load_locked(fname, load)
}

/// Atomically replace `fname` with what `save` writes.
pub fn save_file(fname: &Path, save: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
    let lock = FileLock::acquire(fname)?;
    save_locked(fname, save, lock)
}

fn load_locked(fname: &Path, load: impl FnOnce(&mut dyn BufRead) -> io::Result<()>) -> io::Result<()> {
    match File::open(fname) {
        Ok(file) => {
            let mut reader = BufReader::new(file);
            load(&mut reader)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            error!("failed to read open '{}' ({err})", fname.display());
            Err(err)
        }
    }
}

fn save_locked(
    fname: &Path,
    save: impl FnOnce(&mut dyn Write) -> io::Result<()>,
    lock: FileLock,
) -> io::Result<()> {
    let _lock = lock;
    let suffix: u32 = rand::rng().random();
    let tmpfile = fname.with_file_name(format!(
        "{}.{:08x}",
        fname
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        suffix
    ));

    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmpfile)?);
        save(&mut writer)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmpfile, fname)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmpfile);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::update_file;
    use std::io::BufRead;

    #[test]
    fn test_load_then_replace() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.txt");
        std::fs::write(&target, "one\ntwo\n").unwrap();

        let mut seen = Vec::new();
        update_file(
            &target,
            |reader| {
                for line in reader.lines() {
                    seen.push(line?);
                }
                Ok(())
            },
            |writer| {
                use std::io::Write;
                writeln!(writer, "three")
            },
        )
        .unwrap();

        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "three\n");
        // no temp litter
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh.txt");
        update_file(&target, |_| Ok(()), |writer| {
            use std::io::Write;
            writeln!(writer, "data")
        })
        .unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "data\n");
    }
}
