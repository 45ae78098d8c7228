//! Atomic local writes.
//!
//! Everything that touches a save target runs under the single
//! `savefile` mutex so workers racing on the same path keep a consistent
//! ordering. Directory trees are created mode 0755 with the historic
//! `name.N` un-clash fallback, clobbering rotates backups when asked,
//! `--no-clobber` never touches an existing target, and `206` resumes
//! append.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use crate::context::{Context, exit};
use crate::http::Response;
use crate::log::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Truncate,
    Append,
}

/// Write `resp.body` (and optionally the raw header) to `fname` under the
/// active write policy. A `None` target means no file is wanted.
pub fn save_response(ctx: &Context, resp: &Response, fname: Option<&Path>, mode: SaveMode) {
    let config = &ctx.config;

    let Some(fname) = fname else { return };

    if config.spider {
        debug!("not saved '{}' (spider mode enabled)", fname.display());
        return;
    }

    let name = fname.to_string_lossy().into_owned();
    if name.ends_with('/') {
        debug!("not saved '{name}' (file is a directory)");
        return;
    }

    let size = resp.body.len() as u64
        + if config.save_headers {
            resp.header.as_ref().map_or(0, |h| h.len() as u64)
        } else {
            0
        };
    // optimistic: the write crossing the line still lands
    let old = ctx.quota_add(size);
    if config.quota > 0 && old >= config.quota {
        debug!("not saved '{name}' (quota of {} reached)", config.quota);
        return;
    }

    let mut mode = mode;
    if let Some(output) = &config.output_document {
        if fname == output.as_path() {
            if output.as_os_str() == "-" {
                write_stdout(ctx, resp);
                return;
            }
            if config.delete_after {
                debug!("not saved '{name}' (--delete-after)");
                return;
            }
            mode = SaveMode::Append;
        }
    }

    // --adjust-extension
    let mut fname = PathBuf::from(fname);
    if config.adjust_extension {
        if let Some(ext) = extension_for(resp) {
            if !name.to_ascii_lowercase().ends_with(ext) {
                let mut adjusted = fname.into_os_string();
                adjusted.push(ext);
                fname = PathBuf::from(adjusted);
            }
        }
    }
    let name = fname.to_string_lossy().into_owned();

    // the post-download pattern check sees the local name
    if !ctx.accept.is_empty() && !ctx.accept.matches(&name) {
        debug!("not saved '{name}' (doesn't match accept pattern)");
        return;
    }
    if ctx.reject.matches(&name) {
        debug!("not saved '{name}' (matches reject pattern)");
        return;
    }

    let _guard = match ctx.savefile_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    // resolve the open flavor
    let mut multiple = false;
    let mut flavor = mode;
    let mut exclusive = false;
    if config.timestamping {
        // keep truncating, the mtime race was decided by the probe
    } else if !config.clobber || (config.recursive && config.directories) {
        if mode == SaveMode::Truncate && !(config.recursive && config.directories) {
            exclusive = true;
        }
    } else if mode != SaveMode::Append {
        // clobbering generates .1, .2, ... versions
        multiple = true;
        exclusive = true;

        if config.backups > 0 {
            for it in (1..=config.backups).rev() {
                let src = if it > 1 {
                    PathBuf::from(format!("{name}.{}", it - 1))
                } else {
                    fname.clone()
                };
                let dst = PathBuf::from(format!("{name}.{it}"));
                match fs::rename(&src, &dst) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => error!("failed to rename {} to {} ({err})", src.display(), dst.display()),
                }
            }
            multiple = false;
            exclusive = false;
        }
    }
    if exclusive {
        flavor = SaveMode::Truncate;
    }

    mkdir_path(ctx, &fname);

    let open = |path: &Path| -> io::Result<File> {
        let mut opts = OpenOptions::new();
        opts.write(true);
        match flavor {
            SaveMode::Append => opts.create(true).append(true),
            SaveMode::Truncate if exclusive => opts.create_new(true),
            SaveMode::Truncate => opts.create(true).truncate(true),
        };
        opts.open(path)
    };

    let mut target = fname.clone();
    let mut file = open(&target);
    if file.is_err() {
        // find a non-existing filename
        for fnum in 1..=999 {
            let retry = match file.as_ref().err().map(io::Error::kind) {
                Some(io::ErrorKind::AlreadyExists) if multiple => true,
                Some(io::ErrorKind::IsADirectory) => true,
                _ => false,
            };
            if !retry {
                break;
            }
            target = PathBuf::from(format!("{name}.{fnum}"));
            file = open(&target);
        }
    }

    match file {
        Ok(mut file) => {
            let mut result = Ok(());
            if config.save_headers {
                if let Some(header) = &resp.header {
                    result = file.write_all(header);
                }
            }
            if result.is_ok() {
                result = file.write_all(&resp.body);
            }
            if let Err(err) = result {
                error!("failed to write file {} ({err})", target.display());
                ctx.set_exit_status(exit::IO);
                return;
            }

            if flavor == SaveMode::Truncate && resp.last_modified > 0 {
                let mtime = UNIX_EPOCH + Duration::from_secs(resp.last_modified as u64);
                if let Err(err) = file.set_modified(mtime) {
                    debug!("failed to set mtime on {} ({err})", target.display());
                }
            }

            if mode == SaveMode::Append {
                info!("appended to '{}'", target.display());
            } else {
                info!("saved '{}'", target.display());
            }
        }
        Err(err) => match err.kind() {
            io::ErrorKind::AlreadyExists => {
                error!("file '{name}' already there; not retrieving");
            }
            io::ErrorKind::IsADirectory => {
                info!("directory / file name clash - not saving '{name}'");
            }
            _ => {
                error!("failed to open '{name}' ({err})");
                ctx.set_exit_status(exit::IO);
            }
        },
    }
}

fn write_stdout(ctx: &Context, resp: &Response) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut result = Ok(());
    if ctx.config.save_headers {
        if let Some(header) = &resp.header {
            result = out.write_all(header);
        }
    }
    if result.is_ok() {
        result = out.write_all(&resp.body);
    }
    if let Err(err) = result {
        error!("failed to write to STDOUT ({err})");
        ctx.set_exit_status(exit::IO);
    }
}

fn extension_for(resp: &Response) -> Option<&'static str> {
    let mime = resp.content_type.as_deref()?;
    if mime.eq_ignore_ascii_case("text/html") || mime.eq_ignore_ascii_case("application/xhtml+xml")
    {
        Some(".html")
    } else if mime.eq_ignore_ascii_case("text/css") {
        Some(".css")
    } else if mime.eq_ignore_ascii_case("application/atom+xml") {
        Some(".atom")
    } else if mime.eq_ignore_ascii_case("application/rss+xml") {
        Some(".rss")
    } else {
        None
    }
}

/// Create every directory along `path`, mode 0755. A regular file sitting
/// where a directory must go is moved to the first free `name.N`.
fn mkdir_path(ctx: &Context, path: &Path) {
    let Some(parent) = path.parent() else { return };
    let mut dir = PathBuf::new();

    for component in parent.components() {
        dir.push(component);
        if dir.as_os_str().is_empty() || dir.as_os_str() == "/" {
            continue;
        }
        match fs::create_dir(&dir) {
            Ok(()) => debug!("created dir {}", dir.display()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if dir.is_file() {
                    // a file is in the way, move it and retry
                    let mut renamed = false;
                    for fnum in 1..=999 {
                        let dst = PathBuf::from(format!("{}.{fnum}", dir.display()));
                        if !dst.exists() && fs::rename(&dir, &dst).is_ok() {
                            renamed = true;
                            break;
                        }
                    }
                    if !renamed || fs::create_dir(&dir).is_err() {
                        error!("failed to make directory '{}'", dir.display());
                        ctx.set_exit_status(exit::IO);
                        return;
                    }
                }
            }
            Err(err) => {
                error!("failed to make directory '{}' ({err})", dir.display());
                ctx.set_exit_status(exit::IO);
                return;
            }
        }
    }
}

/// Positional write for one finished part; parts never overlap.
pub fn write_part(path: &Path, position: u64, data: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    let file = OpenOptions::new().write(true).create(true).open(path)?;
    file.write_all_at(data, position)
}

pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// POSIX mtime of `path`, 0 when unknown.
pub fn file_mtime(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
