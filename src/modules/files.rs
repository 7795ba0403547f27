//! Backup and atomic replacement of configuration files.

use super::cleanup::Cleanup;
use super::error::{Error, IoContext, Result};
use chrono::Local;
use log::debug;
use nix::unistd::{fchown, Gid, Uid};
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

const MAX_BACKUPS_PER_SECOND: u32 = 1000;

/// Path of a timestamped backup for `path`: `<path>.bak.<YYYYmmdd-HHMMSS>`,
/// with `.<n>` appended for the `n`th extra backup within the same second.
pub fn backup_path(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".bak.{}", Local::now().format("%Y%m%d-%H%M%S")));
    if n > 0 {
        name.push(format!(".{}", n));
    }
    PathBuf::from(name)
}

/// Copies `path` to a new timestamped backup created with `mode`.
///
/// The backup is created with its final mode, so a backup of a secret is
/// never readable by anyone the original was not readable by. An existing
/// backup is never overwritten.
pub fn backup_file(path: &Path, mode: u32) -> Result<PathBuf> {
    let mut source = fs::File::open(path).context_io(|| format!("cannot read {}", path.display()))?;
    let mut n = 0;
    let (target, mut dest) = loop {
        let target = backup_path(path, n);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&target)
        {
            Ok(dest) => break (target, dest),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && n < MAX_BACKUPS_PER_SECOND => {
                n += 1;
            }
            Err(e) => {
                return Err(Error::io(format!("cannot create backup {}", target.display()), e))
            }
        }
    };
    io::copy(&mut source, &mut dest).context_io(|| format!("cannot write backup {}", target.display()))?;
    debug!("backed up {} to {}", path.display(), target.display());
    Ok(target)
}

/// Replaces `path` with `contents` through a temporary file in the same
/// directory, renamed into place once complete.
///
/// The temporary file is created `0600` and only then set to `mode`, so no
/// broader mode is ever observable. With `root_owned`, ownership is set to
/// root before the rename when running as root.
pub fn write_atomic(
    path: &Path,
    contents: &str,
    mode: u32,
    root_owned: bool,
    cleanup: &Cleanup,
) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("/"));
    fs::create_dir_all(dir).context_io(|| format!("cannot create {}", dir.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".boxmount-")
        .tempfile_in(dir)
        .context_io(|| format!("cannot create temporary file in {}", dir.display()))?;
    let tmp_path = tmp.path().to_path_buf();
    cleanup.track_file(&tmp_path);

    let result = (|| -> Result<()> {
        let file = tmp.as_file_mut();
        file.set_permissions(Permissions::from_mode(mode))
            .context_io(|| format!("cannot set mode on {}", tmp_path.display()))?;
        if root_owned && Uid::effective().is_root() {
            fchown(file.as_raw_fd(), Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))
                .map_err(io::Error::from)
                .context_io(|| format!("cannot chown {}", tmp_path.display()))?;
        }
        file.write_all(contents.as_bytes())
            .context_io(|| format!("cannot write {}", tmp_path.display()))?;
        file.sync_all()
            .context_io(|| format!("cannot sync {}", tmp_path.display()))?;
        Ok(())
    })();

    if let Err(e) = result {
        cleanup.forget_file(&tmp_path);
        return Err(e);
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .context_io(|| format!("cannot replace {}", path.display()))?;
    cleanup.forget_file(&tmp_path);
    debug!("wrote {} (mode {:o})", path.display(), mode);
    Ok(())
}
