//! Static mount table backend.
//!
//! At most one line per mount point: installing an entry first drops every
//! line whose mount-point field matches, so repeated runs never stack up
//! duplicates.

use super::cleanup::Cleanup;
use super::constants::{CONFIG_FILE_MODE, FSTAB_BOOT_FLAGS, FS_TYPE};
use super::error::{IoContext, Result};
use super::files;
use super::mountspec::MountSpec;
use log::info;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One static table line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// `//host/share`
    pub device: String,
    /// Local mount point
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
    /// Mount options including boot-time flags
    pub options: String,
    /// dump field
    pub dump: u8,
    /// fsck pass field
    pub pass: u8,
}

impl FstabEntry {
    /// The entry for a negotiated mount, with deferred, automount-on-access
    /// boot flags appended.
    pub fn for_spec(spec: &MountSpec) -> Self {
        Self {
            device: spec.device(),
            mount_point: spec.mount_point().to_path_buf(),
            fs_type: FS_TYPE.to_string(),
            options: spec.options().render_with(FSTAB_BOOT_FLAGS),
            dump: 0,
            pass: 0,
        }
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.device,
            self.mount_point.display(),
            self.fs_type,
            self.options,
            self.dump,
            self.pass
        )
    }
}

/// Whether `line` declares `mount_point` in its second field.
pub fn references(line: &str, mount_point: &Path) -> bool {
    let line = line.trim_start();
    if line.starts_with('#') {
        return false;
    }
    line.split_whitespace()
        .nth(1)
        .is_some_and(|field| Path::new(field) == mount_point)
}

/// Drops every line referencing `mount_point`; returns the new contents
/// and how many lines were dropped.
pub fn remove_entries(contents: &str, mount_point: &Path) -> (String, usize) {
    let mut removed = 0;
    let mut kept = String::with_capacity(contents.len());
    for line in contents.lines() {
        if references(line, mount_point) {
            removed += 1;
        } else {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    (kept, removed)
}

/// Replaces any lines for the entry's mount point with `entry`.
pub fn upsert(contents: &str, entry: &FstabEntry) -> String {
    let (mut updated, _) = remove_entries(contents, &entry.mount_point);
    updated.push_str(&entry.to_string());
    updated.push('\n');
    updated
}

/// The table file.
#[derive(Debug, Clone)]
pub struct FstabFile {
    path: PathBuf,
    dry_run: bool,
}

impl FstabFile {
    /// The table at `path`; with `dry_run`, nothing is written.
    pub fn new(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            path: path.into(),
            dry_run,
        }
    }

    /// Path of the table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents; a missing table reads as empty.
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            other => other.context_io(|| format!("cannot read {}", self.path.display())),
        }
    }

    fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let backup = files::backup_file(&self.path, CONFIG_FILE_MODE)?;
        info!("Backed up {} to {}", self.path.display(), backup.display());
        Ok(Some(backup))
    }

    /// Backs up the table and installs `entry` as the only line for its
    /// mount point. Returns the backup path.
    pub fn install(&self, entry: &FstabEntry, cleanup: &Cleanup) -> Result<Option<PathBuf>> {
        if self.dry_run {
            info!("[dry-run] would back up {}", self.path.display());
            info!("[dry-run] would write to {}: {}", self.path.display(), entry);
            return Ok(None);
        }
        let contents = self.read()?;
        let backup = self.backup()?;
        files::write_atomic(
            &self.path,
            &upsert(&contents, entry),
            CONFIG_FILE_MODE,
            true,
            cleanup,
        )?;
        info!("Added {} entry for {}", self.path.display(), entry.mount_point.display());
        Ok(backup)
    }

    /// Removes every line for `mount_point`, backing up first. Returns the
    /// number of lines removed; nothing is touched when there are none.
    pub fn remove(&self, mount_point: &Path, cleanup: &Cleanup) -> Result<usize> {
        let contents = self.read()?;
        let (updated, removed) = remove_entries(&contents, mount_point);
        if removed == 0 {
            return Ok(0);
        }
        if self.dry_run {
            info!(
                "[dry-run] would remove {} line(s) for {} from {}",
                removed,
                mount_point.display(),
                self.path.display()
            );
            return Ok(removed);
        }
        self.backup()?;
        files::write_atomic(&self.path, &updated, CONFIG_FILE_MODE, true, cleanup)?;
        info!(
            "Removed {} line(s) for {} from {}",
            removed,
            mount_point.display(),
            self.path.display()
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::credentials::Username;

    const EXISTING: &str = "\
# /etc/fstab
UUID=1234 / ext4 defaults 0 1
//old.your-storagebox.de/backup /mnt/storagebox cifs vers=2.1,rw 0 0
# /mnt/storagebox commented out stays
tmpfs /mnt/storagebox-other tmpfs defaults 0 0
";

    fn entry() -> FstabEntry {
        let spec = MountSpec::new(
            &Username::parse("u1").unwrap(),
            PathBuf::from("/mnt/storagebox"),
            Path::new("/etc/storagebox-credentials.txt"),
            0,
            0,
            false,
        )
        .with_version("3.1.1");
        FstabEntry::for_spec(&spec)
    }

    #[test]
    fn test_entry_line_format() {
        let line = entry().to_string();
        assert!(line.starts_with("//u1.your-storagebox.de/backup /mnt/storagebox cifs vers=3.1.1,"));
        assert!(line.ends_with(",_netdev,x-systemd.automount,x-systemd.idle-timeout=60 0 0"));
    }

    #[test]
    fn test_references_matches_mount_point_field_only() {
        let mp = Path::new("/mnt/storagebox");
        assert!(references("//h/s /mnt/storagebox cifs rw 0 0", mp));
        assert!(references("  //h/s\t/mnt/storagebox/ cifs rw 0 0", mp));
        assert!(!references("# //h/s /mnt/storagebox cifs rw 0 0", mp));
        assert!(!references("//h/s /mnt/storagebox-other cifs rw 0 0", mp));
        assert!(!references("/mnt/storagebox /data none bind 0 0", mp));
    }

    #[test]
    fn test_upsert_replaces_existing_line() {
        let updated = upsert(EXISTING, &entry());
        let matching: Vec<&str> = updated
            .lines()
            .filter(|l| references(l, Path::new("/mnt/storagebox")))
            .collect();
        assert_eq!(matching, vec![entry().to_string()]);
        assert!(updated.contains("UUID=1234 / ext4 defaults 0 1"));
        assert!(updated.contains("# /mnt/storagebox commented out stays"));
        assert!(updated.contains("/mnt/storagebox-other"));
    }

    #[test]
    fn test_install_twice_keeps_one_line() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fstab");
        fs::write(&path, EXISTING)?;
        let table = FstabFile::new(&path, false);
        let cleanup = Cleanup::new();

        let first_backup = table.install(&entry(), &cleanup)?;
        table.install(&entry(), &cleanup)?;

        let contents = fs::read_to_string(&path)?;
        let count = contents
            .lines()
            .filter(|l| references(l, Path::new("/mnt/storagebox")))
            .count();
        assert_eq!(count, 1);
        assert!(first_backup.is_some());
        Ok(())
    }

    #[test]
    fn test_remove_without_matches_touches_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fstab");
        fs::write(&path, "UUID=1234 / ext4 defaults 0 1\n")?;
        let table = FstabFile::new(&path, false);

        assert_eq!(table.remove(Path::new("/mnt/storagebox"), &Cleanup::new())?, 0);
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_dry_run_install_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fstab");
        let table = FstabFile::new(&path, true);
        table.install(&entry(), &Cleanup::new())?;
        assert!(!path.exists());
        Ok(())
    }
}
