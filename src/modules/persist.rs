//! Persistence registrar.
//!
//! Records a mounted share for reboot survival through exactly one backend
//! per mount point. Activating a backend first removes whatever the other
//! backend (or an earlier run) left for the same mount point.
//!
//! Service-manager failures after the artifacts are written are reported as
//! [`Warning::Persistence`] and never undo the written files.

use super::cleanup::Cleanup;
use super::command::{CommandRunner, CommandSpec};
use super::constants::{CONFIG_FILE_MODE, CONTROL_TIMEOUT, QUERY_TIMEOUT};
use super::error::{IoContext, Result, Warning};
use super::files;
use super::fstab::{FstabEntry, FstabFile};
use super::mountspec::MountSpec;
use super::profile::SystemPaths;
use super::systemd::{self, UnitNames};
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PersistMethod {
    /// One line in the static mount table
    #[default]
    #[value(alias = "static-table")]
    Fstab,
    /// A mount unit plus an automount unit
    #[value(alias = "unit-based")]
    Systemd,
    /// Mounted for this session only
    None,
}

impl fmt::Display for PersistMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PersistMethod::Fstab => "fstab",
            PersistMethod::Systemd => "systemd",
            PersistMethod::None => "none",
        })
    }
}

/// The artifacts a backend left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PersistenceRecord {
    /// Static table line
    Fstab {
        /// Table that was edited
        table: PathBuf,
        /// Line that was installed
        line: String,
        /// Backup of the previous table
        backup: Option<PathBuf>,
    },
    /// Unit pair
    Systemd {
        /// `.mount` unit file
        mount_unit: PathBuf,
        /// `.automount` unit file
        automount_unit: PathBuf,
    },
    /// Nothing persisted
    None,
}

/// What teardown removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Removal {
    /// Whether the mount point was unmounted
    pub unmounted: bool,
    /// Static table lines removed
    pub table_lines: usize,
    /// Unit files deleted
    pub units: Vec<PathBuf>,
}

/// Writes and activates persistence artifacts.
pub struct Registrar<'a> {
    runner: &'a dyn CommandRunner,
    paths: &'a SystemPaths,
    cleanup: &'a Cleanup,
    dry_run: bool,
    warnings: Vec<Warning>,
}

impl<'a> Registrar<'a> {
    /// A registrar writing under `paths`; with `dry_run`, files are left
    /// untouched and commands go through `runner` only.
    pub fn new(
        runner: &'a dyn CommandRunner,
        paths: &'a SystemPaths,
        cleanup: &'a Cleanup,
        dry_run: bool,
    ) -> Self {
        Self {
            runner,
            paths,
            cleanup,
            dry_run,
            warnings: Vec::new(),
        }
    }

    /// Non-fatal findings so far.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Consumes the registrar, returning its warnings.
    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }

    fn table(&self) -> FstabFile {
        FstabFile::new(&self.paths.fstab, self.dry_run)
    }

    fn warn(&mut self, detail: String) {
        warn!("{}", detail);
        self.warnings.push(Warning::Persistence { detail });
    }

    /// Runs a service-manager or mount command; failures become warnings.
    async fn control(&mut self, command: CommandSpec) -> bool {
        match self.runner.run(&command, CONTROL_TIMEOUT).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                self.warn(format!("`{}` failed: {}", command, out.summary()));
                false
            }
            Err(e) => {
                self.warn(format!("`{}` could not run: {}", command, e));
                false
            }
        }
    }

    async fn is_mounted(&self, target: &Path) -> Result<bool> {
        let out = self
            .runner
            .run(&CommandSpec::mountpoint(target), QUERY_TIMEOUT)
            .await?;
        Ok(out.success())
    }

    /// Registers the mounted `spec` with `method`.
    pub async fn register(
        &mut self,
        spec: &MountSpec,
        method: PersistMethod,
    ) -> Result<PersistenceRecord> {
        match method {
            PersistMethod::Fstab => self.register_fstab(spec).await,
            PersistMethod::Systemd => self.register_units(spec).await,
            PersistMethod::None => {
                info!(
                    "Not persisting {}; it stays mounted until reboot",
                    spec.mount_point().display()
                );
                Ok(PersistenceRecord::None)
            }
        }
    }

    async fn register_fstab(&mut self, spec: &MountSpec) -> Result<PersistenceRecord> {
        let target = spec.mount_point();
        self.remove_units(target).await?;

        let entry = FstabEntry::for_spec(spec);
        let table = self.table();
        let backup = table.install(&entry, self.cleanup)?;
        self.control(CommandSpec::systemctl(["daemon-reload"])).await;

        // Remount through the table to prove the line works.
        info!("Verifying {} entry for {}", table.path().display(), target.display());
        if self.control(CommandSpec::umount(target)).await
            && !self.control(CommandSpec::mount_from_table(target)).await
        {
            self.warn(format!(
                "{} entry for {} did not mount; the line was kept for manual repair",
                table.path().display(),
                target.display()
            ));
            let restore = spec.mount_command(target);
            if !self.control(restore).await {
                self.cleanup.forget_mount(target);
            }
        }

        Ok(PersistenceRecord::Fstab {
            table: table.path().to_path_buf(),
            line: entry.to_string(),
            backup,
        })
    }

    async fn register_units(&mut self, spec: &MountSpec) -> Result<PersistenceRecord> {
        let target = spec.mount_point();
        self.table().remove(target, self.cleanup)?;

        let names = UnitNames::for_mount_point(target);
        let [mount_path, automount_path] = names.paths(&self.paths.unit_dir);
        for (path, contents) in [
            (&mount_path, systemd::mount_unit(spec)),
            (&automount_path, systemd::automount_unit(spec)),
        ] {
            if self.dry_run {
                info!("[dry-run] would write {}", path.display());
                continue;
            }
            files::write_atomic(path, &contents, CONFIG_FILE_MODE, true, self.cleanup)?;
            info!("Wrote {}", path.display());
        }

        self.control(CommandSpec::systemctl(["daemon-reload"])).await;
        self.control(CommandSpec::systemctl([
            "enable",
            names.mount.as_str(),
            names.automount.as_str(),
        ]))
        .await;

        // The automount unit must own the mount point.
        if self.is_mounted(target).await? && self.control(CommandSpec::umount(target)).await {
            self.cleanup.forget_mount(target);
        }
        if self
            .control(CommandSpec::systemctl(["start", names.automount.as_str()]))
            .await
        {
            info!("{} active; {} mounts on first access", names.automount, target.display());
        }

        Ok(PersistenceRecord::Systemd {
            mount_unit: mount_path,
            automount_unit: automount_path,
        })
    }

    /// Stops, disables and deletes the unit pair for `mount_point`, if any.
    /// Returns the unit files that existed.
    async fn remove_units(&mut self, mount_point: &Path) -> Result<Vec<PathBuf>> {
        let names = UnitNames::for_mount_point(mount_point);
        let existing: Vec<PathBuf> = names
            .paths(&self.paths.unit_dir)
            .into_iter()
            .filter(|p| p.exists())
            .collect();
        if existing.is_empty() {
            return Ok(existing);
        }

        self.control(CommandSpec::systemctl([
            "disable",
            "--now",
            names.automount.as_str(),
            names.mount.as_str(),
        ]))
        .await;
        for path in &existing {
            if self.dry_run {
                info!("[dry-run] would delete {}", path.display());
            } else {
                fs::remove_file(path).context_io(|| format!("cannot delete {}", path.display()))?;
                info!("Deleted {}", path.display());
            }
        }
        Ok(existing)
    }

    /// Removes every artifact for `mount_point` and unmounts it.
    pub async fn teardown(&mut self, mount_point: &Path) -> Result<Removal> {
        let units = self.remove_units(mount_point).await?;

        let unmounted = if self.is_mounted(mount_point).await? {
            self.control(CommandSpec::umount(mount_point)).await
        } else {
            false
        };

        let table_lines = self.table().remove(mount_point, self.cleanup)?;
        if !units.is_empty() || table_lines > 0 {
            self.control(CommandSpec::systemctl(["daemon-reload"])).await;
        }

        Ok(Removal {
            unmounted,
            table_lines,
            units,
        })
    }
}
