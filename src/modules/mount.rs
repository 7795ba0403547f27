//! Mount executor.
//!
//! Prepares the mount point, runs the real mount with a bounded number of
//! sequential attempts and checks that the result is writable.

use super::cleanup::{CancelToken, Cleanup};
use super::command::{CommandOutput, CommandRunner, CommandSpec};
use super::constants::{CONTROL_TIMEOUT, MAX_MOUNT_ATTEMPTS, MOUNT_TIMEOUT, QUERY_TIMEOUT, RETRY_DELAY};
use super::diagnose;
use super::error::{Error, IoContext, Result, Warning};
use super::mountspec::MountSpec;
use super::progress::Spinner;
use super::prompt::{Decision, Prompter};
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// What the executor did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOutcome {
    /// Attempts needed, 1 to the retry bound
    pub attempts: u32,
    /// Whether an existing mount was unmounted first
    pub replaced_existing: bool,
    /// Non-fatal findings, e.g. a read-only attach
    pub warnings: Vec<Warning>,
}

/// Performs the real mount with bounded, sequential retries.
pub struct MountExecutor<'a> {
    runner: &'a dyn CommandRunner,
    cancel: &'a CancelToken,
    cleanup: &'a Cleanup,
    dry_run: bool,
    progress: bool,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a> MountExecutor<'a> {
    /// An executor with the default retry bound and delay; with `dry_run`,
    /// nothing is created on disk.
    pub fn new(
        runner: &'a dyn CommandRunner,
        cancel: &'a CancelToken,
        cleanup: &'a Cleanup,
        dry_run: bool,
    ) -> Self {
        Self {
            runner,
            cancel,
            cleanup,
            dry_run,
            progress: false,
            max_attempts: MAX_MOUNT_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Shows a spinner during each attempt.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Whether `target` is an active mount.
    pub async fn is_mounted(&self, target: &Path) -> Result<bool> {
        let out = self
            .runner
            .run(&CommandSpec::mountpoint(target), QUERY_TIMEOUT)
            .await?;
        Ok(out.success())
    }

    /// Makes the mount point ready: releases an existing mount and checks
    /// that nothing would be hidden, asking the operator at each decision.
    ///
    /// # Returns
    /// * `Ok(true)` if an existing mount was unmounted
    /// * `Err(Error::Declined)` if the operator declined
    pub async fn prepare(&self, spec: &MountSpec, prompter: &mut dyn Prompter) -> Result<bool> {
        let target = spec.mount_point();
        let mut replaced = false;

        if self.is_mounted(target).await? {
            let decision = Decision::new(
                format!(
                    "{} is already mounted. Unmount it and mount {} in its place?",
                    target.display(),
                    spec.device()
                ),
                true,
                true,
            );
            if !prompter.decide(&decision)? {
                return Err(Error::Declined(format!("{} is already mounted", target.display())));
            }
            let out = self
                .runner
                .run(&CommandSpec::umount(target), CONTROL_TIMEOUT)
                .await?;
            if !out.success() {
                return Err(Error::unmount(target, &out));
            }
            info!("Unmounted stale mount at {}", target.display());
            replaced = true;
        } else if target.is_dir() && !is_empty_dir(target)? {
            let decision = Decision::new(
                format!(
                    "{} is not empty; its contents will be hidden while mounted. Continue?",
                    target.display()
                ),
                false,
                true,
            );
            if !prompter.decide(&decision)? {
                return Err(Error::Declined(format!("{} is not empty", target.display())));
            }
            warn!(
                "Mounting over non-empty {}; existing files stay hidden until unmounted",
                target.display()
            );
        }

        if !target.exists() {
            if self.dry_run {
                info!("[dry-run] would create {}", target.display());
            } else {
                fs::create_dir_all(target)
                    .context_io(|| format!("cannot create {}", target.display()))?;
                info!("Created mount point {}", target.display());
            }
        } else if !target.is_dir() {
            return Err(Error::validation(
                "mount point",
                format!("{} exists and is not a directory", target.display()),
            ));
        }

        Ok(replaced)
    }

    /// Runs the mount, retrying after failures. Succeeds with the number of
    /// attempts it took; the new mount stays registered with cleanup until
    /// the session commits.
    pub async fn mount(&self, spec: &MountSpec) -> Result<u32> {
        let target = spec.mount_point();
        let command = spec.mount_command(target);
        let mut last: Option<CommandOutput> = None;

        for attempt in 1..=self.max_attempts {
            self.cancel.check()?;
            info!(
                "Mounting {} on {} (attempt {}/{})",
                spec.device(),
                target.display(),
                attempt,
                self.max_attempts
            );

            self.cleanup.track_mount(target);
            let output = {
                let _spinner = Spinner::start(self.progress, format!("Mounting {}", spec.device()));
                self.runner.run(&command, MOUNT_TIMEOUT).await?
            };
            if output.success() {
                info!("Mounted {} on {}", spec.device(), target.display());
                return Ok(attempt);
            }
            self.cleanup.forget_mount(target);

            let diagnosis = diagnose::classify(&output);
            warn!(
                "Attempt {}/{} failed ({}): {}",
                attempt,
                self.max_attempts,
                diagnosis,
                output.summary()
            );
            warn!("Hint: {}", diagnosis.hint());
            last = Some(output);

            if attempt < self.max_attempts {
                info!("Retrying in {}s", self.retry_delay.as_secs());
                self.cancel.sleep(self.retry_delay).await?;
            }
        }

        let last = last.unwrap_or_else(|| CommandOutput::failed(1, "no mount attempt was made"));
        Err(Error::Mount {
            mount_point: target.to_path_buf(),
            attempts: self.max_attempts,
            diagnosis: diagnose::classify(&last),
            output: last.summary().to_string(),
            status: last.status,
        })
    }

    /// Creates and deletes a uniquely named marker inside `target`.
    pub fn probe_write(&self, target: &Path) -> Option<Warning> {
        if self.dry_run {
            info!("[dry-run] would verify write access to {}", target.display());
            return None;
        }
        let marker = target.join(format!(".boxmount-write-test-{}", Uuid::new_v4()));
        let result = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .and_then(|mut file| file.write_all(b"boxmount"))
            .and_then(|_| fs::remove_file(&marker));

        match result {
            Ok(()) => {
                info!("Write access to {} verified", target.display());
                None
            }
            Err(e) => {
                warn!("{} is not writable: {}", target.display(), e);
                Some(Warning::ReadOnly {
                    mount_point: target.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Prepares the mount point, mounts, and probes for write access.
    pub async fn execute(&self, spec: &MountSpec, prompter: &mut dyn Prompter) -> Result<MountOutcome> {
        let replaced_existing = self.prepare(spec, prompter).await?;
        let attempts = self.mount(spec).await?;
        let warnings = self.probe_write(spec.mount_point()).into_iter().collect();
        Ok(MountOutcome {
            attempts,
            replaced_existing,
            warnings,
        })
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path).context_io(|| format!("cannot list {}", path.display()))?;
    Ok(entries.next().is_none())
}
