//! Protocol version negotiation.
//!
//! Each candidate version is tried with a throwaway mount of the real
//! share on a scratch directory, using the same option serialization as
//! the real mount. The probe is unmounted again whatever its outcome, and
//! the first version that mounts is committed. A probe that mounted but
//! cannot be unmounted stops negotiation and stays with cleanup.

use super::cleanup::{CancelToken, Cleanup};
use super::command::{CommandOutput, CommandRunner, CommandSpec};
use super::constants::{CONTROL_TIMEOUT, PROBE_TIMEOUT};
use super::error::{Error, Result};
use super::mountspec::MountSpec;
use super::progress::Spinner;
use log::{debug, error, info};
use std::path::Path;

/// Where the negotiator is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing tried yet.
    Idle,
    /// Probing this version.
    Trying(String),
    /// This version mounted; no further versions are tried.
    Committed(String),
    /// Every candidate failed.
    Exhausted,
}

/// One trial: which version, what ran, what came back.
#[derive(Debug, Clone)]
pub struct MountAttempt {
    /// Candidate protocol version
    pub version: String,
    /// Rendered command line
    pub command: String,
    /// Captured result
    pub output: CommandOutput,
}

/// Probes candidate versions in order and commits to the first that works.
pub struct Negotiator<'a> {
    runner: &'a dyn CommandRunner,
    cancel: &'a CancelToken,
    cleanup: &'a Cleanup,
    versions: Vec<String>,
    progress: bool,
    state: NegotiationState,
    attempts: Vec<MountAttempt>,
}

impl<'a> Negotiator<'a> {
    /// A negotiator over `versions`, most capable first.
    pub fn new<S: AsRef<str>>(
        runner: &'a dyn CommandRunner,
        cancel: &'a CancelToken,
        cleanup: &'a Cleanup,
        versions: &[S],
    ) -> Self {
        Self {
            runner,
            cancel,
            cleanup,
            versions: versions.iter().map(|v| v.as_ref().to_string()).collect(),
            progress: false,
            state: NegotiationState::Idle,
            attempts: Vec::new(),
        }
    }

    /// Shows a spinner during each probe.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Current state.
    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    /// Trials made so far, in order.
    pub fn attempts(&self) -> &[MountAttempt] {
        &self.attempts
    }

    /// Finds a working version for `spec` by probing at `probe_dir`.
    ///
    /// # Returns
    /// * `Ok(MountSpec)` - `spec` with the committed version injected
    /// * `Err(Error::Negotiation)` - every candidate failed; carries the
    ///   last captured output
    pub async fn negotiate(&mut self, spec: &MountSpec, probe_dir: &Path) -> Result<MountSpec> {
        self.state = NegotiationState::Idle;
        self.attempts.clear();

        for version in self.versions.clone() {
            self.cancel.check()?;
            self.state = NegotiationState::Trying(version.clone());

            let candidate = spec.with_version(&version);
            let command = candidate.mount_command(probe_dir);
            info!("Probing SMB {} on {}", version, spec.host());

            let output = {
                let _spinner = Spinner::start(self.progress, format!("Probing SMB {}", version));
                self.cleanup.track_mount(probe_dir);
                let output = self.runner.run(&command, PROBE_TIMEOUT).await;
                let mounted = output.as_ref().is_ok_and(CommandOutput::success);
                self.reverse(probe_dir, mounted).await?;
                output?
            };

            let succeeded = output.success();
            self.attempts.push(MountAttempt {
                version: version.clone(),
                command: command.to_string(),
                output,
            });

            if succeeded {
                info!("Remote accepted SMB {}", version);
                self.state = NegotiationState::Committed(version);
                return Ok(candidate);
            }
            debug!(
                "SMB {} rejected: {}",
                version,
                self.attempts
                    .last()
                    .map(|a| a.output.summary())
                    .unwrap_or_default()
            );
        }

        self.state = NegotiationState::Exhausted;
        let last = self.attempts.last();
        Err(Error::Negotiation {
            host: spec.host().to_string(),
            tried: self.versions.join(", "),
            last_output: last
                .map(|a| a.output.summary().to_string())
                .unwrap_or_else(|| "no candidate versions".to_string()),
            status: last.and_then(|a| a.output.status),
        })
    }

    /// Unmounts the probe. When the probe had `mounted`, a failed unmount
    /// is fatal and the probe stays registered with cleanup.
    async fn reverse(&self, probe_dir: &Path, mounted: bool) -> Result<()> {
        let result = self
            .runner
            .run(&CommandSpec::umount(probe_dir), CONTROL_TIMEOUT)
            .await;
        match result {
            Ok(out) if out.success() => {}
            Ok(out) if mounted => {
                error!("Probe at {} did not unmount: {}", probe_dir.display(), out.summary());
                return Err(Error::unmount(probe_dir, &out));
            }
            Err(e) if mounted => return Err(e),
            // A failed probe leaves nothing mounted.
            Ok(out) => debug!("probe unmount: {}", out.summary()),
            Err(e) => debug!("probe unmount could not run: {}", e),
        }
        self.cleanup.forget_mount(probe_dir);
        Ok(())
    }
}
