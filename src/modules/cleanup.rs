//! Cancellation and the cleanup contract.
//!
//! SIGINT, SIGTERM and SIGHUP set a flag that the pipeline observes at
//! checkpoints; a second signal exits immediately. Whether the pipeline
//! stops because of a signal or a fatal error, [`Cleanup::run`] removes
//! transient files and unmounts any mount that was not yet committed.

use super::command::{CommandRunner, CommandSpec};
use super::constants::{CANCEL_POLL, CONTROL_TIMEOUT, EXIT_CANCELLED};
use super::error::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use signal_hook::consts::signal::SIGHUP;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that only cancels when [`CancelToken::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token wired to SIGINT, SIGTERM and SIGHUP.
    ///
    /// The first signal sets the flag; a second one exits the process with
    /// the signal-termination status.
    pub fn install() -> io::Result<Self> {
        let token = Self::new();
        for &sig in TERM_SIGNALS.iter().chain(std::iter::once(&SIGHUP)) {
            flag::register_conditional_shutdown(sig, EXIT_CANCELLED, Arc::clone(&token.flag))?;
            flag::register(sig, Arc::clone(&token.flag))?;
        }
        Ok(token)
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: fails with [`Error::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            info!("Termination requested, stopping");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early with [`Error::Cancelled`].
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            self.check()?;
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
        }
    }
}

#[derive(Debug, Default)]
struct CleanupState {
    files: Vec<PathBuf>,
    mount: Option<PathBuf>,
}

/// Tracks artifacts that must not outlive a failed or cancelled run.
#[derive(Debug, Clone, Default)]
pub struct Cleanup {
    state: Arc<Mutex<CleanupState>>,
}

impl Cleanup {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transient file.
    pub fn track_file(&self, path: &Path) {
        self.state.lock().files.push(path.to_path_buf());
    }

    /// Drops a file from tracking once it has been renamed into place.
    pub fn forget_file(&self, path: &Path) {
        self.state.lock().files.retain(|p| p != path);
    }

    /// Registers a mount that is established but not yet committed.
    pub fn track_mount(&self, mount_point: &Path) {
        self.state.lock().mount = Some(mount_point.to_path_buf());
    }

    /// Stops tracking `mount_point` (it was unmounted or committed).
    pub fn forget_mount(&self, mount_point: &Path) {
        let mut state = self.state.lock();
        if state.mount.as_deref() == Some(mount_point) {
            state.mount = None;
        }
    }

    /// The mount that cleanup would undo, if any.
    pub fn pending_mount(&self) -> Option<PathBuf> {
        self.state.lock().mount.clone()
    }

    /// Transient files that cleanup would remove.
    pub fn pending_files(&self) -> Vec<PathBuf> {
        self.state.lock().files.clone()
    }

    /// Marks the run successful: nothing is undone from here on.
    pub fn commit(&self) {
        let mut state = self.state.lock();
        state.files.clear();
        state.mount = None;
    }

    /// Removes tracked files and unmounts the uncommitted mount.
    pub async fn run(&self, runner: &dyn CommandRunner) {
        let (files, mount) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.files), state.mount.take())
        };

        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => debug!("removed transient file {}", file.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not remove {}: {}", file.display(), e),
            }
        }

        if let Some(mount_point) = mount {
            info!("Unmounting {} after failed run", mount_point.display());
            match runner
                .run(&CommandSpec::umount(&mount_point), CONTROL_TIMEOUT)
                .await
            {
                Ok(out) if out.success() => {}
                Ok(out) => warn!(
                    "could not unmount {}: {}",
                    mount_point.display(),
                    out.summary()
                ),
                Err(e) => warn!("could not unmount {}: {}", mount_point.display(), e),
            }
        }
    }
}
