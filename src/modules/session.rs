//! Provisioning session.
//!
//! A [`Session`] drives one run of the pipeline: profile, credentials,
//! protocol negotiation, mount, persistence. Every stage takes the values it
//! needs from the previous one; nothing is shared through process-wide
//! state. A fatal error or a cancellation anywhere runs the cleanup contract
//! before the error is returned.

use super::cleanup::{CancelToken, Cleanup};
use super::command::{CommandRunner, DryRunRunner};
use super::constants::PROTOCOL_VERSIONS;
use super::credentials::{CredentialStore, PasswordSource, Provisioned, Username};
use super::error::{Error, IoContext, Result, Warning};
use super::mount::MountExecutor;
use super::mountspec::{validate_mount_point, MountSpec};
use super::negotiate::Negotiator;
use super::persist::{PersistMethod, PersistenceRecord, Registrar, Removal};
use super::profile::{Profile, ProfilePaths, SystemPaths};
use super::prompt::Prompter;
use clap::ValueEnum;
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Inputs for [`Session::provision`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Storage Box username; asked for when absent
    pub username: Option<String>,
    /// Where the password comes from
    pub password: PasswordSource,
    /// Mount point; defaults to the profile's
    pub mount_point: Option<PathBuf>,
    /// Owner of mounted files
    pub uid: u32,
    /// Group of mounted files
    pub gid: u32,
    /// Append cache and buffer tuning options
    pub performance: bool,
    /// Persistence backend; asked for interactively when absent
    pub persistence: Option<PersistMethod>,
    /// Profile name; implied from a sub-account username when absent
    pub profile: Option<String>,
    /// Report instead of acting
    pub dry_run: bool,
    /// Show spinners
    pub progress: bool,
    /// Candidate protocol versions, most capable first
    pub versions: Vec<String>,
    /// System locations
    pub paths: SystemPaths,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: None,
            password: PasswordSource::Prompt { confirm: true },
            mount_point: None,
            uid: 0,
            gid: 0,
            performance: false,
            persistence: None,
            profile: None,
            dry_run: false,
            progress: false,
            versions: PROTOCOL_VERSIONS.iter().map(|v| v.to_string()).collect(),
            paths: SystemPaths::default(),
        }
    }
}

/// Inputs for [`Session::teardown`].
#[derive(Debug, Clone, Default)]
pub struct TeardownSettings {
    /// Username, used only to imply a sub-account profile
    pub username: Option<String>,
    /// Profile name
    pub profile: Option<String>,
    /// Mount point; defaults to the profile's
    pub mount_point: Option<PathBuf>,
    /// Also delete the profile's credential file
    pub purge_credentials: bool,
    /// Report instead of acting
    pub dry_run: bool,
    /// System locations
    pub paths: SystemPaths,
}

/// Summary of a provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Profile name, empty for the unnamed profile
    pub profile: String,
    /// Storage Box username
    pub username: String,
    /// `//host/share`
    pub device: String,
    /// Local mount point
    pub mount_point: PathBuf,
    /// Credential file
    pub credentials: PathBuf,
    /// Whether an existing credential file was kept
    pub credentials_kept: bool,
    /// Negotiated protocol version
    pub version: Option<String>,
    /// Final option string
    pub options: String,
    /// Mount attempts needed
    pub attempts: u32,
    /// Persistence backend
    pub persistence: PersistMethod,
    /// Persistence artifacts
    pub record: PersistenceRecord,
    /// Non-fatal findings
    pub warnings: Vec<Warning>,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Commands a dry run would have executed, in order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_commands: Vec<String>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: nothing was changed.")?;
        }
        writeln!(f, "Profile:      {}", display_profile(&self.profile))?;
        writeln!(f, "Username:     {}", self.username)?;
        writeln!(f, "Share:        {}", self.device)?;
        writeln!(f, "Mount point:  {}", self.mount_point.display())?;
        writeln!(f, "Credentials:  {}", self.credentials.display())?;
        writeln!(f, "SMB version:  {}", self.version.as_deref().unwrap_or("-"))?;
        writeln!(f, "Options:      {}", self.options)?;
        match &self.record {
            PersistenceRecord::Fstab { table, .. } => {
                writeln!(f, "Persistence:  fstab ({})", table.display())?
            }
            PersistenceRecord::Systemd {
                mount_unit,
                automount_unit,
            } => writeln!(
                f,
                "Persistence:  systemd ({}, {})",
                mount_unit.display(),
                automount_unit.display()
            )?,
            PersistenceRecord::None => writeln!(f, "Persistence:  none")?,
        }
        for warning in &self.warnings {
            writeln!(f, "Warning:      {}", warning)?;
        }
        if !self.planned_commands.is_empty() {
            writeln!(f, "Would run:")?;
            for command in &self.planned_commands {
                writeln!(f, "  {}", command)?;
            }
        }
        Ok(())
    }
}

/// Summary of a teardown.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    /// Profile name, empty for the unnamed profile
    pub profile: String,
    /// Mount point torn down
    pub mount_point: PathBuf,
    /// What was removed
    pub removed: Removal,
    /// Credential file deleted, if purged
    pub credentials_removed: Option<PathBuf>,
    /// Non-fatal findings
    pub warnings: Vec<Warning>,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Commands a dry run would have executed, in order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_commands: Vec<String>,
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: nothing was changed.")?;
        }
        writeln!(f, "Profile:      {}", display_profile(&self.profile))?;
        writeln!(f, "Mount point:  {}", self.mount_point.display())?;
        writeln!(f, "Unmounted:    {}", if self.removed.unmounted { "yes" } else { "no" })?;
        writeln!(f, "fstab lines:  {}", self.removed.table_lines)?;
        for unit in &self.removed.units {
            writeln!(f, "Removed unit: {}", unit.display())?;
        }
        if let Some(path) = &self.credentials_removed {
            writeln!(f, "Removed:      {}", path.display())?;
        }
        for warning in &self.warnings {
            writeln!(f, "Warning:      {}", warning)?;
        }
        for command in &self.planned_commands {
            writeln!(f, "Would run:    {}", command)?;
        }
        Ok(())
    }
}

fn display_profile(name: &str) -> &str {
    if name.is_empty() {
        "(default)"
    } else {
        name
    }
}

/// Scratch directory for protocol probes, removed again when dropped.
///
/// Removal is non-recursive, so a probe left mounted is never descended into.
struct ProbeDir {
    path: PathBuf,
    created: bool,
}

impl ProbeDir {
    fn create(parent: &Path, dry_run: bool) -> Result<Self> {
        let path = parent.join(format!("boxmount-probe-{}", Uuid::new_v4()));
        if dry_run {
            return Ok(Self {
                path,
                created: false,
            });
        }
        fs::create_dir_all(&path).context_io(|| format!("cannot create {}", path.display()))?;
        Ok(Self {
            path,
            created: true,
        })
    }
}

impl Drop for ProbeDir {
    fn drop(&mut self) {
        if self.created {
            if let Err(e) = fs::remove_dir(&self.path) {
                warn!("could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Drives provisioning and teardown runs.
pub struct Session {
    runner: Arc<dyn CommandRunner>,
    cancel: CancelToken,
    cleanup: Cleanup,
}

impl Session {
    /// A session executing commands through `runner` and observing `cancel`.
    pub fn new(runner: Arc<dyn CommandRunner>, cancel: CancelToken) -> Self {
        Self {
            runner,
            cancel,
            cleanup: Cleanup::new(),
        }
    }

    /// The cleanup tracker for this session.
    pub fn cleanup(&self) -> &Cleanup {
        &self.cleanup
    }

    fn dry_runner(&self, dry_run: bool) -> Option<DryRunRunner> {
        dry_run.then(|| DryRunRunner::new(self.runner.clone()))
    }

    /// Runs the full pipeline.
    ///
    /// # Returns
    /// * `Ok(RunReport)` - the share is mounted and persisted (or, in a dry
    ///   run, would have been)
    /// * `Err` - the first fatal error; cleanup has already run
    pub async fn provision(
        &self,
        settings: &Settings,
        prompter: &mut dyn Prompter,
    ) -> Result<RunReport> {
        let dry = self.dry_runner(settings.dry_run);
        let runner: &dyn CommandRunner = match &dry {
            Some(dry) => dry,
            None => self.runner.as_ref(),
        };

        match self.pipeline(settings, runner, prompter).await {
            Ok(mut report) => {
                self.cleanup.commit();
                if let Some(dry) = &dry {
                    report.planned_commands = dry.planned();
                }
                info!(
                    "{} is ready at {}",
                    report.device,
                    report.mount_point.display()
                );
                Ok(report)
            }
            Err(e) => {
                info!("Run failed; cleaning up");
                self.cleanup.run(runner).await;
                Err(e)
            }
        }
    }

    async fn pipeline(
        &self,
        settings: &Settings,
        runner: &dyn CommandRunner,
        prompter: &mut dyn Prompter,
    ) -> Result<RunReport> {
        self.cancel.check()?;

        let username = match &settings.username {
            Some(name) => Username::parse(name)?,
            None => Username::parse(&prompter.input("Storage Box username", None)?)?,
        };
        let (profile, resolved) = resolve_profile(
            settings.profile.as_deref(),
            &username,
            &settings.paths,
        )?;
        let mount_point = match &settings.mount_point {
            Some(path) => validate_mount_point(path)?,
            None if prompter.is_interactive() => {
                let default = resolved.mount_point.to_string_lossy().into_owned();
                validate_mount_point(prompter.input("Mount point", Some(&default))?)?
            }
            None => validate_mount_point(&resolved.mount_point)?,
        };
        let persistence = match settings.persistence {
            Some(method) => method,
            None if prompter.is_interactive() => {
                let answer = prompter.input(
                    "Persistence (fstab, systemd, none)",
                    Some(&PersistMethod::default().to_string()),
                )?;
                PersistMethod::from_str(&answer, true)
                    .map_err(|reason| Error::validation("persistence method", reason))?
            }
            None => PersistMethod::default(),
        };
        info!(
            "Profile {}: credentials {}, mount point {}",
            profile,
            resolved.credentials.display(),
            mount_point.display()
        );
        self.cancel.check()?;

        let store = CredentialStore::new(&resolved.credentials, settings.dry_run);
        let provisioned =
            store.provision(&username, &settings.password, prompter, &self.cleanup)?;
        self.cancel.check()?;

        let base = MountSpec::new(
            &username,
            mount_point,
            store.path(),
            settings.uid,
            settings.gid,
            settings.performance,
        );
        let spec = {
            let probe = ProbeDir::create(&settings.paths.probe_dir, settings.dry_run)?;
            let mut negotiator =
                Negotiator::new(runner, &self.cancel, &self.cleanup, settings.versions.as_slice())
                    .with_progress(settings.progress);
            negotiator.negotiate(&base, &probe.path).await?
        };
        self.cancel.check()?;

        let outcome = MountExecutor::new(runner, &self.cancel, &self.cleanup, settings.dry_run)
            .with_progress(settings.progress)
            .execute(&spec, prompter)
            .await?;
        self.cancel.check()?;

        let mut registrar = Registrar::new(runner, &settings.paths, &self.cleanup, settings.dry_run);
        let record = registrar.register(&spec, persistence).await?;

        let mut warnings = outcome.warnings;
        warnings.extend(registrar.into_warnings());

        Ok(RunReport {
            profile: profile.name().to_string(),
            username: username.to_string(),
            device: spec.device(),
            mount_point: spec.mount_point().to_path_buf(),
            credentials: store.path().to_path_buf(),
            credentials_kept: provisioned == Provisioned::Kept,
            version: spec.version().map(str::to_string),
            options: spec.options().to_string(),
            attempts: outcome.attempts,
            persistence,
            record,
            warnings,
            dry_run: settings.dry_run,
            planned_commands: Vec::new(),
        })
    }

    /// Unmounts and removes every persistence artifact for a profile.
    pub async fn teardown(&self, settings: &TeardownSettings) -> Result<TeardownReport> {
        let dry = self.dry_runner(settings.dry_run);
        let runner: &dyn CommandRunner = match &dry {
            Some(dry) => dry,
            None => self.runner.as_ref(),
        };

        let username = settings
            .username
            .as_deref()
            .map(Username::parse)
            .transpose()?;
        let (profile, resolved) = match &username {
            Some(username) => {
                resolve_profile(settings.profile.as_deref(), username, &settings.paths)?
            }
            None => {
                let profile = Profile::new(settings.profile.as_deref())?;
                let resolved = profile.resolve(&settings.paths);
                (profile, resolved)
            }
        };
        let mount_point = match &settings.mount_point {
            Some(path) => validate_mount_point(path)?,
            None => validate_mount_point(&resolved.mount_point)?,
        };
        self.cancel.check()?;

        info!("Tearing down {} (profile {})", mount_point.display(), profile);
        let mut registrar = Registrar::new(runner, &settings.paths, &self.cleanup, settings.dry_run);
        let removed = registrar.teardown(&mount_point).await?;

        let credentials_removed = if settings.purge_credentials && resolved.credentials.exists() {
            if settings.dry_run {
                info!("[dry-run] would delete {}", resolved.credentials.display());
            } else {
                fs::remove_file(&resolved.credentials).context_io(|| {
                    format!("cannot delete {}", resolved.credentials.display())
                })?;
                info!("Deleted {}", resolved.credentials.display());
            }
            Some(resolved.credentials.clone())
        } else {
            None
        };

        Ok(TeardownReport {
            profile: profile.name().to_string(),
            mount_point,
            removed,
            credentials_removed,
            warnings: registrar.into_warnings(),
            dry_run: settings.dry_run,
            planned_commands: dry.as_ref().map(DryRunRunner::planned).unwrap_or_default(),
        })
    }
}

/// An explicit profile wins; otherwise a sub-account implies its own
/// `subN` profile so its paths never collide with the main account's.
fn resolve_profile(
    name: Option<&str>,
    username: &Username,
    paths: &SystemPaths,
) -> Result<(Profile, ProfilePaths)> {
    let profile = match name {
        Some(name) => Profile::new(Some(name))?,
        None => Profile::new(username.sub_account_suffix())?,
    };
    let resolved = profile.resolve(paths);
    Ok((profile, resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::command::{CommandKind, CommandOutput};
    use secrecy::SecretString;
    use crate::modules::fstab;
    use crate::modules::prompt::UnattendedPrompter;
    use crate::modules::testing::{ScriptedPrompter, ScriptedRunner};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, SystemPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SystemPaths {
            credentials_dir: dir.path().join("etc"),
            mount_base: dir.path().join("mnt"),
            fstab: dir.path().join("etc/fstab"),
            unit_dir: dir.path().join("units"),
            probe_dir: dir.path().join("probe"),
        };
        for d in [&paths.credentials_dir, &paths.unit_dir, &paths.probe_dir] {
            fs::create_dir_all(d).unwrap();
        }
        fs::write(&paths.fstab, "UUID=1234 / ext4 defaults 0 1\n").unwrap();
        (dir, paths)
    }

    fn settings(paths: &SystemPaths, user: &str, persistence: PersistMethod) -> Settings {
        Settings {
            username: Some(user.to_string()),
            password: PasswordSource::Literal(SecretString::from("s3cret")),
            persistence: Some(persistence),
            paths: paths.clone(),
            ..Settings::default()
        }
    }

    fn session(runner: Arc<ScriptedRunner>) -> Session {
        Session::new(runner, CancelToken::new())
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut entries = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path.clone());
                    entries.push((path, Vec::new()));
                } else {
                    let contents = fs::read(&path).unwrap();
                    entries.push((path, contents));
                }
            }
        }
        entries.sort();
        entries
    }

    #[tokio::test]
    async fn test_sub_account_with_units() -> anyhow::Result<()> {
        let (_dir, paths) = sandbox();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let session = session(runner.clone());

        let report = session
            .provision(
                &settings(&paths, "u493700-sub2", PersistMethod::Systemd),
                &mut UnattendedPrompter,
            )
            .await?;

        assert_eq!(report.profile, "sub2");
        assert_eq!(report.device, "//u493700-sub2.your-storagebox.de/u493700-sub2");
        assert_eq!(report.mount_point, paths.mount_base.join("storagebox-sub2"));
        assert_eq!(
            report.credentials,
            paths.credentials_dir.join("storagebox-credentials-sub2.txt")
        );
        assert_eq!(report.version.as_deref(), Some("3.1.1"));
        assert!(report.options.starts_with("vers=3.1.1,iocharset=utf8,rw,seal,credentials="));
        assert!(matches!(report.record, PersistenceRecord::Systemd { .. }));
        assert!(report.warnings.is_empty());

        let mode = fs::metadata(&report.credentials)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(fs::read_to_string(&report.credentials)?.starts_with("username=u493700-sub2\n"));
        assert_eq!(fs::read_dir(&paths.probe_dir)?.count(), 0);
        assert!(session.cleanup().pending_mount().is_none());

        // One probe, one real mount.
        assert_eq!(runner.cifs_mounts().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() -> anyhow::Result<()> {
        let (dir, paths) = sandbox();
        let before = snapshot(dir.path());
        let runner = Arc::new(ScriptedRunner::succeeding());

        for method in [PersistMethod::Fstab, PersistMethod::Systemd] {
            let mut settings = settings(&paths, "u493700", method);
            settings.dry_run = true;
            let report = session(runner.clone())
                .provision(&settings, &mut UnattendedPrompter)
                .await?;

            assert!(report.dry_run);
            assert!(report.planned_commands[0].starts_with("mount -t cifs //u493700.your-storagebox.de/backup "));
            assert!(report
                .planned_commands
                .iter()
                .any(|c| c.contains(&paths.mount_base.join("storagebox").to_string_lossy().into_owned())));
        }

        assert_eq!(snapshot(dir.path()), before);
        assert!(runner.calls().iter().all(|c| c.kind() == CommandKind::Query));
        Ok(())
    }

    #[tokio::test]
    async fn test_fstab_twice_keeps_one_line() -> anyhow::Result<()> {
        let (_dir, paths) = sandbox();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let session = session(runner.clone());
        let settings = settings(&paths, "u493700", PersistMethod::Fstab);

        session.provision(&settings, &mut UnattendedPrompter).await?;
        let second = session.provision(&settings, &mut UnattendedPrompter).await?;

        let table = fs::read_to_string(&paths.fstab)?;
        let lines: Vec<&str> = table
            .lines()
            .filter(|l| fstab::references(l, &second.mount_point))
            .collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("x-systemd.automount"));
        assert!(!second.credentials_kept);
        Ok(())
    }

    #[tokio::test]
    async fn test_negotiation_failure_mounts_nothing_and_cleans_up() {
        let (_dir, paths) = sandbox();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.program() {
            "mount" => CommandOutput::failed(32, "mount error(13): Permission denied"),
            "mountpoint" => CommandOutput::failed(32, ""),
            _ => CommandOutput::succeeded(),
        }));
        let session = session(runner.clone());

        let err = session
            .provision(
                &settings(&paths, "u493700", PersistMethod::Fstab),
                &mut UnattendedPrompter,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Negotiation { .. }));
        assert_eq!(err.exit_code(), 32);
        let target = paths.mount_base.join("storagebox");
        assert!(runner
            .cifs_mounts()
            .iter()
            .all(|c| c.arguments()[3] != target.to_string_lossy()));
        assert_eq!(runner.cifs_mounts().len(), 3);
        assert!(session.cleanup().pending_mount().is_none());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(&paths.probe_dir).unwrap().count(), 0);
        assert!(fstab::FstabFile::new(&paths.fstab, false)
            .read()
            .unwrap()
            .lines()
            .all(|l| !fstab::references(l, &target)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let (_dir, paths) = sandbox();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let cancel = CancelToken::new();
        cancel.cancel();
        let session = Session::new(runner.clone(), cancel);

        let err = session
            .provision(
                &settings(&paths, "u493700", PersistMethod::Fstab),
                &mut UnattendedPrompter,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(err.exit_code(), 130);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interactive_keeps_existing_credentials() -> anyhow::Result<()> {
        let (_dir, paths) = sandbox();
        let existing = paths.credentials_dir.join("storagebox-credentials.txt");
        fs::write(&existing, "username=u493700\npassword=old\ndomain=WORKGROUP\n")?;
        let runner = Arc::new(ScriptedRunner::succeeding());
        let mut prompter = ScriptedPrompter::default();
        let settings = Settings {
            username: Some("u493700".into()),
            paths: paths.clone(),
            ..Settings::default()
        };

        let report = session(runner).provision(&settings, &mut prompter).await?;

        assert!(report.credentials_kept);
        assert_eq!(report.persistence, PersistMethod::Fstab);
        assert!(fs::read_to_string(&existing)?.contains("password=old"));
        assert!(prompter.asked.iter().any(|q| q.starts_with("Persistence")));
        assert!(prompter.asked.iter().any(|q| q == "Mount point"));
        Ok(())
    }

    #[tokio::test]
    async fn test_interactive_overwrite_with_custom_mount_point() -> anyhow::Result<()> {
        let (_dir, paths) = sandbox();
        let existing = paths.credentials_dir.join("storagebox-credentials.txt");
        fs::write(&existing, "username=u493700\npassword=old\ndomain=WORKGROUP\n")?;
        let target = paths.mount_base.join("archive");
        let answer = target.to_string_lossy().into_owned();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let mut prompter = ScriptedPrompter::default()
            .with_inputs(&[answer.as_str(), "systemd"])
            .with_decisions(&[true])
            .with_secrets(&["n3w", "n3w"]);
        let settings = Settings {
            username: Some("u493700".into()),
            paths: paths.clone(),
            ..Settings::default()
        };

        let report = session(runner).provision(&settings, &mut prompter).await?;

        assert_eq!(report.mount_point, target);
        assert_eq!(report.persistence, PersistMethod::Systemd);
        assert!(!report.credentials_kept);
        assert!(fs::read_to_string(&existing)?.contains("password=n3w\n"));
        let backups: Vec<String> = fs::read_dir(&paths.credentials_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("storagebox-credentials.txt.bak."))
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(target.is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_after_mount_unmounts_target() {
        let (_dir, paths) = sandbox();
        let target = paths.mount_base.join("storagebox");
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let real_target = target.to_string_lossy().into_owned();
        let runner = Arc::new(ScriptedRunner::new(move |cmd| match cmd.program() {
            "mountpoint" => CommandOutput::failed(32, ""),
            "mount" if cmd.arguments().get(3) == Some(&real_target) => {
                // Interrupt arrives right after the real mount.
                canceller.cancel();
                CommandOutput::succeeded()
            }
            _ => CommandOutput::succeeded(),
        }));
        let session = Session::new(runner.clone(), cancel);

        let err = session
            .provision(
                &settings(&paths, "u493700", PersistMethod::Systemd),
                &mut UnattendedPrompter,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(err.exit_code(), 130);
        assert_eq!(
            runner.rendered().last(),
            Some(&format!("umount {}", target.display()))
        );
        assert!(session.cleanup().pending_mount().is_none());
        assert_eq!(fs::read_dir(&paths.unit_dir).unwrap().count(), 0);
        assert!(!runner.rendered().iter().any(|c| c.starts_with("systemctl")));
    }

    #[tokio::test]
    async fn test_invalid_profile_is_rejected_before_any_command() {
        let (_dir, paths) = sandbox();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let mut settings = settings(&paths, "u493700", PersistMethod::None);
        settings.profile = Some("../evil".into());

        let err = session(runner.clone())
            .provision(&settings, &mut UnattendedPrompter)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_after_provision() -> anyhow::Result<()> {
        let (_dir, paths) = sandbox();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let session = session(runner.clone());
        let report = session
            .provision(
                &settings(&paths, "u493700-sub2", PersistMethod::Fstab),
                &mut UnattendedPrompter,
            )
            .await?;

        let teardown = session
            .teardown(&TeardownSettings {
                username: Some("u493700-sub2".into()),
                purge_credentials: true,
                paths: paths.clone(),
                ..TeardownSettings::default()
            })
            .await?;

        assert_eq!(teardown.profile, "sub2");
        assert_eq!(teardown.mount_point, report.mount_point);
        assert_eq!(teardown.removed.table_lines, 1);
        assert_eq!(teardown.credentials_removed.as_ref(), Some(&report.credentials));
        assert!(!report.credentials.exists());
        Ok(())
    }
}
