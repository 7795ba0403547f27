//! Structured external command execution.
//!
//! Every invocation the engine makes (mount helper, unmount, `mountpoint`,
//! `systemctl`) is described by a [`CommandSpec`] and executed through a
//! [`CommandRunner`], so the same serialization path is shared by the
//! negotiator, the executor and the registrar, and so dry-run and tests can
//! substitute the runner.

use super::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// Whether a command changes system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Read-only inspection, safe to run in dry-run mode.
    Query,
    /// Mounts, unmounts, unit activation and the like.
    Mutation,
}

/// An external command: program, ordered arguments and its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    kind: CommandKind,
}

impl CommandSpec {
    /// A state-changing command.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            kind: CommandKind::Mutation,
        }
    }

    /// A read-only command.
    pub fn query(program: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Query,
            ..Self::new(program)
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Kind of command.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// `umount <target>`
    pub fn umount(target: &Path) -> Self {
        Self::new("umount").path_arg(target)
    }

    /// `mountpoint -q <target>`; exits 0 when `target` is an active mount.
    pub fn mountpoint(target: &Path) -> Self {
        Self::query("mountpoint").arg("-q").path_arg(target)
    }

    /// `mount <target>`, resolved through the static table.
    pub fn mount_from_table(target: &Path) -> Self {
        Self::new("mount").path_arg(target)
    }

    /// `systemctl <args...>`
    pub fn systemctl<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("systemctl").args(args)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'') {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` if the process was killed or timed out.
    pub status: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
    /// Whether the timeout expired before the command finished.
    pub timed_out: bool,
}

impl CommandOutput {
    /// A successful, silent result.
    pub fn succeeded() -> Self {
        Self {
            status: Some(0),
            output: String::new(),
            timed_out: false,
        }
    }

    /// A failed result with the given status and output.
    pub fn failed(status: i32, output: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            output: output.into(),
            timed_out: false,
        }
    }

    /// Whether the command exited 0 within its timeout.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// Output trimmed for log lines.
    pub fn summary(&self) -> &str {
        self.output.trim()
    }
}

/// Executes [`CommandSpec`]s.
///
/// A timeout must be reported as a failed [`CommandOutput`], not as an
/// error; `Err` is reserved for commands that could not be started.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command`, giving up after `timeout`.
    async fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput>;
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        debug!("running: {}", command);
        let mut cmd = tokio::process::Command::new(command.program());
        cmd.args(command.arguments())
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                warn!("{} timed out after {:?}", command.program(), timeout);
                Ok(CommandOutput {
                    status: None,
                    output: format!("timed out after {}s", timeout.as_secs()),
                    timed_out: true,
                })
            }
            Ok(Err(source)) => Err(Error::Spawn {
                program: command.program().to_string(),
                source,
            }),
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                let result = CommandOutput {
                    status: out.status.code(),
                    output,
                    timed_out: false,
                };
                debug!(
                    "{} exited with {:?}: {}",
                    command.program(),
                    result.status,
                    result.summary()
                );
                Ok(result)
            }
        }
    }
}

/// Forwards queries to an inner runner and records mutations instead of
/// running them.
pub struct DryRunRunner {
    inner: Arc<dyn CommandRunner>,
    planned: Mutex<Vec<String>>,
}

impl DryRunRunner {
    /// Wraps `inner`, which only ever sees [`CommandKind::Query`] commands.
    pub fn new(inner: Arc<dyn CommandRunner>) -> Self {
        Self {
            inner,
            planned: Mutex::new(Vec::new()),
        }
    }

    /// Mutating commands that would have run, in order.
    pub fn planned(&self) -> Vec<String> {
        self.planned.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        match command.kind() {
            CommandKind::Query => self.inner.run(command, timeout).await,
            CommandKind::Mutation => {
                info!("[dry-run] would run: {}", command);
                self.planned.lock().push(command.to_string());
                Ok(CommandOutput::succeeded())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::ScriptedRunner;

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = CommandSpec::new("mount")
            .arg("-t")
            .arg("cifs")
            .arg("/mnt/with space");
        assert_eq!(cmd.to_string(), "mount -t cifs '/mnt/with space'");
    }

    #[test]
    fn test_builders_set_kind() {
        let target = Path::new("/mnt/storagebox");
        assert_eq!(CommandSpec::mountpoint(target).kind(), CommandKind::Query);
        assert_eq!(CommandSpec::umount(target).kind(), CommandKind::Mutation);
        assert_eq!(
            CommandSpec::systemctl(["daemon-reload"]).to_string(),
            "systemctl daemon-reload"
        );
    }

    #[test]
    fn test_output_success_requires_zero_exit_and_no_timeout() {
        assert!(CommandOutput::succeeded().success());
        assert!(!CommandOutput::failed(32, "mount error").success());
        let timed_out = CommandOutput {
            status: Some(0),
            output: String::new(),
            timed_out: true,
        };
        assert!(!timed_out.success());
    }

    #[test]
    fn test_dry_run_forwards_only_queries() {
        let inner = Arc::new(ScriptedRunner::succeeding());
        let dry = DryRunRunner::new(inner.clone());
        let target = Path::new("/mnt/storagebox");

        tokio_test::block_on(async {
            dry.run(&CommandSpec::mountpoint(target), Duration::from_secs(1))
                .await
                .unwrap();
            let out = dry
                .run(&CommandSpec::umount(target), Duration::from_secs(1))
                .await
                .unwrap();
            assert!(out.success());
        });

        assert_eq!(inner.rendered(), vec!["mountpoint -q /mnt/storagebox"]);
        assert_eq!(dry.planned(), vec!["umount /mnt/storagebox"]);
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let out = SystemRunner
            .run(
                &CommandSpec::query("sh").arg("-c").arg("echo out; echo err >&2; exit 3"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn test_system_runner_times_out() {
        let out = SystemRunner
            .run(
                &CommandSpec::query("sleep").arg("5"),
                Duration::from_millis(100),
            )
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }
}
