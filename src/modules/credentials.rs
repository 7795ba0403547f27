//! Storage Box credentials and the credential file.
//!
//! The credential file is read by the CIFS mount helper, which takes every
//! value literally, so nothing here is escaped or quoted. The file is only
//! ever created `0600` and owned by root.

use super::cleanup::Cleanup;
use super::constants::{CREDENTIALS_MODE, DOMAIN_SUFFIX, MAIN_ACCOUNT_SHARE, SMB_DOMAIN};
use super::error::{Error, Result};
use super::files;
use super::prompt::{Decision, Prompter};
use log::{info, warn};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zeroize::Zeroizing;

/// The two username shapes the remote service issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    /// `u<digits>`
    Main,
    /// `u<digits>-sub<digits>`
    Sub,
}

/// A validated Storage Box username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Username {
    value: String,
    kind: AccountKind,
}

fn main_account() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^u[0-9]+$").ok()).as_ref()
}

fn sub_account() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^u[0-9]+-(sub[0-9]+)$").ok()).as_ref()
}

impl Username {
    /// Validates `value` against the main- and sub-account shapes.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let kind = if main_account().is_some_and(|re| re.is_match(value)) {
            AccountKind::Main
        } else if sub_account().is_some_and(|re| re.is_match(value)) {
            AccountKind::Sub
        } else {
            return Err(Error::validation(
                "username",
                format!("{:?} is neither uNNNNNN nor uNNNNNN-subN", value),
            ));
        };
        Ok(Self {
            value: value.to_string(),
            kind,
        })
    }

    /// The username as given.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Main account or sub-account.
    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    /// `subN` for sub-accounts.
    pub fn sub_account_suffix(&self) -> Option<&str> {
        sub_account()?
            .captures(&self.value)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Remote host serving this account.
    pub fn host(&self) -> String {
        format!("{}.{}", self.value, DOMAIN_SUFFIX)
    }

    /// Share exported to this account.
    pub fn share(&self) -> &str {
        match self.kind {
            AccountKind::Main => MAIN_ACCOUNT_SHARE,
            AccountKind::Sub => &self.value,
        }
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Username, password and SMB domain.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name
    pub username: Username,
    /// Account password
    pub password: SecretString,
    /// SMB domain
    pub domain: String,
}

impl Credentials {
    /// Credentials in the fixed SMB domain.
    pub fn new(username: Username, password: SecretString) -> Self {
        Self {
            username,
            password,
            domain: SMB_DOMAIN.to_string(),
        }
    }

    /// The three-line credential file body.
    pub fn to_file_contents(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "username={}\npassword={}\ndomain={}\n",
            self.username,
            self.password.expose_secret(),
            self.domain
        ))
    }

    /// Parses a credential file body. Values are taken literally up to the
    /// end of the line; unknown keys are ignored.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut username = None;
        let mut password = None;
        let mut domain = None;
        for line in contents.lines() {
            match line.trim_end_matches('\r').split_once('=') {
                Some(("username", v)) => username = Some(v),
                Some(("password", v)) => password = Some(v),
                Some(("domain", v)) => domain = Some(v),
                _ => {}
            }
        }
        let username = username
            .ok_or_else(|| Error::Credential("credential file has no username= line".into()))?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Credential("credential file has no password= line".into()))?;
        Ok(Self {
            username: Username::parse(username)?,
            password: SecretString::from(password),
            domain: domain.unwrap_or(SMB_DOMAIN).to_string(),
        })
    }
}

/// Where the password comes from.
#[derive(Debug, Clone)]
pub enum PasswordSource {
    /// Ask on the terminal, optionally asking twice.
    Prompt {
        /// Require a matching confirmation
        confirm: bool,
    },
    /// Given on the command line or in the environment.
    Literal(SecretString),
    /// First line of a file.
    File(PathBuf),
}

/// Obtains the password from `source`.
///
/// The credential file holds one `key=value` per line, so a password
/// spanning lines is rejected.
pub fn load(source: &PasswordSource, prompter: &mut dyn Prompter) -> Result<SecretString> {
    let secret = match source {
        PasswordSource::Literal(secret) => secret.clone(),
        PasswordSource::File(path) => {
            let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
                Error::Credential(format!("cannot read password file {}: {}", path.display(), e))
            })?);
            SecretString::from(contents.lines().next().unwrap_or_default())
        }
        PasswordSource::Prompt { confirm } => loop {
            let first = prompter.secret("Storage Box password")?;
            if first.expose_secret().is_empty() {
                warn!("Password must not be empty");
                continue;
            }
            if !confirm {
                break first;
            }
            let second = prompter.secret("Confirm password")?;
            if first.expose_secret() == second.expose_secret() {
                break first;
            }
            warn!("Passwords do not match, try again");
        },
    };
    let password = secret.expose_secret();
    if password.is_empty() {
        return Err(Error::Credential("password is empty".into()));
    }
    if password.contains(['\n', '\r']) {
        return Err(Error::Credential(
            "password must not contain line breaks".into(),
        ));
    }
    Ok(secret)
}

/// What [`CredentialStore::provision`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// An existing file was kept as is.
    Kept,
    /// The file was written, after backing up the previous one if any.
    Written {
        /// Backup of the previous file
        backup: Option<PathBuf>,
    },
}

/// The profile's credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    dry_run: bool,
}

impl CredentialStore {
    /// A store at `path`; with `dry_run`, nothing is written.
    pub fn new(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            path: path.into(),
            dry_run,
        }
    }

    /// Credential file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the credential file back.
    pub fn read_back(&self) -> Result<Credentials> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            Error::Credential(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Credentials::parse(&contents)
    }

    /// Makes sure a credential file for `username` exists.
    ///
    /// An existing file triggers a decision: interactively the default is to
    /// keep it (the password is then never asked for); unattended, it is
    /// backed up and overwritten.
    pub fn provision(
        &self,
        username: &Username,
        source: &PasswordSource,
        prompter: &mut dyn Prompter,
        cleanup: &Cleanup,
    ) -> Result<Provisioned> {
        if self.path.exists() {
            let decision = Decision::new(
                format!(
                    "Credentials file {} already exists. Overwrite it?",
                    self.path.display()
                ),
                false,
                true,
            );
            if !prompter.decide(&decision)? {
                let existing = self.read_back()?;
                if existing.username != *username {
                    return Err(Error::validation(
                        "username",
                        format!(
                            "{} belongs to {}, not {}",
                            self.path.display(),
                            existing.username,
                            username
                        ),
                    ));
                }
                info!("Keeping existing credentials in {}", self.path.display());
                return Ok(Provisioned::Kept);
            }
        }

        let password = load(source, prompter)?;
        let backup = self.persist(&Credentials::new(username.clone(), password), cleanup)?;
        Ok(Provisioned::Written { backup })
    }

    /// Writes `credentials`, backing up any existing file first.
    pub fn persist(&self, credentials: &Credentials, cleanup: &Cleanup) -> Result<Option<PathBuf>> {
        let exists = self.path.exists();
        if self.dry_run {
            if exists {
                info!("[dry-run] would back up {}", self.path.display());
            }
            info!(
                "[dry-run] would write credentials for {} to {} (mode 0600)",
                credentials.username,
                self.path.display()
            );
            return Ok(None);
        }

        let backup = if exists {
            let backup = files::backup_file(&self.path, CREDENTIALS_MODE)?;
            info!("Backed up previous credentials to {}", backup.display());
            Some(backup)
        } else {
            None
        };

        files::write_atomic(
            &self.path,
            &credentials.to_file_contents(),
            CREDENTIALS_MODE,
            true,
            cleanup,
        )?;
        info!("Wrote credentials to {}", self.path.display());
        Ok(backup)
    }
}
