//! Mount descriptor and option composition.
//!
//! Options are kept as an ordered list of typed values and serialized in
//! one place, so the protocol probe, the real mount, the static table line
//! and the mount unit all carry byte-identical option strings.

use super::command::CommandSpec;
use super::constants::*;
use super::credentials::Username;
use super::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Checks that `raw` is an acceptable local mount point and returns it
/// normalized (duplicate and trailing slashes removed).
///
/// Rejects relative paths, `.`/`..` components, characters outside
/// `[A-Za-z0-9._/-]`, the root and well-known system directories, and
/// anything beneath the pseudo and system trees.
pub fn validate_mount_point(raw: impl AsRef<Path>) -> Result<PathBuf> {
    let raw = raw.as_ref();
    let text = raw
        .to_str()
        .ok_or_else(|| Error::validation("mount point", format!("{:?} is not valid UTF-8", raw)))?;

    if !text.starts_with('/') {
        return Err(Error::validation(
            "mount point",
            format!("{:?} is not an absolute path", text),
        ));
    }
    if let Some(bad) = text
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-')))
    {
        return Err(Error::validation(
            "mount point",
            format!("{:?} contains disallowed character {:?}", text, bad),
        ));
    }

    let components: Vec<&str> = text.split('/').filter(|c| !c.is_empty()).collect();
    if components.iter().any(|c| *c == "." || *c == "..") {
        return Err(Error::validation(
            "mount point",
            format!("{:?} contains '.' or '..' components", text),
        ));
    }

    let normalized = format!("/{}", components.join("/"));
    if SYSTEM_DIRS.contains(&normalized.as_str()) {
        return Err(Error::validation(
            "mount point",
            format!("{} is a system directory", normalized),
        ));
    }
    if let Some(tree) = SYSTEM_TREES
        .iter()
        .find(|tree| normalized.starts_with(&format!("{}/", tree)))
    {
        return Err(Error::validation(
            "mount point",
            format!("{} is inside {}", normalized, tree),
        ));
    }

    Ok(PathBuf::from(normalized))
}

/// One CIFS mount option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOption {
    /// `iocharset=`
    IoCharset(String),
    /// `rw`
    ReadWrite,
    /// `seal`: require SMB3 encryption
    Seal,
    /// `credentials=`
    Credentials(PathBuf),
    /// `uid=`
    Uid(u32),
    /// `gid=`
    Gid(u32),
    /// `file_mode=`
    FileMode(u16),
    /// `dir_mode=`
    DirMode(u16),
    /// `cache=`
    Cache(String),
    /// `rsize=`
    ReadSize(u32),
    /// `wsize=`
    WriteSize(u32),
    /// `actimeo=`
    AttrTimeout(u32),
    /// Any bare flag or `key=value` passed through verbatim
    Raw(String),
}

impl fmt::Display for MountOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountOption::IoCharset(c) => write!(f, "iocharset={}", c),
            MountOption::ReadWrite => f.write_str("rw"),
            MountOption::Seal => f.write_str("seal"),
            MountOption::Credentials(p) => write!(f, "credentials={}", p.display()),
            MountOption::Uid(uid) => write!(f, "uid={}", uid),
            MountOption::Gid(gid) => write!(f, "gid={}", gid),
            MountOption::FileMode(mode) => write!(f, "file_mode={:04o}", mode),
            MountOption::DirMode(mode) => write!(f, "dir_mode={:04o}", mode),
            MountOption::Cache(c) => write!(f, "cache={}", c),
            MountOption::ReadSize(n) => write!(f, "rsize={}", n),
            MountOption::WriteSize(n) => write!(f, "wsize={}", n),
            MountOption::AttrTimeout(n) => write!(f, "actimeo={}", n),
            MountOption::Raw(s) => f.write_str(s),
        }
    }
}

/// Ordered option list with a single protocol-version slot that is always
/// serialized first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    version: Option<String>,
    options: Vec<MountOption>,
}

impl MountOptions {
    /// The base option set, without a protocol version.
    pub fn base(credentials: &Path, uid: u32, gid: u32, performance: bool) -> Self {
        let mut options = vec![
            MountOption::IoCharset("utf8".into()),
            MountOption::ReadWrite,
            MountOption::Seal,
            MountOption::Credentials(credentials.to_path_buf()),
            MountOption::Uid(uid),
            MountOption::Gid(gid),
            MountOption::FileMode(DEFAULT_FILE_MODE),
            MountOption::DirMode(DEFAULT_DIR_MODE),
        ];
        if performance {
            options.extend([
                MountOption::Cache("loose".into()),
                MountOption::ReadSize(4_194_304),
                MountOption::WriteSize(4_194_304),
                MountOption::AttrTimeout(30),
            ]);
        }
        Self {
            version: None,
            options,
        }
    }

    /// The protocol version, once negotiated.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Options in order, excluding the version.
    pub fn iter(&self) -> impl Iterator<Item = &MountOption> {
        self.options.iter()
    }

    fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Serialization followed by `extra` flags.
    pub fn render_with(&self, extra: &[&str]) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.options.len() + extra.len() + 1);
        if let Some(v) = &self.version {
            parts.push(format!("vers={}", v));
        }
        parts.extend(self.options.iter().map(ToString::to_string));
        parts.extend(extra.iter().map(|s| s.to_string()));
        parts.join(",")
    }
}

impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_with(&[]))
    }
}

/// A fully resolved mount: where from, where to, and with which options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    host: String,
    share: String,
    mount_point: PathBuf,
    options: MountOptions,
}

impl MountSpec {
    /// Builds the descriptor for `username` at an already validated
    /// `mount_point`. The protocol version is left unset.
    pub fn new(
        username: &Username,
        mount_point: PathBuf,
        credentials: &Path,
        uid: u32,
        gid: u32,
        performance: bool,
    ) -> Self {
        Self {
            host: username.host(),
            share: username.share().to_string(),
            mount_point,
            options: MountOptions::base(credentials, uid, gid, performance),
        }
    }

    /// Remote host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote share path.
    pub fn share(&self) -> &str {
        &self.share
    }

    /// `//host/share`
    pub fn device(&self) -> String {
        format!("//{}/{}", self.host, self.share)
    }

    /// Local mount point.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Composed options.
    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Negotiated protocol version, if any.
    pub fn version(&self) -> Option<&str> {
        self.options.version()
    }

    /// A copy of this descriptor with `vers=<version>` injected at the front.
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            options: self.options.clone().with_version(version),
            ..self.clone()
        }
    }

    /// `mount -t cifs <device> <target> -o <options>`
    pub fn mount_command(&self, target: &Path) -> CommandSpec {
        CommandSpec::new("mount")
            .args(["-t", FS_TYPE])
            .arg(self.device())
            .path_arg(target)
            .arg("-o")
            .arg(self.options.to_string())
    }
}
