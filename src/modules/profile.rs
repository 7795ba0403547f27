//! Profile resolution.
//!
//! A profile names one Storage Box attachment. The unnamed profile keeps the
//! single-profile paths; a named profile suffixes every derived path with
//! `-<name>` so two profiles never share a credentials file or mount point.

use super::constants::*;
use super::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;

/// Filesystem locations the engine reads and writes.
///
/// Defaults to the real system paths; tests point these into temporary
/// directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    /// Directory holding credential files
    pub credentials_dir: PathBuf,
    /// Parent of default mount points
    pub mount_base: PathBuf,
    /// Static mount table
    pub fstab: PathBuf,
    /// Directory for generated unit files
    pub unit_dir: PathBuf,
    /// Parent for throwaway protocol-probe mount points
    pub probe_dir: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            credentials_dir: PathBuf::from(CREDENTIALS_DIR),
            mount_base: PathBuf::from(MOUNT_BASE),
            fstab: PathBuf::from(FSTAB_PATH),
            unit_dir: PathBuf::from(UNIT_DIR),
            probe_dir: std::env::temp_dir(),
        }
    }
}

/// A validated profile name; empty means the unnamed profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Profile {
    name: String,
}

/// Paths derived from a [`Profile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePaths {
    /// Credential file for this profile
    pub credentials: PathBuf,
    /// Default mount point for this profile
    pub mount_point: PathBuf,
}

impl Profile {
    /// Validates `name`. `None` and `""` both select the unnamed profile.
    pub fn new(name: Option<&str>) -> Result<Self> {
        let name = name.unwrap_or_default();
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::validation(
                "profile name",
                format!("{:?} contains {:?}; use letters, digits, '-' or '_'", name, bad),
            ));
        }
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Profile name, empty for the unnamed profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the unnamed profile.
    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }

    /// `""` for the unnamed profile, `-<name>` otherwise.
    pub fn suffix(&self) -> String {
        if self.is_unnamed() {
            String::new()
        } else {
            format!("-{}", self.name)
        }
    }

    /// Computes the credentials path and default mount point.
    pub fn resolve(&self, paths: &SystemPaths) -> ProfilePaths {
        let suffix = self.suffix();
        ProfilePaths {
            credentials: paths
                .credentials_dir
                .join(format!("{}{}.{}", CREDENTIALS_STEM, suffix, CREDENTIALS_EXT)),
            mount_point: paths.mount_base.join(format!("{}{}", MOUNT_STEM, suffix)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unnamed() {
            f.write_str("(default)")
        } else {
            f.write_str(&self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::Path;

    #[test]
    fn test_unnamed_profile_uses_fixed_paths() -> Result<()> {
        for name in [None, Some("")] {
            let resolved = Profile::new(name)?.resolve(&SystemPaths::default());
            assert_eq!(
                resolved.credentials,
                Path::new("/etc/storagebox-credentials.txt")
            );
            assert_eq!(resolved.mount_point, Path::new("/mnt/storagebox"));
        }
        Ok(())
    }

    #[test]
    fn test_named_profile_appends_suffix() -> Result<()> {
        let resolved = Profile::new(Some("offsite_2"))?.resolve(&SystemPaths::default());
        assert_eq!(
            resolved.credentials,
            Path::new("/etc/storagebox-credentials-offsite_2.txt")
        );
        assert_eq!(resolved.mount_point, Path::new("/mnt/storagebox-offsite_2"));
        Ok(())
    }

    #[test]
    fn test_distinct_names_never_collide() -> Result<()> {
        let names = ["", "a", "b", "a-b", "a_b", "ab", "sub2", "SUB2", "1", "-", "_"];
        let paths = SystemPaths::default();
        let mut credentials = HashSet::new();
        let mut mounts = HashSet::new();
        for name in names {
            let resolved = Profile::new(Some(name))?.resolve(&paths);
            assert!(credentials.insert(resolved.credentials));
            assert!(mounts.insert(resolved.mount_point));
        }
        Ok(())
    }

    #[test]
    fn test_rejects_disallowed_characters() {
        for name in ["a b", "../x", "x/y", "naïve", "a.b", "a;b"] {
            assert!(
                matches!(Profile::new(Some(name)), Err(Error::Validation { .. })),
                "accepted {:?}",
                name
            );
        }
    }
}
