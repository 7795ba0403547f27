//! Unit-based backend: a `.mount` unit plus a paired `.automount` unit,
//! both named from the escaped mount-point path.

use super::constants::{AUTOMOUNT_IDLE_SEC, FS_TYPE, UNIT_TIMEOUT_SEC};
use super::mountspec::MountSpec;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Escapes a path the way `systemd-escape --path` does.
///
/// Outer slashes are stripped and inner ones become `-`; bytes outside
/// `[A-Za-z0-9:_.]`, and a leading `.`, become `\xNN`. The root escapes
/// to `-`.
pub fn escape_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    let trimmed = text.trim_matches('/');
    if trimmed.is_empty() {
        return "-".to_string();
    }

    let mut escaped = String::with_capacity(trimmed.len());
    let mut previous_slash = false;
    for (i, byte) in trimmed.bytes().enumerate() {
        match byte {
            b'/' if previous_slash => continue,
            b'/' => escaped.push('-'),
            b'.' if i == 0 => escaped.push_str("\\x2e"),
            b if b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'.') => {
                escaped.push(b as char)
            }
            b => {
                let _ = write!(escaped, "\\x{:02x}", b);
            }
        }
        previous_slash = byte == b'/';
    }
    escaped
}

/// Names of the unit pair for one mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitNames {
    /// `<escaped>.mount`
    pub mount: String,
    /// `<escaped>.automount`
    pub automount: String,
}

impl UnitNames {
    /// Unit names derived from the escaped `mount_point`.
    pub fn for_mount_point(mount_point: &Path) -> Self {
        let stem = escape_path(mount_point);
        Self {
            mount: format!("{}.mount", stem),
            automount: format!("{}.automount", stem),
        }
    }

    /// Paths of both unit files under `unit_dir`, mount unit first.
    pub fn paths(&self, unit_dir: &Path) -> [PathBuf; 2] {
        [unit_dir.join(&self.mount), unit_dir.join(&self.automount)]
    }
}

/// Text of the `.mount` unit.
pub fn mount_unit(spec: &MountSpec) -> String {
    format!(
        "\
[Unit]
Description=Storage Box {device}
After=network-online.target
Requires=network-online.target

[Mount]
What={device}
Where={target}
Type={fs_type}
Options={options}
TimeoutSec={timeout}

[Install]
WantedBy=multi-user.target
",
        device = spec.device(),
        target = spec.mount_point().display(),
        fs_type = FS_TYPE,
        options = spec.options(),
        timeout = UNIT_TIMEOUT_SEC,
    )
}

/// Text of the `.automount` unit.
pub fn automount_unit(spec: &MountSpec) -> String {
    format!(
        "\
[Unit]
Description=Automount Storage Box {device}
After=network-online.target
Requires=network-online.target

[Automount]
Where={target}
TimeoutIdleSec={idle}

[Install]
WantedBy=multi-user.target
",
        device = spec.device(),
        target = spec.mount_point().display(),
        idle = AUTOMOUNT_IDLE_SEC,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::credentials::Username;

    #[test]
    fn test_escape_path() {
        for (path, expected) in [
            ("/mnt/storagebox", "mnt-storagebox"),
            ("/mnt/storagebox-sub2", "mnt-storagebox\\x2dsub2"),
            ("/mnt//backup/", "mnt-backup"),
            ("/srv/box.v2", "srv-box.v2"),
            ("/mnt/.hidden", "mnt-.hidden"),
            ("/.hidden", "\\x2ehidden"),
            ("/", "-"),
        ] {
            assert_eq!(escape_path(Path::new(path)), expected, "{}", path);
        }
    }

    #[test]
    fn test_unit_names_pair() {
        let names = UnitNames::for_mount_point(Path::new("/mnt/storagebox-sub2"));
        assert_eq!(names.mount, "mnt-storagebox\\x2dsub2.mount");
        assert_eq!(names.automount, "mnt-storagebox\\x2dsub2.automount");
        let [mount, automount] = names.paths(Path::new("/etc/systemd/system"));
        assert_eq!(
            mount,
            PathBuf::from("/etc/systemd/system/mnt-storagebox\\x2dsub2.mount")
        );
        assert!(automount.ends_with("mnt-storagebox\\x2dsub2.automount"));
    }

    #[test]
    fn test_unit_text() {
        let spec = MountSpec::new(
            &Username::parse("u493700-sub2").unwrap(),
            PathBuf::from("/mnt/storagebox-sub2"),
            Path::new("/etc/storagebox-credentials-sub2.txt"),
            0,
            0,
            false,
        )
        .with_version("3.1.1");

        let mount = mount_unit(&spec);
        assert!(mount.contains("What=//u493700-sub2.your-storagebox.de/u493700-sub2\n"));
        assert!(mount.contains("Where=/mnt/storagebox-sub2\n"));
        assert!(mount.contains("Type=cifs\n"));
        assert!(mount.contains(&format!("Options={}\n", spec.options())));
        assert!(mount.contains("TimeoutSec=30\n"));
        assert!(!mount.contains("x-systemd"));

        let automount = automount_unit(&spec);
        assert!(automount.contains("[Automount]\nWhere=/mnt/storagebox-sub2\nTimeoutIdleSec=60\n"));
        assert!(automount.contains("WantedBy=multi-user.target"));
    }
}
