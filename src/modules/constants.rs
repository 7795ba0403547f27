use std::time::Duration;

// Remote service
/// Domain every Storage Box host lives under.
pub const DOMAIN_SUFFIX: &str = "your-storagebox.de";
/// Share exported to a main account.
pub const MAIN_ACCOUNT_SHARE: &str = "backup";
/// SMB domain written to the credential file.
pub const SMB_DOMAIN: &str = "WORKGROUP";
/// Filesystem type passed to the mount helper.
pub const FS_TYPE: &str = "cifs";

// Profile-derived paths
/// Directory holding credential files.
pub const CREDENTIALS_DIR: &str = "/etc";
/// Credential file name before the profile suffix.
pub const CREDENTIALS_STEM: &str = "storagebox-credentials";
/// Credential file extension.
pub const CREDENTIALS_EXT: &str = "txt";
/// Directory holding mount points.
pub const MOUNT_BASE: &str = "/mnt";
/// Mount point name before the profile suffix.
pub const MOUNT_STEM: &str = "storagebox";
/// Static mount table.
pub const FSTAB_PATH: &str = "/etc/fstab";
/// Where unit files are installed.
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// Protocol versions, most capable first.
pub const PROTOCOL_VERSIONS: &[&str] = &["3.1.1", "3.0", "2.1"];

// Timing
/// Upper bound on real mount attempts.
pub const MAX_MOUNT_ATTEMPTS: u32 = 3;
/// Pause between mount attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Limit for one protocol probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
/// Limit for one real mount attempt.
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(30);
/// Limit for `umount` and `systemctl`.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
/// Limit for read-only queries such as `mountpoint`.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// How often a cancellable sleep checks for cancellation.
pub const CANCEL_POLL: Duration = Duration::from_millis(250);

// Permissions
/// Credential files and their backups.
pub const CREDENTIALS_MODE: u32 = 0o600;
/// The mount table and unit files.
pub const CONFIG_FILE_MODE: u32 = 0o644;
/// `file_mode` of mounted files.
pub const DEFAULT_FILE_MODE: u16 = 0o660;
/// `dir_mode` of mounted directories.
pub const DEFAULT_DIR_MODE: u16 = 0o770;

// Persistence
/// Options appended to a mount table line.
pub const FSTAB_BOOT_FLAGS: &[&str] = &[
    "_netdev",
    "x-systemd.automount",
    "x-systemd.idle-timeout=60",
];
/// `TimeoutSec=` of the mount unit.
pub const UNIT_TIMEOUT_SEC: u32 = 30;
/// `TimeoutIdleSec=` of the automount unit.
pub const AUTOMOUNT_IDLE_SEC: u32 = 60;

/// Exit status for operator-requested termination (128 + SIGINT).
pub const EXIT_CANCELLED: i32 = 130;

/// Exact paths that are never acceptable mount points.
pub const SYSTEM_DIRS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root",
    "/run", "/sbin", "/srv", "/sys", "/tmp", "/usr", "/var",
];

/// Trees that nothing may be mounted beneath.
pub const SYSTEM_TREES: &[&str] = &[
    "/proc", "/sys", "/dev", "/run", "/boot", "/etc", "/bin", "/sbin", "/lib", "/lib64", "/usr",
];
