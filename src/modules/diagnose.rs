//! Best-effort classification of mount helper output.
//!
//! The classification only picks the message shown to the operator. Retry
//! and termination decisions are made from exit status and timeouts alone.

use super::command::CommandOutput;
use regex::RegexSet;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Coarse category of a failed mount invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    /// Authentication or access was refused.
    PermissionDenied,
    /// Host, share or local path could not be found.
    PathNotFound,
    /// The helper or kernel rejected an option.
    InvalidArgument,
    /// The command did not finish before its timeout.
    TimedOut,
    /// Nothing recognizable in the output.
    Unknown,
}

impl Diagnosis {
    /// Actionable hint for the operator.
    pub fn hint(&self) -> &'static str {
        match self {
            Diagnosis::PermissionDenied => {
                "check username and password in the credentials file and that Samba/SMB access is enabled for the account"
            }
            Diagnosis::PathNotFound => {
                "check the host name and share path; sub-accounts expose only their own folder"
            }
            Diagnosis::InvalidArgument => {
                "the CIFS helper rejected an option; the kernel module may not support the negotiated version or seal"
            }
            Diagnosis::TimedOut => "the remote endpoint did not answer in time; check network reachability on port 445",
            Diagnosis::Unknown => "see the captured output above",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Diagnosis::PermissionDenied => "permission denied",
            Diagnosis::PathNotFound => "path not found",
            Diagnosis::InvalidArgument => "invalid argument",
            Diagnosis::TimedOut => "timed out",
            Diagnosis::Unknown => "unrecognized failure",
        };
        f.write_str(label)
    }
}

// Order matters: index into this set maps onto CATEGORIES.
const PATTERNS: &[&str] = &[
    r"(?i)permission denied|error\(13\)|STATUS_LOGON_FAILURE|STATUS_ACCESS_DENIED",
    r"(?i)no such file or directory|error\(2\)|could not resolve address|STATUS_BAD_NETWORK_NAME|host is down",
    r"(?i)invalid argument|error\(22\)|unknown parameter",
];

const CATEGORIES: &[Diagnosis] = &[
    Diagnosis::PermissionDenied,
    Diagnosis::PathNotFound,
    Diagnosis::InvalidArgument,
];

fn patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(PATTERNS).unwrap_or_else(|_| RegexSet::empty()))
}

/// Classifies captured output from a failed mount invocation.
pub fn classify(output: &CommandOutput) -> Diagnosis {
    if output.timed_out {
        return Diagnosis::TimedOut;
    }
    classify_text(&output.output)
}

/// Classifies raw helper text. The first matching category wins.
pub fn classify_text(text: &str) -> Diagnosis {
    patterns()
        .matches(text)
        .iter()
        .next()
        .and_then(|idx| CATEGORIES.get(idx).copied())
        .unwrap_or(Diagnosis::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_helper_errors() {
        assert_eq!(
            classify_text("mount error(13): Permission denied\nRefer to the mount.cifs(8) manual page"),
            Diagnosis::PermissionDenied
        );
        assert_eq!(
            classify_text("mount error(2): No such file or directory"),
            Diagnosis::PathNotFound
        );
        assert_eq!(
            classify_text("mount error: could not resolve address for u1.your-storagebox.de"),
            Diagnosis::PathNotFound
        );
        assert_eq!(
            classify_text("mount error(22): Invalid argument"),
            Diagnosis::InvalidArgument
        );
        assert_eq!(classify_text("something odd"), Diagnosis::Unknown);
    }

    #[test]
    fn test_timeout_takes_precedence() {
        let output = CommandOutput {
            status: None,
            output: "mount error(13): Permission denied".into(),
            timed_out: true,
        };
        assert_eq!(classify(&output), Diagnosis::TimedOut);
    }
}
