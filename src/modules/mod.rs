//! Core provisioning modules.
//!
//! The pipeline stages, leaves first:
//!
//! - `profile`: profile names to credential and mount-point paths
//! - `credentials`: usernames, secrets and the credential file
//! - `negotiate`: protocol version negotiation
//! - `mount`: the real mount, with bounded retries
//! - `persist`: reboot persistence through `fstab` or `systemd`
//! - `session`: the pipeline driver
//!
//! Supporting modules:
//!
//! - `command`: structured external commands and their runners
//! - `mountspec`: mount point validation and option composition
//! - `fstab`, `systemd`: the two persistence backends
//! - `cleanup`: cancellation and the cleanup contract
//! - `diagnose`: advisory classification of mount failures
//! - `prompt`: operator decisions
//! - `files`: backups and atomic writes
//! - `progress`: terminal spinner
//! - `constants`, `error`

pub mod cleanup;
pub mod command;
/// Fixed paths, names, timeouts and limits.
pub mod constants;
pub mod credentials;
pub mod diagnose;
pub mod error;
pub mod files;
pub mod fstab;
pub mod mount;
pub mod mountspec;
pub mod negotiate;
pub mod persist;
pub mod profile;
pub mod progress;
pub mod prompt;
pub mod session;
pub mod systemd;

#[cfg(test)]
mod testing;
