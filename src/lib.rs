#![doc(html_root_url = "https://docs.rs/boxmount/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! boxmount: provisions a persistent CIFS mount of a Hetzner-style Storage Box
//!
//! Takes a username and a password source, negotiates the SMB protocol
//! version the remote endpoint accepts, mounts the share with bounded
//! retries and registers it for reboot survival.
//!
//! ## Features
//!
//! - Named profiles for several Storage Boxes on one host
//! - Protocol version negotiation (`3.1.1`, `3.0`, `2.1`)
//! - Retries with failure diagnosis and a write-access probe
//! - Persistence through `/etc/fstab` or a systemd mount/automount pair
//! - Interactive and unattended operation, and a dry run that changes nothing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boxmount::{CancelToken, PasswordSource, PersistMethod, Session, Settings, SystemRunner};
//! use boxmount::modules::prompt::UnattendedPrompter;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn run() -> boxmount::Result<()> {
//! let session = Session::new(Arc::new(SystemRunner), CancelToken::new());
//! let settings = Settings {
//!     username: Some("u493700-sub2".into()),
//!     password: PasswordSource::File(PathBuf::from("/root/storagebox.pass")),
//!     persistence: Some(PersistMethod::Systemd),
//!     ..Settings::default()
//! };
//! let report = session.provision(&settings, &mut UnattendedPrompter).await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence methods
//!
//! - `fstab`: one line per mount point, with `x-systemd.automount`
//! - `systemd`: `<escaped>.mount` plus `<escaped>.automount` units
//! - `none`: mounted until the next reboot

pub mod modules;

pub use modules::cleanup::{CancelToken, Cleanup};
pub use modules::command::{CommandRunner, CommandSpec, DryRunRunner, SystemRunner};
pub use modules::credentials::{PasswordSource, Username};
pub use modules::error::{Error, Result, Warning};
pub use modules::persist::PersistMethod;
pub use modules::profile::{Profile, SystemPaths};
pub use modules::session::{RunReport, Session, Settings, TeardownReport, TeardownSettings};
