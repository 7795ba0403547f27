use anyhow::Result;
use boxmount::modules::prompt::{Prompter, TerminalPrompter, UnattendedPrompter};
use boxmount::{
    CancelToken, Error, PasswordSource, PersistMethod, Session, Settings, SystemPaths, SystemRunner,
    TeardownSettings,
};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use nix::unistd::geteuid;
use secrecy::SecretString;
use serde::Serialize;
use std::env;
use std::fmt::Display;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a Storage Box and make the mount persistent
    Provision(ProvisionArgs),
    /// Unmount a Storage Box and remove its persistence
    Teardown(TeardownArgs),
}

#[derive(Args)]
struct ProvisionArgs {
    /// Never ask; answer every decision with its unattended default
    #[arg(short = 'y', long)]
    non_interactive: bool,
    /// Storage Box username (uNNNNNN or uNNNNNN-subN)
    #[arg(short, long)]
    user: Option<String>,
    /// Password
    #[arg(long, env = "BOXMOUNT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Read the password from the first line of this file
    #[arg(long)]
    password_file: Option<PathBuf>,
    /// Do not ask for the password twice
    #[arg(long)]
    skip_confirm: bool,
    /// Mount point (defaults to the profile's)
    #[arg(short, long)]
    mount_point: Option<PathBuf>,
    /// Owner of mounted files (defaults to SUDO_UID, else 0)
    #[arg(long)]
    uid: Option<u32>,
    /// Group of mounted files (defaults to SUDO_GID, else 0)
    #[arg(long)]
    gid: Option<u32>,
    /// Add cache and buffer tuning options
    #[arg(long)]
    performance: bool,
    /// Persistence method
    #[arg(long, value_enum)]
    persist: Option<PersistMethod>,
    /// Profile name, for several Storage Boxes on one host
    #[arg(short, long)]
    profile: Option<String>,
    /// Show what would be done without changing anything
    #[arg(long)]
    dry_run: bool,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TeardownArgs {
    /// Storage Box username, to select its implied profile
    #[arg(short, long)]
    user: Option<String>,
    /// Profile name
    #[arg(short, long)]
    profile: Option<String>,
    /// Mount point (defaults to the profile's)
    #[arg(short, long)]
    mount_point: Option<PathBuf>,
    /// Also delete the credential file
    #[arg(long)]
    purge_credentials: bool,
    /// Show what would be done without changing anything
    #[arg(long)]
    dry_run: bool,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn sudo_id(var: &str) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn mount_helper_present() -> bool {
    which::which("mount.cifs").is_ok()
        || ["/sbin/mount.cifs", "/usr/sbin/mount.cifs"]
            .iter()
            .any(|p| Path::new(p).exists())
}

/// Root and the CIFS mount helper are required; a dry run only warns.
fn preflight(dry_run: bool) -> Result<(), Error> {
    let mut problems = Vec::new();
    if !geteuid().is_root() {
        problems.push("must run as root".to_string());
    }
    if !mount_helper_present() {
        problems.push("mount.cifs not found; install cifs-utils".to_string());
    }
    if problems.is_empty() {
        return Ok(());
    }
    if dry_run {
        for problem in &problems {
            warn!("{} (ignored for dry run)", problem);
        }
        return Ok(());
    }
    Err(Error::Preflight(problems.join("; ")))
}

fn print_report<T: Serialize + Display>(report: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

async fn provision(session: &Session, args: ProvisionArgs, progress: bool) -> Result<()> {
    preflight(args.dry_run)?;

    let password = match (args.password, args.password_file) {
        (Some(literal), _) => PasswordSource::Literal(SecretString::from(literal)),
        (None, Some(path)) => PasswordSource::File(path),
        (None, None) => PasswordSource::Prompt {
            confirm: !args.skip_confirm,
        },
    };
    let settings = Settings {
        username: args.user,
        password,
        mount_point: args.mount_point,
        uid: args.uid.unwrap_or_else(|| sudo_id("SUDO_UID")),
        gid: args.gid.unwrap_or_else(|| sudo_id("SUDO_GID")),
        performance: args.performance,
        persistence: args.persist,
        profile: args.profile,
        dry_run: args.dry_run,
        progress,
        paths: SystemPaths::default(),
        ..Settings::default()
    };

    let mut prompter: Box<dyn Prompter> = if args.non_interactive {
        Box::new(UnattendedPrompter)
    } else {
        Box::new(TerminalPrompter)
    };
    let report = session.provision(&settings, prompter.as_mut()).await?;
    print_report(&report, args.json)
}

async fn teardown(session: &Session, args: TeardownArgs) -> Result<()> {
    preflight(args.dry_run)?;

    let settings = TeardownSettings {
        username: args.user,
        profile: args.profile,
        mount_point: args.mount_point,
        purge_credentials: args.purge_credentials,
        dry_run: args.dry_run,
        paths: SystemPaths::default(),
    };
    let report = session.teardown(&settings).await?;
    print_report(&report, args.json)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logger based on verbose flag
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new().filter_level(log_level).init();

    let cancel = match CancelToken::install() {
        Ok(cancel) => cancel,
        Err(e) => {
            error!("cannot install signal handlers: {}", e);
            std::process::exit(1);
        }
    };
    let session = Session::new(Arc::new(SystemRunner), cancel);
    let progress = !cli.verbose && std::io::stderr().is_terminal();

    info!("Starting boxmount...");

    let result = match cli.command {
        Commands::Provision(args) => provision(&session, args, progress).await,
        Commands::Teardown(args) => teardown(&session, args).await,
    };

    if let Err(e) = result {
        let code = e.downcast_ref::<Error>().map_or(1, Error::exit_code);
        error!("{:#}", e);
        std::process::exit(code);
    }
}
