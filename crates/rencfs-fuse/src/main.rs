//! `rencfs` - mount a reverse-encrypting read-only view of a directory.

use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fuser::MountOption;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

use rencfs_core::{CipherView, MasterKey, Mode};
use rencfs_fuse::RencFs;

/// Mount an encrypted (or, with --decrypt, decrypted) read-only view of ROOT
/// on MOUNTPOINT.
///
/// Encryption is deterministic: the same backing content under the same key
/// always produces the same ciphertext, so repeated mirror passes are
/// byte-stable. The mount never writes to ROOT.
#[derive(Parser)]
#[command(name = "rencfs", version)]
struct Cli {
    /// Backing directory to mirror
    root: PathBuf,

    /// Empty directory to mount the view on
    mountpoint: PathBuf,

    /// Passphrase, hashed with SHA-256 into the master key
    key: String,

    /// The backing directory holds ciphertext; expose the decrypted view
    #[arg(short = 'd', long)]
    decrypt: bool,

    /// Skip MAC verification at open time (the view may then serve
    /// unauthenticated data; do not pipe it to untrusted sinks)
    #[arg(short = 'n', long = "no-auth", requires = "decrypt")]
    no_auth: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let mut cli = Cli::parse();

    if !cli.root.is_dir() {
        bail!("root {} is not a directory", cli.root.display());
    }
    if !cli.mountpoint.is_dir() {
        bail!("mountpoint {} is not a directory", cli.mountpoint.display());
    }
    let mut mountpoint_entries = fs::read_dir(&cli.mountpoint)
        .with_context(|| format!("cannot list mountpoint {}", cli.mountpoint.display()))?;
    if mountpoint_entries.next().is_some() {
        bail!("mountpoint {} is not empty", cli.mountpoint.display());
    }

    let master = MasterKey::from_passphrase(cli.key.as_bytes());
    cli.key.zeroize();

    let mode = if cli.decrypt {
        Mode::Decrypt
    } else {
        Mode::Encrypt
    };
    let view = CipherView::new(&cli.root, master, mode).with_verification(!cli.no_auth);

    let options = [
        MountOption::RO,
        MountOption::FSName("rencfs".to_string()),
        MountOption::Subtype("rencfs".to_string()),
        MountOption::DefaultPermissions,
    ];

    // Requests are served by fuser's single session thread: the engine's
    // handle table and the shared descriptor seek positions rely on requests
    // arriving one at a time.
    let session = fuser::spawn_mount2(RencFs::new(view), &cli.mountpoint, &options)
        .with_context(|| format!("failed to mount on {}", cli.mountpoint.display()))?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install signal handler")?;

    info!(
        root = %cli.root.display(),
        mountpoint = %cli.mountpoint.display(),
        mode = ?mode,
        verify = !cli.no_auth,
        "mounted; press Ctrl-C to unmount"
    );

    let _ = shutdown_rx.recv();
    drop(session); // unmounts
    info!("unmounted");
    Ok(())
}
