#![deny(unsafe_code)]

mod commands;
mod exit_code;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use filen_core::config::Config;

use crate::commands::{
    config_cmd, cp, delete_path, download, download_path, find, list_trash, login, logout, ls,
    mkdir, mv, rename, resolve, restore_path, restore_uuid, trash, tree, upload, verify, whoami,
};

/// Command-line client for end-to-end encrypted Filen cloud storage
#[derive(Parser)]
#[command(name = "filen")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Log in and inspect the account
    filen login
    filen whoami

    # Upload a folder, resumable, only PDFs
    filen upload -r ./reports -t /work --include '*.pdf'

    # Re-run the same command after an interruption to resume
    filen upload -r ./reports -t /work --include '*.pdf'

    # Download a subtree, newest-wins
    filen download-path -r /work -o ./restore --on-conflict newer

    # Check a remote file against its stored hash
    filen verify /work/reports/q3.pdf
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// State directory (default: ~/.filen-cli, env FILEN_CLI_DIR)
    #[arg(long, value_name = "DIR", global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ============ Account ============
    /// Log in and store credentials
    Login(login::Args),

    /// Remove stored credentials
    Logout(logout::Args),

    /// Show the logged-in account
    Whoami(whoami::Args),

    // ============ Browsing ============
    /// List a remote directory
    Ls(ls::Args),

    /// Show a remote directory tree
    Tree(tree::Args),

    /// Find remote files by glob pattern
    Find(find::Args),

    /// Resolve a remote path to its identifier
    Resolve(resolve::Args),

    // ============ Transfers ============
    /// Upload local files or folders (resumable)
    Upload(upload::Args),

    /// Download one file by identifier (resumable)
    Download(download::Args),

    /// Download remote files or folders by path (resumable)
    DownloadPath(download_path::Args),

    /// Check a remote file against its stored hash
    Verify(verify::Args),

    // ============ Tree mutations ============
    /// Create a remote folder (with parents)
    Mkdir(mkdir::Args),

    /// Move a node into another folder
    Mv(mv::Args),

    /// Copy a remote file
    Cp(cp::Args),

    /// Rename a node in place
    Rename(rename::Args),

    /// Move a node to the trash
    Trash(trash::Args),

    /// List trashed nodes
    ListTrash(list_trash::Args),

    /// Restore a trashed node by identifier
    RestoreUuid(restore_uuid::Args),

    /// Restore a trashed node by name
    RestorePath(restore_path::Args),

    /// Permanently delete the node at a path
    DeletePath(delete_path::Args),

    /// Show or change client configuration
    Config(config_cmd::Args),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let quiet = cli.quiet;
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if !quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(exit_code::categorize(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = Config::resolve(cli.config_dir.clone())?;
    let quiet = cli.quiet;
    let verbose = cli.verbose;

    match cli.command {
        // Account commands manage credentials themselves.
        Commands::Login(args) => login::execute(&config, &args).await,
        Commands::Logout(args) => logout::execute(&config, &args),
        Commands::Config(args) => config_cmd::execute(&config, &args),

        // Everything else needs an open context.
        Commands::Whoami(args) => whoami::execute(&config, &args).await,
        Commands::Ls(args) => ls::execute(&config, &args).await,
        Commands::Tree(args) => tree::execute(&config, &args).await,
        Commands::Find(args) => find::execute(&config, &args).await,
        Commands::Resolve(args) => resolve::execute(&config, &args).await,
        Commands::Upload(args) => upload::execute(&config, &args, quiet, verbose).await,
        Commands::Download(args) => download::execute(&config, &args, quiet).await,
        Commands::DownloadPath(args) => {
            download_path::execute(&config, &args, quiet, verbose).await
        }
        Commands::Verify(args) => verify::execute(&config, &args, quiet).await,
        Commands::Mkdir(args) => mkdir::execute(&config, &args).await,
        Commands::Mv(args) => mv::execute(&config, &args).await,
        Commands::Cp(args) => cp::execute(&config, &args, quiet).await,
        Commands::Rename(args) => rename::execute(&config, &args).await,
        Commands::Trash(args) => trash::execute(&config, &args).await,
        Commands::ListTrash(args) => list_trash::execute(&config, &args).await,
        Commands::RestoreUuid(args) => restore_uuid::execute(&config, &args).await,
        Commands::RestorePath(args) => restore_path::execute(&config, &args).await,
        Commands::DeletePath(args) => delete_path::execute(&config, &args).await,
    }
}

/// Wire tracing to stderr, level driven by `-v` count.
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();
}
