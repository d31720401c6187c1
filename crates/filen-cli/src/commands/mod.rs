//! Command implementations. Each module owns its clap `Args` struct and
//! an `execute` returning the process exit code.

pub mod config_cmd;
pub mod cp;
pub mod delete_path;
pub mod download;
pub mod download_path;
pub mod find;
pub mod list_trash;
pub mod login;
pub mod logout;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod rename;
pub mod resolve;
pub mod restore_path;
pub mod restore_uuid;
pub mod trash;
pub mod tree;
pub mod upload;
pub mod verify;
pub mod whoami;

use std::io::Write;

use anyhow::{Context as _, Result};

use filen_core::config::{Config, Context};
use filen_core::transfer::BatchReport;
use filen_core::{CancelFlag, RemotePath};

use crate::exit_code;

/// Open the context from stored credentials.
pub fn open(config: &Config) -> Result<Context> {
    Context::open(config.clone()).context("failed to open session")
}

pub fn parse_remote(path: &str) -> Result<RemotePath> {
    RemotePath::parse(path).with_context(|| format!("invalid remote path {path:?}"))
}

/// Ask a yes/no question on the terminal. `force` answers yes.
pub fn confirm(prompt: &str, force: bool) -> Result<bool> {
    if force {
        return Ok(true);
    }
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Cancel flag tripped by Ctrl-C. The current chunk settles before the
/// batch stops, so the journal stays accurate.
pub fn install_cancel_handler() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancellation requested");
            eprintln!("\ninterrupted, finishing the current chunk...");
            flag.cancel();
        }
    });
    cancel
}

/// Print the batch summary and derive the exit code.
pub fn summarize(report: &BatchReport, quiet: bool, verbose: u8) -> u8 {
    if !quiet {
        eprintln!(
            "{} completed, {} skipped, {} failed",
            report.completed,
            report.skipped,
            report.failed.len()
        );
        for failure in &report.failed {
            if verbose > 0 {
                eprintln!(
                    "  {}: {} ({})",
                    failure.remote_path, failure.kind, failure.message
                );
            } else {
                eprintln!("  {}: {}", failure.remote_path, failure.kind);
            }
        }
        if report.interrupted {
            eprintln!("interrupted; re-run the same command to resume");
        }
    }
    if report.success() {
        exit_code::SUCCESS
    } else {
        exit_code::PARTIAL
    }
}
