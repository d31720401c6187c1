//! Download remote files or folders by path, resumable per chunk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::fs::RemotePath;
use filen_core::transfer::{BatchRunner, Filters, TransferOptions};

use crate::output::ProgressLine;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote files or folders to download
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Local output directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Recurse into folders
    #[arg(short, long)]
    pub recursive: bool,

    /// Preserve modification timestamps
    #[arg(short, long)]
    pub preserve: bool,

    /// Verify each file against its stored hash
    #[arg(long)]
    pub verify: bool,

    /// Only transfer paths matching these globs (relative to each source)
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// Never transfer paths matching these globs
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// What to do when the local file already exists
    #[arg(long = "on-conflict", value_parser = ["skip", "overwrite", "newer"], default_value = "skip")]
    pub on_conflict: String,
}

pub async fn execute(config: &Config, args: &Args, quiet: bool, verbose: u8) -> Result<u8> {
    let mut ctx = super::open(config)?;
    let sources = args
        .sources
        .iter()
        .map(|s| super::parse_remote(s))
        .collect::<Result<Vec<RemotePath>>>()?;
    let options = TransferOptions {
        filters: Filters::new(&args.include, &args.exclude)?,
        conflict: args.on_conflict.parse()?,
        preserve_mtime: args.preserve,
        verify: args.verify,
        recursive: args.recursive,
    };

    let cancel = super::install_cancel_handler();
    let progress = ProgressLine::new(quiet);
    let labeler = Arc::clone(&progress);

    let (resolver, store) = ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .with_cancel(cancel)
        .with_progress(progress.callback())
        .with_task_callback(Arc::new(move |index, total, task| {
            labeler.set_label(&format!("[{}/{total}] {}", index + 1, task.remote_path));
        }))
        .run_download(&sources, &args.output, &options)
        .await?;
    progress.finish();

    Ok(super::summarize(&report, quiet, verbose))
}
