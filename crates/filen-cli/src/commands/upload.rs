//! Upload local files or folders, resumable per chunk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::transfer::{BatchRunner, Filters, TransferOptions};

use crate::output::ProgressLine;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Local files or directories to upload
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Remote destination folder
    #[arg(short = 't', long, default_value = "/")]
    pub target: String,

    /// Recurse into directories
    #[arg(short, long)]
    pub recursive: bool,

    /// Preserve modification timestamps
    #[arg(short, long)]
    pub preserve: bool,

    /// Only transfer paths matching these globs (relative to each source)
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// Never transfer paths matching these globs
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// What to do when the destination already exists
    #[arg(long = "on-conflict", value_parser = ["skip", "overwrite", "newer"], default_value = "skip")]
    pub on_conflict: String,
}

pub async fn execute(config: &Config, args: &Args, quiet: bool, verbose: u8) -> Result<u8> {
    let mut ctx = super::open(config)?;
    let target = super::parse_remote(&args.target)?;
    let options = TransferOptions {
        filters: Filters::new(&args.include, &args.exclude)?,
        conflict: args.on_conflict.parse()?,
        preserve_mtime: args.preserve,
        verify: false,
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
        .run_upload(&args.sources, &target, &options)
        .await?;
    progress.finish();

    Ok(super::summarize(&report, quiet, verbose))
}
