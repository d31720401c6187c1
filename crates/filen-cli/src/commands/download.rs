//! Download one file by identifier, resumable per chunk.
//!
//! Identifier addressing pins the exact node, so duplicate names cannot
//! redirect a resumed download.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::transfer::{
    batch_id, BatchJournal, DownloadOptions, Engine, Operation, Task, TransferOutcome,
};
use filen_core::NodeId;

use crate::exit_code;
use crate::output::ProgressLine;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// File identifier (as shown by `ls --uuids`)
    pub uuid: String,

    /// Output file path (defaults to the remote name)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Preserve the remote modification timestamp
    #[arg(short, long)]
    pub preserve: bool,

    /// Verify the file against its stored hash
    #[arg(long)]
    pub verify: bool,
}

pub async fn execute(config: &Config, args: &Args, quiet: bool) -> Result<u8> {
    let mut ctx = super::open(config)?;
    let id = NodeId::from_hex(&args.uuid)
        .with_context(|| format!("invalid identifier {:?}", args.uuid))?;

    let wire = ctx.backend().file_info(id).await?;
    let node = ctx.resolver().decode_file(&wire)?;
    let dest = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&node.name));

    let cancel = super::install_cancel_handler();
    let progress = ProgressLine::new(quiet);
    progress.set_label(&node.name);

    // Same journal discipline as a batch, with a single task.
    let sources = vec![id.to_hex()];
    let target = dest.to_string_lossy().into_owned();
    let bid = batch_id(Operation::Download, &sources, &target);

    let (resolver, store) = ctx.batch_parts();
    let mut journal = match store.load(&bid)? {
        Some(journal) if journal.has_non_terminal_tasks() => {
            eprintln!("resuming interrupted download");
            journal
        }
        _ => {
            let mut journal = BatchJournal::new(Operation::Download, sources, target);
            let mut task = Task::new(dest.clone(), format!("/{}", node.name), node.size(), node.modified_ms);
            task.node = Some(id);
            journal.tasks.push(task);
            journal
        }
    };
    store.save(&mut journal)?;

    let engine = Engine::new(resolver.backend().as_ref(), resolver.master_key(), resolver.email())
        .with_cancel(cancel)
        .with_progress(progress.callback());
    let options = DownloadOptions {
        verify: args.verify,
        preserve_mtime: args.preserve,
    };

    let mut task = journal.tasks[0].clone();
    let mut checkpoint = |t: &Task| {
        journal.tasks[0] = t.clone();
        store.checkpoint(&mut journal)
    };
    let result = engine
        .download_file(&mut task, &node, options, &mut checkpoint)
        .await;
    progress.finish();

    match result {
        Ok(TransferOutcome::Completed) => {
            journal.tasks[0] = task;
            store.delete(&bid)?;
            if !quiet {
                eprintln!("downloaded {}", dest.display());
            }
            Ok(exit_code::SUCCESS)
        }
        Ok(TransferOutcome::Interrupted) => {
            journal.tasks[0] = task;
            store.save(&mut journal)?;
            eprintln!("interrupted; re-run the same command to resume");
            Ok(exit_code::PARTIAL)
        }
        Err(err) => {
            task.fail(&err);
            journal.tasks[0] = task;
            store.save(&mut journal)?;
            Err(err.into())
        }
    }
}
