//! Check a remote file against its stored SHA-512, streaming chunks
//! through the hasher without writing anything to disk.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::transfer::Engine;

use crate::exit_code;
use crate::output::ProgressLine;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote file path
    pub path: String,
}

pub async fn execute(config: &Config, args: &Args, quiet: bool) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(&args.path)?;
    let node = ctx.resolver().resolve(&path).await?.node;
    let Some(attrs) = node.file.as_ref() else {
        anyhow::bail!("{path} is a folder");
    };
    let Some(expected) = attrs.hash.clone() else {
        eprintln!("{path}: no stored hash to verify against");
        return Ok(exit_code::PARTIAL);
    };

    let cancel = super::install_cancel_handler();
    let progress = ProgressLine::new(quiet);
    progress.set_label(&node.name);

    let resolver = ctx.resolver();
    let engine = Engine::new(resolver.backend().as_ref(), resolver.master_key(), resolver.email())
        .with_cancel(cancel)
        .with_progress(progress.callback());
    let computed = engine.hash_remote(&node).await?;
    progress.finish();

    if expected.eq_ignore_ascii_case(&computed) {
        println!("{path}: OK");
        Ok(exit_code::SUCCESS)
    } else {
        println!("{path}: MISMATCH");
        println!("  stored   {expected}");
        println!("  computed {computed}");
        Ok(exit_code::PARTIAL)
    }
}
