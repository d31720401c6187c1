//! Permanently delete the node at a path. Unrecoverable; resolution is
//! strict and ambiguous names are refused.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path to delete permanently
    pub path: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(&args.path)?;

    if !super::confirm(
        &format!("Permanently delete {path}? This cannot be undone."),
        args.force,
    )? {
        eprintln!("aborted");
        return Ok(exit_code::PARTIAL);
    }

    let node = ctx.delete_path(&path).await?;
    println!("deleted {path} ({})", node.id);
    Ok(exit_code::SUCCESS)
}
