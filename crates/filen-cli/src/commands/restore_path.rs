//! Restore a trashed node by its former name. Refuses ambiguous names;
//! `restore-uuid` is always unambiguous.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Former path (only the final name component is matched in trash)
    pub path: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(&args.path)?;
    let Some(name) = path.name() else {
        anyhow::bail!("cannot restore the root");
    };
    let node = ctx.restore_by_name(name).await?;
    println!("restored {} ({})", node.name, node.id);
    Ok(exit_code::SUCCESS)
}
