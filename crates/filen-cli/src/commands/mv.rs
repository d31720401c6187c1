//! Move a node into another folder.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path to move
    pub source: String,

    /// Destination folder
    pub dest: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let source = super::parse_remote(&args.source)?;
    let dest = super::parse_remote(&args.dest)?;
    let node = ctx.move_node(&source, &dest).await?;
    println!("moved {} -> {dest}/{}", source, node.name);
    Ok(exit_code::SUCCESS)
}
