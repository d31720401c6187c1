//! Create a remote folder, including missing parents.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote folder path to create
    pub path: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(&args.path)?;
    let node = ctx.mkdir(&path).await?;
    println!("{}  {path}", node.id);
    Ok(exit_code::SUCCESS)
}
