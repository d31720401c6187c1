//! Rename a node in place.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path to rename
    pub path: String,

    /// New name (a single component, no `/`)
    pub new_name: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(&args.path)?;
    ctx.rename(&path, &args.new_name).await?;
    println!("renamed {path} -> {}", args.new_name);
    Ok(exit_code::SUCCESS)
}
