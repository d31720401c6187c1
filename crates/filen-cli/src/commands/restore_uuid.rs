//! Restore a trashed node by identifier.

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::NodeId;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Identifier of the trashed node (see `list-trash`)
    pub uuid: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let id = NodeId::from_hex(&args.uuid)
        .with_context(|| format!("invalid identifier {:?}", args.uuid))?;
    ctx.restore_by_uuid(id).await?;
    println!("restored {id}");
    Ok(exit_code::SUCCESS)
}
