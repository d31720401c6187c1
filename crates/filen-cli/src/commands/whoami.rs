//! Show the logged-in account and its storage usage.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;
use crate::output::human_bytes;

#[derive(ClapArgs, Clone)]
pub struct Args {}

pub async fn execute(config: &Config, _args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let info = ctx.user_info().await?;
    println!("{}", info.email);
    println!(
        "storage: {} of {} used",
        human_bytes(info.storage_used),
        human_bytes(info.max_storage)
    );
    println!("root folder: {}", info.root_folder);
    Ok(exit_code::SUCCESS)
}
