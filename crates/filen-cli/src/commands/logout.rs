//! Logout: remove the stored credentials file.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute(config: &Config, args: &Args) -> Result<u8> {
    if !super::confirm("Remove stored credentials?", args.force)? {
        eprintln!("aborted");
        return Ok(exit_code::PARTIAL);
    }
    if config.delete_credentials()? {
        println!("Logged out");
    } else {
        println!("No stored credentials");
    }
    Ok(exit_code::SUCCESS)
}
