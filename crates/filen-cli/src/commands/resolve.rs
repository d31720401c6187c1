//! Resolve a remote path to its backend identifier.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;

use crate::exit_code;
use crate::output::format_timestamp;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path
    pub path: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(&args.path)?;
    let resolved = ctx.resolver().resolve(&path).await?;

    let kind = if resolved.node.is_folder() {
        "folder"
    } else {
        "file"
    };
    println!("{}  {kind}  {path}", resolved.node.id);

    if !resolved.duplicates.is_empty() {
        eprintln!(
            "warning: {} more node(s) share this name; identifier-addressed commands are unambiguous:",
            resolved.duplicates.len()
        );
        for dup in &resolved.duplicates {
            eprintln!(
                "  {}  modified {}{}",
                dup.id,
                format_timestamp(dup.modified_ms),
                if dup.trashed { "  (trashed)" } else { "" }
            );
        }
    }
    Ok(exit_code::SUCCESS)
}
