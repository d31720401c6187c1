//! List trashed nodes with their identifiers, for restore and delete.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{presets, Table};

use filen_core::config::Config;

use crate::exit_code;
use crate::output::{format_timestamp, human_bytes};

#[derive(ClapArgs, Clone)]
pub struct Args {}

pub async fn execute(config: &Config, _args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let mut nodes = ctx.list_trash().await?;
    nodes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    if nodes.is_empty() {
        println!("trash is empty");
        return Ok(exit_code::SUCCESS);
    }

    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(["NAME", "KIND", "SIZE", "MODIFIED", "UUID"]);
    for node in &nodes {
        table.add_row([
            node.name.clone(),
            if node.is_folder() { "folder" } else { "file" }.to_string(),
            if node.is_file() {
                human_bytes(node.size())
            } else {
                "-".to_string()
            },
            format_timestamp(node.modified_ms),
            node.id.to_hex(),
        ]);
    }
    println!("{table}");
    Ok(exit_code::SUCCESS)
}
