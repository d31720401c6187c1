//! List a remote directory.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{presets, Table};

use filen_core::config::Config;
use filen_core::{Node, NodeKind};

use crate::exit_code;
use crate::output::{format_timestamp, human_bytes};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path (default: /)
    pub path: Option<String>,

    /// Long listing with size and modification time
    #[arg(short = 'l')]
    pub long: bool,

    /// Include the identifier column
    #[arg(long)]
    pub uuids: bool,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(args.path.as_deref().unwrap_or("/"))?;
    let resolved = ctx.resolver().resolve(&path).await?;

    let mut nodes: Vec<Node> = if resolved.node.is_folder() {
        ctx.resolver().list(resolved.node.id).await?.as_ref().clone()
    } else {
        // A file path lists the file itself, plus any same-name twins.
        let mut nodes = vec![resolved.node];
        nodes.extend(resolved.duplicates);
        nodes
    };
    nodes.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then(a.name.cmp(&b.name))
            .then(a.id.cmp(&b.id))
    });

    if args.long || args.uuids {
        let mut table = Table::new();
        table.load_preset(presets::NOTHING);
        let mut header = vec!["NAME", "KIND", "SIZE", "MODIFIED"];
        if args.uuids {
            header.push("UUID");
        }
        table.set_header(header);
        for node in &nodes {
            let mut row = vec![
                display_name(node),
                kind_str(node).to_string(),
                if node.is_file() {
                    human_bytes(node.size())
                } else {
                    "-".to_string()
                },
                format_timestamp(node.modified_ms),
            ];
            if args.uuids {
                row.push(node.id.to_hex());
            }
            table.add_row(row);
        }
        println!("{table}");
    } else {
        for node in &nodes {
            println!("{}", display_name(node));
        }
    }
    Ok(exit_code::SUCCESS)
}

fn display_name(node: &Node) -> String {
    if node.is_folder() {
        format!("{}/", node.name)
    } else {
        node.name.clone()
    }
}

fn kind_str(node: &Node) -> &'static str {
    match node.kind {
        NodeKind::Folder => "folder",
        NodeKind::File => "file",
    }
}
