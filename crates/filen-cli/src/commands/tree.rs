//! Render the remote hierarchy as a tree.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::{Node, NodeId, Resolver};

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path (default: /)
    pub path: Option<String>,

    /// Limit recursion depth
    #[arg(long, value_name = "N")]
    pub maxdepth: Option<usize>,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let path = super::parse_remote(args.path.as_deref().unwrap_or("/"))?;
    let root = ctx.resolver().resolve(&path).await?.node;

    if !root.is_folder() {
        println!("{}", root.name);
        return Ok(exit_code::SUCCESS);
    }

    println!("{}", if path.is_root() { "/" } else { path.as_str() });
    let (folders, files) = render(ctx.resolver(), root.id, String::new(), 1, args.maxdepth).await?;
    println!();
    println!("{folders} folders, {files} files");
    Ok(exit_code::SUCCESS)
}

/// Boxed recursion (async fns cannot recurse directly). Returns the
/// `(folders, files)` counts of the rendered subtree.
fn render<'a>(
    resolver: &'a Resolver,
    folder: NodeId,
    prefix: String,
    depth: usize,
    maxdepth: Option<usize>,
) -> Pin<Box<dyn Future<Output = Result<(usize, usize)>> + 'a>> {
    Box::pin(async move {
        if maxdepth.is_some_and(|max| depth > max) {
            return Ok((0, 0));
        }

        let listing = resolver.list(folder).await?;
        let mut nodes: Vec<Node> = listing.iter().filter(|n| !n.trashed).cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let mut folders = 0usize;
        let mut files = 0usize;
        let last_index = nodes.len().saturating_sub(1);
        for (index, node) in nodes.iter().enumerate() {
            let is_last = index == last_index;
            let branch = if is_last { "└── " } else { "├── " };
            println!("{prefix}{branch}{}", node.name);

            if node.is_folder() {
                folders += 1;
                let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
                let (sub_folders, sub_files) =
                    render(resolver, node.id, child_prefix, depth + 1, maxdepth).await?;
                folders += sub_folders;
                files += sub_files;
            } else {
                files += 1;
            }
        }
        Ok((folders, files))
    })
}
