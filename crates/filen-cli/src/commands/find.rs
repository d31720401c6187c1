//! Find remote files by glob pattern.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::fs::RemotePath;
use filen_core::transfer::Filters;
use filen_core::{Node, NodeId};

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Glob pattern matched against paths below the root
    pub pattern: String,

    /// Remote root to search from (default: /)
    pub path: Option<String>,

    /// Limit recursion depth
    #[arg(long, value_name = "N")]
    pub maxdepth: Option<usize>,

    /// Match folders only
    #[arg(short = 'd', long)]
    pub directories: bool,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let ctx = super::open(config)?;
    let root_path = super::parse_remote(args.path.as_deref().unwrap_or("/"))?;
    let root = ctx.resolver().resolve(&root_path).await?.node;
    if !root.is_folder() {
        anyhow::bail!("{root_path} is not a folder");
    }

    let matcher = Filters::new(&[args.pattern.clone()], &[])?;
    let mut matches = 0usize;

    // Depth-first with an explicit stack; ordering mirrors the batch
    // enumerator (files before subfolders, both lexicographic). The
    // pattern is matched against the path relative to the search root.
    let mut stack: Vec<(NodeId, RemotePath, String, usize)> =
        vec![(root.id, root_path, String::new(), 1)];
    while let Some((folder, prefix, rel_prefix, depth)) = stack.pop() {
        if args.maxdepth.is_some_and(|max| depth > max) {
            continue;
        }
        let listing = ctx.resolver().list(folder).await?;

        if !args.directories {
            let mut files: Vec<&Node> = listing
                .iter()
                .filter(|n| n.is_file() && !n.trashed)
                .collect();
            files.sort_by(|a, b| a.name.cmp(&b.name));
            for file in files {
                if matcher.matches(&join_rel(&rel_prefix, &file.name)) {
                    println!("{}", prefix.join(&file.name)?);
                    matches += 1;
                }
            }
        }

        let mut folders: Vec<&Node> = listing
            .iter()
            .filter(|n| n.is_folder() && !n.trashed)
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        for sub in folders.iter().rev() {
            let full = prefix.join(&sub.name)?;
            let rel = join_rel(&rel_prefix, &sub.name);
            if args.directories && matcher.matches(&rel) {
                println!("{full}/");
                matches += 1;
            }
            stack.push((sub.id, full, rel, depth + 1));
        }
    }

    if matches == 0 {
        eprintln!("no matches");
    }
    Ok(exit_code::SUCCESS)
}

fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
