//! Copy a remote file. The backend has no server-side copy, so this
//! streams through a local temp file: decrypt down, re-encrypt up under
//! a fresh content key.

use anyhow::Result;
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::transfer::{DownloadOptions, Engine, Task};

use crate::exit_code;
use crate::output::ProgressLine;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote file to copy
    pub source: String,

    /// Destination path (an existing folder, or the new file path)
    pub dest: String,
}

pub async fn execute(config: &Config, args: &Args, quiet: bool) -> Result<u8> {
    let ctx = super::open(config)?;
    let source = super::parse_remote(&args.source)?;
    let src = ctx.resolver().resolve(&source).await?.node;
    if !src.is_file() {
        anyhow::bail!("{source} is a folder; copy files individually");
    }

    let dest = super::parse_remote(&args.dest)?;
    let (dest_parent, dest_name) = match ctx.resolver().resolve(&dest).await {
        Ok(resolved) if resolved.node.is_folder() => (dest.clone(), src.name.clone()),
        _ => {
            let parent = dest
                .parent()
                .ok_or_else(|| anyhow::anyhow!("cannot copy onto the root"))?;
            let name = dest
                .name()
                .ok_or_else(|| anyhow::anyhow!("destination has no name"))?;
            (parent, name.to_string())
        }
    };

    // Stage under the destination name so the re-upload carries the
    // right mimetype.
    let staging = std::env::temp_dir().join(format!("filen-cp-{}", src.id));
    std::fs::create_dir_all(&staging)?;
    let temp = staging.join(&dest_name);

    let cancel = super::install_cancel_handler();
    let progress = ProgressLine::new(quiet);
    let resolver = ctx.resolver();
    let engine = Engine::new(resolver.backend().as_ref(), resolver.master_key(), resolver.email())
        .with_cancel(cancel)
        .with_progress(progress.callback());

    let result = async {
        progress.set_label(&format!("{source} (down)"));
        let mut down = Task::new(
            temp.clone(),
            source.as_str().to_string(),
            src.size(),
            src.modified_ms,
        );
        engine
            .download_file(
                &mut down,
                &src,
                DownloadOptions {
                    verify: true,
                    preserve_mtime: true,
                },
                &mut |_| Ok(()),
            )
            .await?;

        let remote_dest = dest_parent.join(&dest_name)?;
        progress.set_label(&format!("{remote_dest} (up)"));
        let parent = resolver.ensure_folder(&dest_parent).await?;
        let mut up = Task::new(temp.clone(), remote_dest.as_str().to_string(), 0, 0);
        engine.upload_file(&mut up, parent.id, &mut |_| Ok(())).await?;
        resolver.invalidate(parent.id);
        Ok::<_, filen_core::Error>(remote_dest)
    }
    .await;
    progress.finish();

    let _ = std::fs::remove_dir_all(&staging);
    let remote_dest = result?;
    println!("copied {source} -> {remote_dest}");
    Ok(exit_code::SUCCESS)
}
