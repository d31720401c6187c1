//! Show or change client configuration.

use anyhow::{bail, Result};
use clap::Args as ClapArgs;

use filen_core::config::Config;
use filen_core::fs::{CACHE_CAPACITY, CACHE_TTL};
use filen_core::CHUNK_SIZE;

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Set a key, e.g. `--set base-url https://gateway.example.com`
    #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
    pub set: Option<Vec<String>>,
}

pub fn execute(config: &Config, args: &Args) -> Result<u8> {
    if let Some(pair) = &args.set {
        return set_key(config, &pair[0], &pair[1]);
    }

    println!("state directory: {}", config.state_dir.display());
    println!("batch journals:  {}", config.batch_states_dir().display());
    match config.load_credentials() {
        Ok(credentials) => {
            println!("account:         {}", credentials.email);
            println!("base url:        {}", credentials.base_url);
        }
        Err(_) => println!("account:         (not logged in)"),
    }
    println!("chunk size:      {CHUNK_SIZE} bytes");
    println!(
        "listing cache:   {CACHE_CAPACITY} folders, {}s TTL",
        CACHE_TTL.as_secs()
    );
    Ok(exit_code::SUCCESS)
}

fn set_key(config: &Config, key: &str, value: &str) -> Result<u8> {
    match key {
        "base-url" => {
            let mut credentials = config.load_credentials()?;
            credentials.base_url = value.trim_end_matches('/').to_string();
            config.store_credentials(&credentials)?;
            println!("base url set to {}", credentials.base_url);
            Ok(exit_code::SUCCESS)
        }
        other => bail!("unknown configuration key {other:?} (supported: base-url)"),
    }
}
