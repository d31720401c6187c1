//! Login: derive keys from the password, exchange the auth token for an
//! API key, and store credentials owner-only.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::{bail, Result};
use clap::Args as ClapArgs;

use filen_core::config::{self, Config};

use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Account email (prompted when omitted)
    pub email: Option<String>,

    /// Read the password from stdin (single line) instead of prompting
    #[arg(long)]
    pub password_stdin: bool,

    /// Backend base URL
    #[arg(long, default_value = filen_core::DEFAULT_BASE_URL)]
    pub base_url: String,
}

pub async fn execute(config: &Config, args: &Args) -> Result<u8> {
    let email = match &args.email {
        Some(email) => email.clone(),
        None => prompt_line("Email: ")?,
    };
    if email.is_empty() {
        bail!("email must not be empty");
    }

    let password = if args.password_stdin {
        read_password_from_stdin()?
    } else {
        rpassword::prompt_password("Password: ")?
    };
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let credentials = config::login(&args.base_url, &email, &password).await?;
    config.store_credentials(&credentials)?;
    println!("Logged in as {email}");
    Ok(exit_code::SUCCESS)
}

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn read_password_from_stdin() -> Result<String> {
    if std::io::stdin().is_terminal() {
        bail!(
            "--password-stdin requires the password to be piped in.\n\
             Example: echo \"$SECRET\" | filen login --password-stdin user@example.com"
        );
    }
    let mut password = String::new();
    std::io::stdin().lock().read_line(&mut password)?;
    Ok(password
        .trim_end_matches('\n')
        .trim_end_matches('\r')
        .to_string())
}
