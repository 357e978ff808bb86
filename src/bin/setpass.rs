//! Password hash configuration tool
//!
//! Hashes a dashboard password with bcrypt and persists PASSWORD_HASH
//! into the env file. Run once during provisioning; the daemon picks
//! the hash up on its next start (cold key).

use anyhow::{bail, Context};
use camcap::settings::SettingsStore;
use clap::Parser;
use std::collections::HashMap;
use std::io::Write;

#[derive(Parser)]
#[command(name = "setpass", version, about = "Set the CamCap dashboard password")]
struct Args {
    /// Env file to update
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Password on the command line (prompts when omitted)
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let password = match args.password {
        Some(password) => password,
        None => prompt("New dashboard password: ")?,
    };

    if password.len() < 8 {
        bail!("password must be at least 8 characters");
    }

    let hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST).context("bcrypt hash failed")?;

    let store = SettingsStore::load(&args.env_file)?;
    let mut patch = HashMap::new();
    patch.insert("PASSWORD_HASH".to_string(), hash);
    store.update(patch).await?;

    println!("Password hash written to {}", args.env_file);
    println!("Restart the daemon for the change to take effect.");
    Ok(())
}

fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
