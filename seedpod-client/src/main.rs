// SeedPod client: list, download and upload files through the tracker.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::Client;

#[derive(Parser, Debug)]
#[command(name = "seedpod-client", version, about = "SeedPod client")]
struct Args {
    /// Config file (TOML). Defaults to ~/.config/seedpod/client.toml, then /etc/seedpod/client.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every file the network holds
    List,
    /// Download a file by its hash
    Download { file_hash: String },
    /// Upload a local file
    Upload { path: PathBuf },
    /// Check the tracker is alive
    Ping {
        #[arg(default_value = "hello")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    let mut client = Client::new(&cfg);

    match args.command {
        Command::List => {
            let listing = client.list().await?;
            if listing.is_empty() {
                println!("no files");
            }
            for (id, meta) in &listing {
                println!("{}  {:>12}  {}  {}", id, meta.size, meta.last_modified, meta.name);
            }
        }
        Command::Download { file_hash } => {
            let path = client.download(&file_hash).await?;
            println!("saved {}", path.display());
        }
        Command::Upload { path } => {
            let done = client.upload(&path).await?;
            println!("{} -> {}: {}", done.file_id, done.seeder, done.reply);
        }
        Command::Ping { message } => {
            println!("{}", client.ping(&message).await?);
        }
    }
    Ok(())
}
