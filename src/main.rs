// Copyright (c) 2025 Crest Developers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crest::config::Config;
use crest::network::NoPeers;
use crest::node::Node;
use crest::telemetry;

#[derive(Parser)]
#[command(name = "crest", about = "A proof-of-stake full node", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the storage directory from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    telemetry::init_tracing("info");
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        info!(config = %args.config.display(), "config file not found, using defaults");
        Config::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.path = data_dir;
    }

    let mut node = Node::new(config, Arc::new(NoPeers))?;
    node.start()?;
    info!(height = node.height(), "node is up");

    loop {
        std::thread::sleep(Duration::from_secs(60));
        let score = node
            .current_score()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(height = node.height(), utx = node.utx_size(), score = %score, "status");
    }
}
