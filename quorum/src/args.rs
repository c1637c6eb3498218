use std::path::PathBuf;

use clap::Parser;

/// Quorum multi-model orchestrator
#[derive(Debug, Parser)]
#[command(name = "quorum", about = "Multi-provider LLM orchestrator with Ultra Synthesis")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "quorum.toml", env = "QUORUM_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "QUORUM_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,
}
