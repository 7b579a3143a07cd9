use std::path::PathBuf;

use clap::Parser;

/// Provider-balancing reverse proxy for the Anthropic Messages API
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,
}
