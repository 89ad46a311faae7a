//! CLI argument parsing with subcommand architecture.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stratum", version, about = "Multi-tenant storage gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway (default when no subcommand is given)
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "STRATUM_CONFIG")]
    pub config: String,

    /// Listen host
    #[arg(long, env = "STRATUM_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "STRATUM_PORT")]
    pub port: Option<u16>,

    /// Bootstrap API key (overrides config)
    #[arg(long, env = "STRATUM_BOOTSTRAP_API_KEY", hide_env_values = true)]
    pub bootstrap_api_key: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", env = "STRATUM_LOG_LEVEL")]
    pub log_level: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: "config.yaml".to_string(),
            host: None,
            port: None,
            bootstrap_api_key: None,
            log_level: "info".to_string(),
        }
    }
}
