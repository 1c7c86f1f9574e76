//! sveltosctl CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use config::CtlConfig;
pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// sveltosctl - command line companion for Sveltos
#[derive(Parser, Debug)]
#[command(name = "sveltosctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default ~/.sveltosctl/config.yaml)
    #[arg(long = "config-filename", short = 'c', global = true)]
    pub config_filename: Option<PathBuf>,

    /// Enable debug logging (`--verbose=false` overrides the config file)
    #[arg(
        long,
        short = 'v',
        global = true,
        env = "SVELTOSCTL_VERBOSE",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub verbose: Option<bool>,

    /// Log informational output instead of printing it
    #[arg(long, global = true)]
    pub no_console_output: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate artifacts for managed clusters
    Generate(commands::generate::GenerateArgs),
    /// Register a cluster with Sveltos
    Register(commands::register::RegisterArgs),
    /// Print client version information
    Version,
}

impl Cli {
    /// Resolve configuration from flags, environment and the config file
    pub fn config(&self) -> Result<CtlConfig> {
        CtlConfig::resolve(&self.global)
    }

    /// Run the CLI command
    pub async fn run(self, config: CtlConfig) -> Result<()> {
        match self.command {
            Commands::Generate(args) => commands::generate::run(args, &config).await,
            Commands::Register(args) => commands::register::run(args, &config),
            Commands::Version => commands::version::run(&config),
        }
    }
}
