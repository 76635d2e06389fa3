//! jxboot CLI library

pub mod cluster;
pub mod commands;
pub mod error;
pub mod git;
pub mod helm;
pub mod requirements;
pub mod scm;
pub mod versions;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// jxboot - GitOps cluster installation via an in-cluster boot Job
#[derive(Parser, Debug)]
#[command(name = "jxboot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trigger the boot Job for a cluster and tail it to completion
    Run(commands::run::RunArgs),

    /// Create the development environment git repository for a cluster
    Create(commands::create::CreateArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args).await,
            Commands::Create(args) => commands::create::run(args).await,
        }
    }
}
