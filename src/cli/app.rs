//! Main CLI application structure

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use super::dataset::{self, DatasetCommands};
use super::deposition::{self, DepositionCommands};
use super::output::{Output, OutputFormat};
use super::version::{self, VersionCommands};
use crate::domain::{DatasetId, Doi};
use crate::storage::{Config, Hub};

#[derive(Parser)]
#[command(name = "dshub")]
#[command(author, version, about = "Versioning and publication for a dataset hub")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config's default_format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new hub
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Manage datasets
    #[command(subcommand)]
    Dataset(DatasetCommands),

    /// Create and list dataset versions
    #[command(subcommand)]
    Version(VersionCommands),

    /// Publish a dataset to the registry
    Publish {
        /// Dataset ID
        dataset: DatasetId,
    },

    /// Create a draft deposition for a dataset without publishing
    Prepare {
        /// Dataset ID
        dataset: DatasetId,
    },

    /// Inspect registry depositions
    #[command(subcommand)]
    Deposition(DepositionCommands),

    /// Show the dataset and deposition a DOI points to
    Resolve {
        /// DOI, e.g. 10.5281/fakenodo.1234567
        doi: Doi,
    },
}

/// Runs a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    let format = match cli.format {
        Some(format) => format,
        None => Config::load()
            .map(|config| config.global.default_format.into())
            .unwrap_or_default(),
    };
    let output = Output::new(format);

    match cli.command {
        Commands::Init { path } => {
            debug!(path = %path, "initializing hub");
            let hub = Hub::init(&path)?;
            debug!(hub_dir = %hub.hub_dir().display(), "created hub directory");
            output.success(&format!("Initialized dshub hub at {}", hub.root().display()));
        }

        Commands::Dataset(cmd) => dataset::run(cmd, &output)?,
        Commands::Version(cmd) => version::run(cmd, &output)?,
        Commands::Publish { dataset } => deposition::publish(&output, dataset)?,
        Commands::Prepare { dataset } => deposition::prepare(&output, dataset)?,
        Commands::Deposition(cmd) => deposition::run(cmd, &output)?,
        Commands::Resolve { doi } => deposition::resolve(&output, &doi)?,
    }

    Ok(())
}
