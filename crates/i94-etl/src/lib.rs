//! I94 Warehouse ETL
//!
//! Batch loader for a small immigration star schema.
//!
//! # Overview
//!
//! - **Sources**: code files, CSV and SAS7BDAT containers read as raw string tuples
//! - **Staging**: raw immigration records kept verbatim with a validity flag
//! - **Tagging**: a staged row is valid when its port is a known airport
//! - **Population**: immigration fact, time dimension and person dimension
//!   built from the valid rows only
//! - **Quality gate**: minimum row counts reported after the load
//!
//! The warehouse is reached through [`session::WarehouseSession`]; Postgres
//! in production, an in-memory implementation in tests.
//!
//! # Example
//!
//! ```no_run
//! use i94_etl::{config::EtlConfig, pipeline::Pipeline, session::PgSession};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load()?;
//!     let mut session = PgSession::connect(
//!         &config.database.url,
//!         Duration::from_secs(config.database.connect_timeout_secs),
//!         config.database.chunk_size,
//!     )
//!     .await?;
//!     let report = Pipeline::new(&config).run(&mut session).await?;
//!     println!("{} facts", report.population.facts);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod decode;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod sources;

pub use error::{EtlError, EtlResult};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// I94 immigration warehouse loader
#[derive(Parser, Debug)]
#[command(name = "i94-etl")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Debug-level console output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drop and recreate every warehouse table
    InitSchema,

    /// Load, validate and populate the warehouse once
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Directory holding the input files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Number of immigration rows to stage
    #[arg(long)]
    pub immigration_limit: Option<usize>,

    /// Number of temperature rows to load
    #[arg(long)]
    pub temperature_limit: Option<usize>,

    /// Write the run report as JSON to this file
    #[arg(long, env = "I94_RUN_REPORT")]
    pub report: Option<PathBuf>,
}

impl Cli {
    /// Command-line values win over the loaded configuration
    pub fn apply_overrides(&self, config: &mut config::EtlConfig) {
        if let Some(ref url) = self.database_url {
            config.database.url = url.clone();
        }
        if let Commands::Run(ref args) = self.command {
            if let Some(ref dir) = args.data_dir {
                config.inputs.data_dir = dir.clone();
            }
            if let Some(limit) = args.immigration_limit {
                config.inputs.immigration_row_limit = limit;
            }
            if let Some(limit) = args.temperature_limit {
                config.inputs.temperature_row_limit = limit;
            }
        }
    }
}
