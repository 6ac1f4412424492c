//! I94 ETL - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use i94_common::logging::{init_logging, LogConfig, LogLevel};
use i94_etl::{
    config::EtlConfig,
    pipeline::{Pipeline, RunReport},
    session::{PgSession, WarehouseSession},
    Cli, Commands,
};
use std::{process, time::Duration};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let defaults = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("i94-etl")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = match defaults.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {}", e);
            defaults
        },
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {:#}", e);
            process::exit(1);
        },
    };

    let result = execute(&cli).await;

    if let Err(e) = result {
        error!(error = %format!("{:#}", e), "Command failed");
        drop(guard);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> Result<()> {
    let mut config = EtlConfig::load().context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let mut session = PgSession::connect(
        &config.database.url,
        Duration::from_secs(config.database.connect_timeout_secs),
        config.database.chunk_size,
    )
    .await?;

    let outcome = match cli.command {
        Commands::InitSchema => Pipeline::initialize(&mut session).await.map(|()| None),
        Commands::Run(_) => Pipeline::new(&config).run(&mut session).await.map(Some),
    };

    // close on every path, success or not
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close database session cleanly");
    }

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            error!(stage = %e.stage, cause = %e.source, "Pipeline stage failed");
            return Err(e.into());
        },
    };

    if let (Some(report), Commands::Run(args)) = (report, &cli.command) {
        summarize(&report);
        if let Some(ref path) = args.report {
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write run report to {}", path.display()))?;
            info!("Run report written to {}", path.display());
        }
    } else {
        info!("Schema initialized");
    }

    Ok(())
}

fn summarize(report: &RunReport) {
    for verdict in &report.quality {
        info!(
            table = %verdict.table,
            rows = verdict.actual_rows,
            minimum = verdict.min_rows,
            passed = verdict.passed,
            "Quality verdict"
        );
    }
    let elapsed = report.finished_at - report.started_at;
    info!(
        "Run complete in {} ms: {} staged, {} valid, {} facts",
        elapsed.num_milliseconds(),
        report.staged.written,
        report.population.valid_rows,
        report.population.facts
    );
}
