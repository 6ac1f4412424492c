//! Shared fixtures for the integration tests
//!
//! - raw immigration records in staging column order
//! - reference code files written to a temporary directory
//! - a Postgres container for the tests that need a real database

#![allow(dead_code)]

use anyhow::{Context, Result};
use i94_etl::models::STAGING_COLUMNS;
use i94_etl::sources::RawRecord;
use std::path::{Path, PathBuf};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Initialize tracing once per test binary
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,i94_etl=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Raw records
// ============================================================================

/// A container row as the adapter renders it: floats keep their `.0`
pub fn raw_record(overrides: &[(&str, &str)]) -> RawRecord {
    STAGING_COLUMNS
        .iter()
        .map(|&column| {
            if let Some((_, value)) = overrides.iter().find(|(name, _)| *name == column) {
                return value.to_string();
            }
            let default = match column {
                "cicid" => "1.0",
                "i94yr" => "2016.0",
                "i94mon" => "4.0",
                "i94cit" | "i94res" => "582.0",
                "i94port" => "ATL",
                "arrdate" => "20545.0",
                "i94mode" => "1.0",
                "i94addr" => "GA",
                "depdate" => "",
                "i94bir" => "30.0",
                "i94visa" => "2.0",
                "count" => "1.0",
                "biryear" => "1990.0",
                "gender" => "M",
                "airline" => "DL",
                "fltno" => "00123",
                "visatype" => "B2",
                _ => "",
            };
            default.to_string()
        })
        .collect()
}

/// A record for `cicid` arriving at `port`
pub fn arrival(cicid: &str, port: &str) -> RawRecord {
    raw_record(&[("cicid", cicid), ("i94port", port)])
}

// ============================================================================
// Reference files
// ============================================================================

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub const AIRPORT_CODES: &str = "\
'ATL'\t=\t'ATLANTA, GA'
'BOS'\t=\t'BOSTON, MA'
'XXX'\t=\t'NOT REPORTED/UNKNOWN'
";

pub const COUNTRY_CODES: &str = "\
   582 =  'MEXICO Air Sea, and Not Reported (I-94, no land arrivals)'
   236 =  'AFGHANISTAN'
   101 =  'ALBANIA'
";

pub const TEMPERATURE_HEADER: &str =
    "dt,AverageTemperature,AverageTemperatureUncertainty,City,Country,Latitude,Longitude\n";

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        Ok(Self {
            _container: container,
            connection_string,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
