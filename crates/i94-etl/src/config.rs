//! Configuration management

use crate::error::{EtlError, EtlResult};
use crate::models::ReferenceKind;
use crate::sources::container::resolve_encoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/i94_db";

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of rows per multi-row insert.
pub const DEFAULT_STAGING_CHUNK_SIZE: usize = 1000;

pub const DEFAULT_DATA_DIR: &str = ".";

pub const DEFAULT_COUNTRY_CODES_FILE: &str = "I94_country_code.txt";
pub const DEFAULT_ADDRESS_CODES_FILE: &str = "I94_address_description.txt";
pub const DEFAULT_AIRPORT_CODES_FILE: &str = "I94_airport_description.txt";
pub const DEFAULT_TRAVEL_MODES_FILE: &str = "I94_travel_modes.txt";
pub const DEFAULT_IMMIGRATION_FILE: &str = "i94_apr16_sub.sas7bdat";
pub const DEFAULT_TEMPERATURE_FILE: &str = "GlobalLandTemperaturesByCity.csv";

/// Only the first rows of the immigration container are staged.
pub const DEFAULT_IMMIGRATION_ROW_LIMIT: usize = 4000;

pub const DEFAULT_TEMPERATURE_ROW_LIMIT: usize = 20000;

pub const DEFAULT_TEMPERATURE_COUNTRY: &str = "United States";

pub const DEFAULT_CONTAINER_ENCODING: &str = "ISO-8859-1";

pub const DEFAULT_QUALITY_MIN_ROWS: i64 = 2000;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub inputs: InputConfig,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub chunk_size: usize,
}

/// Input files and how much of them to read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub data_dir: PathBuf,
    pub country_codes: PathBuf,
    pub address_codes: PathBuf,
    pub airport_codes: PathBuf,
    pub travel_modes: PathBuf,
    pub immigration: PathBuf,
    pub temperatures: PathBuf,
    pub container_encoding: String,
    pub immigration_row_limit: usize,
    pub temperature_row_limit: usize,
    pub temperature_country: String,
}

/// Minimum row counts checked after population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub min_immigration_rows: i64,
    pub min_temperature_rows: i64,
}

impl InputConfig {
    /// Relative file names resolve against `data_dir`
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }

    pub fn reference_path(&self, kind: ReferenceKind) -> PathBuf {
        let file = match kind {
            ReferenceKind::Country => &self.country_codes,
            ReferenceKind::Address => &self.address_codes,
            ReferenceKind::Airport => &self.airport_codes,
            ReferenceKind::TravelMode => &self.travel_modes,
        };
        self.resolve(file)
    }

    pub fn immigration_path(&self) -> PathBuf {
        self.resolve(&self.immigration)
    }

    pub fn temperature_path(&self) -> PathBuf {
        self.resolve(&self.temperatures)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> EtlResult<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EtlError::Config(format!("{} has an invalid value: {:?}", key, raw))),
    }
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

impl EtlConfig {
    /// Load configuration from `.env`, the environment and defaults.
    ///
    /// Not validated here: command-line overrides are applied first, then
    /// [`EtlConfig::validate`] runs on the result.
    pub fn load() -> EtlResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EtlResult<Self> {
        let lookup = &lookup;
        Ok(Self {
            database: DatabaseConfig {
                url: text(lookup, "DATABASE_URL", DEFAULT_DATABASE_URL),
                connect_timeout_secs: parsed(
                    lookup,
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                chunk_size: parsed(lookup, "I94_STAGING_CHUNK_SIZE", DEFAULT_STAGING_CHUNK_SIZE)?,
            },
            inputs: InputConfig {
                data_dir: text(lookup, "I94_DATA_DIR", DEFAULT_DATA_DIR).into(),
                country_codes: text(lookup, "I94_COUNTRY_CODES_FILE", DEFAULT_COUNTRY_CODES_FILE).into(),
                address_codes: text(lookup, "I94_ADDRESS_CODES_FILE", DEFAULT_ADDRESS_CODES_FILE).into(),
                airport_codes: text(lookup, "I94_AIRPORT_CODES_FILE", DEFAULT_AIRPORT_CODES_FILE).into(),
                travel_modes: text(lookup, "I94_TRAVEL_MODES_FILE", DEFAULT_TRAVEL_MODES_FILE).into(),
                immigration: text(lookup, "I94_IMMIGRATION_FILE", DEFAULT_IMMIGRATION_FILE).into(),
                temperatures: text(lookup, "I94_TEMPERATURE_FILE", DEFAULT_TEMPERATURE_FILE).into(),
                container_encoding: text(lookup, "I94_CONTAINER_ENCODING", DEFAULT_CONTAINER_ENCODING),
                immigration_row_limit: parsed(
                    lookup,
                    "I94_IMMIGRATION_ROW_LIMIT",
                    DEFAULT_IMMIGRATION_ROW_LIMIT,
                )?,
                temperature_row_limit: parsed(
                    lookup,
                    "I94_TEMPERATURE_ROW_LIMIT",
                    DEFAULT_TEMPERATURE_ROW_LIMIT,
                )?,
                temperature_country: text(lookup, "I94_TEMPERATURE_COUNTRY", DEFAULT_TEMPERATURE_COUNTRY),
            },
            quality: QualityConfig {
                min_immigration_rows: parsed(
                    lookup,
                    "QUALITY_MIN_IMMIGRATION_ROWS",
                    DEFAULT_QUALITY_MIN_ROWS,
                )?,
                min_temperature_rows: parsed(
                    lookup,
                    "QUALITY_MIN_TEMPERATURE_ROWS",
                    DEFAULT_QUALITY_MIN_ROWS,
                )?,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> EtlResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(EtlError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.connect_timeout_secs == 0 {
            return Err(EtlError::Config(
                "Database connect timeout must be greater than 0".to_string(),
            ));
        }

        // Postgres caps a statement at 65535 bind parameters; staging binds 29 per row
        if self.database.chunk_size == 0 || self.database.chunk_size > 2000 {
            return Err(EtlError::Config(format!(
                "Chunk size must be between 1 and 2000, got {}",
                self.database.chunk_size
            )));
        }

        if resolve_encoding(&self.inputs.container_encoding).is_err() {
            return Err(EtlError::Config(format!(
                "Unknown container encoding '{}'",
                self.inputs.container_encoding
            )));
        }

        if self.inputs.temperature_country.trim().is_empty() {
            return Err(EtlError::Config("Temperature country cannot be empty".to_string()));
        }

        if self.quality.min_immigration_rows < 0 || self.quality.min_temperature_rows < 0 {
            return Err(EtlError::Config(
                "Quality thresholds cannot be negative".to_string(),
            ));
        }

        if self.inputs.immigration_row_limit == 0 {
            tracing::warn!("Immigration row limit is 0 - nothing will be staged");
        }

        Ok(())
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                chunk_size: DEFAULT_STAGING_CHUNK_SIZE,
            },
            inputs: InputConfig {
                data_dir: PathBuf::from(DEFAULT_DATA_DIR),
                country_codes: PathBuf::from(DEFAULT_COUNTRY_CODES_FILE),
                address_codes: PathBuf::from(DEFAULT_ADDRESS_CODES_FILE),
                airport_codes: PathBuf::from(DEFAULT_AIRPORT_CODES_FILE),
                travel_modes: PathBuf::from(DEFAULT_TRAVEL_MODES_FILE),
                immigration: PathBuf::from(DEFAULT_IMMIGRATION_FILE),
                temperatures: PathBuf::from(DEFAULT_TEMPERATURE_FILE),
                container_encoding: DEFAULT_CONTAINER_ENCODING.to_string(),
                immigration_row_limit: DEFAULT_IMMIGRATION_ROW_LIMIT,
                temperature_row_limit: DEFAULT_TEMPERATURE_ROW_LIMIT,
                temperature_country: DEFAULT_TEMPERATURE_COUNTRY.to_string(),
            },
            quality: QualityConfig {
                min_immigration_rows: DEFAULT_QUALITY_MIN_ROWS,
                min_temperature_rows: DEFAULT_QUALITY_MIN_ROWS,
            },
        }
    }
}
