//! Load Pipeline
//!
//! Stages run strictly in sequence, each committing before the next begins:
//!
//! 1. reference dimensions (country, address, airport, travel mode)
//! 2. staging reset
//! 3. staging of the immigration container
//! 4. city temperatures
//! 5. validity tagging
//! 6. population (time dimension, person dimension, immigration fact)
//! 7. quality gate
//!
//! Any error stops the run and is reported with the stage it came from.
//! A failed quality verdict does not.

pub mod climate;
pub mod populate;
pub mod quality;
pub mod reference;
pub mod staging;
pub mod tagger;

use crate::config::EtlConfig;
use crate::error::{EtlError, EtlResult};
use crate::models::{ReferenceKind, Table, STAGING_COLUMNS};
use crate::session::WarehouseSession;
use crate::sources::{CodeFileSource, ContainerSource, CsvSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument};

pub use populate::PopulationSummary;
pub use quality::{QualityCheck, QualityVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitSchema,
    ReferenceDimensions,
    StagingReset,
    Staging,
    Temperatures,
    Tagging,
    Population,
    QualityGate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InitSchema => "schema initialization",
            Stage::ReferenceDimensions => "reference dimensions",
            Stage::StagingReset => "staging reset",
            Stage::Staging => "staging",
            Stage::Temperatures => "city temperatures",
            Stage::Tagging => "validity tagging",
            Stage::Population => "population",
            Stage::QualityGate => "quality gate",
        };
        f.write_str(name)
    }
}

/// A stage failure and its cause
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: EtlError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> AtStage<T> for EtlResult<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub read: usize,
    pub written: u64,
}

/// What one `run` did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub references: BTreeMap<ReferenceKind, LoadSummary>,
    pub staging_cleared: u64,
    pub staged: LoadSummary,
    pub temperatures: LoadSummary,
    pub newly_tagged: u64,
    pub population: PopulationSummary,
    pub quality: Vec<QualityVerdict>,
}

impl RunReport {
    pub fn all_checks_passed(&self) -> bool {
        self.quality.iter().all(|v| v.passed)
    }
}

pub struct Pipeline<'a> {
    config: &'a EtlConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        Self { config }
    }

    /// Drop and recreate every table
    #[instrument(skip_all)]
    pub async fn initialize(session: &mut dyn WarehouseSession) -> Result<(), PipelineError> {
        session.initialize_schema().await.at(Stage::InitSchema)?;
        info!(stage = %Stage::InitSchema, "Created {} tables", Table::ALL.len());
        Ok(())
    }

    pub fn quality_checks(&self) -> [QualityCheck; 2] {
        [
            QualityCheck::new(Table::ImmigrationFact, self.config.quality.min_immigration_rows),
            QualityCheck::new(Table::TemperatureFact, self.config.quality.min_temperature_rows),
        ]
    }

    /// Execute every stage once, in order
    #[instrument(skip_all)]
    pub async fn run(&self, session: &mut dyn WarehouseSession) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let inputs = &self.config.inputs;

        let mut references = BTreeMap::new();
        for kind in ReferenceKind::ALL {
            let source = CodeFileSource::new(inputs.reference_path(kind));
            let summary = reference::load_reference(session, kind, &source)
                .await
                .at(Stage::ReferenceDimensions)?;
            references.insert(kind, summary);
        }
        info!(stage = %Stage::ReferenceDimensions, "Reference dimensions loaded");

        let staging_cleared = session.reset_staging().await.at(Stage::StagingReset)?;
        info!(stage = %Stage::StagingReset, "Cleared {} staged rows", staging_cleared);

        let container = ContainerSource::open(
            inputs.immigration_path(),
            &inputs.container_encoding,
            &STAGING_COLUMNS,
            Some(inputs.immigration_row_limit),
        )
        .at(Stage::Staging)?;
        let staged = staging::load_staging(session, &container)
            .await
            .at(Stage::Staging)?;
        info!(stage = %Stage::Staging, "Staged {} rows", staged.written);

        let climate = CsvSource::new(
            inputs.temperature_path(),
            climate::climate_selection(&inputs.temperature_country, inputs.temperature_row_limit),
        );
        let temperatures = climate::load_temperatures(session, &climate)
            .await
            .at(Stage::Temperatures)?;
        info!(stage = %Stage::Temperatures, "Loaded {} temperature rows", temperatures.written);

        let newly_tagged = tagger::tag_valid_ports(session).await.at(Stage::Tagging)?;
        info!(stage = %Stage::Tagging, "Tagged {} rows valid", newly_tagged);

        let population = populate::populate(session).await.at(Stage::Population)?;
        info!(
            stage = %Stage::Population,
            "Populated {} facts, {} persons, {} dates",
            population.facts,
            population.persons,
            population.time_rows
        );

        let quality = quality::run_quality_gate(session, &self.quality_checks())
            .await
            .at(Stage::QualityGate)?;
        info!(
            stage = %Stage::QualityGate,
            "{} of {} quality checks passed",
            quality.iter().filter(|v| v.passed).count(),
            quality.len()
        );

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            references,
            staging_cleared,
            staged,
            temperatures,
            newly_tagged,
            population,
            quality,
        })
    }
}
