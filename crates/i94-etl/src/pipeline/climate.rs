//! City temperature loading

use crate::decode::{decode_date, decode_optional_float};
use crate::error::{EtlError, EtlResult};
use crate::models::{Entity, TemperatureRow};
use crate::pipeline::LoadSummary;
use crate::session::WarehouseSession;
use crate::sources::{CsvSelection, RawRecord, RecordSource};
use std::path::Path;
use tracing::{info, instrument};

/// Columns read from the climate file, in tuple order
pub const CLIMATE_COLUMNS: [&str; 7] = [
    "dt",
    "AverageTemperature",
    "AverageTemperatureUncertainty",
    "City",
    "Country",
    "Latitude",
    "Longitude",
];

/// First `limit` rows for `country`
pub fn climate_selection(country: &str, limit: usize) -> CsvSelection {
    CsvSelection::columns(CLIMATE_COLUMNS)
        .with_filter("Country", country)
        .with_limit(limit)
}

pub fn decode_temperature(fields: RawRecord, origin: &str) -> EtlResult<TemperatureRow> {
    let width = fields.len();
    let [dt, average, uncertainty, city, country, latitude, longitude]: [String; 7] =
        fields.try_into().map_err(|_| {
            EtlError::format(
                Path::new(origin),
                format!("expected {} climate fields, got {}", CLIMATE_COLUMNS.len(), width),
            )
        })?;

    Ok(TemperatureRow {
        dt: decode_date("dt", &dt)?,
        average_temperature: decode_optional_float("AverageTemperature", &average)?,
        average_temperature_uncertainty: decode_optional_float(
            "AverageTemperatureUncertainty",
            &uncertainty,
        )?,
        city,
        country,
        latitude,
        longitude,
    })
}

/// Insert the selected climate rows; a repeated `(dt, city, country)` fails
/// the whole load.
#[instrument(skip(session, source), fields(input = %source.describe()))]
pub async fn load_temperatures(
    session: &mut dyn WarehouseSession,
    source: &dyn RecordSource,
) -> EtlResult<LoadSummary> {
    let origin = source.describe();
    let rows = source
        .records()?
        .map(|record| record.and_then(|fields| decode_temperature(fields, &origin)))
        .collect::<EtlResult<Vec<_>>>()?;

    let written = session
        .insert_temperatures(&rows, TemperatureRow::ON_CONFLICT)
        .await?;
    info!("Loaded {} city temperature rows", written);

    Ok(LoadSummary {
        read: rows.len(),
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fields(values: [&str; 7]) -> RawRecord {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_decodes_date_and_optional_temperatures() {
        let row = decode_temperature(
            fields(["1820-01-01", "2.101", "", "Abilene", "United States", "32.95N", "100.53W"]),
            "climate.csv",
        )
        .unwrap();

        assert_eq!(row.dt, NaiveDate::from_ymd_opt(1820, 1, 1).unwrap());
        assert_eq!(row.average_temperature, Some(2.101));
        assert_eq!(row.average_temperature_uncertainty, None);
        assert_eq!(row.latitude, "32.95N");
    }

    #[test]
    fn test_bad_date_is_decode_error() {
        let err = decode_temperature(
            fields(["01/01/1820", "", "", "Abilene", "United States", "", ""]),
            "climate.csv",
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::Decode { column: "dt", .. }));
    }

    #[test]
    fn test_selection_filters_and_caps() {
        let selection = climate_selection("United States", 20000);
        assert_eq!(selection.columns.len(), 7);
        assert_eq!(
            selection.filter,
            Some(("Country".to_string(), "United States".to_string()))
        );
        assert_eq!(selection.limit, Some(20000));
    }
}
