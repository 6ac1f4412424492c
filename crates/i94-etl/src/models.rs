//! Warehouse tables and the rows written to them

use crate::error::{EtlError, EtlResult};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

// ============================================================================
// Tables
// ============================================================================

/// The nine tables owned by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    CountryDim,
    AddressDim,
    AirportDim,
    TravelModeDim,
    ImmigrationStaging,
    ImmigrationFact,
    TimeDim,
    PersonDim,
    TemperatureFact,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::CountryDim,
        Table::AddressDim,
        Table::AirportDim,
        Table::TravelModeDim,
        Table::ImmigrationStaging,
        Table::ImmigrationFact,
        Table::TimeDim,
        Table::PersonDim,
        Table::TemperatureFact,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::CountryDim => "i94_country_desc_dim",
            Table::AddressDim => "i94_address_desc_dim",
            Table::AirportDim => "i94_airport_desc_dim",
            Table::TravelModeDim => "i94_travel_mode_dim",
            Table::ImmigrationStaging => "i94_immigration_data_stg",
            Table::ImmigrationFact => "i94_immigration_data_fact",
            Table::TimeDim => "time_dim",
            Table::PersonDim => "person_dim",
            Table::TemperatureFact => "city_temperature_data_fact",
        }
    }

    /// Primary key columns; the staging table has none
    pub fn key_columns(self) -> &'static [&'static str] {
        match self {
            Table::CountryDim => &["country_id"],
            Table::AddressDim => &["address_code"],
            Table::AirportDim => &["airport_code"],
            Table::TravelModeDim => &["travel_mode_cd"],
            Table::ImmigrationStaging => &[],
            Table::ImmigrationFact => &["cicid"],
            Table::TimeDim => &["sas_date_value"],
            Table::PersonDim => &["cicid"],
            Table::TemperatureFact => &["dt", "city", "country"],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Conflict resolution
// ============================================================================

/// What a write does when its key already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail the statement with a constraint error
    Reject,
    /// Keep the existing row, skip the new one
    Ignore,
    /// Keep the existing row but overwrite its `age` with the new value
    UpdateAge,
}

impl ConflictPolicy {
    /// `ON CONFLICT` clause appended to an insert into `table`
    pub fn on_conflict_sql(self, table: Table) -> EtlResult<String> {
        let keys = table.key_columns().join(", ");
        match self {
            ConflictPolicy::Reject => Ok(String::new()),
            ConflictPolicy::Ignore => Ok(format!(" ON CONFLICT ({}) DO NOTHING", keys)),
            ConflictPolicy::UpdateAge => {
                self.check_applies_to(table)?;
                Ok(format!(" ON CONFLICT ({}) DO UPDATE SET age = EXCLUDED.age", keys))
            },
        }
    }

    /// Only the person dimension has an age column to update
    pub fn check_applies_to(self, table: Table) -> EtlResult<()> {
        match (self, table) {
            (ConflictPolicy::UpdateAge, Table::PersonDim) => Ok(()),
            (ConflictPolicy::UpdateAge, other) => Err(EtlError::Schema(format!(
                "{} has no age column to update on conflict",
                other
            ))),
            _ => Ok(()),
        }
    }
}

/// A row type bound to the conflict policy its table enforces
pub trait Entity {
    const ON_CONFLICT: ConflictPolicy;
}

// ============================================================================
// Reference dimensions
// ============================================================================

/// The four code → description dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Country,
    Address,
    Airport,
    TravelMode,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 4] = [
        ReferenceKind::Country,
        ReferenceKind::Address,
        ReferenceKind::Airport,
        ReferenceKind::TravelMode,
    ];

    pub fn table(self) -> Table {
        match self {
            ReferenceKind::Country => Table::CountryDim,
            ReferenceKind::Address => Table::AddressDim,
            ReferenceKind::Airport => Table::AirportDim,
            ReferenceKind::TravelMode => Table::TravelModeDim,
        }
    }

    pub fn code_column(self) -> &'static str {
        self.table().key_columns()[0]
    }

    pub fn description_column(self) -> &'static str {
        match self {
            ReferenceKind::Country => "country_desc",
            ReferenceKind::Address => "address_desc",
            ReferenceKind::Airport => "airport_desc",
            ReferenceKind::TravelMode => "travel_mode_desc",
        }
    }

    /// Country and travel-mode codes are integers in their tables
    pub fn has_numeric_code(self) -> bool {
        matches!(self, ReferenceKind::Country | ReferenceKind::TravelMode)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReferenceKind::Country => "country",
            ReferenceKind::Address => "address",
            ReferenceKind::Airport => "airport",
            ReferenceKind::TravelMode => "travel mode",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceCode {
    Numeric(i32),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRow {
    pub code: ReferenceCode,
    pub description: String,
}

impl Entity for ReferenceRow {
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Ignore;
}

// ============================================================================
// Staging
// ============================================================================

/// Column order of the staging table, which is also the order the
/// immigration container columns are selected in.
pub const STAGING_COLUMNS: [&str; 28] = [
    "cicid", "i94yr", "i94mon", "i94cit", "i94res", "i94port", "arrdate", "i94mode", "i94addr",
    "depdate", "i94bir", "i94visa", "count", "dtadfile", "visapost", "occup", "entdepa",
    "entdepd", "entdepu", "matflag", "biryear", "dtaddto", "gender", "insnum", "airline",
    "admnum", "fltno", "visatype",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidityFlag {
    #[default]
    Pending,
    Valid,
}

impl ValidityFlag {
    pub fn as_char(self) -> &'static str {
        match self {
            ValidityFlag::Pending => "N",
            ValidityFlag::Valid => "Y",
        }
    }
}

/// One raw immigration record, every attribute as its original text
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StagedRecord {
    pub cicid: String,
    pub i94yr: String,
    pub i94mon: String,
    pub i94cit: String,
    pub i94res: String,
    pub i94port: String,
    pub arrdate: String,
    pub i94mode: String,
    pub i94addr: String,
    pub depdate: String,
    pub i94bir: String,
    pub i94visa: String,
    pub count: String,
    pub dtadfile: String,
    pub visapost: String,
    pub occup: String,
    pub entdepa: String,
    pub entdepd: String,
    pub entdepu: String,
    pub matflag: String,
    pub biryear: String,
    pub dtaddto: String,
    pub gender: String,
    pub insnum: String,
    pub airline: String,
    pub admnum: String,
    pub fltno: String,
    pub visatype: String,
    pub valid: ValidityFlag,
}

impl StagedRecord {
    /// Build from values in [`STAGING_COLUMNS`] order. Returns the offending
    /// width when the tuple has the wrong number of fields.
    pub fn from_fields(fields: Vec<String>, valid: ValidityFlag) -> Result<Self, usize> {
        let width = fields.len();
        let f: [String; 28] = match fields.try_into() {
            Ok(f) => f,
            Err(_) => return Err(width),
        };
        let [cicid, i94yr, i94mon, i94cit, i94res, i94port, arrdate, i94mode, i94addr, depdate, i94bir, i94visa, count, dtadfile, visapost, occup, entdepa, entdepd, entdepu, matflag, biryear, dtaddto, gender, insnum, airline, admnum, fltno, visatype] =
            f;

        Ok(Self {
            cicid,
            i94yr,
            i94mon,
            i94cit,
            i94res,
            i94port,
            arrdate,
            i94mode,
            i94addr,
            depdate,
            i94bir,
            i94visa,
            count,
            dtadfile,
            visapost,
            occup,
            entdepa,
            entdepd,
            entdepu,
            matflag,
            biryear,
            dtaddto,
            gender,
            insnum,
            airline,
            admnum,
            fltno,
            visatype,
            valid,
        })
    }

    /// Values in [`STAGING_COLUMNS`] order
    pub fn fields(&self) -> [&str; 28] {
        [
            &self.cicid,
            &self.i94yr,
            &self.i94mon,
            &self.i94cit,
            &self.i94res,
            &self.i94port,
            &self.arrdate,
            &self.i94mode,
            &self.i94addr,
            &self.depdate,
            &self.i94bir,
            &self.i94visa,
            &self.count,
            &self.dtadfile,
            &self.visapost,
            &self.occup,
            &self.entdepa,
            &self.entdepd,
            &self.entdepu,
            &self.matflag,
            &self.biryear,
            &self.dtaddto,
            &self.gender,
            &self.insnum,
            &self.airline,
            &self.admnum,
            &self.fltno,
            &self.visatype,
        ]
    }
}

// ============================================================================
// Facts and derived dimensions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRow {
    pub sas_date_value: i32,
    pub formatted_date: NaiveDate,
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

impl Entity for TimeRow {
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Ignore;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRow {
    pub cicid: i32,
    pub gender: Option<String>,
    pub birth_year: i32,
    pub age: i32,
}

impl Entity for PersonRow {
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::UpdateAge;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmigrationFact {
    pub cicid: i32,
    pub i94cit: i32,
    pub i94res: i32,
    pub i94port: String,
    pub arrdate: i32,
    pub i94mode: i32,
    pub i94addr: String,
    pub depdate: Option<i32>,
    pub i94visa: i32,
    pub airline: String,
    pub fltno: String,
    pub visatype: String,
}

impl Entity for ImmigrationFact {
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Reject;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureRow {
    pub dt: NaiveDate,
    pub average_temperature: Option<f64>,
    pub average_temperature_uncertainty: Option<f64>,
    pub city: String,
    pub country: String,
    pub latitude: String,
    pub longitude: String,
}

impl TemperatureRow {
    pub fn key(&self) -> (NaiveDate, String, String) {
        (self.dt, self.city.clone(), self.country.clone())
    }
}

impl Entity for TemperatureRow {
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Reject;
}
