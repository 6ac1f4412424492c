//! In-process warehouse
//!
//! Tables are ordered maps keyed the way the Postgres tables are, so conflict
//! policies behave identically. Each write works on a copy of the tables
//! and swaps it in only when every row succeeded.

use crate::error::{EtlError, EtlResult};
use crate::models::{
    ConflictPolicy, ImmigrationFact, PersonRow, ReferenceCode, ReferenceKind, ReferenceRow,
    StagedRecord, Table, TemperatureRow, TimeRow, ValidityFlag,
};
use crate::session::WarehouseSession;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

type TemperatureKey = (NaiveDate, String, String);

#[derive(Debug, Clone, Default)]
struct Tables {
    references: BTreeMap<ReferenceKind, BTreeMap<ReferenceCode, String>>,
    staging: Vec<StagedRecord>,
    facts: BTreeMap<i32, ImmigrationFact>,
    time: BTreeMap<i32, TimeRow>,
    persons: BTreeMap<i32, PersonRow>,
    temperatures: BTreeMap<TemperatureKey, TemperatureRow>,
}

#[derive(Debug, Default)]
pub struct MemorySession {
    tables: Tables,
    present: BTreeSet<Table>,
    closed: bool,
}

/// Insert `row` under `key` following `policy`. `Ok(false)` means skipped.
fn put<K: Ord, V>(
    map: &mut BTreeMap<K, V>,
    table: Table,
    key: K,
    row: V,
    policy: ConflictPolicy,
    update: impl FnOnce(&mut V, V),
) -> EtlResult<bool> {
    match map.get_mut(&key) {
        None => {
            map.insert(key, row);
            Ok(true)
        },
        Some(existing) => match policy {
            ConflictPolicy::Reject => Err(EtlError::Constraint(format!(
                "duplicate key value violates primary key of {}",
                table
            ))),
            ConflictPolicy::Ignore => Ok(false),
            ConflictPolicy::UpdateAge => {
                update(existing, row);
                Ok(true)
            },
        },
    }
}

impl MemorySession {
    /// A session whose schema is already in place
    pub fn new() -> Self {
        Self {
            present: Table::ALL.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A session with no tables until [`WarehouseSession::initialize_schema`] runs
    pub fn without_schema() -> Self {
        Self::default()
    }

    pub fn drop_table(&mut self, table: Table) {
        self.present.remove(&table);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn staged(&self) -> &[StagedRecord] {
        &self.tables.staging
    }

    pub fn references(&self, kind: ReferenceKind) -> Vec<ReferenceRow> {
        self.tables
            .references
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .map(|(code, description)| ReferenceRow {
                        code: code.clone(),
                        description: description.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn facts(&self) -> Vec<ImmigrationFact> {
        self.tables.facts.values().cloned().collect()
    }

    pub fn time_rows(&self) -> Vec<TimeRow> {
        self.tables.time.values().cloned().collect()
    }

    pub fn persons(&self) -> Vec<PersonRow> {
        self.tables.persons.values().cloned().collect()
    }

    pub fn temperatures(&self) -> Vec<TemperatureRow> {
        self.tables.temperatures.values().cloned().collect()
    }

    fn ensure(&self, tables: &[Table]) -> EtlResult<()> {
        if self.closed {
            return Err(EtlError::Connection("session is closed".to_string()));
        }
        match tables.iter().find(|t| !self.present.contains(*t)) {
            Some(missing) => Err(EtlError::Database(format!(
                "relation \"{}\" does not exist",
                missing
            ))),
            None => Ok(()),
        }
    }

    /// Run `apply` against a copy of the tables; keep the copy only on success
    fn transaction<T>(&mut self, apply: impl FnOnce(&mut Tables) -> EtlResult<T>) -> EtlResult<T> {
        let mut working = self.tables.clone();
        let result = apply(&mut working)?;
        self.tables = working;
        Ok(result)
    }
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn initialize_schema(&mut self) -> EtlResult<()> {
        if self.closed {
            return Err(EtlError::Connection("session is closed".to_string()));
        }
        self.tables = Tables::default();
        self.present = Table::ALL.into_iter().collect();
        Ok(())
    }

    async fn reset_staging(&mut self) -> EtlResult<u64> {
        self.ensure(&[Table::ImmigrationStaging])?;
        let removed = self.tables.staging.len() as u64;
        self.tables.staging.clear();
        Ok(removed)
    }

    async fn insert_staged(&mut self, rows: &[StagedRecord]) -> EtlResult<u64> {
        self.ensure(&[Table::ImmigrationStaging])?;
        self.tables.staging.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn insert_references(
        &mut self,
        kind: ReferenceKind,
        rows: &[ReferenceRow],
        policy: ConflictPolicy,
    ) -> EtlResult<u64> {
        let table = kind.table();
        self.ensure(&[table])?;
        policy.check_applies_to(table)?;

        self.transaction(|tables| {
            let dim = tables.references.entry(kind).or_default();
            let mut written = 0;
            for row in rows {
                let numeric = matches!(row.code, ReferenceCode::Numeric(_));
                if numeric != kind.has_numeric_code() {
                    return Err(EtlError::Database(format!(
                        "code {:?} has the wrong type for {}",
                        row.code, table
                    )));
                }
                let inserted = put(
                    dim,
                    table,
                    row.code.clone(),
                    row.description.clone(),
                    policy,
                    |_, _| {},
                )?;
                written += u64::from(inserted);
            }
            Ok(written)
        })
    }

    async fn insert_temperatures(
        &mut self,
        rows: &[TemperatureRow],
        policy: ConflictPolicy,
    ) -> EtlResult<u64> {
        self.ensure(&[Table::TemperatureFact])?;
        policy.check_applies_to(Table::TemperatureFact)?;

        self.transaction(|tables| {
            let mut written = 0;
            for row in rows {
                let inserted = put(
                    &mut tables.temperatures,
                    Table::TemperatureFact,
                    row.key(),
                    row.clone(),
                    policy,
                    |_, _| {},
                )?;
                written += u64::from(inserted);
            }
            Ok(written)
        })
    }

    async fn mark_valid_ports(&mut self) -> EtlResult<u64> {
        self.ensure(&[Table::ImmigrationStaging, Table::AirportDim])?;

        let airports = self.tables.references.get(&ReferenceKind::Airport);
        let mut tagged = 0;
        for record in &mut self.tables.staging {
            let known = airports
                .is_some_and(|codes| codes.contains_key(&ReferenceCode::Text(record.i94port.clone())));
            if known && record.valid != ValidityFlag::Valid {
                record.valid = ValidityFlag::Valid;
                tagged += 1;
            }
        }
        Ok(tagged)
    }

    async fn valid_staged(&mut self) -> EtlResult<Vec<StagedRecord>> {
        self.ensure(&[Table::ImmigrationStaging])?;
        Ok(self
            .tables
            .staging
            .iter()
            .filter(|r| r.valid == ValidityFlag::Valid)
            .cloned()
            .collect())
    }

    async fn insert_time_rows(&mut self, rows: &[TimeRow], policy: ConflictPolicy) -> EtlResult<u64> {
        self.ensure(&[Table::TimeDim])?;
        policy.check_applies_to(Table::TimeDim)?;

        self.transaction(|tables| {
            let mut written = 0;
            for row in rows {
                let inserted = put(
                    &mut tables.time,
                    Table::TimeDim,
                    row.sas_date_value,
                    row.clone(),
                    policy,
                    |_, _| {},
                )?;
                written += u64::from(inserted);
            }
            Ok(written)
        })
    }

    async fn upsert_persons(&mut self, rows: &[PersonRow], policy: ConflictPolicy) -> EtlResult<u64> {
        self.ensure(&[Table::PersonDim])?;
        policy.check_applies_to(Table::PersonDim)?;

        self.transaction(|tables| {
            let mut written = 0;
            for row in rows {
                let inserted = put(
                    &mut tables.persons,
                    Table::PersonDim,
                    row.cicid,
                    row.clone(),
                    policy,
                    |existing, incoming| existing.age = incoming.age,
                )?;
                written += u64::from(inserted);
            }
            Ok(written)
        })
    }

    async fn insert_facts(
        &mut self,
        rows: &[ImmigrationFact],
        policy: ConflictPolicy,
    ) -> EtlResult<u64> {
        self.ensure(&[Table::ImmigrationFact])?;
        policy.check_applies_to(Table::ImmigrationFact)?;

        self.transaction(|tables| {
            let mut written = 0;
            for row in rows {
                let inserted = put(
                    &mut tables.facts,
                    Table::ImmigrationFact,
                    row.cicid,
                    row.clone(),
                    policy,
                    |_, _| {},
                )?;
                written += u64::from(inserted);
            }
            Ok(written)
        })
    }

    async fn count_rows(&mut self, table: Table) -> EtlResult<i64> {
        self.ensure(&[table])?;
        let t = &self.tables;
        let count = match table {
            Table::CountryDim | Table::AddressDim | Table::AirportDim | Table::TravelModeDim => {
                ReferenceKind::ALL
                    .into_iter()
                    .find(|kind| kind.table() == table)
                    .and_then(|kind| t.references.get(&kind))
                    .map_or(0, BTreeMap::len)
            },
            Table::ImmigrationStaging => t.staging.len(),
            Table::ImmigrationFact => t.facts.len(),
            Table::TimeDim => t.time.len(),
            Table::PersonDim => t.persons.len(),
            Table::TemperatureFact => t.temperatures.len(),
        };
        Ok(count as i64)
    }

    async fn close(&mut self) -> EtlResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(cicid: i32, age: i32) -> PersonRow {
        PersonRow {
            cicid,
            gender: Some("M".to_string()),
            birth_year: 1990,
            age,
        }
    }

    fn time_row(offset: i32) -> TimeRow {
        TimeRow {
            sas_date_value: offset,
            formatted_date: NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
            year: 1960,
            month: 1,
            day: 1,
        }
    }

    #[tokio::test]
    async fn test_reject_policy_rolls_back_whole_batch() {
        let mut session = MemorySession::new();
        let rows = vec![time_row(1), time_row(2), time_row(1)];

        let err = session
            .insert_time_rows(&rows, ConflictPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Constraint(_)));
        assert_eq!(session.count_rows(Table::TimeDim).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_age_keeps_other_columns() {
        let mut session = MemorySession::new();
        session
            .upsert_persons(&[person(5, 30)], ConflictPolicy::UpdateAge)
            .await
            .unwrap();

        let mut changed = person(5, 31);
        changed.gender = Some("F".to_string());
        changed.birth_year = 1900;
        session
            .upsert_persons(&[changed], ConflictPolicy::UpdateAge)
            .await
            .unwrap();

        assert_eq!(session.persons(), vec![person(5, 31)]);
    }

    #[tokio::test]
    async fn test_update_age_refused_outside_person_dim() {
        let mut session = MemorySession::new();
        let err = session
            .insert_time_rows(&[time_row(1)], ConflictPolicy::UpdateAge)
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[tokio::test]
    async fn test_missing_table_is_an_error() {
        let mut session = MemorySession::new();
        session.drop_table(Table::TemperatureFact);
        assert!(matches!(
            session.count_rows(Table::TemperatureFact).await,
            Err(EtlError::Database(_))
        ));

        let mut fresh = MemorySession::without_schema();
        assert!(fresh.count_rows(Table::TimeDim).await.is_err());
        fresh.initialize_schema().await.unwrap();
        assert_eq!(fresh.count_rows(Table::TimeDim).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_session_refuses_work() {
        let mut session = MemorySession::new();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(matches!(
            session.reset_staging().await,
            Err(EtlError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_code_type_must_match_dimension() {
        let mut session = MemorySession::new();
        let row = ReferenceRow {
            code: ReferenceCode::Text("ATL".to_string()),
            description: "ATLANTA, GA".to_string(),
        };
        assert!(session
            .insert_references(ReferenceKind::Country, &[row.clone()], ConflictPolicy::Ignore)
            .await
            .is_err());
        assert_eq!(
            session
                .insert_references(ReferenceKind::Airport, &[row], ConflictPolicy::Ignore)
                .await
                .unwrap(),
            1
        );
    }
}
