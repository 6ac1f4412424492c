//! Fact and dimension population
//!
//! Three transformations over the staged rows flagged valid. Each one
//! decodes all of its rows before writing anything, then commits as a
//! single transaction; a value that fails to decode aborts that
//! transformation with nothing written.

use crate::decode::{date_from_offset, date_parts, decode_int, decode_optional_int};
use crate::error::EtlResult;
use crate::models::{Entity, ImmigrationFact, PersonRow, StagedRecord, TimeRow};
use crate::session::WarehouseSession;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulationSummary {
    pub valid_rows: usize,
    pub time_rows: u64,
    pub persons: u64,
    pub facts: u64,
}

/// One row per distinct arrival offset and non-empty departure offset
pub fn time_dimension_rows(valid: &[StagedRecord]) -> EtlResult<Vec<TimeRow>> {
    let mut offsets = BTreeSet::new();
    for record in valid {
        offsets.insert(decode_int("arrdate", &record.arrdate)?);
        if let Some(depdate) = decode_optional_int("depdate", &record.depdate)? {
            offsets.insert(depdate);
        }
    }

    offsets
        .into_iter()
        .map(|offset| {
            let date = date_from_offset("sas_date_value", offset)?;
            let (year, month, day) = date_parts(date);
            Ok(TimeRow {
                sas_date_value: offset,
                formatted_date: date,
                year,
                month: month as i32,
                day: day as i32,
            })
        })
        .collect()
}

/// One row per distinct `cicid`, in first-seen order. A repeated `cicid`
/// keeps its first gender and birth year and takes the last age.
pub fn person_rows(valid: &[StagedRecord]) -> EtlResult<Vec<PersonRow>> {
    let mut order = Vec::new();
    let mut persons: BTreeMap<i32, PersonRow> = BTreeMap::new();

    for record in valid {
        let cicid = decode_int("cicid", &record.cicid)?;
        let age = decode_int("i94bir", &record.i94bir)?;
        let birth_year = decode_int("biryear", &record.biryear)?;

        match persons.get_mut(&cicid) {
            Some(existing) => existing.age = age,
            None => {
                let gender = record.gender.trim();
                order.push(cicid);
                persons.insert(
                    cicid,
                    PersonRow {
                        cicid,
                        gender: (!gender.is_empty()).then(|| gender.to_string()),
                        birth_year,
                        age,
                    },
                );
            },
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|cicid| persons.remove(&cicid))
        .collect())
}

pub fn fact_row(record: &StagedRecord) -> EtlResult<ImmigrationFact> {
    Ok(ImmigrationFact {
        cicid: decode_int("cicid", &record.cicid)?,
        i94cit: decode_int("i94cit", &record.i94cit)?,
        i94res: decode_int("i94res", &record.i94res)?,
        i94port: record.i94port.clone(),
        arrdate: decode_int("arrdate", &record.arrdate)?,
        i94mode: decode_int("i94mode", &record.i94mode)?,
        i94addr: record.i94addr.clone(),
        depdate: decode_optional_int("depdate", &record.depdate)?,
        i94visa: decode_int("i94visa", &record.i94visa)?,
        airline: record.airline.clone(),
        fltno: record.fltno.clone(),
        visatype: record.visatype.clone(),
    })
}

pub fn fact_rows(valid: &[StagedRecord]) -> EtlResult<Vec<ImmigrationFact>> {
    valid.iter().map(fact_row).collect()
}

#[instrument(skip_all, fields(valid = valid.len()))]
pub async fn populate_time_dimension(
    session: &mut dyn WarehouseSession,
    valid: &[StagedRecord],
) -> EtlResult<u64> {
    let rows = time_dimension_rows(valid)?;
    let written = session.insert_time_rows(&rows, TimeRow::ON_CONFLICT).await?;
    info!("Time dimension: {} distinct dates, {} new", rows.len(), written);
    Ok(written)
}

#[instrument(skip_all, fields(valid = valid.len()))]
pub async fn populate_person_dimension(
    session: &mut dyn WarehouseSession,
    valid: &[StagedRecord],
) -> EtlResult<u64> {
    let rows = person_rows(valid)?;
    let written = session.upsert_persons(&rows, PersonRow::ON_CONFLICT).await?;
    info!("Person dimension: {} persons, {} inserted or updated", rows.len(), written);
    Ok(written)
}

#[instrument(skip_all, fields(valid = valid.len()))]
pub async fn populate_immigration_fact(
    session: &mut dyn WarehouseSession,
    valid: &[StagedRecord],
) -> EtlResult<u64> {
    let rows = fact_rows(valid)?;
    let written = session.insert_facts(&rows, ImmigrationFact::ON_CONFLICT).await?;
    info!("Immigration fact: {} rows", written);
    Ok(written)
}

/// Time dimension, then person dimension, then immigration fact
pub async fn populate(session: &mut dyn WarehouseSession) -> EtlResult<PopulationSummary> {
    let valid = session.valid_staged().await?;

    let time_rows = populate_time_dimension(session, &valid).await?;
    let persons = populate_person_dimension(session, &valid).await?;
    let facts = populate_immigration_fact(session, &valid).await?;

    Ok(PopulationSummary {
        valid_rows: valid.len(),
        time_rows,
        persons,
        facts,
    })
}
