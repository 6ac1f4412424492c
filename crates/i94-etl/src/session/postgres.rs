//! Postgres session over a single connection

use crate::error::{EtlError, EtlResult};
use crate::models::{
    ConflictPolicy, ImmigrationFact, PersonRow, ReferenceCode, ReferenceKind, ReferenceRow,
    StagedRecord, Table, TemperatureRow, TimeRow, ValidityFlag, STAGING_COLUMNS,
};
use crate::session::schema;
use crate::session::WarehouseSession;
use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

pub struct PgSession {
    conn: Option<PgConnection>,
    chunk_size: usize,
}

impl PgSession {
    /// Open one connection, giving up after `timeout`
    pub async fn connect(url: &str, timeout: Duration, chunk_size: usize) -> EtlResult<Self> {
        let conn = tokio::time::timeout(timeout, PgConnection::connect(url))
            .await
            .map_err(|_| {
                EtlError::Connection(format!("no connection within {}s", timeout.as_secs()))
            })?
            .map_err(|e| EtlError::Connection(e.to_string()))?;

        info!("Database connection established");

        Ok(Self {
            conn: Some(conn),
            chunk_size: chunk_size.max(1),
        })
    }

    fn conn(&mut self) -> EtlResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| EtlError::Connection("session is closed".to_string()))
    }
}

/// Insert `rows` in chunks of `chunk_size`, one statement per chunk
async fn insert_chunked<'r, T, F>(
    conn: &mut PgConnection,
    head: &str,
    conflict: &str,
    rows: &'r [T],
    chunk_size: usize,
    bind: F,
) -> EtlResult<u64>
where
    T: Sync,
    F: Fn(&mut Separated<'_, 'r, Postgres, &'static str>, &'r T) + Send + Sync,
{
    let total_chunks = rows.len().div_ceil(chunk_size);
    let mut written = 0;

    for (chunk_idx, chunk) in rows.chunks(chunk_size).enumerate() {
        debug!(
            "Inserting chunk {} / {} ({} rows)",
            chunk_idx + 1,
            total_chunks,
            chunk.len()
        );

        let mut query_builder: QueryBuilder<'r, Postgres> = QueryBuilder::new(head);
        query_builder.push_values(chunk, |mut b, row| bind(&mut b, row));
        query_builder.push(conflict);

        written += query_builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(written)
}

#[async_trait]
impl WarehouseSession for PgSession {
    async fn initialize_schema(&mut self) -> EtlResult<()> {
        let conn = self.conn()?;
        let mut tx = conn.begin().await.map_err(EtlError::schema)?;

        for statement in schema::drop_statements() {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(EtlError::schema)?;
        }
        for table in Table::ALL {
            sqlx::query(schema::create_statement(table))
                .execute(&mut *tx)
                .await
                .map_err(EtlError::schema)?;
        }

        tx.commit().await.map_err(EtlError::schema)?;
        Ok(())
    }

    async fn reset_staging(&mut self) -> EtlResult<u64> {
        let conn = self.conn()?;
        let mut tx = conn.begin().await?;

        let removed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM i94_immigration_data_stg")
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("TRUNCATE TABLE i94_immigration_data_stg")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed.max(0) as u64)
    }

    async fn insert_staged(&mut self, rows: &[StagedRecord]) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.chunk_size;
        let head = format!(
            "INSERT INTO {} ({}, valid_yn_flag) ",
            Table::ImmigrationStaging,
            STAGING_COLUMNS.join(", ")
        );

        let conn = self.conn()?;
        let mut tx = conn.begin().await?;
        let written = insert_chunked(&mut tx, &head, "", rows, chunk_size, |b, row| {
            for value in row.fields() {
                b.push_bind(value);
            }
            b.push_bind(row.valid.as_char());
        })
        .await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn insert_references(
        &mut self,
        kind: ReferenceKind,
        rows: &[ReferenceRow],
        policy: ConflictPolicy,
    ) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = kind.table();
        let conflict = policy.on_conflict_sql(table)?;
        let chunk_size = self.chunk_size;
        let head = format!(
            "INSERT INTO {} ({}, {}) ",
            table,
            kind.code_column(),
            kind.description_column()
        );

        let conn = self.conn()?;
        let mut tx = conn.begin().await?;
        let written = insert_chunked(&mut tx, &head, &conflict, rows, chunk_size, |b, row| {
            match &row.code {
                ReferenceCode::Numeric(code) => b.push_bind(*code),
                ReferenceCode::Text(code) => b.push_bind(code.as_str()),
            };
            b.push_bind(row.description.as_str());
        })
        .await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn insert_temperatures(
        &mut self,
        rows: &[TemperatureRow],
        policy: ConflictPolicy,
    ) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conflict = policy.on_conflict_sql(Table::TemperatureFact)?;
        let chunk_size = self.chunk_size;
        let head = format!(
            "INSERT INTO {} (dt, averagetemperature, averagetemperatureuncertainty, city, country, \
             latitude, longitude) ",
            Table::TemperatureFact
        );

        let conn = self.conn()?;
        let mut tx = conn.begin().await?;
        let written = insert_chunked(&mut tx, &head, &conflict, rows, chunk_size, |b, row| {
            b.push_bind(row.dt)
                .push_bind(row.average_temperature)
                .push_bind(row.average_temperature_uncertainty)
                .push_bind(row.city.as_str())
                .push_bind(row.country.as_str())
                .push_bind(row.latitude.as_str())
                .push_bind(row.longitude.as_str());
        })
        .await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn mark_valid_ports(&mut self) -> EtlResult<u64> {
        let conn = self.conn()?;
        let mut tx = conn.begin().await?;

        let tagged = sqlx::query(
            r#"
            UPDATE i94_immigration_data_stg
            SET valid_yn_flag = 'Y'
            WHERE i94port IN (SELECT airport_code FROM i94_airport_desc_dim)
              AND valid_yn_flag IS DISTINCT FROM 'Y'
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(tagged)
    }

    async fn valid_staged(&mut self) -> EtlResult<Vec<StagedRecord>> {
        let sql = schema::valid_staged_query();
        let conn = self.conn()?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        rows.iter()
            .map(|row| {
                let fields = (0..STAGING_COLUMNS.len())
                    .map(|i| row.try_get::<Option<String>, _>(i).map(Option::unwrap_or_default))
                    .collect::<Result<Vec<_>, _>>()?;
                StagedRecord::from_fields(fields, ValidityFlag::Valid).map_err(|width| {
                    EtlError::Database(format!("staging row came back with {} columns", width))
                })
            })
            .collect()
    }

    async fn insert_time_rows(&mut self, rows: &[TimeRow], policy: ConflictPolicy) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conflict = policy.on_conflict_sql(Table::TimeDim)?;
        let chunk_size = self.chunk_size;
        let head = "INSERT INTO time_dim (sas_date_value, formatted_date, year, month, day) ";

        let conn = self.conn()?;
        let mut tx = conn.begin().await?;
        let written = insert_chunked(&mut tx, head, &conflict, rows, chunk_size, |b, row| {
            b.push_bind(row.sas_date_value)
                .push_bind(row.formatted_date)
                .push_bind(row.year)
                .push_bind(row.month)
                .push_bind(row.day.to_string());
        })
        .await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn upsert_persons(&mut self, rows: &[PersonRow], policy: ConflictPolicy) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conflict = policy.on_conflict_sql(Table::PersonDim)?;
        let chunk_size = self.chunk_size;
        let head = "INSERT INTO person_dim (cicid, gender, bithyear, age) ";

        let conn = self.conn()?;
        let mut tx = conn.begin().await?;
        let written = insert_chunked(&mut tx, head, &conflict, rows, chunk_size, |b, row| {
            b.push_bind(row.cicid)
                .push_bind(row.gender.as_deref())
                .push_bind(row.birth_year)
                .push_bind(row.age);
        })
        .await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn insert_facts(
        &mut self,
        rows: &[ImmigrationFact],
        policy: ConflictPolicy,
    ) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conflict = policy.on_conflict_sql(Table::ImmigrationFact)?;
        let chunk_size = self.chunk_size;
        let head = "INSERT INTO i94_immigration_data_fact (cicid, i94cit, i94res, i94port, arrdate, \
                    i94mode, i94addr, depdate, i94visa, airline, fltno, visatype) ";

        let conn = self.conn()?;
        let mut tx = conn.begin().await?;
        let written = insert_chunked(&mut tx, head, &conflict, rows, chunk_size, |b, row| {
            b.push_bind(row.cicid)
                .push_bind(row.i94cit)
                .push_bind(row.i94res)
                .push_bind(row.i94port.as_str())
                .push_bind(row.arrdate)
                .push_bind(row.i94mode)
                .push_bind(row.i94addr.as_str())
                .push_bind(row.depdate)
                .push_bind(row.i94visa)
                .push_bind(row.airline.as_str())
                .push_bind(row.fltno.as_str())
                .push_bind(row.visatype.as_str());
        })
        .await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn count_rows(&mut self, table: Table) -> EtlResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let conn = self.conn()?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
        Ok(count)
    }

    async fn close(&mut self) -> EtlResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            info!("Database connection closed");
        }
        Ok(())
    }
}
