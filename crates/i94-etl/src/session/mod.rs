//! Warehouse Session
//!
//! Every stage talks to the warehouse through a [`WarehouseSession`] handle.
//! The handle is acquired once per run, passed to each stage in turn and
//! closed on every exit path. Each write method is one transaction: it either
//! commits all of its rows or none of them.
//!
//! Two implementations:
//! - [`PgSession`]: a single Postgres connection
//! - [`MemorySession`]: in-process tables with the same key and conflict
//!   semantics, used by the test suites

pub mod memory;
pub mod postgres;
pub mod schema;

use crate::error::EtlResult;
use crate::models::{
    ConflictPolicy, ImmigrationFact, PersonRow, ReferenceKind, ReferenceRow, StagedRecord, Table,
    TemperatureRow, TimeRow,
};
use async_trait::async_trait;

pub use memory::MemorySession;
pub use postgres::PgSession;

/// Write methods return the number of rows inserted or updated; rows skipped
/// by [`ConflictPolicy::Ignore`] are not counted.
#[async_trait]
pub trait WarehouseSession: Send {
    /// Drop every pipeline table if present, then create them all
    async fn initialize_schema(&mut self) -> EtlResult<()>;

    /// Remove every staged row
    async fn reset_staging(&mut self) -> EtlResult<u64>;

    async fn insert_staged(&mut self, rows: &[StagedRecord]) -> EtlResult<u64>;

    async fn insert_references(
        &mut self,
        kind: ReferenceKind,
        rows: &[ReferenceRow],
        policy: ConflictPolicy,
    ) -> EtlResult<u64>;

    async fn insert_temperatures(
        &mut self,
        rows: &[TemperatureRow],
        policy: ConflictPolicy,
    ) -> EtlResult<u64>;

    /// Flag `'Y'` every staged row whose port is a known airport code.
    /// Returns how many rows changed flag.
    async fn mark_valid_ports(&mut self) -> EtlResult<u64>;

    /// Staged rows currently flagged valid, in the order they were staged
    async fn valid_staged(&mut self) -> EtlResult<Vec<StagedRecord>>;

    async fn insert_time_rows(&mut self, rows: &[TimeRow], policy: ConflictPolicy) -> EtlResult<u64>;

    async fn upsert_persons(&mut self, rows: &[PersonRow], policy: ConflictPolicy) -> EtlResult<u64>;

    async fn insert_facts(&mut self, rows: &[ImmigrationFact], policy: ConflictPolicy)
        -> EtlResult<u64>;

    async fn count_rows(&mut self, table: Table) -> EtlResult<i64>;

    /// Release the underlying connection. Later calls fail with a connection error.
    async fn close(&mut self) -> EtlResult<()>;
}
