use crate::error::{EtlError, EtlResult};
use crate::models::{StagedRecord, ValidityFlag, STAGING_COLUMNS};
use crate::pipeline::LoadSummary;
use crate::session::WarehouseSession;
use crate::sources::RecordSource;
use std::path::Path;
use tracing::{info, instrument};

/// Stage every record from `source` verbatim with a pending flag.
/// All rows go in one transaction.
#[instrument(skip(session, source), fields(input = %source.describe()))]
pub async fn load_staging(
    session: &mut dyn WarehouseSession,
    source: &dyn RecordSource,
) -> EtlResult<LoadSummary> {
    let origin = source.describe();
    let rows = source
        .records()?
        .map(|record| {
            record.and_then(|fields| {
                StagedRecord::from_fields(fields, ValidityFlag::Pending).map_err(|width| {
                    EtlError::format(
                        Path::new(&origin),
                        format!("expected {} fields, got {}", STAGING_COLUMNS.len(), width),
                    )
                })
            })
        })
        .collect::<EtlResult<Vec<_>>>()?;

    let written = session.insert_staged(&rows).await?;
    info!("Staged {} immigration records", written);

    Ok(LoadSummary {
        read: rows.len(),
        written,
    })
}
