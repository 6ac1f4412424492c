use crate::error::EtlResult;
use crate::session::WarehouseSession;
use tracing::{info, instrument};

/// Flag staged rows whose port appears in the airport dimension.
/// Returns the number of rows newly flagged, so a second run reports 0.
#[instrument(skip_all)]
pub async fn tag_valid_ports(session: &mut dyn WarehouseSession) -> EtlResult<u64> {
    let tagged = session.mark_valid_ports().await?;
    info!("Tagged {} staged rows with a known port as valid", tagged);
    Ok(tagged)
}
