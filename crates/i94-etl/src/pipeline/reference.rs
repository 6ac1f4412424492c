//! Reference dimension loading

use crate::decode::decode_int;
use crate::error::{EtlError, EtlResult};
use crate::models::{Entity, ReferenceCode, ReferenceKind, ReferenceRow};
use crate::pipeline::LoadSummary;
use crate::session::WarehouseSession;
use crate::sources::{RawRecord, RecordSource};
use std::path::Path;
use tracing::{info, instrument};

/// Type a `(code, description)` pair for `kind`'s dimension. Country and
/// travel-mode codes go through the numeric decoder.
pub fn decode_reference(kind: ReferenceKind, fields: RawRecord, origin: &str) -> EtlResult<ReferenceRow> {
    let width = fields.len();
    let [code, description]: [String; 2] = fields.try_into().map_err(|_| {
        EtlError::format(
            Path::new(origin),
            format!("expected code and description, got {} fields", width),
        )
    })?;

    let code = if kind.has_numeric_code() {
        ReferenceCode::Numeric(decode_int(kind.code_column(), &code)?)
    } else {
        ReferenceCode::Text(code.trim().to_string())
    };

    Ok(ReferenceRow { code, description })
}

/// Insert every pair from `source`; codes already present are left alone
#[instrument(skip(session, source), fields(input = %source.describe()))]
pub async fn load_reference(
    session: &mut dyn WarehouseSession,
    kind: ReferenceKind,
    source: &dyn RecordSource,
) -> EtlResult<LoadSummary> {
    let origin = source.describe();
    let rows = source
        .records()?
        .map(|record| record.and_then(|fields| decode_reference(kind, fields, &origin)))
        .collect::<EtlResult<Vec<_>>>()?;

    let written = session
        .insert_references(kind, &rows, ReferenceRow::ON_CONFLICT)
        .await?;

    info!(
        "Loaded {} dimension: {} pairs read, {} new",
        kind,
        rows.len(),
        written
    );

    Ok(LoadSummary {
        read: rows.len(),
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(code: &str, description: &str) -> RawRecord {
        vec![code.to_string(), description.to_string()]
    }

    #[test]
    fn test_numeric_codes_decode_as_integers() {
        let row = decode_reference(ReferenceKind::Country, pair("582", "MEXICO"), "codes").unwrap();
        assert_eq!(row.code, ReferenceCode::Numeric(582));

        let row = decode_reference(ReferenceKind::TravelMode, pair("1.0", "Air"), "codes").unwrap();
        assert_eq!(row.code, ReferenceCode::Numeric(1));
    }

    #[test]
    fn test_text_codes_are_kept() {
        let row = decode_reference(ReferenceKind::Airport, pair("ATL", "ATLANTA, GA"), "codes").unwrap();
        assert_eq!(row.code, ReferenceCode::Text("ATL".to_string()));
        assert_eq!(row.description, "ATLANTA, GA");
    }

    #[test]
    fn test_bad_numeric_code_is_decode_error() {
        let err = decode_reference(ReferenceKind::Country, pair("XX", "Nowhere"), "codes").unwrap_err();
        assert!(matches!(err, EtlError::Decode { column: "country_id", .. }));
    }

    #[test]
    fn test_wrong_width_is_format_error() {
        let err = decode_reference(ReferenceKind::Address, vec!["AL".to_string()], "codes").unwrap_err();
        assert!(matches!(err, EtlError::Format { .. }));
    }
}
