//! Statistical container records
//!
//! Selected columns come out in the requested order, one string per cell:
//! missing values become `""`, numbers keep their decimal rendering
//! (`"1082.0"`) and embedded NUL characters are stripped from text.

use crate::decode::render_number;
use crate::error::{EtlError, EtlResult};
use crate::sources::sas7bdat::{Cell, Sas7bdatReader, TextEncoding};
use crate::sources::{RawRecord, RecordSource, Records};
use encoding_rs::Encoding;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ContainerSource {
    reader: Sas7bdatReader,
    projection: Vec<usize>,
    limit: Option<usize>,
}

impl ContainerSource {
    /// Open `path` and resolve `columns` against its metadata.
    ///
    /// `encoding` is a label such as `"ISO-8859-1"`; see [`resolve_encoding`].
    /// Column names match case-insensitively.
    pub fn open(
        path: impl Into<PathBuf>,
        encoding: &str,
        columns: &[&str],
        limit: Option<usize>,
    ) -> EtlResult<Self> {
        let path = path.into();
        let encoding = resolve_encoding(encoding)?;
        let reader = Sas7bdatReader::open(&path, encoding)?;

        let projection = columns
            .iter()
            .map(|name| {
                reader
                    .column_index(name)
                    .ok_or_else(|| EtlError::format(&path, format!("missing column '{}'", name)))
            })
            .collect::<EtlResult<Vec<_>>>()?;

        Ok(Self {
            reader,
            projection,
            limit,
        })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }
}

impl RecordSource for ContainerSource {
    fn records(&self) -> EtlResult<Records<'_>> {
        let rows = self.reader.rows(self.projection.clone())?;
        let limit = self.limit.unwrap_or(usize::MAX);
        Ok(Box::new(rows.take(limit).map(|row| {
            row.map(|cells| cells.into_iter().map(cell_text).collect::<RawRecord>())
        })))
    }

    fn describe(&self) -> String {
        self.reader.path().display().to_string()
    }
}

fn cell_text(cell: Cell) -> String {
    match cell {
        Cell::Number(None) => String::new(),
        Cell::Number(Some(value)) => render_number(value),
        Cell::Text(text) => text.replace('\0', ""),
    }
}

const LATIN1_LABELS: [&str; 11] = [
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
    "iso88591",
    "latin1",
    "latin-1",
    "l1",
    "iso-ir-100",
    "csisolatin1",
    "ibm819",
    "cp819",
];

/// Latin-1 labels decode byte for byte; WHATWG would map them to windows-1252.
/// Every other label goes through the WHATWG registry.
pub fn resolve_encoding(label: &str) -> EtlResult<TextEncoding> {
    let normalized = label.trim().to_ascii_lowercase();
    if LATIN1_LABELS.contains(&normalized.as_str()) {
        return Ok(TextEncoding::Latin1);
    }
    Encoding::for_label(normalized.as_bytes())
        .map(TextEncoding::Labelled)
        .ok_or_else(|| EtlError::Config(format!("unknown text encoding '{}'", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::sas7bdat::fixture::{build, Column, Value};
    use std::io::Write;

    fn container(rows: &[Vec<Value<'_>>]) -> tempfile::NamedTempFile {
        let columns = [
            Column { name: "cicid", width: 8, numeric: true },
            Column { name: "i94port", width: 3, numeric: false },
            Column { name: "gender", width: 1, numeric: false },
        ];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build(&columns, rows, b"")).unwrap();
        file
    }

    #[test]
    fn test_cells_render_as_raw_strings() {
        let file = container(&[
            vec![Value::Number(5.0), Value::Text(b"A\0L"), Value::Text(b"M")],
            vec![Value::Number(f64::NAN), Value::Text(b"NYC"), Value::Text(b"\0")],
        ]);
        let source = ContainerSource::open(file.path(), "ISO-8859-1", &["i94port", "cicid", "gender"], None)
            .unwrap();

        let rows: Vec<RawRecord> = source.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            rows,
            vec![
                vec!["AL".to_string(), "5.0".to_string(), "M".to_string()],
                vec!["NYC".to_string(), String::new(), String::new()],
            ]
        );
    }

    #[test]
    fn test_limit_caps_rows() {
        let file = container(&[
            vec![Value::Number(1.0), Value::Text(b"ATL"), Value::Text(b"F")],
            vec![Value::Number(2.0), Value::Text(b"ATL"), Value::Text(b"F")],
            vec![Value::Number(3.0), Value::Text(b"ATL"), Value::Text(b"F")],
        ]);
        let source = ContainerSource::open(file.path(), "latin1", &["cicid"], Some(2)).unwrap();
        assert_eq!(source.records().unwrap().count(), 2);
    }

    #[test]
    fn test_missing_column_is_format_error() {
        let file = container(&[]);
        let err = ContainerSource::open(file.path(), "ISO-8859-1", &["cicid", "admnum"], None).unwrap_err();
        assert!(matches!(err, EtlError::Format { .. }));
        assert!(err.to_string().contains("admnum"));
    }

    #[test]
    fn test_unknown_encoding_is_config_error() {
        assert!(matches!(resolve_encoding("klingon-8"), Err(EtlError::Config(_))));
        assert_eq!(resolve_encoding(" ISO-8859-1 ").unwrap(), TextEncoding::Latin1);
        assert_eq!(resolve_encoding("latin1").unwrap(), TextEncoding::Latin1);
        assert_eq!(
            resolve_encoding("windows-1252").unwrap(),
            TextEncoding::Labelled(encoding_rs::WINDOWS_1252)
        );
    }

    #[test]
    fn test_latin1_label_keeps_c1_bytes() {
        let file = container(&[vec![Value::Number(1.0), Value::Text(&[b'N', 0x93, b'Y']), Value::Text(b"F")]]);

        let latin1 = ContainerSource::open(file.path(), "ISO-8859-1", &["i94port"], None).unwrap();
        let rows: Vec<RawRecord> = latin1.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![vec!["N\u{93}Y".to_string()]]);

        let windows = ContainerSource::open(file.path(), "windows-1252", &["i94port"], None).unwrap();
        let rows: Vec<RawRecord> = windows.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![vec!["N\u{201C}Y".to_string()]]);
    }
}
