//! Header CSV files
//!
//! Rows pass through a filter (`column == value`), then a cap on the number
//! of matching rows, then a projection onto the selected columns in the
//! order they were requested.

use crate::error::{EtlError, EtlResult};
use crate::sources::{RawRecord, RecordSource, Records};
use csv::StringRecord;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Which part of a CSV file to read
#[derive(Debug, Clone, Default)]
pub struct CsvSelection {
    pub columns: Vec<String>,
    /// Keep only rows where this column equals this value
    pub filter: Option<(String, String)>,
    /// Stop after this many matching rows
    pub limit: Option<usize>,
}

impl CsvSelection {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some((column.into(), value.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    selection: CsvSelection,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, selection: CsvSelection) -> Self {
        Self {
            path: path.into(),
            selection,
        }
    }

    fn open(&self) -> EtlResult<csv::Reader<File>> {
        let file = File::open(&self.path).map_err(|e| EtlError::file_access(&self.path, e))?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(file))
    }

    fn column_index(&self, headers: &StringRecord, name: &str) -> EtlResult<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EtlError::format(&self.path, format!("missing column '{}'", name)))
    }
}

impl RecordSource for CsvSource {
    fn records(&self) -> EtlResult<Records<'_>> {
        let mut reader = self.open()?;
        let headers = reader
            .headers()
            .map_err(|e| csv_error(&self.path, e))?
            .clone();

        let projection = self
            .selection
            .columns
            .iter()
            .map(|name| self.column_index(&headers, name))
            .collect::<EtlResult<Vec<_>>>()?;

        let filter = match &self.selection.filter {
            Some((column, value)) => Some((self.column_index(&headers, column)?, value.clone())),
            None => None,
        };

        Ok(Box::new(CsvRecords {
            path: &self.path,
            rows: reader.into_records(),
            projection,
            filter,
            remaining: self.selection.limit,
            failed: false,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct CsvRecords<'a> {
    path: &'a Path,
    rows: csv::StringRecordsIntoIter<File>,
    projection: Vec<usize>,
    filter: Option<(usize, String)>,
    remaining: Option<usize>,
    failed: bool,
}

impl Iterator for CsvRecords<'_> {
    type Item = EtlResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == Some(0) {
            return None;
        }

        for row in self.rows.by_ref() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(csv_error(self.path, e)));
                },
            };

            if let Some((index, ref expected)) = self.filter {
                if row.get(index) != Some(expected.as_str()) {
                    continue;
                }
            }

            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }

            let projected = self
                .projection
                .iter()
                .map(|&i| row.get(i).unwrap_or_default().to_string())
                .collect();
            return Some(Ok(projected));
        }

        None
    }
}

fn csv_error(path: &Path, err: csv::Error) -> EtlError {
    if err.is_io_error() {
        if let csv::ErrorKind::Io(io) = err.into_kind() {
            return EtlError::file_access(path, io);
        }
        return EtlError::format(path, "unreadable input");
    }
    EtlError::format(path, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CLIMATE: &str = "\
dt,AverageTemperature,AverageTemperatureUncertainty,City,Country,Latitude,Longitude
1743-11-01,6.068,1.7369999999999999,Århus,Denmark,57.05N,10.33E
1820-01-01,2.101,3.217,Abilene,United States,32.95N,100.53W
1820-02-01,6.926,2.853,Abilene,United States,32.95N,100.53W
1820-03-01,,,Abilene,United States,32.95N,100.53W
1855-05-01,25.128,1.191,Ahmadabad,India,23.31N,72.52E
";

    fn climate_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLIMATE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_filter_then_cap_then_project() {
        let file = climate_file();
        let selection = CsvSelection::columns(["City", "dt", "AverageTemperature"])
            .with_filter("Country", "United States")
            .with_limit(2);
        let source = CsvSource::new(file.path(), selection);

        let rows: Vec<RawRecord> = source.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            rows,
            vec![
                vec!["Abilene".to_string(), "1820-01-01".to_string(), "2.101".to_string()],
                vec!["Abilene".to_string(), "1820-02-01".to_string(), "6.926".to_string()],
            ]
        );
    }

    #[test]
    fn test_empty_cells_stay_empty() {
        let file = climate_file();
        let selection = CsvSelection::columns(["AverageTemperature", "AverageTemperatureUncertainty"])
            .with_filter("Country", "United States");
        let source = CsvSource::new(file.path(), selection);

        let rows: Vec<RawRecord> = source.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec![String::new(), String::new()]);
    }

    #[test]
    fn test_unknown_column_is_format_error() {
        let file = climate_file();
        let source = CsvSource::new(file.path(), CsvSelection::columns(["Elevation"]));
        assert!(matches!(source.records(), Err(EtlError::Format { .. })));
    }

    #[test]
    fn test_ragged_row_is_format_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a,b\n1,2\n3\n").unwrap();
        let source = CsvSource::new(file.path(), CsvSelection::columns(["a"]));

        let results: Vec<_> = source.records().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(EtlError::Format { .. })));
    }
}
