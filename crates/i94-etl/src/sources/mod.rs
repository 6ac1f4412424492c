//! Record Source Adapters
//!
//! Each adapter turns one external file shape into a lazy sequence of
//! fixed-order tuples of raw strings. Nothing is decoded here; typing
//! happens in the loaders. Calling [`RecordSource::records`] again starts a
//! fresh pass over the file.
//!
//! - [`CodeFileSource`]: `code = 'description'` reference files
//! - [`CsvSource`]: header CSV with column selection, row filter and cap
//! - [`ContainerSource`]: SAS7BDAT statistical containers

pub mod code_file;
pub mod container;
pub mod delimited;
pub mod sas7bdat;

use crate::error::EtlResult;

pub use code_file::CodeFileSource;
pub use container::ContainerSource;
pub use delimited::{CsvSelection, CsvSource};

/// One row as raw field values, in the adapter's declared order
pub type RawRecord = Vec<String>;

pub type Records<'a> = Box<dyn Iterator<Item = EtlResult<RawRecord>> + 'a>;

/// A restartable, finite source of raw records
pub trait RecordSource {
    /// Start a new pass. Opening failures surface here; per-row failures
    /// surface as `Err` items and end the pass.
    fn records(&self) -> EtlResult<Records<'_>>;

    /// Short label used in logs
    fn describe(&self) -> String;
}

/// Fixed in-memory rows, handy for seeding a stage directly.
impl RecordSource for Vec<RawRecord> {
    fn records(&self) -> EtlResult<Records<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }

    fn describe(&self) -> String {
        format!("{} in-memory rows", self.len())
    }
}
