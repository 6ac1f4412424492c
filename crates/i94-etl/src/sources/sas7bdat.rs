// SAS7BDAT container reader
//
// Layout notes (offsets in bytes):
// - File header: 32-byte magic, then flags at 32 (64-bit layout when '3'),
//   35 (extra 4-byte alignment when '3') and 37 (0x01 = little endian).
//   Header length, page length and page count sit at 196/200/204 plus the
//   alignment.
// - Each page starts with a header at 16 (32-bit) or 32 (64-bit): page
//   type, block count, subheader count, then the subheader pointer table.
// - Metadata lives in subheaders on meta and mix pages; rows live on data
//   pages (right after the page header) and on mix pages (after the pointer
//   table, aligned to 8).
//
// Only uncompressed containers are read. Compressed ones are rejected when
// the column text announces a compression scheme.

use crate::error::{EtlError, EtlResult};
use encoding_rs::Encoding;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc2, 0xea, 0x81, 0x60,
    0xb3, 0x14, 0x11, 0xcf, 0xbd, 0x92, 0x08, 0x00, 0x09, 0xc7, 0x31, 0x8c, 0x18, 0x1f, 0x10, 0x11,
];
const FILE_HEADER_PROBE: usize = 288;

const SIG_ROW_SIZE: u64 = 0xF7F7_F7F7;
const SIG_COLUMN_SIZE: u64 = 0xF6F6_F6F6;
const SIG_COLUMN_TEXT: u64 = 0xFFFF_FFFD;
const SIG_COLUMN_NAME: u64 = 0xFFFF_FFFF;
const SIG_COLUMN_ATTRIBUTES: u64 = 0xFFFF_FFFC;

const SUBHEADER_TRUNCATED: u64 = 1;
const SUBHEADER_COMPRESSED: u64 = 4;
const COMPRESSION_LITERALS: [&[u8]; 2] = [b"SASYZCRL", b"SASYZCR2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageKind {
    Meta,
    Data,
    Mix,
    Other,
}

impl PageKind {
    fn from_raw(raw: u64) -> Self {
        match raw {
            0 | 16384 => PageKind::Meta,
            256 | 384 => PageKind::Data,
            512 | 640 => PageKind::Mix,
            _ => PageKind::Other,
        }
    }
}

/// Byte order and word size, plus the bounds-checked readers that depend on them
#[derive(Debug, Clone, Copy)]
struct Layout {
    little_endian: bool,
    wide: bool,
}

impl Layout {
    fn int_len(self) -> usize {
        if self.wide {
            8
        } else {
            4
        }
    }

    fn page_bit_offset(self) -> usize {
        if self.wide {
            32
        } else {
            16
        }
    }

    fn pointer_len(self) -> usize {
        if self.wide {
            24
        } else {
            12
        }
    }

    fn bytes(self, buf: &[u8], offset: usize, len: usize) -> Result<&[u8], String> {
        offset
            .checked_add(len)
            .and_then(|end| buf.get(offset..end))
            .ok_or_else(|| format!("read of {} bytes at offset {} is out of bounds", len, offset))
    }

    fn uint(self, buf: &[u8], offset: usize, len: usize) -> Result<u64, String> {
        let bytes = self.bytes(buf, offset, len)?;
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        Ok(if self.little_endian {
            bytes.iter().rev().fold(0, fold)
        } else {
            bytes.iter().fold(0, fold)
        })
    }

    fn usize(self, buf: &[u8], offset: usize, len: usize) -> Result<usize, String> {
        let value = self.uint(buf, offset, len)?;
        usize::try_from(value).map_err(|_| format!("value {} at offset {} is too large", value, offset))
    }

    /// Low 32 bits of a subheader signature, whatever the word size
    fn signature(self, buf: &[u8], offset: usize) -> Result<u64, String> {
        if self.wide && !self.little_endian {
            self.uint(buf, offset + 4, 4)
        } else {
            self.uint(buf, offset, 4)
        }
    }

    /// Numeric cells are doubles with the low-order bytes dropped
    fn number(self, cell: &[u8]) -> Option<f64> {
        let mut raw = [0u8; 8];
        let value = if self.little_endian {
            raw[8 - cell.len()..].copy_from_slice(cell);
            f64::from_le_bytes(raw)
        } else {
            raw[..cell.len()].copy_from_slice(cell);
            f64::from_be_bytes(raw)
        };
        (!value.is_nan()).then_some(value)
    }
}

/// How the bytes of text cells become strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// ISO-8859-1 proper: byte `n` is code point `U+00nn`, 0x80-0x9F included
    Latin1,
    /// Any other WHATWG encoding
    Labelled(&'static Encoding),
}

impl TextEncoding {
    pub fn decode(self, raw: &[u8]) -> String {
        match self {
            TextEncoding::Latin1 => encoding_rs::mem::decode_latin1(raw).into_owned(),
            TextEncoding::Labelled(encoding) => {
                let (text, _) = encoding.decode_without_bom_handling(raw);
                text.into_owned()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone)]
pub struct ContainerColumn {
    pub name: String,
    pub kind: ColumnKind,
    offset: usize,
    length: usize,
}

/// One decoded cell; a missing numeric value is `Number(None)`
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(Option<f64>),
    Text(String),
}

#[derive(Default)]
struct Metadata {
    row_length: Option<usize>,
    row_count: usize,
    mix_page_row_count: usize,
    column_count: Option<usize>,
    text_blocks: Vec<Vec<u8>>,
    names: Vec<String>,
    attributes: Vec<(usize, usize, ColumnKind)>,
}

/// An opened container: header and column metadata, rows read on demand
#[derive(Debug)]
pub struct Sas7bdatReader {
    path: PathBuf,
    layout: Layout,
    encoding: TextEncoding,
    header_length: usize,
    page_length: usize,
    page_count: usize,
    row_length: usize,
    row_count: usize,
    mix_page_row_count: usize,
    columns: Vec<ContainerColumn>,
}

impl Sas7bdatReader {
    /// Read the header and column metadata; no rows are decoded yet
    pub fn open(path: impl Into<PathBuf>, encoding: TextEncoding) -> EtlResult<Self> {
        let path = path.into();
        let mut file = File::open(&path).map_err(|e| EtlError::file_access(&path, e))?;

        let mut head = vec![0u8; FILE_HEADER_PROBE];
        read_exact(&mut file, &mut head, &path, "file header")?;
        if head[..MAGIC.len()] != MAGIC {
            return Err(EtlError::format(&path, "not a SAS7BDAT file (magic number mismatch)"));
        }

        let layout = Layout {
            wide: head[32] == b'3',
            little_endian: head[37] == 0x01,
        };
        let align = if head[35] == b'3' { 4 } else { 0 };
        let fmt = |m: String| EtlError::format(&path, m);

        let header_length = layout.usize(&head, 196 + align, 4).map_err(fmt)?;
        let page_length = layout.usize(&head, 200 + align, 4).map_err(fmt)?;
        let page_count = layout.usize(&head, 204 + align, layout.int_len()).map_err(fmt)?;
        if header_length < FILE_HEADER_PROBE || page_length == 0 {
            return Err(EtlError::format(&path, "implausible header or page length"));
        }

        let mut reader = Self {
            path,
            layout,
            encoding,
            header_length,
            page_length,
            page_count,
            row_length: 0,
            row_count: 0,
            mix_page_row_count: 0,
            columns: Vec::new(),
        };
        reader.read_metadata(&mut file)?;

        debug!(
            path = %reader.path.display(),
            columns = reader.columns.len(),
            rows = reader.row_count,
            pages = reader.page_count,
            "Opened SAS7BDAT container"
        );
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[ContainerColumn] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// A fresh pass over all rows, yielding only the cells at `projection`
    pub fn rows(&self, projection: Vec<usize>) -> EtlResult<ContainerRows<'_>> {
        if let Some(&bad) = projection.iter().find(|&&i| i >= self.columns.len()) {
            return Err(EtlError::format(&self.path, format!("no column at index {}", bad)));
        }
        let file = File::open(&self.path).map_err(|e| EtlError::file_access(&self.path, e))?;
        Ok(ContainerRows {
            reader: self,
            file,
            projection,
            page: vec![0u8; self.page_length],
            next_page: 0,
            row_start: 0,
            rows_on_page: 0,
            row_on_page: 0,
            yielded: 0,
            failed: false,
        })
    }

    fn read_page(&self, file: &mut File, index: usize, page: &mut [u8]) -> EtlResult<()> {
        let offset = self.header_length as u64 + (index as u64) * (self.page_length as u64);
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| EtlError::file_access(&self.path, e))?;
        read_exact(file, page, &self.path, "page")
    }

    fn page_header(&self, page: &[u8]) -> Result<(PageKind, usize, usize), String> {
        let base = self.layout.page_bit_offset();
        let kind = PageKind::from_raw(self.layout.uint(page, base, 2)?);
        let blocks = self.layout.usize(page, base + 2, 2)?;
        let subheaders = self.layout.usize(page, base + 4, 2)?;
        Ok((kind, blocks, subheaders))
    }

    fn read_metadata(&mut self, file: &mut File) -> EtlResult<()> {
        let mut meta = Metadata::default();
        let mut page = vec![0u8; self.page_length];

        for index in 0..self.page_count {
            self.read_page(file, index, &mut page)?;
            let (kind, _, subheaders) = self
                .page_header(&page)
                .map_err(|m| EtlError::format(&self.path, m))?;

            match kind {
                PageKind::Meta | PageKind::Mix => {
                    self.read_subheaders(&page, subheaders, &mut meta)?;
                },
                PageKind::Data | PageKind::Other => {},
            }
            // Metadata always precedes the first page that carries rows
            if matches!(kind, PageKind::Data | PageKind::Mix) {
                break;
            }
        }

        self.finish_metadata(meta)
    }

    fn read_subheaders(&self, page: &[u8], count: usize, meta: &mut Metadata) -> EtlResult<()> {
        let layout = self.layout;
        let int_len = layout.int_len();
        let fmt = |m: String| EtlError::format(&self.path, m);

        for i in 0..count {
            let pointer = layout.page_bit_offset() + 8 + i * layout.pointer_len();
            let offset = layout.usize(page, pointer, int_len).map_err(fmt)?;
            let length = layout.usize(page, pointer + int_len, int_len).map_err(fmt)?;
            let compression = layout.uint(page, pointer + 2 * int_len, 1).map_err(fmt)?;
            let subheader_type = layout.uint(page, pointer + 2 * int_len + 1, 1).map_err(fmt)?;

            if length == 0 || compression == SUBHEADER_TRUNCATED {
                continue;
            }

            match layout.signature(page, offset).map_err(fmt)? {
                SIG_ROW_SIZE => {
                    meta.row_length = Some(layout.usize(page, offset + 5 * int_len, int_len).map_err(fmt)?);
                    meta.row_count = layout.usize(page, offset + 6 * int_len, int_len).map_err(fmt)?;
                    meta.mix_page_row_count =
                        layout.usize(page, offset + 15 * int_len, int_len).map_err(fmt)?;
                },
                SIG_COLUMN_SIZE => {
                    meta.column_count = Some(layout.usize(page, offset + int_len, int_len).map_err(fmt)?);
                },
                SIG_COLUMN_TEXT => {
                    let size = layout.usize(page, offset + int_len, 2).map_err(fmt)?;
                    let block = layout.bytes(page, offset + int_len, size).map_err(fmt)?;
                    if meta.text_blocks.is_empty()
                        && COMPRESSION_LITERALS
                            .iter()
                            .any(|lit| block.windows(lit.len()).any(|w| w == *lit))
                    {
                        return Err(EtlError::format(
                            &self.path,
                            "compressed SAS7BDAT containers are not supported",
                        ));
                    }
                    meta.text_blocks.push(block.to_vec());
                },
                SIG_COLUMN_NAME => {
                    let base = offset + int_len;
                    let pointers = length.saturating_sub(2 * int_len + 12) / 8;
                    for n in 0..pointers {
                        let entry = base + 8 * (n + 1);
                        let block = layout.usize(page, entry, 2).map_err(fmt)?;
                        let name_offset = layout.usize(page, entry + 2, 2).map_err(fmt)?;
                        let name_length = layout.usize(page, entry + 4, 2).map_err(fmt)?;
                        let text = meta
                            .text_blocks
                            .get(block)
                            .ok_or_else(|| fmt(format!("column name refers to missing text block {}", block)))?;
                        let raw = layout.bytes(text, name_offset, name_length).map_err(fmt)?;
                        meta.names.push(self.decode_text(raw).trim().to_string());
                    }
                },
                SIG_COLUMN_ATTRIBUTES => {
                    let stride = int_len + 8;
                    let vectors = length.saturating_sub(2 * int_len + 12) / stride;
                    for n in 0..vectors {
                        let data_offset =
                            layout.usize(page, offset + int_len + 8 + n * stride, int_len).map_err(fmt)?;
                        let data_length =
                            layout.usize(page, offset + 2 * int_len + 8 + n * stride, 4).map_err(fmt)?;
                        let raw_kind =
                            layout.uint(page, offset + 2 * int_len + 14 + n * stride, 1).map_err(fmt)?;
                        let kind = if raw_kind == 1 {
                            ColumnKind::Numeric
                        } else {
                            ColumnKind::Text
                        };
                        meta.attributes.push((data_offset, data_length, kind));
                    }
                },
                _ if compression == SUBHEADER_COMPRESSED && subheader_type == 1 => {
                    return Err(EtlError::format(
                        &self.path,
                        "compressed SAS7BDAT containers are not supported",
                    ));
                },
                // formats, labels, counts and column lists are not needed
                _ => {},
            }
        }

        Ok(())
    }

    fn finish_metadata(&mut self, meta: Metadata) -> EtlResult<()> {
        let row_length = meta
            .row_length
            .ok_or_else(|| EtlError::format(&self.path, "missing row size subheader"))?;

        if meta.names.len() != meta.attributes.len() {
            return Err(EtlError::format(
                &self.path,
                format!(
                    "{} column names but {} column attributes",
                    meta.names.len(),
                    meta.attributes.len()
                ),
            ));
        }
        if let Some(expected) = meta.column_count {
            if expected != meta.names.len() {
                return Err(EtlError::format(
                    &self.path,
                    format!("expected {} columns, found {}", expected, meta.names.len()),
                ));
            }
        }

        let mut columns = Vec::with_capacity(meta.names.len());
        for (name, (offset, length, kind)) in meta.names.into_iter().zip(meta.attributes) {
            let fits = offset.checked_add(length).is_some_and(|end| end <= row_length);
            if !fits || (kind == ColumnKind::Numeric && !(1..=8).contains(&length)) {
                return Err(EtlError::format(
                    &self.path,
                    format!("column '{}' has an invalid layout", name),
                ));
            }
            columns.push(ContainerColumn {
                name,
                kind,
                offset,
                length,
            });
        }

        self.row_length = row_length;
        self.row_count = meta.row_count;
        self.mix_page_row_count = meta.mix_page_row_count;
        self.columns = columns;
        Ok(())
    }

    fn decode_text(&self, raw: &[u8]) -> String {
        self.encoding.decode(raw)
    }

    fn decode_cell(&self, row: &[u8], column: &ContainerColumn) -> Cell {
        let cell = &row[column.offset..column.offset + column.length];
        match column.kind {
            ColumnKind::Numeric => Cell::Number(self.layout.number(cell)),
            ColumnKind::Text => {
                let end = cell
                    .iter()
                    .rposition(|&b| b != 0 && b != b' ')
                    .map_or(0, |i| i + 1);
                Cell::Text(self.decode_text(&cell[..end]))
            },
        }
    }
}

/// Lazy row iterator; holds its own file handle
pub struct ContainerRows<'a> {
    reader: &'a Sas7bdatReader,
    file: File,
    projection: Vec<usize>,
    page: Vec<u8>,
    next_page: usize,
    row_start: usize,
    rows_on_page: usize,
    row_on_page: usize,
    yielded: usize,
    failed: bool,
}

impl ContainerRows<'_> {
    fn advance_page(&mut self) -> EtlResult<bool> {
        let reader = self.reader;
        while self.next_page < reader.page_count {
            reader.read_page(&mut self.file, self.next_page, &mut self.page)?;
            self.next_page += 1;

            let (kind, blocks, subheaders) = reader
                .page_header(&self.page)
                .map_err(|m| EtlError::format(&reader.path, m))?;
            let base = reader.layout.page_bit_offset() + 8;

            let (start, rows) = match kind {
                PageKind::Data => (base, blocks),
                PageKind::Mix => {
                    let after_pointers = base + subheaders * reader.layout.pointer_len();
                    let aligned = after_pointers + after_pointers % 8;
                    (aligned, reader.row_count.min(reader.mix_page_row_count))
                },
                PageKind::Meta | PageKind::Other => continue,
            };

            self.row_start = start;
            self.rows_on_page = rows;
            self.row_on_page = 0;
            if rows > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Iterator for ContainerRows<'_> {
    type Item = EtlResult<Vec<Cell>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.yielded >= self.reader.row_count {
            return None;
        }

        if self.row_on_page >= self.rows_on_page {
            match self.advance_page() {
                Ok(true) => {},
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                },
            }
        }

        let reader = self.reader;
        let start = self.row_start + self.row_on_page * reader.row_length;
        let Some(row) = self.page.get(start..start + reader.row_length) else {
            self.failed = true;
            return Some(Err(EtlError::format(
                &reader.path,
                format!("row {} runs past the end of its page", self.yielded + 1),
            )));
        };

        let cells = self
            .projection
            .iter()
            .map(|&i| reader.decode_cell(row, &reader.columns[i]))
            .collect();

        self.row_on_page += 1;
        self.yielded += 1;
        Some(Ok(cells))
    }
}

fn read_exact(file: &mut File, buf: &mut [u8], path: &Path, what: &str) -> EtlResult<()> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            EtlError::format(path, format!("truncated {}", what))
        } else {
            EtlError::file_access(path, e)
        }
    })
}


#[cfg(test)]
mod tests {
    use super::fixture::{build, Column, Value};
    use super::*;
    use std::io::Write;

    fn columns() -> Vec<Column<'static>> {
        vec![
            Column { name: "cicid", width: 8, numeric: true },
            Column { name: "i94port", width: 3, numeric: false },
            Column { name: "gender", width: 1, numeric: false },
        ]
    }

    fn write(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn latin1() -> TextEncoding {
        TextEncoding::Latin1
    }

    #[test]
    fn test_reads_columns_and_rows() {
        let rows = vec![
            vec![Value::Number(5.0), Value::Text(b"ATL"), Value::Text(b"M")],
            vec![Value::Number(f64::NAN), Value::Text(b"NY\0"), Value::Text(b" ")],
            vec![Value::Number(6.0), Value::Text(&[0xC5, b'R', b'H']), Value::Text(b"F")],
        ];
        let file = write(&build(&columns(), &rows, b""));

        let reader = Sas7bdatReader::open(file.path(), latin1()).unwrap();
        let names: Vec<&str> = reader.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cicid", "i94port", "gender"]);
        assert_eq!(reader.columns()[0].kind, ColumnKind::Numeric);
        assert_eq!(reader.columns()[1].kind, ColumnKind::Text);
        assert_eq!(reader.row_count(), 3);

        let cells: Vec<Vec<Cell>> = reader
            .rows(vec![0, 1, 2])
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            cells,
            vec![
                vec![Cell::Number(Some(5.0)), Cell::Text("ATL".into()), Cell::Text("M".into())],
                vec![Cell::Number(None), Cell::Text("NY".into()), Cell::Text(String::new())],
                vec![Cell::Number(Some(6.0)), Cell::Text("ÅRH".into()), Cell::Text("F".into())],
            ]
        );
    }

    #[test]
    fn test_projection_reorders_and_restarts() {
        let rows = vec![
            vec![Value::Number(1.0), Value::Text(b"BOS"), Value::Text(b"F")],
            vec![Value::Number(2.0), Value::Text(b"SFR"), Value::Text(b"M")],
        ];
        let file = write(&build(&columns(), &rows, b""));
        let reader = Sas7bdatReader::open(file.path(), latin1()).unwrap();

        let gender = reader.column_index("GENDER").unwrap();
        let first: Vec<Vec<Cell>> = reader.rows(vec![gender, 0]).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(first[1], vec![Cell::Text("M".into()), Cell::Number(Some(2.0))]);

        let second = reader.rows(vec![1]).unwrap().count();
        assert_eq!(second, 2);
        assert!(reader.rows(vec![7]).is_err());
    }

    #[test]
    fn test_rejects_non_container_files() {
        let file = write(&vec![0x42u8; 512]);
        let err = Sas7bdatReader::open(file.path(), latin1()).unwrap_err();
        assert!(matches!(err, EtlError::Format { .. }));

        let short = write(b"tiny");
        let err = Sas7bdatReader::open(short.path(), latin1()).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_rejects_compressed_containers() {
        let file = write(&build(&columns(), &[], b"SASYZCRL"));
        let err = Sas7bdatReader::open(file.path(), latin1()).unwrap_err();
        assert!(err.to_string().contains("compressed"));
    }

    #[test]
    fn test_c1_bytes_depend_on_encoding() {
        assert_eq!(TextEncoding::Latin1.decode(&[0x93, b'A', 0x80]), "\u{93}A\u{80}");
        let windows = TextEncoding::Labelled(encoding_rs::WINDOWS_1252);
        assert_eq!(windows.decode(&[0x93, b'A', 0x80]), "\u{201C}A\u{20AC}");
    }

    #[test]
    fn test_missing_file_is_file_access_error() {
        let err = Sas7bdatReader::open("/no/such/i94_apr16_sub.sas7bdat", latin1()).unwrap_err();
        assert!(matches!(err, EtlError::FileAccess { .. }));
    }
}
