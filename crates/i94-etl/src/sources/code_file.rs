//! Reference code files
//!
//! One pair per line, `=` between the fields, `'` around values that need
//! it, leading whitespace ignored:
//!
//! ```text
//!    582 =  'MEXICO Air Sea, and Not Reported (I-94, no land arrivals)'
//!  'ATL' =  'ATLANTA, GA'
//! ```
//!
//! Only the first two fields of a line are kept. Blank lines are skipped.

use crate::error::{EtlError, EtlResult};
use crate::sources::{RawRecord, RecordSource, Records};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

const DELIMITER: char = '=';
const QUOTE: char = '\'';

/// A `code=description` file on disk
#[derive(Debug, Clone)]
pub struct CodeFileSource {
    path: PathBuf,
}

impl CodeFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for CodeFileSource {
    fn records(&self) -> EtlResult<Records<'_>> {
        let file = File::open(&self.path).map_err(|e| EtlError::file_access(&self.path, e))?;
        Ok(Box::new(CodeRecords {
            path: &self.path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            failed: false,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct CodeRecords<'a> {
    path: &'a Path,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    failed: bool,
}

impl Iterator for CodeRecords<'_> {
    type Item = EtlResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    self.failed = true;
                    return Some(Err(EtlError::format(
                        self.path,
                        format!("line {} is not valid UTF-8", self.line_no + 1),
                    )));
                },
                Err(e) => {
                    self.failed = true;
                    return Some(Err(EtlError::file_access(self.path, e)));
                },
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let result = split_fields(&line)
                .and_then(|mut fields| {
                    if fields.len() < 2 {
                        return Err("expected code=description".to_string());
                    }
                    fields.truncate(2);
                    Ok(fields)
                })
                .map_err(|message| {
                    EtlError::format(self.path, format!("line {}: {}", self.line_no, message))
                });

            self.failed = result.is_err();
            return Some(result);
        }
    }
}

/// Split one line on `=`, honouring `'` quoting (`''` is a literal quote).
fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut field = String::new();

        if chars.peek() == Some(&QUOTE) {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c != QUOTE {
                    field.push(c);
                } else if chars.peek() == Some(&QUOTE) {
                    field.push(QUOTE);
                    chars.next();
                } else {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err("unterminated quote".to_string());
            }

            loop {
                match chars.next() {
                    None => {
                        fields.push(field);
                        return Ok(fields);
                    },
                    Some(DELIMITER) => break,
                    Some(c) if c.is_whitespace() => {},
                    Some(c) => return Err(format!("unexpected {:?} after closing quote", c)),
                }
            }
            fields.push(field);
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field.trim_end().to_string());
                        return Ok(fields);
                    },
                    Some(DELIMITER) => break,
                    Some(c) => field.push(c),
                }
            }
            fields.push(field.trim_end().to_string());
        }
    }
}
