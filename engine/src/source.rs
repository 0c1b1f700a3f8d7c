//! Row sources - where imported records come from.
//!
//! Any [`RowSource`] can feed an import; [`read_rows`] turns whatever error
//! the source raises into [`Error::InvalidInputDocument`]. [`CsvSource`] is
//! the delimited-text source: the first non-empty line names the columns,
//! dot-path column names expand into nested objects.

use crate::{error::Result, Error, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::convert::Infallible;

/// UTF-8 byte order mark.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Produces the ordered rows of one import.
pub trait RowSource {
    type Error: std::fmt::Display;

    fn read(self) -> std::result::Result<Vec<Record>, Self::Error>;
}

impl RowSource for Vec<Record> {
    type Error = Infallible;

    fn read(self) -> std::result::Result<Vec<Record>, Self::Error> {
        Ok(self)
    }
}

/// Read all rows, collapsing any source failure into one signal.
pub fn read_rows<S: RowSource>(source: S) -> Result<Vec<Record>> {
    source
        .read()
        .map_err(|e| Error::InvalidInputDocument(e.to_string()))
}

/// Delimited-text parsing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParseConfig {
    /// Field delimiter, must be ASCII.
    pub delimiter: char,
    /// Convert empty cells to `null`, `true`/`false` to booleans and numeric
    /// text to numbers. Otherwise every cell stays a string.
    pub dynamic_typing: bool,
    /// Refuse documents with more data rows than this.
    pub max_rows: Option<usize>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            dynamic_typing: false,
            max_rows: None,
        }
    }
}

/// Why a delimited document could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("delimiter must be a single ASCII character, got {0:?}")]
    Delimiter(char),

    #[error("document exceeds the maximum of {0} rows")]
    TooManyRows(usize),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Delimited text held in memory.
#[derive(Debug, Clone)]
pub struct CsvSource<'a> {
    data: &'a [u8],
    config: ParseConfig,
}

impl<'a> CsvSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_config(data, ParseConfig::default())
    }

    pub fn with_config(data: &'a [u8], config: ParseConfig) -> Self {
        Self { data, config }
    }

    fn cell(&self, raw: &str) -> Value {
        if !self.config.dynamic_typing {
            return Value::String(raw.to_string());
        }
        coerce(raw)
    }
}

impl RowSource for CsvSource<'_> {
    type Error = ParseError;

    fn read(self) -> std::result::Result<Vec<Record>, ParseError> {
        if !self.config.delimiter.is_ascii() {
            return Err(ParseError::Delimiter(self.config.delimiter));
        }

        let data = self.data.strip_prefix(UTF8_BOM).unwrap_or(self.data);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.config.delimiter as u8)
            .from_reader(data);

        let mut lines = reader.records();
        let columns: Vec<String> = loop {
            match lines.next() {
                None => return Ok(Vec::new()),
                Some(line) => {
                    let line = line?;
                    if !is_blank(&line) {
                        break line.iter().map(str::to_string).collect();
                    }
                }
            }
        };

        let mut rows = Vec::new();
        for result in lines {
            let line = result?;
            if is_blank(&line) {
                continue;
            }

            if let Some(max) = self.config.max_rows {
                if rows.len() >= max {
                    return Err(ParseError::TooManyRows(max));
                }
            }

            // cells missing from short lines are left out, surplus cells ignored
            let mut row = Record::new();
            for (column, raw) in columns.iter().zip(line.iter()) {
                row.insert_path(column, self.cell(raw));
            }
            rows.push(row);
        }

        Ok(rows)
    }
}

fn is_blank(line: &csv::StringRecord) -> bool {
    line.iter().all(str::is_empty)
}

/// Type a raw cell the way spreadsheet exports usually mean it.
fn coerce(raw: &str) -> Value {
    match raw {
        "" => return Value::Null,
        "true" | "TRUE" => return Value::Bool(true),
        "false" | "FALSE" => return Value::Bool(false),
        _ => {}
    }

    let text = raw.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    // f64 parsing also accepts "inf" and "NaN", which are not numbers here
    let numeric = text.bytes().any(|b| b.is_ascii_digit())
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'));
    if numeric {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}
