//! Row-oriented tabular file I/O.
//!
//! Database exports are read into an untyped [`Table`] (header + string rows)
//! so each stage can pick the columns it needs and fail with a
//! [`PipelineError::MissingColumn`] naming the source when one is absent.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// How to read a delimited export.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Field delimiter (`b','` for CSV, `b'\t'` for tab-delimited exports)
    pub delimiter: u8,
    /// Physical lines to drop before the header (export preambles)
    pub skip_rows: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_rows: 0,
        }
    }
}

/// An untyped table: one header row plus string cells.
///
/// Every row has exactly `headers.len()` cells; short rows are padded with
/// empty strings when read.
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Name used in error messages and statistics (e.g. "PubMed")
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table from in-memory rows.
    pub fn new(name: &str, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.to_string(),
            headers,
            rows,
        }
    }

    /// Read a delimited file from disk.
    pub fn read(path: &Path, name: &str, options: &ReadOptions) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        if let Cow::Owned(_) = content {
            warn!(
                source = name,
                path = %path.display(),
                "File is not valid UTF-8; invalid bytes replaced with U+FFFD"
            );
        }
        let table = Self::parse(&content, name, options)?;
        info!(
            source = name,
            path = %path.display(),
            rows = table.len(),
            "Loaded table"
        );
        Ok(table)
    }

    /// Parse delimited text.
    pub fn parse(content: &str, name: &str, options: &ReadOptions) -> Result<Self> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let body = skip_lines(content, options.skip_rows);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .flexible(true)
            .from_reader(body.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        debug!(source = name, columns = headers.len(), rows = rows.len(), "Parsed table");

        Ok(Self::new(name, headers, rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column` in the header.
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| PipelineError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// All cells of one column, in row order.
    pub fn column_values(&self, column: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(column)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Rows whose `column` value satisfies `keep`, first occurrence per value.
    pub fn select_first_by<F>(&self, column: &str, keep: F) -> Result<Table>
    where
        F: Fn(&str) -> bool,
    {
        let idx = self.column_index(column)?;
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|row| keep(row[idx].trim()) && seen.insert(row[idx].trim().to_string()))
            .cloned()
            .collect();
        Ok(Self::new(&self.name, self.headers.clone(), rows))
    }

    /// Write header and rows as CSV.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        info!(path = %path.display(), rows = self.len(), "Saved CSV");
        Ok(())
    }
}

/// Save serializable rows to a CSV file under an explicit header.
///
/// The header is written even when `data` is empty so downstream stages can
/// still open the file. `headers` must follow the field order of `T`.
pub fn save_csv<T: Serialize>(path: &Path, headers: &[&str], data: &[T]) -> Result<usize> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;

    wtr.write_record(headers)?;
    for item in data {
        wtr.serialize(item)?;
    }

    wtr.flush()?;
    info!(path = %path.display(), rows = data.len(), "Saved CSV");
    Ok(data.len())
}

fn skip_lines(content: &str, count: usize) -> &str {
    let mut rest = content;
    for _ in 0..count {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest
}
