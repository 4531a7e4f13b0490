//! Canonical article record shared by the compilation, citation and tagging stages.
//!
//! Absent values are `None` inside the pipeline. The `"No {Column}"` sentinel
//! strings only exist at the tabular boundary: [`Record::to_row`] writes them
//! and [`parse_cell`] turns them back into `None`.

use serde::Serialize;

/// The five columns every unified table carries, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Abstract,
    Authors,
    Doi,
    Journal,
}

impl Field {
    /// All fields in unified column order.
    pub const ALL: [Field; 5] = [
        Field::Title,
        Field::Abstract,
        Field::Authors,
        Field::Doi,
        Field::Journal,
    ];

    /// Column header used in unified tables.
    pub fn column(self) -> &'static str {
        match self {
            Field::Title => "Title",
            Field::Abstract => "Abstract",
            Field::Authors => "Authors",
            Field::Doi => "DOI",
            Field::Journal => "Journal",
        }
    }

    /// Sentinel written in place of an absent value, e.g. `"No DOI"`.
    pub fn sentinel(self) -> String {
        format!("No {}", self.column())
    }
}

/// CSV column order for unified tables
pub const RECORD_COLUMNS: &[&str] = &["Title", "Abstract", "Authors", "DOI", "Journal"];

/// One article after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub authors: Option<String>,
    pub doi: Option<String>,
    pub journal: Option<String>,
}

impl Record {
    /// Borrow a field's value, `None` when absent.
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => self.title.as_deref(),
            Field::Abstract => self.abstract_text.as_deref(),
            Field::Authors => self.authors.as_deref(),
            Field::Doi => self.doi.as_deref(),
            Field::Journal => self.journal.as_deref(),
        }
    }

    /// Set a field's value.
    pub fn set(&mut self, field: Field, value: Option<String>) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Abstract => &mut self.abstract_text,
            Field::Authors => &mut self.authors,
            Field::Doi => &mut self.doi,
            Field::Journal => &mut self.journal,
        };
        *slot = value;
    }

    /// Field value or its sentinel, as written to disk.
    pub fn value_or_sentinel(&self, field: Field) -> String {
        self.get(field)
            .map(str::to_string)
            .unwrap_or_else(|| field.sentinel())
    }

    /// Serializable row with sentinels filled in.
    pub fn to_row(&self) -> RecordRow {
        RecordRow {
            title: self.value_or_sentinel(Field::Title),
            abstract_text: self.value_or_sentinel(Field::Abstract),
            authors: self.value_or_sentinel(Field::Authors),
            doi: self.value_or_sentinel(Field::Doi),
            journal: self.value_or_sentinel(Field::Journal),
        }
    }
}

/// On-disk form of a [`Record`]. Field order matches [`RECORD_COLUMNS`].
#[derive(Debug, Clone, Serialize)]
pub struct RecordRow {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Abstract")]
    pub abstract_text: String,
    #[serde(rename = "Authors")]
    pub authors: String,
    #[serde(rename = "DOI")]
    pub doi: String,
    #[serde(rename = "Journal")]
    pub journal: String,
}

/// Read a raw cell for `field`: trimmed, with empty cells and the field's
/// sentinel mapped to `None`.
pub fn parse_cell(field: Field, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == field.sentinel() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
