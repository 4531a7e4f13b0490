//! Record normalization across database exports.
//!
//! Each supported database exports the same five facts under different
//! column names. [`normalize_sources`] maps every source onto the unified
//! [`Record`] shape, concatenating sources in the order given and keeping
//! row order within each source.

use crate::error::Result;
use crate::record::{parse_cell, Field, Record};
use crate::table::Table;
use tracing::info;

/// Supported export layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    PubMed,
    WebOfScience,
    GreenFile,
    Embase,
}

impl SourceKind {
    /// All layouts in the default compilation order.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::PubMed,
        SourceKind::WebOfScience,
        SourceKind::GreenFile,
        SourceKind::Embase,
    ];

    /// Display name used in statistics and errors.
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::PubMed => "PubMed",
            SourceKind::WebOfScience => "WoS",
            SourceKind::GreenFile => "GreenFile",
            SourceKind::Embase => "Embase",
        }
    }

    /// Source column holding each unified field.
    pub fn column_for(self, field: Field) -> &'static str {
        match (self, field) {
            (SourceKind::PubMed, f) => f.column(),

            (SourceKind::WebOfScience, Field::Title) => "Article Title",
            (SourceKind::WebOfScience, Field::Journal) => "Source Title",
            (SourceKind::WebOfScience, f) => f.column(),

            (SourceKind::GreenFile, Field::Title) => "title",
            (SourceKind::GreenFile, Field::Abstract) => "abstract",
            (SourceKind::GreenFile, Field::Authors) => "contributors",
            (SourceKind::GreenFile, Field::Doi) => "doi",
            (SourceKind::GreenFile, Field::Journal) => "source",

            (SourceKind::Embase, Field::Authors) => "Author Names",
            (SourceKind::Embase, Field::Journal) => "Source title",
            (SourceKind::Embase, f) => f.column(),
        }
    }
}

/// One loaded export and the layout it follows.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub kind: SourceKind,
    pub table: Table,
}

impl SourceTable {
    pub fn new(kind: SourceKind, table: Table) -> Self {
        Self { kind, table }
    }
}

/// Map every source table onto unified records.
///
/// All column lookups happen before any row is converted, so a missing
/// column in any source fails the whole call without partial output.
pub fn normalize_sources(sources: &[SourceTable]) -> Result<Vec<Record>> {
    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        let mut indices = [0usize; 5];
        for (slot, field) in indices.iter_mut().zip(Field::ALL) {
            *slot = source.table.column_index(source.kind.column_for(field))?;
        }
        resolved.push((source, indices));
    }

    let total: usize = sources.iter().map(|s| s.table.len()).sum();
    let mut records = Vec::with_capacity(total);

    for (source, indices) in resolved {
        for row in &source.table.rows {
            let mut record = Record::default();
            for (idx, field) in indices.iter().zip(Field::ALL) {
                record.set(field, normalize_value(field, &row[*idx]));
            }
            records.push(record);
        }
        info!(
            source = source.table.name.as_str(),
            layout = source.kind.name(),
            rows = source.table.len(),
            "Normalized source"
        );
    }

    Ok(records)
}

/// Normalize one raw cell for a unified field.
///
/// Title, Authors and Journal are title-cased for cross-source comparison;
/// Abstract and DOI keep their case.
pub fn normalize_value(field: Field, raw: &str) -> Option<String> {
    let value = parse_cell(field, raw)?;
    match field {
        Field::Title | Field::Authors | Field::Journal => Some(title_case(&value)),
        Field::Abstract | Field::Doi => Some(value),
    }
}

/// Uppercase the first letter of every alphabetic run and lowercase the rest.
///
/// `"o'neil, MARY-ann"` becomes `"O'Neil, Mary-Ann"`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
