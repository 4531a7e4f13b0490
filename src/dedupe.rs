//! Duplicate detection over the unified table.
//!
//! Two passes:
//!
//! - **Primary**: records sharing a DOI form a duplicate group. The first
//!   occurrence is kept as the unique article, later occurrences are
//!   "repeated copies". Records without a DOI are never grouped here.
//! - **Fallback**: over DOI-less records only, each of Title, Abstract,
//!   Authors and Journal is fingerprinted independently (lowercase,
//!   punctuation stripped) and the number of surplus copies per field is
//!   reported. The four counts are separate signals for manual review; a
//!   record can contribute to several of them and nothing is merged.
//!
//! Both passes depend only on input order, so repeated runs select the same
//! rows and report the same counts.

use crate::record::{Field, Record};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Fields fingerprinted by the fallback pass, in report order.
pub const FALLBACK_FIELDS: [Field; 4] = [Field::Title, Field::Abstract, Field::Authors, Field::Journal];

/// Surplus copies per field among DOI-less records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackCounts {
    pub titles: usize,
    pub abstracts: usize,
    pub authors: usize,
    pub journals: usize,
}

impl FallbackCounts {
    /// Count for one fingerprinted field. Non-fallback fields report zero.
    pub fn get(&self, field: Field) -> usize {
        match field {
            Field::Title => self.titles,
            Field::Abstract => self.abstracts,
            Field::Authors => self.authors,
            Field::Journal => self.journals,
            Field::Doi => 0,
        }
    }
}

/// Classification of every input row, by index into the input slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// First occurrence of each DOI, in input order
    pub unique: Vec<usize>,
    /// Later occurrences of a DOI already seen, in input order
    pub repeated: Vec<usize>,
    /// Records without a DOI, in input order
    pub unidentified: Vec<usize>,
    /// `None` when there are no DOI-less records
    pub fallback: Option<FallbackCounts>,
}

impl Resolution {
    /// Total rows classified.
    pub fn total_entries(&self) -> usize {
        self.unique.len() + self.repeated.len() + self.unidentified.len()
    }

    /// Sum over DOI groups of `size - 1`.
    pub fn repeated_copies(&self) -> usize {
        self.repeated.len()
    }

    /// Borrow the records at `indices`.
    pub fn select<'a>(records: &'a [Record], indices: &[usize]) -> Vec<&'a Record> {
        indices.iter().filter_map(|&i| records.get(i)).collect()
    }
}

/// Classify records into unique, repeated and DOI-less rows.
pub fn resolve(records: &[Record]) -> Resolution {
    let mut resolution = Resolution::default();
    let mut first_seen: HashMap<&str, usize> = HashMap::new();

    for (idx, record) in records.iter().enumerate() {
        match record.doi.as_deref() {
            Some(doi) => {
                if first_seen.contains_key(doi) {
                    resolution.repeated.push(idx);
                } else {
                    first_seen.insert(doi, idx);
                    resolution.unique.push(idx);
                }
            }
            None => resolution.unidentified.push(idx),
        }
    }

    if !resolution.unidentified.is_empty() {
        let unidentified = Resolution::select(records, &resolution.unidentified);
        resolution.fallback = Some(fallback_counts(&unidentified));
    }

    info!(
        total = records.len(),
        unique_dois = resolution.unique.len(),
        repeated = resolution.repeated.len(),
        no_doi = resolution.unidentified.len(),
        "Duplicate resolution complete"
    );

    resolution
}

/// Per-field surplus copies among `records`.
///
/// An absent field is fingerprinted through its sentinel text, so records
/// missing the same field count as copies of each other, matching the
/// statistics produced from the written tables.
pub fn fallback_counts(records: &[&Record]) -> FallbackCounts {
    let count = |field: Field| {
        let surplus = surplus_copies(records.iter().map(|r| {
            fingerprint(&r.value_or_sentinel(field))
        }));
        debug!(field = field.column(), surplus, "Fallback fingerprint pass");
        surplus
    };

    FallbackCounts {
        titles: count(Field::Title),
        abstracts: count(Field::Abstract),
        authors: count(Field::Authors),
        journals: count(Field::Journal),
    }
}

/// `sum(size) - count` over groups with more than one member.
fn surplus_copies<I>(keys: I) -> usize
where
    I: IntoIterator<Item = String>,
{
    let mut groups: HashMap<String, usize> = HashMap::new();
    for key in keys {
        *groups.entry(key).or_insert(0) += 1;
    }
    groups
        .values()
        .filter(|&&size| size > 1)
        .map(|size| size - 1)
        .sum()
}

/// Unicode general category P (connector, dash, open, close, quote, other).
static UNICODE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{P}").expect("valid punctuation pattern"));

/// Lowercase `text` and drop ASCII and Unicode punctuation.
///
/// ASCII symbols such as `$`, `+` and `|` are not in category P but are
/// stripped as well.
pub fn fingerprint(text: &str) -> String {
    let without_ascii: String = text.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    UNICODE_PUNCTUATION
        .replace_all(&without_ascii, "")
        .chars()
        .flat_map(char::to_lowercase)
        .collect()
}
