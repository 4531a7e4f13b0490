//! Database compilation stage.
//!
//! Loads the exports of every configured database, normalizes them into one
//! table, resolves duplicates and writes the compiled, unique, repeated and
//! DOI-less tables together with `stats.txt`.

use crate::dedupe::{self, Resolution, FALLBACK_FIELDS};
use crate::error::{PipelineError, Result};
use crate::normalize::{normalize_sources, SourceKind, SourceTable};
use crate::record::{Field, Record, RecordRow, RECORD_COLUMNS};
use crate::table::{save_csv, ReadOptions, Table};
use std::path::{Path, PathBuf};
use tracing::info;

/// Preamble lines in an Embase CSV export
pub const EMBASE_SKIP_ROWS: usize = 3;

pub const COMPILED_CSV: &str = "compiled_articles_from_all_databases.csv";
pub const UNIQUE_CSV: &str = "unique_articles.csv";
pub const REPEATED_CSV: &str = "repeated_articles.csv";
pub const NO_DOI_CSV: &str = "articles_with_no_doi.csv";
pub const STATS_TXT: &str = "stats.txt";

/// Export files to compile. Every source is optional, but at least one
/// must be present.
#[derive(Debug, Clone)]
pub struct CompileInputs {
    pub pubmed: Option<PathBuf>,
    /// Web of Science exports, concatenated in order
    pub wos: Vec<PathBuf>,
    pub greenfile: Option<PathBuf>,
    pub embase: Option<PathBuf>,
    pub embase_skip_rows: usize,
    pub wos_delimiter: u8,
}

impl Default for CompileInputs {
    fn default() -> Self {
        Self {
            pubmed: None,
            wos: Vec::new(),
            greenfile: None,
            embase: None,
            embase_skip_rows: EMBASE_SKIP_ROWS,
            wos_delimiter: b'\t',
        }
    }
}

impl CompileInputs {
    /// Configured files in compilation order with their read options.
    pub fn sources(&self) -> Vec<(SourceKind, PathBuf, ReadOptions)> {
        let csv = ReadOptions::default();
        let mut sources = Vec::new();

        if let Some(path) = &self.pubmed {
            sources.push((SourceKind::PubMed, path.clone(), csv.clone()));
        }
        for path in &self.wos {
            let options = ReadOptions {
                delimiter: self.wos_delimiter,
                ..Default::default()
            };
            sources.push((SourceKind::WebOfScience, path.clone(), options));
        }
        if let Some(path) = &self.greenfile {
            sources.push((SourceKind::GreenFile, path.clone(), csv.clone()));
        }
        if let Some(path) = &self.embase {
            let options = ReadOptions {
                skip_rows: self.embase_skip_rows,
                ..Default::default()
            };
            sources.push((SourceKind::Embase, path.clone(), options));
        }
        sources
    }

    /// Read every configured file. A configured path that does not exist is
    /// a validation error.
    pub fn load(&self) -> Result<Vec<SourceTable>> {
        let sources = self.sources();
        if sources.is_empty() {
            return Err(PipelineError::Validation(
                "At least one database export is required".to_string(),
            ));
        }

        let mut tables = Vec::with_capacity(sources.len());
        for (kind, path, options) in sources {
            if !path.exists() {
                return Err(PipelineError::Validation(format!(
                    "{} export not found: {}",
                    kind.name(),
                    path.display()
                )));
            }
            let name = table_name(kind, &path);
            tables.push(SourceTable::new(kind, Table::read(&path, &name, &options)?));
        }
        Ok(tables)
    }
}

/// `"WoS (savedrecs.txt)"` style names so errors point at the file.
fn table_name(kind: SourceKind, path: &Path) -> String {
    match path.file_name() {
        Some(file) => format!("{} ({})", kind.name(), file.to_string_lossy()),
        None => kind.name().to_string(),
    }
}

/// Outcome of a compilation run.
#[derive(Debug, Clone)]
pub struct CompileReport {
    /// Rows per database, in compilation order, summed over files
    pub source_counts: Vec<(SourceKind, usize)>,
    pub records: Vec<Record>,
    pub resolution: Resolution,
}

impl CompileReport {
    /// Normalize and resolve already-loaded tables.
    pub fn build(sources: &[SourceTable]) -> Result<Self> {
        let records = normalize_sources(sources)?;
        let resolution = dedupe::resolve(&records);

        let mut source_counts: Vec<(SourceKind, usize)> = Vec::new();
        for source in sources {
            match source_counts.iter_mut().find(|(kind, _)| *kind == source.kind) {
                Some((_, count)) => *count += source.table.len(),
                None => source_counts.push((source.kind, source.table.len())),
            }
        }

        Ok(Self {
            source_counts,
            records,
            resolution,
        })
    }

    /// Rows read for `kind`; zero when it was not configured.
    pub fn count_for(&self, kind: SourceKind) -> usize {
        self.source_counts
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, count)| *count)
    }

    /// Text written to `stats.txt`. Every database gets a line.
    pub fn render_stats(&self) -> String {
        let r = &self.resolution;
        let mut out = String::from("Database Statistics:\n");
        for kind in SourceKind::ALL {
            out.push_str(&format!("Number of entries in {}: {}\n", kind.name(), self.count_for(kind)));
        }
        out.push_str(&format!(
            "Total number of articles compiled from all databases: {}\n\n",
            self.records.len()
        ));

        out.push_str("Replicate Statistics:\n");
        out.push_str(&format!("Total number of articles in compiled database: {}\n", r.total_entries()));
        out.push_str(&format!("Number of unique articles: {}\n", r.unique.len()));
        out.push_str(&format!("Number of repeated articles: {}\n", r.repeated_copies()));
        out.push_str(&format!("Number of articles with 'No DOI': {}\n", r.unidentified.len()));

        if let Some(fallback) = &r.fallback {
            out.push_str("\nFor articles with 'No DOI':\n");
            for field in FALLBACK_FIELDS {
                out.push_str(&format!(
                    "Number of replicates in {} for articles with 'No DOI': {}\n",
                    fallback_label(field),
                    fallback.get(field)
                ));
            }
        }
        out
    }

    /// Write every table and `stats.txt` into `output_dir`.
    pub fn write(&self, output_dir: &Path) -> Result<()> {
        write_records(&output_dir.join(COMPILED_CSV), self.records.iter())?;

        let unique = Resolution::select(&self.records, &self.resolution.unique);
        write_records(&output_dir.join(UNIQUE_CSV), unique.into_iter())?;

        let repeated = Resolution::select(&self.records, &self.resolution.repeated);
        write_records(&output_dir.join(REPEATED_CSV), repeated.into_iter())?;

        if !self.resolution.unidentified.is_empty() {
            let no_doi = Resolution::select(&self.records, &self.resolution.unidentified);
            write_records(&output_dir.join(NO_DOI_CSV), no_doi.into_iter())?;
        }

        std::fs::write(output_dir.join(STATS_TXT), self.render_stats())?;
        info!(dir = %output_dir.display(), "Compilation outputs saved");
        Ok(())
    }
}

fn fallback_label(field: Field) -> &'static str {
    match field {
        Field::Journal => "Journals",
        other => other.column(),
    }
}

fn write_records<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: Iterator<Item = &'a Record>,
{
    let rows: Vec<RecordRow> = records.map(Record::to_row).collect();
    save_csv(path, RECORD_COLUMNS, &rows)
}

/// Load, compile and write everything for `inputs`.
pub fn run_compile_stage(inputs: &CompileInputs, output_dir: &Path) -> Result<CompileReport> {
    let sources = inputs.load()?;
    let report = CompileReport::build(&sources)?;
    std::fs::create_dir_all(output_dir)?;
    report.write(output_dir)?;
    Ok(report)
}
