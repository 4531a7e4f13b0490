//! Citation collection stage.
//!
//! Reads the deduplicated DOI list, fetches one BibTeX record per DOI through
//! the bounded fetch pool, writes one `.bib` file per DOI and partitions the
//! input rows into saved and failed tables.

use crate::error::Result;
use crate::fetch_pool::{self, FetchLedger, FetchOutcome, Fetcher, PoolConfig};
use crate::record::{parse_cell, Field};
use crate::table::{ReadOptions, Table};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Paths and pool settings for one citation run.
#[derive(Debug, Clone)]
pub struct CitationStageConfig {
    /// Table with a `DOI` column (normally `unique_articles.csv`)
    pub input_csv: PathBuf,
    /// Folder receiving one `.bib` file per DOI
    pub output_folder: PathBuf,
    pub failed_csv: PathBuf,
    pub success_csv: PathBuf,
    pub summary_path: PathBuf,
    /// Empty the output folder before fetching
    pub clear_output: bool,
    pub pool: PoolConfig,
}

impl CitationStageConfig {
    /// Default artifact names under `output_dir`.
    pub fn in_dir(input_csv: &Path, output_dir: &Path) -> Self {
        Self {
            input_csv: input_csv.to_path_buf(),
            output_folder: output_dir.join("bibtex_files"),
            failed_csv: output_dir.join("failed_entries.csv"),
            success_csv: output_dir.join("saved_entries.csv"),
            summary_path: output_dir.join("bibtex_stats.txt"),
            clear_output: true,
            pool: PoolConfig::default(),
        }
    }
}

/// Final counts of a citation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationSummary {
    /// Distinct DOIs submitted to the pool
    pub total_input: usize,
    pub successes: usize,
    pub failures: usize,
    /// Files present in the output folder after saving
    pub files_in_folder: usize,
    /// Input rows skipped because they carry no DOI
    pub skipped_without_doi: usize,
}

impl CitationSummary {
    /// `successes + failures == total_input`
    pub fn is_consistent(&self) -> bool {
        self.successes + self.failures == self.total_input
    }

    /// Human-readable summary written to `bibtex_stats.txt`.
    pub fn render(&self) -> String {
        let mut out = String::from("\nSummary of Results:\n\n");
        out.push_str(&format!("Total input DOIs: {}\n", self.total_input));
        out.push_str(&format!("Successfully fetched and saved: {}\n", self.successes));
        out.push_str(&format!("Failed to fetch: {}\n", self.failures));
        out.push_str(&format!("Files saved in folder: {}\n", self.files_in_folder));
        if self.skipped_without_doi > 0 {
            out.push_str(&format!("Rows without DOI skipped: {}\n", self.skipped_without_doi));
        }
        if self.is_consistent() {
            out.push_str("All DOIs processed correctly.\n");
        } else {
            out.push_str("Warning: Discrepancy in total processed DOIs.\n");
        }
        out
    }
}

/// File name for a DOI's BibTeX record: `/` becomes `_`.
pub fn bibtex_filename(doi: &str) -> String {
    format!("{}.bib", doi.trim().replace('/', "_"))
}

/// Create `folder`, or empty it of files when `clear` is set.
///
/// Returns the number of files removed.
pub fn prepare_output_folder(folder: &Path, clear: bool) -> Result<usize> {
    if !folder.exists() {
        std::fs::create_dir_all(folder)?;
        info!(folder = %folder.display(), "Created output folder");
        return Ok(0);
    }
    if !clear {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    info!(folder = %folder.display(), removed, "Cleared existing files");
    Ok(removed)
}

/// Write each successful payload to its own file.
///
/// An existing file is never overwritten: the DOI is moved to the failure
/// set instead. Write errors are recorded the same way. Returns the number
/// of files written.
pub fn save_bibtex_files(
    outcomes: &[FetchOutcome],
    folder: &Path,
    ledger: &mut FetchLedger,
) -> usize {
    let mut written = 0;

    for outcome in outcomes {
        let payload = match &outcome.result {
            Ok(payload) => payload,
            Err(_) => continue,
        };

        let path = folder.join(bibtex_filename(&outcome.identifier));
        let file = OpenOptions::new().write(true).create_new(true).open(&path);
        let saved = match file {
            Ok(mut file) => file.write_all(payload.as_bytes()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(doi = %outcome.identifier, path = %path.display(), "File already exists, skipping");
                ledger.record_failure(&outcome.identifier);
                continue;
            }
            Err(e) => Err(e),
        };

        match saved {
            Ok(()) => {
                info!(doi = %outcome.identifier, path = %path.display(), "Saved BibTeX");
                written += 1;
            }
            Err(e) => {
                warn!(doi = %outcome.identifier, error = %e, "Failed to save BibTeX");
                ledger.record_failure(&outcome.identifier);
            }
        }
    }

    written
}

/// DOIs of `table` in row order, sentinel and empty cells removed.
pub fn input_identifiers(table: &Table) -> Result<(Vec<String>, usize)> {
    let mut dois = Vec::new();
    let mut skipped = 0;
    for value in table.column_values(Field::Doi.column())? {
        match parse_cell(Field::Doi, value) {
            Some(doi) => dois.push(doi),
            None => skipped += 1,
        }
    }
    Ok((dois, skipped))
}

/// Write the input rows whose DOI failed and whose DOI succeeded, one row
/// per DOI. Returns `(failed_rows, saved_rows)`.
pub fn write_partitioned_entries(
    table: &Table,
    ledger: &FetchLedger,
    failed_csv: &Path,
    success_csv: &Path,
) -> Result<(usize, usize)> {
    let doi_column = Field::Doi.column();

    let failed = table.select_first_by(doi_column, |doi| ledger.is_failure(doi))?;
    failed.write(failed_csv)?;

    let saved = table.select_first_by(doi_column, |doi| ledger.is_success(doi))?;
    saved.write(success_csv)?;

    Ok((failed.len(), saved.len()))
}

/// Run the whole citation stage with `fetcher`.
pub async fn run_citation_stage<F: Fetcher>(
    fetcher: &F,
    config: &CitationStageConfig,
) -> Result<CitationSummary> {
    prepare_output_folder(&config.output_folder, config.clear_output)?;

    let table = Table::read(&config.input_csv, "unique articles", &ReadOptions::default())?;
    let (dois, skipped_without_doi) = input_identifiers(&table)?;
    if skipped_without_doi > 0 {
        warn!(skipped = skipped_without_doi, "Rows without DOI skipped");
    }
    let dois = fetch_pool::distinct_identifiers(&dois);

    info!(count = dois.len(), workers = config.pool.max_workers, "Starting BibTeX fetch");
    let started = Instant::now();
    let (mut ledger, outcomes) =
        fetch_pool::fetch_all(fetcher, &dois, &config.pool, FetchLedger::new()).await;
    info!(elapsed_secs = started.elapsed().as_secs_f64(), "Fetched BibTeX entries");

    save_bibtex_files(&outcomes, &config.output_folder, &mut ledger);
    write_partitioned_entries(&table, &ledger, &config.failed_csv, &config.success_csv)?;

    ledger.verify(dois.len());
    let summary = CitationSummary {
        total_input: dois.len(),
        successes: ledger.successes().len(),
        failures: ledger.failures().len(),
        files_in_folder: count_files(&config.output_folder)?,
        skipped_without_doi,
    };

    std::fs::write(&config.summary_path, summary.render())?;
    info!(path = %config.summary_path.display(), "Summary saved");

    Ok(summary)
}

fn count_files(folder: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(folder)? {
        if entry?.path().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_pool::{AttemptError, RetryDelay, RetryPolicy};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Fails DOIs containing "bad", returns a BibTeX stub otherwise.
    struct StubFetcher;

    impl Fetcher for StubFetcher {
        async fn fetch(&self, identifier: &str) -> std::result::Result<String, AttemptError> {
            if identifier.contains("bad") {
                Err(AttemptError::Definitive("HTTP 404".to_string()))
            } else {
                Ok(format!("@article{{key, doi = {{{}}}}}", identifier))
            }
        }
    }

    fn quick_pool() -> PoolConfig {
        PoolConfig {
            max_workers: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                delay: RetryDelay::Jitter {
                    min: Duration::ZERO,
                    max: Duration::ZERO,
                },
            },
        }
    }

    #[test]
    fn test_bibtex_filename() {
        assert_eq!(bibtex_filename("10.1016/j.x/2020"), "10.1016_j.x_2020.bib");
    }

    #[test]
    fn test_existing_file_is_skipped_and_failed() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("10.1_a.bib"), "old")?;

        let outcomes = vec![
            FetchOutcome {
                identifier: "10.1/a".to_string(),
                attempts: 1,
                result: Ok("new".to_string()),
            },
            FetchOutcome {
                identifier: "10.1/b".to_string(),
                attempts: 1,
                result: Ok("fresh".to_string()),
            },
        ];
        let mut ledger = FetchLedger::new();
        ledger.record_success("10.1/a");
        ledger.record_success("10.1/b");

        let written = save_bibtex_files(&outcomes, dir.path(), &mut ledger);
        assert_eq!(written, 1);
        assert!(ledger.is_failure("10.1/a"));
        assert!(ledger.is_success("10.1/b"));
        assert_eq!(std::fs::read_to_string(dir.path().join("10.1_a.bib"))?, "old");
        assert_eq!(std::fs::read_to_string(dir.path().join("10.1_b.bib"))?, "fresh");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_citation_stage() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("unique_articles.csv");
        std::fs::write(
            &input,
            "Title,Abstract,Authors,DOI,Journal\n\
             A,x,y,10.1/a,J\n\
             B,x,y,10.1/bad,J\n\
             C,x,y,No DOI,J\n\
             D,x,y,10.1/d,J\n",
        )?;

        let mut config = CitationStageConfig::in_dir(&input, dir.path());
        config.pool = quick_pool();

        let summary = run_citation_stage(&StubFetcher, &config).await?;
        assert_eq!(summary.total_input, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.files_in_folder, 2);
        assert_eq!(summary.skipped_without_doi, 1);
        assert!(summary.is_consistent());

        assert!(config.output_folder.join("10.1_a.bib").exists());
        let failed = Table::read(&config.failed_csv, "failed", &ReadOptions::default())?;
        assert_eq!(failed.column_values("Title")?, vec!["B"]);
        let saved = Table::read(&config.success_csv, "saved", &ReadOptions::default())?;
        assert_eq!(saved.column_values("Title")?, vec!["A", "D"]);

        let stats = std::fs::read_to_string(&config.summary_path)?;
        assert!(stats.contains("Total input DOIs: 3"));
        assert!(stats.contains("All DOIs processed correctly."));
        Ok(())
    }

    #[test]
    fn test_summary_reports_discrepancy() {
        let summary = CitationSummary {
            total_input: 3,
            successes: 1,
            failures: 1,
            files_in_folder: 1,
            skipped_without_doi: 0,
        };
        assert!(!summary.is_consistent());
        assert!(summary.render().contains("Warning: Discrepancy"));
    }

    #[test]
    fn test_prepare_output_folder_clears_files() -> Result<()> {
        let dir = tempdir()?;
        let folder = dir.path().join("bib");
        assert_eq!(prepare_output_folder(&folder, true)?, 0);
        std::fs::write(folder.join("old.bib"), "x")?;
        assert_eq!(prepare_output_folder(&folder, false)?, 0);
        assert_eq!(prepare_output_folder(&folder, true)?, 1);
        assert_eq!(count_files(&folder)?, 0);
        Ok(())
    }
}
