//! # rustlitreview
//!
//! Literature Review 4-Stage Data Pipeline
//!
//! ## Modules
//!
//! - [`pubmed`] - PubMed E-utilities search and XML parsing
//! - [`normalize`] - Mapping database exports onto one record layout
//! - [`dedupe`] - DOI and fingerprint duplicate detection
//! - [`compile`] - Multi-database compilation stage
//! - [`fetch_pool`] - Bounded concurrent fetching with retry
//! - [`crossref`] - Crossref BibTeX client
//! - [`bibtex`] - Citation collection stage
//! - [`tagging`] - LLM tag extraction
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustlitreview::{bibtex, crossref::CrossrefClient};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = bibtex::CitationStageConfig::in_dir(
//!         Path::new("output/unique_articles.csv"),
//!         Path::new("output"),
//!     );
//!     let summary = bibtex::run_citation_stage(&CrossrefClient::default(), &config).await?;
//!     println!("Saved {} BibTeX records", summary.successes);
//!     Ok(())
//! }
//! ```

pub mod bibtex;
pub mod compile;
pub mod crossref;
pub mod dedupe;
pub mod error;
pub mod fetch_pool;
pub mod normalize;
pub mod prompts;
pub mod pubmed;
pub mod record;
pub mod table;
pub mod tagging;

pub use error::{PipelineError, Result};
