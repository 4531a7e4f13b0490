//! PubMed E-utilities client.
//!
//! Stage 1 of the pipeline: page through `esearch.fcgi` to collect every
//! PMID matching a query (best-match order), then pull article details from
//! `efetch.fcgi` in batches and flatten each `PubmedArticle` into a
//! [`PubmedArticle`] row.
//!
//! A failed request or an unparsable XML batch stops further paging but
//! keeps everything collected so far; each stop is recorded in
//! [`SearchOutcome::errors`].

use crate::error::{PipelineError, Result};
use crate::table::save_csv;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// E-utilities base URL
const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// PMIDs per esearch page and per efetch batch
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// CSV column order for `pubmed.csv`
pub const PUBMED_COLUMNS: &[&str] = &[
    "PMID", "Title", "Authors", "Abstract", "DOI", "Journal", "PublicationDate", "Volume",
    "Issue", "Pages", "PublicationType", "Keywords", "PMC_ID", "MeSH_Terms", "GrantInfo",
    "Language", "ISSN",
];

/// One article flattened from efetch XML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubmedArticle {
    pub pmid: Option<String>,
    pub title: Option<String>,
    /// "Fore Last" for authors that have both names
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub doi: Option<String>,
    pub journal: Option<String>,
    pub publication_date: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publication_types: Vec<String>,
    pub keywords: Vec<String>,
    pub pmc_id: Option<String>,
    pub mesh_terms: Vec<String>,
    pub grant_ids: Vec<String>,
    pub language: Option<String>,
    pub issn: Option<String>,
}

/// On-disk form of [`PubmedArticle`]; field order matches [`PUBMED_COLUMNS`].
#[derive(Debug, Clone, Serialize)]
pub struct PubmedRow {
    pub pmid: String,
    pub title: String,
    pub authors: String,
    pub abstract_text: String,
    pub doi: String,
    pub journal: String,
    pub publication_date: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub publication_type: String,
    pub keywords: String,
    pub pmc_id: String,
    pub mesh_terms: String,
    pub grant_info: String,
    pub language: String,
    pub issn: String,
}

impl PubmedArticle {
    /// Row with PubMed's absent-value wording filled in.
    pub fn to_row(&self) -> PubmedRow {
        fn or(value: &Option<String>, sentinel: &str) -> String {
            value.clone().unwrap_or_else(|| sentinel.to_string())
        }
        fn list_or(values: &[String], sentinel: &str) -> String {
            if values.is_empty() {
                sentinel.to_string()
            } else {
                values.join(", ")
            }
        }

        PubmedRow {
            pmid: or(&self.pmid, "No PMID available"),
            title: or(&self.title, "No title available"),
            authors: self.authors.join(", "),
            abstract_text: or(&self.abstract_text, "No abstract available"),
            doi: or(&self.doi, "No DOI"),
            journal: or(&self.journal, "No journal available"),
            publication_date: or(&self.publication_date, "No publication date available"),
            volume: or(&self.volume, "No volume available"),
            issue: or(&self.issue, "No issue available"),
            pages: or(&self.pages, "No pages available"),
            publication_type: self.publication_types.join(", "),
            keywords: list_or(&self.keywords, "No keywords available"),
            pmc_id: or(&self.pmc_id, "No PMC ID"),
            mesh_terms: list_or(&self.mesh_terms, "No MeSH terms"),
            grant_info: list_or(&self.grant_ids, "No grant information"),
            language: or(&self.language, "No language information"),
            issn: or(&self.issn, "No ISSN available"),
        }
    }
}

/// Query options for a PubMed search
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// PubMed query string
    pub query: String,
    /// Publication date lower bound, `YYYY/MM/DD`
    pub start_date: Option<String>,
    /// Publication date upper bound, `YYYY/MM/DD`
    pub end_date: Option<String>,
    /// PMIDs per page / per detail batch
    pub batch_size: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            start_date: None,
            end_date: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl QueryOptions {
    /// Search term with the publication-date filter appended when both
    /// bounds are given.
    pub fn term(&self) -> String {
        match (&self.start_date, &self.end_date) {
            (Some(start), Some(end)) => {
                format!("{} AND ({}[PDAT] : {}[PDAT])", self.query.trim(), start, end)
            }
            _ => self.query.trim().to_string(),
        }
    }
}

/// Everything a search run produced.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub pmids: Vec<String>,
    pub articles: Vec<PubmedArticle>,
    /// One entry per request or batch that stopped collection early
    pub errors: Vec<String>,
}

impl SearchOutcome {
    /// Human-readable summary written to `search_stats.txt`.
    pub fn render_stats(&self, term: &str) -> String {
        let with_doi = self.articles.iter().filter(|a| a.doi.is_some()).count();
        let mut out = String::from("PubMed Search Statistics:\n");
        out.push_str(&format!("Query: {}\n", term));
        out.push_str(&format!("Total PMIDs fetched: {}\n", self.pmids.len()));
        out.push_str(&format!("Articles with details: {}\n", self.articles.len()));
        out.push_str(&format!("Articles with DOI: {}\n", with_doi));
        out.push_str(&format!("Requests stopped early: {}\n", self.errors.len()));
        for error in &self.errors {
            out.push_str(&format!("  - {}\n", error));
        }
        out
    }
}

/// PubMed E-utilities client
pub struct PubMedClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl PubMedClient {
    /// Create a new client; an NCBI API key raises the request quota.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("rustlitreview/1.0")
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: EUTILS_BASE.to_string(),
        })
    }

    /// Point the client at another E-utilities endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Collect PMIDs, then article details.
    pub async fn query(&self, options: &QueryOptions) -> SearchOutcome {
        let term = options.term();
        let batch_size = options.batch_size.max(1);
        info!(term = %term, batch_size, "Starting PubMed query");

        let mut outcome = SearchOutcome::default();
        self.collect_pmids(&term, batch_size, &mut outcome).await;
        info!(total = outcome.pmids.len(), "PMIDs collected");

        self.collect_details(batch_size, &mut outcome).await;
        info!(
            articles = outcome.articles.len(),
            errors = outcome.errors.len(),
            "PubMed query complete"
        );
        outcome
    }

    async fn collect_pmids(&self, term: &str, batch_size: usize, outcome: &mut SearchOutcome) {
        let mut retstart = 0usize;

        loop {
            let params = vec![
                ("db", "pubmed".to_string()),
                ("term", term.to_string()),
                ("retmax", batch_size.to_string()),
                ("retstart", retstart.to_string()),
                ("retmode", "xml".to_string()),
                ("sort", "relevance".to_string()),
            ];

            let page = match self.get_xml("esearch.fcgi", params).await {
                Ok(xml) => parse_esearch(&xml),
                Err(e) => {
                    warn!(retstart, error = %e, "esearch request failed");
                    outcome.errors.push(format!("esearch at {}: {}", retstart, e));
                    break;
                }
            };

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    warn!(retstart, error = %e, "esearch XML parse error");
                    outcome.errors.push(format!("esearch at {}: {}", retstart, e));
                    break;
                }
            };

            if page.ids.is_empty() {
                break;
            }

            outcome.pmids.extend(page.ids);
            retstart += batch_size;
            info!(fetched = outcome.pmids.len(), "Fetched PMIDs so far");

            if page.count.is_some_and(|count| retstart >= count) {
                break;
            }
        }
    }

    async fn collect_details(&self, batch_size: usize, outcome: &mut SearchOutcome) {
        let pmids = outcome.pmids.clone();

        for (batch_idx, batch) in pmids.chunks(batch_size).enumerate() {
            let params = vec![
                ("db", "pubmed".to_string()),
                ("id", batch.join(",")),
                ("retmode", "xml".to_string()),
            ];

            let parsed = match self.get_xml("efetch.fcgi", params).await {
                Ok(xml) => parse_efetch(&xml),
                Err(e) => Err(e),
            };

            match parsed {
                Ok(articles) => {
                    outcome.articles.extend(articles);
                    info!(
                        batch = batch_idx + 1,
                        fetched = outcome.articles.len(),
                        "Fetched article details"
                    );
                }
                Err(e) => {
                    warn!(batch = batch_idx + 1, error = %e, "efetch batch failed");
                    outcome.errors.push(format!("efetch batch {}: {}", batch_idx + 1, e));
                    break;
                }
            }
        }
    }

    async fn get_xml(&self, endpoint: &str, mut params: Vec<(&str, String)>) -> Result<String> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "Requesting E-utilities");

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                code: status.as_u16() as i32,
                message: format!("E-utilities error: {} - {}", status, error_text),
            });
        }
        Ok(response.text().await?)
    }
}

/// Write `pubmed.csv` and `search_stats.txt` into `output_dir`.
pub fn save_search_outcome(outcome: &SearchOutcome, term: &str, output_dir: &Path) -> Result<()> {
    let rows: Vec<PubmedRow> = outcome.articles.iter().map(PubmedArticle::to_row).collect();
    save_csv(&output_dir.join("pubmed.csv"), PUBMED_COLUMNS, &rows)?;
    std::fs::write(output_dir.join("search_stats.txt"), outcome.render_stats(term))?;
    Ok(())
}

/// One esearch response page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsearchPage {
    pub ids: Vec<String>,
    /// Total hits reported by the server
    pub count: Option<usize>,
}

/// Parse an esearch XML response.
pub fn parse_esearch(xml: &str) -> Result<EsearchPage> {
    let mut reader = Reader::from_str(xml);
    let mut page = EsearchPage::default();
    let mut current: Option<(&'static str, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Id" => current = Some(("Id", String::new())),
                b"Count" if page.count.is_none() => current = Some(("Count", String::new())),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some((_, text)) = current.as_mut() {
                    push_text(text, &t);
                }
            }
            Ok(Event::End(_)) => match current.take() {
                Some(("Id", text)) if !text.trim().is_empty() => page.ids.push(text.trim().to_string()),
                Some(("Count", text)) => page.count = text.trim().parse().ok(),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error(&reader, e)),
        }
    }

    Ok(page)
}

/// Elements captured as text, with the builder slot they fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pmid,
    Title,
    Abstract,
    ForeName,
    LastName,
    ElocationDoi,
    ArticleIdDoi,
    Pmc,
    Journal,
    Year,
    Month,
    Day,
    MedlineDate,
    Volume,
    Issue,
    Pages,
    PublicationType,
    Keyword,
    Mesh,
    Grant,
    Language,
    Issn,
}

struct Capture {
    slot: Slot,
    depth: usize,
    text: String,
}

#[derive(Default)]
struct ArticleBuilder {
    article: PubmedArticle,
    fore_name: Option<String>,
    last_name: Option<String>,
    elocation_doi: Option<String>,
    article_id_doi: Option<String>,
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
    medline_date: Option<String>,
}

impl ArticleBuilder {
    fn fill(&mut self, slot: Slot, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let a = &mut self.article;
        match slot {
            Slot::Pmid => set_first(&mut a.pmid, text),
            Slot::Title => set_first(&mut a.title, text.trim_end_matches('.').to_string()),
            Slot::Abstract => set_first(&mut a.abstract_text, text),
            Slot::ForeName => set_first(&mut self.fore_name, text),
            Slot::LastName => set_first(&mut self.last_name, text),
            Slot::ElocationDoi => set_first(&mut self.elocation_doi, text),
            Slot::ArticleIdDoi => set_first(&mut self.article_id_doi, text),
            Slot::Pmc => set_first(&mut a.pmc_id, text),
            Slot::Journal => set_first(&mut a.journal, text),
            Slot::Year => set_first(&mut self.year, text),
            Slot::Month => set_first(&mut self.month, text),
            Slot::Day => set_first(&mut self.day, text),
            Slot::MedlineDate => set_first(&mut self.medline_date, text),
            Slot::Volume => set_first(&mut a.volume, text),
            Slot::Issue => set_first(&mut a.issue, text),
            Slot::Pages => set_first(&mut a.pages, text),
            Slot::PublicationType => a.publication_types.push(text),
            Slot::Keyword => a.keywords.push(text),
            Slot::Mesh => a.mesh_terms.push(text),
            Slot::Grant => a.grant_ids.push(text),
            Slot::Language => set_first(&mut a.language, text),
            Slot::Issn => set_first(&mut a.issn, text),
        }
    }

    fn start_author(&mut self) {
        self.fore_name = None;
        self.last_name = None;
    }

    fn finish_author(&mut self) {
        if let (Some(fore), Some(last)) = (self.fore_name.take(), self.last_name.take()) {
            self.article.authors.push(format!("{} {}", fore, last));
        }
    }

    fn build(mut self) -> PubmedArticle {
        self.article.doi = self.elocation_doi.or(self.article_id_doi);
        self.article.publication_date = match (self.year, self.medline_date) {
            (Some(year), _) => {
                let mut date = year;
                for part in [self.month, self.day].into_iter().flatten() {
                    date.push('-');
                    date.push_str(&part);
                }
                Some(date)
            }
            (None, medline) => medline,
        };
        self.article
    }
}

/// Parse an efetch XML response into articles.
pub fn parse_efetch(xml: &str) -> Result<Vec<PubmedArticle>> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut articles = Vec::new();
    let mut builder: Option<ArticleBuilder> = None;
    let mut capture: Option<Capture> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"PubmedArticle" {
                    builder = Some(ArticleBuilder::default());
                } else if let Some(b) = builder.as_mut() {
                    if name == b"Author" {
                        b.start_author();
                    }
                    if capture.is_none() {
                        capture = classify(&name, &e, &path).map(|slot| Capture {
                            slot,
                            depth: path.len(),
                            text: String::new(),
                        });
                    }
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                if let Some(c) = capture.as_mut() {
                    push_text(&mut c.text, &t);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => {
                path.pop();
                if capture.as_ref().is_some_and(|c| c.depth == path.len()) {
                    if let (Some(c), Some(b)) = (capture.take(), builder.as_mut()) {
                        b.fill(c.slot, c.text);
                    }
                }
                match e.name().as_ref() {
                    b"Author" => {
                        if let Some(b) = builder.as_mut() {
                            b.finish_author();
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(b) = builder.take() {
                            articles.push(b.build());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error(&reader, e)),
        }
    }

    debug!(count = articles.len(), "Parsed efetch batch");
    Ok(articles)
}

/// Which slot, if any, an opening element fills.
fn classify(name: &[u8], start: &BytesStart, path: &[Vec<u8>]) -> Option<Slot> {
    const PUB_DATE: &[&[u8]] = &[b"Journal", b"JournalIssue", b"PubDate"];
    let parent_is = |expected: &[&[u8]]| path_ends_with(path, expected);

    let slot = match name {
        b"PMID" => Slot::Pmid,
        b"ArticleTitle" => Slot::Title,
        b"AbstractText" => Slot::Abstract,
        b"ForeName" if parent_is(&[b"Author".as_slice()]) => Slot::ForeName,
        b"LastName" if parent_is(&[b"Author".as_slice()]) => Slot::LastName,
        b"ELocationID" if has_attr(start, b"EIdType", b"doi") => Slot::ElocationDoi,
        b"ArticleId" if has_attr(start, b"IdType", b"doi") => Slot::ArticleIdDoi,
        b"ArticleId" if has_attr(start, b"IdType", b"pmc") => Slot::Pmc,
        b"Title" => Slot::Journal,
        b"Year" if parent_is(PUB_DATE) => Slot::Year,
        b"Month" if parent_is(PUB_DATE) => Slot::Month,
        b"Day" if parent_is(PUB_DATE) => Slot::Day,
        b"MedlineDate" if parent_is(PUB_DATE) => Slot::MedlineDate,
        b"Volume" => Slot::Volume,
        b"Issue" => Slot::Issue,
        b"MedlinePgn" => Slot::Pages,
        b"PublicationType" => Slot::PublicationType,
        b"Keyword" => Slot::Keyword,
        b"DescriptorName" if parent_is(&[b"MeshHeadingList".as_slice(), b"MeshHeading"]) => Slot::Mesh,
        b"GrantID" if parent_is(&[b"GrantList".as_slice(), b"Grant"]) => Slot::Grant,
        b"Language" => Slot::Language,
        b"ISSN" => Slot::Issn,
        _ => return None,
    };
    Some(slot)
}

/// Whether the open-element path ends with `expected`.
fn path_ends_with(path: &[Vec<u8>], expected: &[&[u8]]) -> bool {
    path.len() >= expected.len()
        && path[path.len() - expected.len()..]
            .iter()
            .zip(expected)
            .all(|(open, name)| open.as_slice() == *name)
}

fn has_attr(start: &BytesStart, key: &[u8], value: &[u8]) -> bool {
    start
        .attributes()
        .flatten()
        .any(|a| a.key.as_ref() == key && &*a.value == value)
}

fn set_first(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn push_text(buf: &mut String, text: &quick_xml::events::BytesText) {
    match text.unescape() {
        Ok(unescaped) => buf.push_str(&unescaped),
        Err(_) => buf.push_str(&String::from_utf8_lossy(text)),
    }
}

fn xml_error<E: std::fmt::Display>(reader: &Reader<&[u8]>, e: E) -> PipelineError {
    PipelineError::Xml(format!("at position {}: {}", reader.buffer_position(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EFETCH_SAMPLE: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">38000001</PMID>
    <Article PubModel="Print">
      <Journal>
        <ISSN IssnType="Electronic">1879-2448</ISSN>
        <JournalIssue CitedMedium="Internet">
          <Volume>199</Volume>
          <Issue>2</Issue>
          <PubDate><Year>2024</Year><Month>Feb</Month></PubDate>
        </JournalIssue>
        <Title>Marine pollution bulletin</Title>
      </Journal>
      <ArticleTitle>Antibiotic resistance genes on <i>microplastics</i> in &amp; around estuaries.</ArticleTitle>
      <Pagination><MedlinePgn>115-123</MedlinePgn></Pagination>
      <ELocationID EIdType="pii" ValidYN="Y">S0025-326X(24)00001-1</ELocationID>
      <ELocationID EIdType="doi" ValidYN="Y">10.1016/j.marpolbul.2024.115001</ELocationID>
      <Abstract>
        <AbstractText Label="BACKGROUND">Plastics carry <b>ARGs</b>.</AbstractText>
        <AbstractText Label="METHODS">qPCR was used.</AbstractText>
      </Abstract>
      <AuthorList CompleteYN="Y">
        <Author ValidYN="Y"><LastName>Lee</LastName><ForeName>Ann</ForeName></Author>
        <Author ValidYN="Y"><CollectiveName>ARG Consortium</CollectiveName></Author>
        <Author ValidYN="Y"><LastName>Chen</LastName><ForeName>Bo</ForeName></Author>
      </AuthorList>
      <Language>eng</Language>
      <GrantList CompleteYN="Y">
        <Grant><GrantID>R01 ES000001</GrantID><Agency>NIEHS</Agency></Grant>
        <Grant><GrantID>G-22</GrantID></Grant>
      </GrantList>
      <PublicationTypeList>
        <PublicationType UI="D016428">Journal Article</PublicationType>
        <PublicationType UI="D016454">Review</PublicationType>
      </PublicationTypeList>
    </Article>
    <MeshHeadingList>
      <MeshHeading><DescriptorName UI="D000900">Anti-Bacterial Agents</DescriptorName></MeshHeading>
      <MeshHeading><DescriptorName UI="D004784">Environmental Monitoring</DescriptorName></MeshHeading>
    </MeshHeadingList>
    <KeywordList Owner="NOTNLM">
      <Keyword MajorTopicYN="N">Microplastics</Keyword>
      <Keyword MajorTopicYN="N">ARGs</Keyword>
    </KeywordList>
  </MedlineCitation>
  <PubmedData>
    <ArticleIdList>
      <ArticleId IdType="pubmed">38000001</ArticleId>
      <ArticleId IdType="doi">10.9999/ignored-because-elocation-wins</ArticleId>
      <ArticleId IdType="pmc">PMC1234567</ArticleId>
    </ArticleIdList>
  </PubmedData>
</PubmedArticle>
<PubmedArticle>
  <MedlineCitation>
    <PMID Version="1">38000002</PMID>
    <Article>
      <Journal>
        <JournalIssue><PubDate><MedlineDate>2023 Nov-Dec</MedlineDate></PubDate></JournalIssue>
        <Title>Water research</Title>
      </Journal>
      <ArticleTitle>Sparse record</ArticleTitle>
    </Article>
  </MedlineCitation>
  <PubmedData>
    <ArticleIdList>
      <ArticleId IdType="doi">10.1016/j.watres.2023.1</ArticleId>
    </ArticleIdList>
    <ReferenceList>
      <Reference><ArticleIdList><ArticleId IdType="doi">10.0000/reference</ArticleId></ArticleIdList></Reference>
    </ReferenceList>
  </PubmedData>
</PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_efetch_full_record() -> Result<()> {
        let articles = parse_efetch(EFETCH_SAMPLE)?;
        assert_eq!(articles.len(), 2);

        let a = &articles[0];
        assert_eq!(a.pmid.as_deref(), Some("38000001"));
        assert_eq!(
            a.title.as_deref(),
            Some("Antibiotic resistance genes on microplastics in & around estuaries")
        );
        assert_eq!(a.abstract_text.as_deref(), Some("Plastics carry ARGs."));
        assert_eq!(a.authors, vec!["Ann Lee", "Bo Chen"]);
        assert_eq!(a.doi.as_deref(), Some("10.1016/j.marpolbul.2024.115001"));
        assert_eq!(a.journal.as_deref(), Some("Marine pollution bulletin"));
        assert_eq!(a.publication_date.as_deref(), Some("2024-Feb"));
        assert_eq!(a.volume.as_deref(), Some("199"));
        assert_eq!(a.issue.as_deref(), Some("2"));
        assert_eq!(a.pages.as_deref(), Some("115-123"));
        assert_eq!(a.publication_types, vec!["Journal Article", "Review"]);
        assert_eq!(a.keywords, vec!["Microplastics", "ARGs"]);
        assert_eq!(a.pmc_id.as_deref(), Some("PMC1234567"));
        assert_eq!(a.mesh_terms.len(), 2);
        assert_eq!(a.grant_ids, vec!["R01 ES000001", "G-22"]);
        assert_eq!(a.language.as_deref(), Some("eng"));
        assert_eq!(a.issn.as_deref(), Some("1879-2448"));
        Ok(())
    }

    #[test]
    fn test_parse_efetch_sparse_record() -> Result<()> {
        let articles = parse_efetch(EFETCH_SAMPLE)?;
        let b = &articles[1];
        assert_eq!(b.doi.as_deref(), Some("10.1016/j.watres.2023.1"));
        assert_eq!(b.publication_date.as_deref(), Some("2023 Nov-Dec"));
        assert!(b.authors.is_empty());

        let row = b.to_row();
        assert_eq!(row.abstract_text, "No abstract available");
        assert_eq!(row.authors, "");
        assert_eq!(row.keywords, "No keywords available");
        assert_eq!(row.mesh_terms, "No MeSH terms");
        assert_eq!(row.pmc_id, "No PMC ID");
        assert_eq!(row.grant_info, "No grant information");
        Ok(())
    }

    #[test]
    fn test_parse_efetch_malformed() {
        let result = parse_efetch("<PubmedArticleSet><PubmedArticle><PMID>1</PMID></Oops>");
        assert!(matches!(result, Err(PipelineError::Xml(_))));
    }

    #[test]
    fn test_parse_esearch() -> Result<()> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" ?>
<eSearchResult><Count>402</Count><RetMax>3</RetMax><RetStart>0</RetStart>
<IdList><Id>1</Id><Id>2</Id><Id>3</Id></IdList>
<TranslationStack><TermSet><Count>999</Count></TermSet></TranslationStack>
</eSearchResult>"#;
        let page = parse_esearch(xml)?;
        assert_eq!(page.ids, vec!["1", "2", "3"]);
        assert_eq!(page.count, Some(402));
        Ok(())
    }

    #[test]
    fn test_parse_esearch_empty_list() -> Result<()> {
        let page = parse_esearch("<eSearchResult><Count>0</Count><IdList/></eSearchResult>")?;
        assert!(page.ids.is_empty());
        assert_eq!(page.count, Some(0));
        Ok(())
    }

    #[test]
    fn test_query_term() {
        let mut options = QueryOptions {
            query: "microplastics AND antibiotic resistance ".to_string(),
            ..Default::default()
        };
        assert_eq!(options.term(), "microplastics AND antibiotic resistance");

        options.start_date = Some("2020/01/01".to_string());
        assert_eq!(options.term(), "microplastics AND antibiotic resistance");

        options.end_date = Some("2024/12/31".to_string());
        assert_eq!(
            options.term(),
            "microplastics AND antibiotic resistance AND (2020/01/01[PDAT] : 2024/12/31[PDAT])"
        );
    }

    #[test]
    fn test_render_stats() {
        let outcome = SearchOutcome {
            pmids: vec!["1".to_string(), "2".to_string()],
            articles: vec![PubmedArticle {
                doi: Some("10.1/a".to_string()),
                ..Default::default()
            }],
            errors: vec!["efetch batch 2: API error".to_string()],
        };
        let stats = outcome.render_stats("q");
        assert!(stats.contains("Total PMIDs fetched: 2"));
        assert!(stats.contains("Articles with DOI: 1"));
        assert!(stats.contains("Requests stopped early: 1"));
    }
}
