//! LLM-based tag extraction for articles.
//!
//! Each article's title and abstract go to an OpenAI-compatible chat model,
//! which is asked for four tags as strict JSON. Replies that are not JSON
//! fall back to keyword matching over the raw text; a failed call yields an
//! all-sentinel row and the batch continues.

use crate::error::{OptionExt, PipelineError, Result};
use crate::prompts::tag_extraction::{build_user_prompt, SYSTEM_PROMPT};
use crate::table::{save_csv, ReadOptions, Table};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Articles tagged per run unless overridden
pub const DEFAULT_LIMIT: usize = 100;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// CSV column order for `tagged_articles.csv`
pub const TAG_COLUMNS: &[&str] = &[
    "title",
    "abstract",
    "plastics_found",
    "paper_type",
    "source_type",
    "method_ar_detection",
];

/// Source types searched by the keyword fallback, in priority order.
const SOURCE_KEYWORDS: [&str; 9] = [
    "River", "Estuary", "Lake", "Bay", "Reservoir", "Mangrove", "WWTP", "Ocean", "Marine",
];

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Requests in flight at once; 1 tags sequentially
    pub concurrency: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            concurrency: 1,
        }
    }
}

/// Token usage tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// One `timestamp,prompt,completion,total` line for `token_usage.log`.
    pub fn log_line(&self) -> String {
        format!(
            "{},{},{},{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens
        )
    }
}

/// Accumulated token usage with atomic counters
struct AtomicTokenUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
}

impl AtomicTokenUsage {
    fn new() -> Self {
        Self {
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }

    fn add(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    fn get(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

/// A model reply and what it cost.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// A chat model that answers one system + user prompt pair.
pub trait TextModel {
    fn complete(&self, system: &str, user: &str) -> impl Future<Output = Result<Completion>> + Send;
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// Chat completions over HTTP.
pub struct OpenAiChat {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiChat {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

impl TextModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0
        });

        let api_url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(PipelineError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                code: status.as_u16() as i32,
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_parse("LLM response has no message content")?;

        Ok(Completion { content, usage })
    }
}

/// Title and abstract of one input row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleText {
    pub title: String,
    pub abstract_text: String,
}

/// First `limit` rows of `table`; fails if `Title` or `Abstract` is missing.
pub fn read_articles(table: &Table, limit: usize) -> Result<Vec<ArticleText>> {
    let title_idx = table.column_index("Title")?;
    let abstract_idx = table.column_index("Abstract")?;

    Ok(table
        .rows
        .iter()
        .take(limit)
        .map(|row| ArticleText {
            title: row.get(title_idx).map(|s| s.trim().to_string()).unwrap_or_default(),
            abstract_text: row.get(abstract_idx).map(|s| s.trim().to_string()).unwrap_or_default(),
        })
        .collect())
}

/// Extracted tags; `None` is written as the column's sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub plastics_found: Option<String>,
    pub paper_type: Option<String>,
    pub source_type: Option<String>,
    pub method_ar_detection: Option<String>,
}

/// How a row's tags were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Json,
    Fallback,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TagResult {
    pub article: ArticleText,
    pub tags: Tags,
    pub mode: ParseMode,
}

/// On-disk form of a [`TagResult`]
#[derive(Debug, Clone, Serialize)]
pub struct TagRow {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub plastics_found: String,
    pub paper_type: String,
    pub source_type: String,
    pub method_ar_detection: String,
}

impl TagResult {
    pub fn to_row(&self) -> TagRow {
        TagRow {
            title: self.article.title.clone(),
            abstract_text: self.article.abstract_text.clone(),
            plastics_found: self.tags.plastics_found.clone().unwrap_or_else(|| "None".to_string()),
            paper_type: self.tags.paper_type.clone().unwrap_or_else(|| "Unknown".to_string()),
            source_type: self.tags.source_type.clone().unwrap_or_else(|| "Unknown".to_string()),
            method_ar_detection: self.tags.method_ar_detection.clone().unwrap_or_default(),
        }
    }
}

/// Per-mode row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagStats {
    pub json: usize,
    pub fallback: usize,
    pub failed: usize,
}

impl TagStats {
    pub fn total(&self) -> usize {
        self.json + self.fallback + self.failed
    }

    /// Text written to `extraction_stats.txt`.
    pub fn render(&self, usage: &TokenUsage) -> String {
        format!(
            "Tag Extraction Statistics:\n\
             Articles processed: {}\n\
             Parsed as JSON: {}\n\
             Keyword fallback: {}\n\
             Model call failed: {}\n\
             Tokens used: {} prompt + {} completion = {} total\n",
            self.total(),
            self.json,
            self.fallback,
            self.failed,
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens
        )
    }
}

/// Tag every article, keeping input order in the output.
///
/// At most `concurrency` model calls are in flight; results are yielded in
/// input order regardless of completion order.
pub async fn tag_articles<M: TextModel + Sync>(
    model: &M,
    articles: &[ArticleText],
    concurrency: usize,
) -> (Vec<TagResult>, TokenUsage, TagStats) {
    if articles.is_empty() {
        return (Vec::new(), TokenUsage::default(), TagStats::default());
    }

    info!(count = articles.len(), concurrency, "Starting tag extraction");

    let token_usage = AtomicTokenUsage::new();
    let usage_ref = &token_usage;

    let results: Vec<TagResult> = stream::iter(articles.iter().enumerate())
        .map(|(idx, article)| async move {
            let user_prompt = build_user_prompt(&article.title, &article.abstract_text);
            debug!(idx, "Sending LLM request");

            match model.complete(SYSTEM_PROMPT, &user_prompt).await {
                Ok(completion) => {
                    usage_ref.add(&completion.usage);
                    let (tags, mode) = parse_reply(&completion.content);
                    debug!(idx, mode = ?mode, "Article tagged");
                    TagResult {
                        article: article.clone(),
                        tags,
                        mode,
                    }
                }
                Err(e) => {
                    warn!(
                        idx,
                        title = %article.title.chars().take(50).collect::<String>(),
                        error = %e,
                        "Failed to tag article"
                    );
                    TagResult {
                        article: article.clone(),
                        tags: Tags::default(),
                        mode: ParseMode::Failed,
                    }
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut stats = TagStats::default();
    for result in &results {
        match result.mode {
            ParseMode::Json => stats.json += 1,
            ParseMode::Fallback => stats.fallback += 1,
            ParseMode::Failed => stats.failed += 1,
        }
    }

    let final_usage = token_usage.get();
    info!(
        json = stats.json,
        fallback = stats.fallback,
        failed = stats.failed,
        total_tokens = final_usage.total_tokens,
        "Tag extraction complete"
    );

    (results, final_usage, stats)
}

/// Tag the first `limit` rows of `input` and write `tagged_articles.csv`,
/// `extraction_stats.txt` and `token_usage.log` into `output_dir`.
pub async fn run_tagging_stage<M: TextModel + Sync>(
    model: &M,
    input: &Path,
    output_dir: &Path,
    limit: usize,
    concurrency: usize,
) -> Result<(TagStats, TokenUsage)> {
    let table = Table::read(input, "articles", &ReadOptions::default())?;
    let articles = read_articles(&table, limit)?;

    let (results, usage, stats) = tag_articles(model, &articles, concurrency).await;

    std::fs::create_dir_all(output_dir)?;
    let rows: Vec<TagRow> = results.iter().map(TagResult::to_row).collect();
    save_csv(&output_dir.join("tagged_articles.csv"), TAG_COLUMNS, &rows)?;
    std::fs::write(output_dir.join("extraction_stats.txt"), stats.render(&usage))?;
    std::fs::write(output_dir.join("token_usage.log"), usage.log_line())?;

    Ok((stats, usage))
}

/// Parse a model reply: strict JSON first, keyword fallback otherwise.
pub fn parse_reply(content: &str) -> (Tags, ParseMode) {
    let json_str = extract_json(content);

    match serde_json::from_str::<Value>(&json_str) {
        Ok(Value::Object(map)) => {
            let field = |key: &str| map.get(key).and_then(value_to_text);
            let tags = Tags {
                plastics_found: field("plastics_found"),
                paper_type: field("paper_type"),
                source_type: field("source_type"),
                method_ar_detection: field("method_ar_detection"),
            };
            (tags, ParseMode::Json)
        }
        Ok(_) => (fallback_tags(content), ParseMode::Fallback),
        Err(e) => {
            let preview: String = content.chars().take(200).collect();
            info!(
                error = %e,
                content_preview = %preview,
                "LLM output is not JSON - using keyword fallback"
            );
            (fallback_tags(content), ParseMode::Fallback)
        }
    }
}

/// Keyword tags read from free text.
pub fn fallback_tags(content: &str) -> Tags {
    let paper_type = if content.contains("Review") {
        Some("Review Paper".to_string())
    } else if content.contains("Primary") {
        Some("Primary Study".to_string())
    } else {
        None
    };

    let lowered = content.to_lowercase();
    let source_type = SOURCE_KEYWORDS
        .iter()
        .find(|keyword| lowered.contains(&keyword.to_lowercase()))
        .map(|keyword| keyword.to_string());

    Tags {
        plastics_found: None,
        paper_type,
        source_type,
        method_ar_detection: None,
    }
}

/// Flatten a JSON value to cell text; arrays are joined with ", ".
fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract JSON from LLM response (handles markdown code blocks)
fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    // Fenced block: keep the body up to the closing fence, drop anything after it.
    if trimmed.starts_with("```") {
        let body: Vec<&str> = trimmed
            .lines()
            .skip(1)
            .take_while(|line| !line.trim_start().starts_with("```"))
            .collect();
        let body = body.join("\n");
        if !body.trim().is_empty() {
            return body;
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if start < end {
                return trimmed[start..=end].to_string();
            }
        }
    }

    trimmed.to_string()
}
