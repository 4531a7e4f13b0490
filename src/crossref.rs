//! Crossref API client for citation records.
//!
//! Fetches BibTeX for a DOI through Crossref's content negotiation
//! transform endpoint. One call is one attempt; retrying and concurrency are
//! handled by [`crate::fetch_pool`].

use crate::error::{PipelineError, Result};
use crate::fetch_pool::{AttemptError, Fetcher};
use std::time::Duration;
use tracing::debug;

/// Crossref API base URL
const CROSSREF_API_URL: &str = "https://api.crossref.org/works";

/// Polite pool email for Crossref API
const MAILTO: &str = "litreview-rust@example.com";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Crossref BibTeX client
pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
}

impl CrossrefClient {
    /// Create a new CrossrefClient
    ///
    /// # Arguments
    ///
    /// * `timeout` - Per-request timeout; expiry counts as a transient failure
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("litreview-rust/1.0 (mailto:{})", MAILTO))
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: CROSSREF_API_URL.to_string(),
        })
    }

    /// Point the client at another works endpoint (mirrors, tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// URL of the BibTeX transform for `doi`.
    pub fn bibtex_url(&self, doi: &str) -> String {
        format!("{}/{}/transform/application/x-bibtex", self.base_url, doi.trim())
    }

    /// Fetch the BibTeX entry for one DOI (single attempt).
    pub async fn fetch_bibtex(&self, doi: &str) -> std::result::Result<String, AttemptError> {
        let url = self.bibtex_url(doi);
        debug!(doi, url = %url, "Requesting BibTeX");

        let response = self.client.get(&url).send().await.map_err(classify_error)?;
        let status = response.status();

        if !status.is_success() {
            return Err(AttemptError::Definitive(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().await.map_err(classify_error)?;
        if body.trim().is_empty() {
            return Err(AttemptError::Definitive("empty BibTeX body".to_string()));
        }
        Ok(body)
    }
}

impl Fetcher for CrossrefClient {
    async fn fetch(&self, identifier: &str) -> std::result::Result<String, AttemptError> {
        self.fetch_bibtex(identifier).await
    }
}

impl Default for CrossrefClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS)).unwrap_or_else(|_| Self {
            client: reqwest::Client::new(),
            base_url: CROSSREF_API_URL.to_string(),
        })
    }
}

/// Timeouts and connection failures are retried; everything else is final.
fn classify_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() || e.is_connect() {
        AttemptError::Transient(e.to_string())
    } else {
        AttemptError::Definitive(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one connection with a fixed raw HTTP response.
    async fn serve_once(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        addr
    }

    fn client_for(addr: SocketAddr, timeout: Duration) -> CrossrefClient {
        CrossrefClient::new(timeout)
            .expect("client")
            .with_base_url(&format!("http://{}/works", addr))
    }

    #[tokio::test]
    async fn test_http_error_status_is_definitive() {
        let addr = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let client = client_for(addr, Duration::from_secs(5));

        let result = client.fetch_bibtex("10.1/missing").await;
        assert_eq!(result, Err(AttemptError::Definitive("HTTP 404".to_string())));
    }

    #[tokio::test]
    async fn test_empty_body_is_definitive() {
        let addr = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n \n").await;
        let client = client_for(addr, Duration::from_secs(5));

        let result = client.fetch_bibtex("10.1/empty").await;
        assert!(matches!(result, Err(AttemptError::Definitive(_))));
    }

    #[tokio::test]
    async fn test_bibtex_body_is_returned() {
        let addr = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 18\r\nConnection: close\r\n\r\n@article{a, x={1}}",
        )
        .await;
        let client = client_for(addr, Duration::from_secs(5));

        let body = client.fetch("10.1/a").await.expect("bibtex body");
        assert_eq!(body, "@article{a, x={1}}");
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out_as_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });
        let client = client_for(addr, Duration::from_millis(200));

        let result = client.fetch_bibtex("10.1/slow").await;
        assert!(matches!(result, Err(AttemptError::Transient(_))), "got {:?}", result);
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        let client = client_for(addr, Duration::from_secs(2));

        let result = client.fetch_bibtex("10.1/down").await;
        assert!(matches!(result, Err(AttemptError::Transient(_))), "got {:?}", result);
    }

    #[test]
    fn test_bibtex_url() {
        let client = CrossrefClient::default();
        assert_eq!(
            client.bibtex_url("10.1016/j.watres.2020.115 "),
            "https://api.crossref.org/works/10.1016/j.watres.2020.115/transform/application/x-bibtex"
        );
    }

    #[test]
    fn test_with_base_url() {
        let client = CrossrefClient::default().with_base_url("http://127.0.0.1:9/works/");
        assert_eq!(
            client.bibtex_url("10.1/a"),
            "http://127.0.0.1:9/works/10.1/a/transform/application/x-bibtex"
        );
    }
}
