use async_trait::async_trait;
use log::{debug, warn};
use metrics::{counter, histogram};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::Source;
use crate::errors::{Result, SourceError};

const USER_AGENT: &str = concat!("topicrawl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: Option<QueryPages>,
}

#[derive(Debug, Deserialize)]
struct QueryPages {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    extract: Option<String>,
}

/// MediaWiki `prop=extracts` client. `{lang}` in the endpoint is replaced with
/// the requested language.
#[derive(Clone)]
pub struct WikipediaSource {
    client: Client,
    endpoint: String,
}

impl WikipediaSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.into()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url_for(&self, language: &str) -> String {
        let lang: String = language
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        let lang = if lang.is_empty() { "en".to_string() } else { lang };
        self.endpoint.replace("{lang}", &lang)
    }
}

#[async_trait]
impl Source for WikipediaSource {
    fn name(&self) -> &str {
        "wikipedia"
    }

    async fn fetch(&self, topic: &str, language: &str) -> Result<String> {
        let start = std::time::Instant::now();
        let response = self
            .client
            .get(self.url_for(language))
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", topic),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Transport(e.into())
                }
            })?;

        let status = response.status();
        histogram!("source_request_duration_seconds", "source" => "wikipedia").record(start.elapsed().as_secs_f64());
        counter!("source_requests_total", "source" => "wikipedia", "status_code" => status.as_u16().to_string())
            .increment(1);

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(String::new());
        }
        if !status.is_success() {
            return Err(SourceError::Transport(format!("wikipedia returned {status}").into()).into());
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.into()))?;

        let text = body
            .query
            .and_then(|q| q.pages.into_iter().next())
            .filter(|page| !page.missing && !page.invalid)
            .and_then(|page| page.extract)
            .unwrap_or_default();

        if text.trim().is_empty() {
            warn!("Wikipedia page not found for topic: {}", topic);
            return Ok(String::new());
        }
        debug!("Fetched {} bytes from wikipedia for {}", text.len(), topic);
        Ok(text)
    }
}
