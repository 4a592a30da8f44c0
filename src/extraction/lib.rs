//! Topic extraction from free-form user input.

pub mod gemini;

use async_trait::async_trait;
use log::warn;
use std::time::Duration;

use crate::errors::Result;

pub use gemini::GeminiExtractor;

#[async_trait]
pub trait TopicExtractor: Send + Sync {
    async fn extract(&self, raw: &str, language: &str) -> Result<Vec<String>>;
}

/// Runs `extractor` under `timeout`; any failure or an empty list degrades to
/// the raw input as the only topic.
pub async fn extract_topics_or_fallback(
    extractor: &dyn TopicExtractor,
    raw: &str,
    language: &str,
    timeout: Duration,
) -> Vec<String> {
    let fallback = || vec![raw.trim().to_string()];
    match tokio::time::timeout(timeout, extractor.extract(raw, language)).await {
        Ok(Ok(topics)) => {
            let topics: Vec<String> = topics
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if topics.is_empty() {
                warn!("Extractor returned no topics, using raw input");
                fallback()
            } else {
                topics
            }
        }
        Ok(Err(e)) => {
            warn!("Topic extraction failed, using raw input: {}", e);
            fallback()
        }
        Err(_) => {
            warn!("Topic extraction timed out after {:?}, using raw input", timeout);
            fallback()
        }
    }
}
