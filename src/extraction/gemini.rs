use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::TopicExtractor;
use crate::common::model::config::ExtractionConfig;
use crate::errors::{ExtractionError, Result};

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    topics: Vec<String>,
}

fn prompt(raw: &str, language: &str) -> String {
    match language {
        "vi" => format!(
            "Phân tích nội dung sau và trích xuất tất cả các chủ đề chính (topics) một cách ngắn gọn, \
             chỉ bao gồm bản chất của chủ đề, loại bỏ các chi tiết như \"video\", \"bài viết\", \"cho tôi\", v.v.:\n\
             \"{raw}\"\n\
             Kết quả trả về theo định dạng JSON:\n\
             {{\"topics\": [\"chủ đề 1\", \"chủ đề 2\", ...]}}"
        ),
        _ => format!(
            "Analyze the following content and extract all main topics concisely, focusing only on the \
             essence of the topics, removing details like \"video\", \"article\", \"give me\", etc.:\n\
             \"{raw}\"\n\
             Return the result in JSON format:\n\
             {{\"topics\": [\"topic 1\", \"topic 2\", ...]}}"
        ),
    }
}

/// Gemini `generateContent` client in JSON response mode.
#[derive(Clone)]
pub struct GeminiExtractor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiExtractor {
    pub fn new(config: &ExtractionConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Transport(e.into()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl TopicExtractor for GeminiExtractor {
    async fn extract(&self, raw: &str, language: &str) -> Result<Vec<String>> {
        let api_key = self.api_key.as_deref().ok_or(ExtractionError::MissingCredentials)?;
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{"parts": [{"text": prompt(raw, language)}]}],
            "generationConfig": {"responseMimeType": "application/json"}
        });

        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.into()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Transport(format!("gemini returned {status}").into()).into());
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.into()))?;
        let text = reply
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<String>();
        let parsed: TopicList =
            serde_json::from_str(text.trim()).map_err(|e| ExtractionError::InvalidResponse(e.into()))?;
        if parsed.topics.is_empty() {
            return Err(ExtractionError::Empty.into());
        }
        debug!("Extracted {} topics from input", parsed.topics.len());
        Ok(parsed.topics)
    }
}
