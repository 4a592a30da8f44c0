//! Upstream content sources.

pub mod wikipedia;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::errors::Result;

pub use wikipedia::WikipediaSource;

/// Fetches the article text for a topic. Returns `""` when the source has
/// nothing for the topic; `Err` only on transport failure.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, topic: &str, language: &str) -> Result<String>;
}

/// Sources by name. Names not registered resolve to nothing.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<DashMap<String, Arc<dyn Source>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: Arc<dyn Source>) {
        log::debug!("Registered source {}", source.name());
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
