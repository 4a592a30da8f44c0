use log::{debug, info, warn};
use metrics::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cacheable::HotCache;
use crate::common::model::config::CrawlerConfig;
use crate::common::model::{NewResult, ResultSnapshot};
use crate::errors::{Error, ResolverError, Result, SourceError};
use crate::source::{Source, SourceRegistry};
use crate::store::DataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Cache,
    Store,
    Source,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Cache => "cache",
            Tier::Store => "store",
            Tier::Source => "source",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one resolve call. Empty `content` means nothing was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub content: String,
    pub tier: Option<Tier>,
    pub result_id: Option<Uuid>,
}

impl Resolution {
    fn empty(tier: Option<Tier>) -> Self {
        Self {
            content: String::new(),
            tier,
            result_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    pub call_timeout: Duration,
    pub deadline_grace: Duration,
    pub reissue_interval: Duration,
}

impl ResolverConfig {
    pub fn deadline(&self) -> Duration {
        self.call_timeout + self.deadline_grace
    }
}

impl From<&CrawlerConfig> for ResolverConfig {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            deadline_grace: Duration::from_millis(config.deadline_grace_ms),
            reissue_interval: Duration::from_millis(config.reissue_interval_ms.max(1)),
        }
    }
}

/// What a single lookup produced: content with the result it came from.
type Found = Option<(String, Option<Uuid>)>;

struct Lookup {
    tier: Tier,
    outcome: Result<Found>,
}

/// Races the hot cache, the durable store and the source for one
/// (topic, language, source) and keeps the first acceptable answer.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn DataStore>,
    cache: HotCache,
    sources: SourceRegistry,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(store: Arc<dyn DataStore>, cache: HotCache, sources: SourceRegistry, config: ResolverConfig) -> Self {
        Self {
            store,
            cache,
            sources,
            config,
        }
    }

    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    pub async fn resolve(&self, task_id: Uuid, topic: &str, language: &str, source_name: &str) -> Result<Resolution> {
        let Some(source) = self.sources.get(source_name) else {
            debug!("Source {} not registered, nothing to fetch for {}", source_name, topic);
            return Ok(Resolution::empty(None));
        };

        let start = std::time::Instant::now();
        let resolution = self.race(source, topic, language, source_name).await;
        histogram!("resolver_duration_seconds", "source" => source_name.to_string())
            .record(start.elapsed().as_secs_f64());

        let (tier, content, result_id) = match resolution? {
            Resolution {
                tier: Some(Tier::Source),
                content,
                ..
            } if !content.is_empty() => {
                let stored = self.persist(task_id, topic, language, source_name, content).await?;
                (Tier::Source, stored.0, Some(stored.1))
            }
            Resolution {
                tier: Some(tier),
                content,
                result_id,
            } if !content.is_empty() => (tier, content, result_id),
            empty => {
                counter!("resolver_tier_wins_total", "tier" => "none").increment(1);
                return Ok(empty);
            }
        };

        counter!("resolver_tier_wins_total", "tier" => tier.as_str()).increment(1);
        info!("Resolved {} ({}, {}) from {}", topic, language, source_name, tier);
        Ok(Resolution {
            content,
            tier: Some(tier),
            result_id,
        })
    }

    async fn race(&self, source: Arc<dyn Source>, topic: &str, language: &str, source_name: &str) -> Result<Resolution> {
        let deadline = Instant::now() + self.config.deadline();
        let mut lookups: JoinSet<Lookup> = JoinSet::new();
        self.spawn_lookup(&mut lookups, Tier::Cache, Duration::ZERO, topic, language, source_name);
        self.spawn_lookup(&mut lookups, Tier::Store, Duration::ZERO, topic, language, source_name);
        {
            let timeout = self.config.call_timeout;
            let topic = topic.to_string();
            let language = language.to_string();
            lookups.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, source.fetch(&topic, &language)).await {
                    Ok(Ok(text)) => Ok(Some((text, None))),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SourceError::Timeout.into()),
                };
                Lookup {
                    tier: Tier::Source,
                    outcome,
                }
            });
        }

        let mut source_error: Option<Error> = None;
        loop {
            let joined = match tokio::time::timeout_at(deadline, lookups.join_next()).await {
                Err(_) => {
                    lookups.abort_all();
                    warn!("Resolve of {} ({}) hit the deadline", topic, source_name);
                    return Err(ResolverError::DeadlineExceeded.into());
                }
                Ok(None) => break,
                Ok(Some(Err(join_err))) => {
                    if !join_err.is_cancelled() {
                        warn!("Lookup for {} panicked: {}", topic, join_err);
                    }
                    continue;
                }
                Ok(Some(Ok(lookup))) => lookup,
            };

            match (joined.tier, joined.outcome) {
                (tier, Ok(Some((content, result_id)))) if !content.is_empty() => {
                    lookups.abort_all();
                    return Ok(Resolution {
                        content,
                        tier: Some(tier),
                        result_id,
                    });
                }
                (Tier::Source, Ok(_)) => {
                    lookups.abort_all();
                    debug!("Source {} has nothing for {}", source_name, topic);
                    return Ok(Resolution::empty(Some(Tier::Source)));
                }
                (Tier::Source, Err(e)) => {
                    warn!("Source {} failed for {}: {}", source_name, topic, e);
                    source_error = Some(e);
                }
                (tier, outcome) => {
                    if let Err(e) = outcome {
                        debug!("{} lookup for {} failed: {}", tier, topic, e);
                    }
                    // Only worth asking again while the source is still running.
                    let retry_at = Instant::now() + self.config.reissue_interval;
                    if source_error.is_none() && retry_at < deadline {
                        self.spawn_lookup(&mut lookups, tier, self.config.reissue_interval, topic, language, source_name);
                    }
                }
            }
        }

        Err(source_error.unwrap_or_else(|| ResolverError::Join("all lookups ended without an answer".into()).into()))
    }

    fn spawn_lookup(
        &self,
        lookups: &mut JoinSet<Lookup>,
        tier: Tier,
        delay: Duration,
        topic: &str,
        language: &str,
        source_name: &str,
    ) {
        let timeout = self.config.call_timeout;
        let topic = topic.to_string();
        let language = language.to_string();
        let source_name = source_name.to_string();
        match tier {
            Tier::Cache => {
                let cache = self.cache.clone();
                lookups.spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let outcome = tokio::time::timeout(timeout, cache.get(&topic, &language))
                        .await
                        .map_err(Error::from)
                        .and_then(|r| r)
                        .map(|snapshot| {
                            snapshot
                                .filter(|s| s.source == source_name)
                                .map(|s| (s.text, Some(s.result_id)))
                        });
                    Lookup { tier, outcome }
                });
            }
            Tier::Store => {
                let store = self.store.clone();
                lookups.spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let outcome = tokio::time::timeout(timeout, store.latest_result(&topic, &language, &source_name))
                        .await
                        .map_err(Error::from)
                        .and_then(|r| r)
                        .map(|result| result.map(|r| (r.text, Some(r.id))));
                    Lookup { tier, outcome }
                });
            }
            Tier::Source => {}
        }
    }

    /// Stores a fresh source answer and warms the cache with it.
    async fn persist(
        &self,
        task_id: Uuid,
        topic: &str,
        language: &str,
        source_name: &str,
        content: String,
    ) -> Result<(String, Uuid)> {
        let new_result = NewResult {
            task_id,
            topic: topic.to_string(),
            source: source_name.to_string(),
            language: language.to_string(),
            text: content,
        };
        let stored = tokio::time::timeout(self.config.call_timeout, self.store.insert_result_if_absent(new_result)).await??;

        let snapshot = ResultSnapshot::from(&stored);
        match tokio::time::timeout(self.config.call_timeout, self.cache.put(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to warm cache for {}: {}", topic, e),
            Err(_) => warn!("Warming cache for {} timed out", topic),
        }
        Ok((stored.text, stored.id))
    }
}
