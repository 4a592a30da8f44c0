use chrono::{DateTime, Utc};
use log::{error, info, warn};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cacheable::HotCache;
use crate::common::model::ResultSnapshot;
use crate::common::model::config::CrawlerConfig;
use crate::errors::{Error, Result};
use crate::store::DataStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub topics: Vec<String>,
    pub refreshed: usize,
}

/// Periodically ranks today's topics and refreshes their cache entries.
#[derive(Clone)]
pub struct CacheSyncLoop {
    store: Arc<dyn DataStore>,
    cache: HotCache,
    interval: Duration,
    limit: usize,
    call_timeout: Duration,
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

impl CacheSyncLoop {
    pub fn new(store: Arc<dyn DataStore>, cache: HotCache, config: &CrawlerConfig) -> Self {
        Self {
            store,
            cache,
            interval: config.sync_interval(),
            limit: config.popular_limit,
            call_timeout: config.call_timeout(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn sync_once(&self) -> Result<SyncReport> {
        let since = start_of_day(Utc::now());
        let topics =
            tokio::time::timeout(self.call_timeout, self.store.popular_topics(self.limit, since)).await??;

        let published = tokio::time::timeout(self.call_timeout, self.cache.put_popular_topics(&topics))
            .await
            .map_err(Error::from)
            .and_then(|r| r);
        if let Err(e) = published {
            warn!("Failed to publish popular topics: {}", e);
        }

        let mut refreshed = 0;
        for topic in &topics {
            match self.refresh(topic).await {
                Ok(true) => refreshed += 1,
                Ok(false) => warn!("No stored result for popular topic {}", topic),
                Err(e) => warn!("Failed to refresh cache for {}: {}", topic, e),
            }
        }
        counter!("cache_sync_topics_total").increment(refreshed as u64);
        info!("Cache sync refreshed {}/{} popular topics", refreshed, topics.len());
        Ok(SyncReport { topics, refreshed })
    }

    async fn refresh(&self, topic: &str) -> Result<bool> {
        let latest = tokio::time::timeout(self.call_timeout, self.store.latest_result_for_topic(topic)).await??;
        let Some(result) = latest else {
            return Ok(false);
        };
        tokio::time::timeout(self.call_timeout, self.cache.put(&ResultSnapshot::from(&result))).await??;
        Ok(true)
    }

    /// Runs `sync_once` immediately and then every interval until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Cache sync loop started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Cache sync loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        error!("Cache sync failed: {}", e);
                    }
                }
            }
        }
    }
}
