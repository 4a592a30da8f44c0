pub mod cache_service;
pub mod hot_cache;

pub use cache_service::{CacheAble, CacheService};
pub use hot_cache::{HotCache, PopularTopics};
