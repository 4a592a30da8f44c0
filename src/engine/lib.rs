//! Job processing: the resolver race, the worker state machine, the cache
//! sync loop and the submission service, wired together by [`Runtime`].

pub mod cache_sync;
pub mod resolver;
pub mod runtime;
pub mod service;
pub mod worker;

pub use cache_sync::{CacheSyncLoop, SyncReport};
pub use resolver::{Resolution, Resolver, ResolverConfig, Tier};
pub use runtime::Runtime;
pub use service::CrawlService;
pub use worker::Worker;
