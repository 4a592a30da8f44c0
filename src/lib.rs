//! topicrawl: topic crawl pipeline.
//!
//! Requests are turned into topics, persisted as tasks and queued; workers
//! resolve every (topic, source) pair by racing the hot cache, the durable
//! store and the upstream source, and record what they find.

pub mod prelude;

#[path = "cacheable/lib.rs"]
pub mod cacheable;
#[path = "common/lib.rs"]
pub mod common;
#[path = "engine/lib.rs"]
pub mod engine;
#[path = "errors/lib.rs"]
pub mod errors;
#[path = "extraction/lib.rs"]
pub mod extraction;
#[path = "queue/lib.rs"]
pub mod queue;
#[path = "source/lib.rs"]
pub mod source;
#[path = "store/lib.rs"]
pub mod store;
#[path = "utils/lib.rs"]
pub mod utils;
