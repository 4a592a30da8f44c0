// Models
pub use crate::common::model::{
    Config, CrawlRequest, CrawlResult, JobCreated, JobMessage, JobStatus, PipelineMetadata, ResultView, Task,
    TaskStatus,
};

// Errors
pub use crate::errors::{BoxError, Error, ErrorKind, Result};

// Collaborator traits
pub use crate::extraction::TopicExtractor;
pub use crate::queue::{JobHandler, MqBackend};
pub use crate::source::Source;
pub use crate::store::DataStore;

// Engine
pub use crate::engine::{CacheSyncLoop, CrawlService, Resolver, Runtime, Worker};
