pub mod config;
pub mod message;
pub mod result;
pub mod task;

pub use config::Config;
pub use message::{CrawlRequest, JobCreated, JobData, JobMessage, JobStatus, ResultView};
pub use result::{CrawlResult, NewResult, ResultSnapshot};
pub use task::{PipelineMetadata, SCHEMA_VERSION, Task, TaskStatus};
