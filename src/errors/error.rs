use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error detail carried as the source of an [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Queue,
    Orm,
    Cache,
    Source,
    Extraction,
    Task,
    Service,
    Config,
    Resolver,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Orm => write!(f, "orm"),
            ErrorKind::Cache => write!(f, "cache"),
            ErrorKind::Source => write!(f, "source"),
            ErrorKind::Extraction => write!(f, "extraction"),
            ErrorKind::Task => write!(f, "task"),
            ErrorKind::Service => write!(f, "service"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Resolver => write!(f, "resolver"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: impl Into<String>, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message.into()),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    fn source_as<T: StdError + 'static>(&self) -> Option<&T> {
        self.inner.source.as_ref().and_then(|s| s.downcast_ref::<T>())
    }

    pub fn is_queue(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Queue)
    }

    pub fn is_orm(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Orm)
    }

    pub fn is_cache(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Cache)
    }

    pub fn is_source(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Source)
    }

    pub fn is_task(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Task)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.source_as::<TaskError>(), Some(TaskError::TaskNotFound(_)))
            || matches!(self.source_as::<OrmError>(), Some(OrmError::NotFound))
    }

    pub fn is_timeout(&self) -> bool {
        if matches!(self.source_as::<ServiceError>(), Some(ServiceError::Timeout(_)))
            || matches!(self.source_as::<SourceError>(), Some(SourceError::Timeout))
            || matches!(self.source_as::<ResolverError>(), Some(ResolverError::DeadlineExceeded))
        {
            return true;
        }
        if let Some(source) = &self.inner.source {
            source.to_string().to_lowercase().contains("timeout")
        } else {
            false
        }
    }

    /// Transport-class failures: the operation may succeed if redelivered.
    pub fn is_retryable(&self) -> bool {
        // Task errors are verdicts on the job itself, whatever caused them.
        if matches!(self.inner.kind, ErrorKind::Task) {
            return false;
        }
        if self.is_timeout() {
            return true;
        }
        match self.inner.kind {
            ErrorKind::Queue => matches!(
                self.source_as::<QueueError>(),
                Some(
                    QueueError::ConnectionFailed
                        | QueueError::PushFailed(_)
                        | QueueError::PopFailed(_)
                        | QueueError::OperationFailed(_)
                )
            ),
            ErrorKind::Orm => matches!(
                self.source_as::<OrmError>(),
                Some(
                    OrmError::ConnectionError(_)
                        | OrmError::QueryExecutionError(_)
                        | OrmError::TransactionError(_)
                )
            ),
            ErrorKind::Cache => matches!(
                self.source_as::<CacheError>(),
                Some(CacheError::Redis(_) | CacheError::Pool(_))
            ),
            ErrorKind::Source => matches!(self.source_as::<SourceError>(), Some(SourceError::Transport(_))),
            ErrorKind::Service => matches!(
                self.source_as::<ServiceError>(),
                Some(ServiceError::ConnectionFailed | ServiceError::ServiceUnavailable)
            ),
            _ => false,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("topicrawl::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<OrmError> for Error {
    fn from(err: OrmError) -> Self {
        Error::new(ErrorKind::Orm, Some(err))
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Error::new(ErrorKind::Cache, Some(err))
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        Error::new(ErrorKind::Source, Some(err))
    }
}

impl From<ExtractionError> for Error {
    fn from(err: ExtractionError) -> Self {
        Error::new(ErrorKind::Extraction, Some(err))
    }
}

impl From<TaskError> for Error {
    fn from(err: TaskError) -> Self {
        Error::new(ErrorKind::Task, Some(err))
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Error::new(ErrorKind::Service, Some(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<ResolverError> for Error {
    fn from(err: ResolverError) -> Self {
        Error::new(ErrorKind::Resolver, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("data not serialization: {0}")]
    SerializationFailed(BoxError),
    #[error("data not deserialization: {0}")]
    DeserializationFailed(BoxError),
    #[error("connection failed")]
    ConnectionFailed,
    #[error("push data to queue failed: {0}")]
    PushFailed(BoxError),
    #[error("receive from queue failed: {0}")]
    PopFailed(BoxError),
    #[error("queue operation failed: {0}")]
    OperationFailed(#[source] BoxError),
    #[error("channel closed")]
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum OrmError {
    #[error("database connection error: {0}")]
    ConnectionError(#[source] BoxError),
    #[error("query execution error: {0}")]
    QueryExecutionError(#[source] BoxError),
    #[error("transaction error: {0}")]
    TransactionError(#[source] BoxError),
    #[error("data not found")]
    NotFound,
    #[error("data already exists")]
    AlreadyExists,
    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("pool error: {0}")]
    Pool(String),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source transport failure: {0}")]
    Transport(#[source] BoxError),
    #[error("invalid source response: {0}")]
    InvalidResponse(#[source] BoxError),
    #[error("source timeout")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction transport failure: {0}")]
    Transport(#[source] BoxError),
    #[error("invalid extraction response: {0}")]
    InvalidResponse(#[source] BoxError),
    #[error("missing extraction credentials")]
    MissingCredentials,
    #[error("no topics extracted")]
    Empty,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    TaskNotFound(#[source] BoxError),
    #[error("{0}")]
    TaskAlreadyExists(#[source] BoxError),
    #[error("{0}")]
    InvalidTaskConfig(#[source] BoxError),
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
    #[error("job failed: {0}")]
    JobFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("connection failed")]
    ConnectionFailed,
    #[error("{0} timeout")]
    Timeout(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(#[source] BoxError),
    #[error("parse config failed: {0}")]
    Parse(#[source] BoxError),
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("lookup task failed: {0}")]
    Join(#[source] BoxError),
}

impl Error {
    pub fn task_not_found(id: impl fmt::Display) -> Self {
        Error::from(TaskError::TaskNotFound(format!("task {id} not found").into()))
    }

    pub fn invalid_task<E: Into<BoxError>>(source: E) -> Self {
        Error::from(TaskError::InvalidTaskConfig(source.into()))
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Error::from(ServiceError::Timeout(operation.into()))
    }

    pub fn service_unavailable() -> Self {
        Error::from(ServiceError::ServiceUnavailable)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::timeout("io"),
            std::io::ErrorKind::ConnectionRefused => Error::from(ServiceError::ConnectionFailed),
            _ => Error::new(ErrorKind::Service, Some(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from(QueueError::DeserializationFailed(err.into()))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::timeout("call")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(OrmError::NotFound);
        assert_eq!(err.to_string(), "orm error: data not found");

        let err = Error::with_message(ErrorKind::Task, "append rejected", Some(OrmError::NotFound));
        assert_eq!(err.to_string(), "task error: append rejected: data not found");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(Error::task_not_found("abc").is_not_found());
        assert!(Error::from(OrmError::NotFound).is_not_found());
        assert!(!Error::from(QueueError::ConnectionFailed).is_not_found());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::from(QueueError::ConnectionFailed).is_retryable());
        assert!(Error::from(OrmError::ConnectionError("refused".into())).is_retryable());
        assert!(Error::from(SourceError::Transport("reset".into())).is_retryable());
        assert!(Error::timeout("store").is_retryable());

        assert!(!Error::from(OrmError::NotFound).is_retryable());
        assert!(!Error::from(TaskError::JobFailed("boom".into())).is_retryable());
        assert!(!Error::from(TaskError::JobFailed("store call timeout".into())).is_retryable());
        assert!(!Error::invalid_task("empty topic").is_retryable());
    }

    #[test]
    fn test_error_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::from(io_err);
        assert!(err.source().is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_from_elapsed_kind() {
        let err = Error::timeout("source fetch");
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "service error: source fetch timeout");
    }
}
