use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error detail carried as the source of an [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cache,
    Queue,
    Config,
    Decode,
    Policy,
    Index,
    Service,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Cache => write!(f, "cache"),
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Decode => write!(f, "decode"),
            ErrorKind::Policy => write!(f, "policy"),
            ErrorKind::Index => write!(f, "index"),
            ErrorKind::Service => write!(f, "service"),
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

    /// Wraps a decode failure of a message body or a fetched value.
    pub fn decode<E: Into<BoxError>>(source: E) -> Error {
        Error::new(ErrorKind::Decode, Some(source))
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.inner.message.as_deref()
    }

    pub fn is_cache(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Cache)
    }

    pub fn is_queue(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Queue)
    }

    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Config)
    }

    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Decode)
    }

    pub fn is_policy(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Policy)
    }

    pub fn is_index(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Index)
    }

    /// True when the failure is a cache miss rather than a backend fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.downcast_source::<CacheError>(),
            Some(CacheError::NotFound(_))
        )
    }

    pub fn is_hostname_not_allowed(&self) -> bool {
        matches!(
            self.downcast_source::<PolicyError>(),
            Some(PolicyError::HostnameNotAllowed(_))
        )
    }

    /// Redelivering the same message cannot change the outcome of a
    /// permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.is_decode() || self.is_policy()
    }

    fn downcast_source<T: StdError + 'static>(&self) -> Option<&T> {
        self.inner
            .source
            .as_ref()
            .and_then(|source| source.downcast_ref::<T>())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("crawlhub::Error");
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

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Error::new(ErrorKind::Cache, Some(err))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<PolicyError> for Error {
    fn from(err: PolicyError) -> Self {
        Error::new(ErrorKind::Policy, Some(err))
    }
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        Error::new(ErrorKind::Index, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("pool error: {0}")]
    Pool(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("data not serialization")]
    SerializationFailed(#[source] BoxError),
    #[error("data not deserialization")]
    DeserializationFailed(#[source] BoxError),
    #[error("connection failed")]
    ConnectionFailed,
    #[error("push data to queue failed: {0}")]
    PushFailed(#[source] BoxError),
    #[error("receive from queue failed: {0}")]
    PopFailed(#[source] BoxError),
    #[error("queue operation failed: {0}")]
    OperationFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(#[source] BoxError),
    #[error("unknown index driver: {0}")]
    UnknownDriver(String),
    #[error("missing config value: {0}")]
    MissingValue(String),
    #[error("config fetch failed: {0}")]
    Fetch(#[source] BoxError),
    #[error("invalid config value: {0}")]
    InvalidValue(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("{0} hostname is not allowed")]
    HostnameNotAllowed(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{0}")]
    Persist(#[source] BoxError),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("backend responded {status}: {body}")]
    Backend { status: u16, body: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::decode(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Service, Some(err))
    }
}
