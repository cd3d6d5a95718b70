pub mod error;

pub use error::{
    BoxError, CacheError, ConfigError, Error, ErrorKind, IndexError, PolicyError, QueueError,
    Result,
};
