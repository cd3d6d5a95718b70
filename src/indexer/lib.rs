//! Resource indexing pipeline: decodes crawled resources, applies the
//! hostname policy and hands accepted resources to a storage driver.

pub mod index;
pub mod indexer;

pub use index::{Index, IndexDriver, new_index};
pub use indexer::{Indexer, queue_name};
