//! crawlhub: shared configuration service and resource-indexing pipeline of
//! a distributed crawler. Each area lives under its own directory in `src/`.

#[path = "cacheable/lib.rs"]
pub mod cacheable;
#[path = "common/lib.rs"]
pub mod common;
#[path = "configapi/lib.rs"]
pub mod configapi;
#[path = "engine/lib.rs"]
pub mod engine;
#[path = "errors/lib.rs"]
pub mod errors;
#[path = "indexer/lib.rs"]
pub mod indexer;
#[path = "queue/lib.rs"]
pub mod queue;
#[path = "utils/lib.rs"]
pub mod utils;
