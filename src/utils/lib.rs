//! Process bootstrap helpers.

pub mod connector;
pub mod logger;
