//! Process runner.

pub mod runner;

pub use runner::{run, start_subscribers, stop_subscribers};
