//! Configuration model, process state and the process contract shared by
//! every executable.

pub mod model;
pub mod process;
pub mod state;
