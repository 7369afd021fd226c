//! Subprocess git access for the managed repository
//!
//! - `GitExecutor` - Async `git` command runner with bounded concurrency
//! - `GitProbe` - Read-only queries (branches, remotes, commits, changes)
//!   plus file permission toggles

mod executor;
mod probe;

pub use executor::*;
pub use probe::*;
