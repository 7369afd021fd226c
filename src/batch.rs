//! Bounded-concurrency batch execution
//!
//! The public surface takes lists of files; per-path work runs on a bounded
//! pool with independent failure, and the output list always matches the
//! input list in length and order. Callers take one store snapshot up-front
//! so every path sees the same state.

use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::Result;

/// Runs per-item operations on a bounded pool
///
/// Concurrency defaults to the CPU count. One item's failure never cancels
/// the others; each slot in the output carries its own `Result`.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    concurrency: usize,
}

impl BatchExecutor {
    /// Create an executor sized to the machine
    pub fn new() -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self { concurrency }
    }

    /// Create an executor with an explicit pool size
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// The pool size
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `op` over every item, preserving input order
    pub async fn run<I, T, Op, Fut>(&self, items: Vec<I>, op: Op) -> Vec<Result<T>>
    where
        Op: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        stream::iter(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| op(index, item)),
        )
        .buffered(self.concurrency)
        .collect()
        .await
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}
