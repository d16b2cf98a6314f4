//! Executors running task graphs

use crate::array::ChunkedArray;
use crate::error::{Error, Result};
use crate::graph::{TaskGraph, TaskOutput};
use crate::ops::FinalResult;
use tracing::debug;

/// Runs task graphs and redistributes chunked arrays
///
/// Any topological order gives the same result; executors are free to run
/// independent nodes concurrently.
pub trait Executor: Send + Sync {
    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Run `graph` to completion and return its output
    fn submit(&self, graph: &TaskGraph) -> Result<FinalResult>;

    /// Redistribute `array` along `axis` into blocks of `sizes`
    fn rechunk(&self, array: &ChunkedArray, axis: usize, sizes: &[usize]) -> Result<ChunkedArray> {
        array.rechunk_axis(axis, sizes)
    }
}

impl<X: Executor + ?Sized> Executor for &X {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn submit(&self, graph: &TaskGraph) -> Result<FinalResult> {
        (**self).submit(graph)
    }

    fn rechunk(&self, array: &ChunkedArray, axis: usize, sizes: &[usize]) -> Result<ChunkedArray> {
        (**self).rechunk(array, axis, sizes)
    }
}

fn gather<'a>(outputs: &'a [Option<TaskOutput>], deps: &[usize]) -> Result<Vec<&'a TaskOutput>> {
    deps.iter()
        .map(|&d| {
            outputs[d]
                .as_ref()
                .ok_or_else(|| Error::invariant(format!("output of node {d} is not available")))
        })
        .collect()
}

/// Release the inputs of `deps` whose last consumer just ran
fn release(outputs: &mut [Option<TaskOutput>], remaining: &mut [usize], deps: &[usize]) {
    for &d in deps {
        remaining[d] -= 1;
        if remaining[d] == 0 {
            outputs[d] = None;
        }
    }
}

fn take_output(mut outputs: Vec<Option<TaskOutput>>, graph: &TaskGraph) -> Result<FinalResult> {
    outputs
        .get_mut(graph.output())
        .and_then(Option::take)
        .ok_or_else(|| Error::invariant("graph produced no output"))?
        .into_final()
}

// ============================================================================
// SyncExecutor
// ============================================================================

/// Runs every node on the calling thread, in graph order
#[derive(Copy, Clone, Debug, Default)]
pub struct SyncExecutor;

impl SyncExecutor {
    /// Create a synchronous executor
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SyncExecutor {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn submit(&self, graph: &TaskGraph) -> Result<FinalResult> {
        debug!(executor = self.name(), nodes = graph.len(), "running task graph");
        let mut outputs: Vec<Option<TaskOutput>> = vec![None; graph.len()];
        let mut remaining = graph.consumers();
        for (idx, node) in graph.nodes().iter().enumerate() {
            let out = {
                let inputs = gather(&outputs, &node.deps)?;
                graph.run_node(idx, &inputs)?
            };
            outputs[idx] = Some(out);
            release(&mut outputs, &mut remaining, &node.deps);
        }
        take_output(outputs, graph)
    }
}

// ============================================================================
// ThreadPoolExecutor
// ============================================================================

#[cfg(feature = "rayon")]
pub use pool::ThreadPoolExecutor;

#[cfg(feature = "rayon")]
mod pool {
    use super::*;
    use rayon::prelude::*;
    use std::sync::Arc;

    /// Runs each level of the graph in parallel on a rayon thread pool
    ///
    /// Uses the global rayon pool unless built with
    /// [`with_threads`](Self::with_threads).
    #[derive(Clone, Default)]
    pub struct ThreadPoolExecutor {
        pool: Option<Arc<rayon::ThreadPool>>,
    }

    impl ThreadPoolExecutor {
        /// Executor on the global rayon pool
        pub fn new() -> Self {
            Self { pool: None }
        }

        /// Executor on a dedicated pool of `num_threads` threads
        pub fn with_threads(num_threads: usize) -> Result<Self> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .map_err(|e| Error::invalid_argument("num_threads", e.to_string()))?;
            Ok(Self {
                pool: Some(Arc::new(pool)),
            })
        }

        /// Number of worker threads
        pub fn num_threads(&self) -> usize {
            match &self.pool {
                Some(pool) => pool.current_num_threads(),
                None => rayon::current_num_threads(),
            }
        }

        fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
            match &self.pool {
                Some(pool) => pool.install(f),
                None => f(),
            }
        }

        fn run(&self, graph: &TaskGraph) -> Result<FinalResult> {
            let mut outputs: Vec<Option<TaskOutput>> = vec![None; graph.len()];
            let mut remaining = graph.consumers();
            for level in graph.levels() {
                let computed = level
                    .par_iter()
                    .map(|&idx| {
                        let inputs = gather(&outputs, &graph.nodes()[idx].deps)?;
                        graph.run_node(idx, &inputs).map(|out| (idx, out))
                    })
                    .collect::<Result<Vec<_>>>()?;
                for (idx, out) in computed {
                    outputs[idx] = Some(out);
                }
                for &idx in &level {
                    release(&mut outputs, &mut remaining, &graph.nodes()[idx].deps);
                }
            }
            take_output(outputs, graph)
        }
    }

    impl std::fmt::Debug for ThreadPoolExecutor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ThreadPoolExecutor")
                .field("num_threads", &self.num_threads())
                .finish()
        }
    }

    impl Executor for ThreadPoolExecutor {
        fn name(&self) -> &'static str {
            "thread-pool"
        }

        fn submit(&self, graph: &TaskGraph) -> Result<FinalResult> {
            debug!(
                executor = self.name(),
                nodes = graph.len(),
                threads = self.num_threads(),
                "running task graph"
            );
            self.install(|| self.run(graph))
        }
    }
}
