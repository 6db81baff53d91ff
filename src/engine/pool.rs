//! Accelerated execution context for index construction.
//!
//! A [`ComputePool`] is a dedicated rayon thread pool the builder attaches
//! to a freshly instantiated engine before training and population. While
//! attached, the engine routes its heavy loops (k-means assignment, PQ
//! encoding, batch distance scans) through the pool; detached engines run
//! everything on the calling thread. The pool handle is never serialized,
//! so a detached engine is always host-representable.

use std::sync::Arc;

use crate::error::{AnnforgeError, Result};

/// A shared handle to a dedicated worker thread pool.
#[derive(Clone)]
pub struct ComputePool {
    pool: Arc<rayon::ThreadPool>,
    threads: usize,
}

impl ComputePool {
    /// Build a pool with an explicit thread count.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(AnnforgeError::invalid_operation(
                "compute pool needs at least one thread",
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("annforge-worker-{i}"))
            .build()
            .map_err(|e| {
                AnnforgeError::invalid_operation(format!("failed to build compute pool: {e}"))
            })?;
        Ok(Self {
            pool: Arc::new(pool),
            threads,
        })
    }

    /// Detect whether accelerated execution is worthwhile on this host.
    ///
    /// Returns `None` on single-core machines; there is nothing to fan out
    /// to and the attach/detach protocol would only add overhead.
    pub fn detect() -> Option<Self> {
        let threads = num_cpus::get();
        if threads > 1 {
            Self::with_threads(threads).ok()
        } else {
            None
        }
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `op` inside the pool so rayon parallel iterators underneath it
    /// use these workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("threads", &self.threads)
            .finish()
    }
}
