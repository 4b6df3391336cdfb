//! Explicit execution context for realising lazy stacks
//!
//! Every blocking computation takes a `&ExecutionContext` instead of relying
//! on a process-wide compute client.

use crate::config::PipelineConfig;
use crate::types::{CubeError, CubeResult};
use rayon::ThreadPool;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub struct ExecutionContext {
    pool: ThreadPool,
}

impl ExecutionContext {
    /// Create a context with `workers` threads (0 = one per core)
    pub fn new(workers: usize) -> CubeResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sarcube-worker-{}", i))
            .build()
            .map_err(|e| CubeError::Processing(format!("Failed to build worker pool: {}", e)))?;

        log::info!("Execution context ready with {} workers", pool.current_num_threads());
        Ok(Self { pool })
    }

    /// Build the worker pool and apply the configured GDAL options
    pub fn from_config(config: &PipelineConfig) -> CubeResult<Self> {
        config.validate()?;
        for (key, value) in &config.gdal_options {
            log::debug!("GDAL option {}={}", key, value);
            gdal::config::set_config_option(key, value)?;
        }
        Self::new(config.workers)
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the worker pool
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Apply a fallible task to every item, in parallel when the `parallel`
    /// feature is enabled; results keep the input order
    pub fn try_map<T, R, F>(&self, items: &[T], f: F) -> CubeResult<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> CubeResult<R> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            self.pool.install(|| items.par_iter().map(&f).collect())
        }

        #[cfg(not(feature = "parallel"))]
        {
            items.iter().map(f).collect()
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workers", &self.workers())
            .finish()
    }
}
