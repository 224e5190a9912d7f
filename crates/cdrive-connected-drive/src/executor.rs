//! Bounded executor for blocking vendor calls

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

/// Concurrent blocking jobs allowed by default
pub const DEFAULT_EXECUTOR_LIMIT: usize = 4;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor is shut down")]
    Closed,

    #[error("blocking job failed: {0}")]
    Join(#[from] JoinError),
}

/// Runs blocking closures on tokio's blocking pool, at most `limit` at once
#[derive(Debug, Clone)]
pub struct Executor {
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Run `job` on a blocking thread once a permit is free
    pub async fn run<F, T>(&self, job: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::Closed)?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        Ok(handle.await?)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Reject all further jobs
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTOR_LIMIT)
    }
}
