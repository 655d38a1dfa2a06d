//! Execution host adapters.
//!
//! The interpreter is synchronous and runs on a blocking thread either
//! way; the adapter decides the governance around that thread. In-process
//! execution dispatches directly. The worker pool bounds concurrent runs
//! with a semaphore, optionally pre-warms threads, and lets the embedder
//! cap per-worker tracked memory. Hard termination is by abandonment: a
//! blocking thread cannot be killed, so the watchdog stops waiting for it
//! and the thread dies with its next cooperative checkpoint (the cancel
//! flag is already set by then).

use enclave_core::config::WorkerPoolConfig;
use enclave_core::error::{ConfigError, EnclaveError};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded pool of worker slots.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Result<Arc<Self>, ConfigError> {
        if config.max_workers == 0 || config.min_workers > config.max_workers {
            return Err(ConfigError::InvalidWorkerPool(format!(
                "min_workers {} / max_workers {}",
                config.min_workers, config.max_workers
            )));
        }
        let pool = Arc::new(Self {
            slots: Arc::new(Semaphore::new(config.max_workers)),
            config,
        });
        if pool.config.warm_on_init {
            pool.warm();
        }
        Ok(pool)
    }

    /// Spin up `min_workers` blocking threads so first runs skip thread
    /// creation latency.
    fn warm(&self) {
        for _ in 0..self.config.min_workers {
            tokio::task::spawn_blocking(|| {});
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Run `work` on a pooled worker slot.
    pub async fn run<F, T>(&self, work: F) -> Result<T, EnclaveError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EnclaveError::internal("worker pool disposed"))?;
        let handle = tokio::task::spawn_blocking(move || {
            let out = work();
            drop(permit);
            out
        });
        handle
            .await
            .map_err(|e| EnclaveError::internal(format!("worker failed: {}", e)))
    }

    /// Stop handing out slots. In-flight runs finish; new runs fail.
    pub fn dispose(&self) {
        self.slots.close();
    }
}

/// Where a run executes.
#[derive(Clone)]
pub enum ExecHost {
    InProcess,
    Pool(Arc<WorkerPool>),
}

impl ExecHost {
    pub async fn run<F, T>(&self, work: F) -> Result<T, EnclaveError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self {
            ExecHost::InProcess => tokio::task::spawn_blocking(work)
                .await
                .map_err(|e| EnclaveError::internal(format!("executor failed: {}", e))),
            ExecHost::Pool(pool) => pool.run(work).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            min_workers: 1,
            max_workers: 2,
            memory_limit_per_worker: 0,
            warm_on_init: false,
        })
        .unwrap();

        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let live = live.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    live.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_disposed_pool_refuses_work() {
        let pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
        pool.dispose();
        let result = pool.run(|| 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_bounds_rejected() {
        assert!(WorkerPool::new(WorkerPoolConfig {
            min_workers: 4,
            max_workers: 1,
            memory_limit_per_worker: 0,
            warm_on_init: false,
        })
        .is_err());
    }
}
