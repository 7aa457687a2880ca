//! A pool of background workers keeping a bounded buffer of freshly generated
//! values ready to hand out.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bon::Builder;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Produces one value. Runs on the blocking thread pool.
pub type GenerateFn<T> = Arc<dyn Fn() -> Result<T, Error> + Send + Sync>;

#[derive(Builder)]
pub struct ValueGenPoolConfig<T> {
    #[builder(into)]
    pub name: String,
    /// Number of concurrent generators
    pub workers: usize,
    /// Capacity of the ready buffer
    pub size: usize,
    /// Total number of values the pool may ever generate
    #[builder(default = u64::MAX)]
    pub max_lifetime_values: u64,
    /// How long after start the pool keeps generating
    #[builder(default = Duration::MAX)]
    pub max_lifetime_duration: Duration,
    pub generate: GenerateFn<T>,
}

impl<T> fmt::Debug for ValueGenPoolConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueGenPoolConfig")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("size", &self.size)
            .field("max_lifetime_values", &self.max_lifetime_values)
            .field("max_lifetime_duration", &self.max_lifetime_duration)
            .finish_non_exhaustive()
    }
}

impl<T> ValueGenPoolConfig<T> {
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = Vec::new();

        if self.workers == 0 {
            problems.push("workers must be at least 1");
        }
        if self.size == 0 {
            problems.push("size must be at least 1");
        }
        if self.max_lifetime_values == 0 {
            problems.push("max lifetime values must be at least 1");
        }
        if self.max_lifetime_duration.is_zero() {
            problems.push("max lifetime duration must be positive");
        }
        if self.workers > self.size {
            problems.push("workers must not exceed size");
        }
        if self.size as u64 > self.max_lifetime_values {
            problems.push("size must not exceed max lifetime values");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_parameter(format!(
                "invalid value pool {} config: {}",
                self.name,
                problems.join(", ")
            )))
        }
    }
}

/// Shared between the pool handle and its workers.
struct Limits {
    generated: AtomicU64,
    max_values: u64,
    deadline: Option<Instant>,
}

impl Limits {
    /// Reserves one generation, returning false once a lifetime limit is hit.
    fn reserve(&self) -> bool {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        self.generated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_values).then_some(n + 1)
            })
            .is_ok()
    }
}

pub struct ValueGenPool<T> {
    name: String,
    rx: Mutex<mpsc::Receiver<T>>,
    cancel: CancellationToken,
    limits: Arc<Limits>,
}

impl<T> ValueGenPool<T>
where
    T: Send + 'static,
{
    /// Validates the config and spawns the workers. Must be called within a
    /// tokio runtime.
    pub fn start(config: ValueGenPoolConfig<T>) -> Result<Self, Error> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.size);
        let cancel = CancellationToken::new();
        let limits = Arc::new(Limits {
            generated: AtomicU64::new(0),
            max_values: config.max_lifetime_values,
            deadline: Instant::now().checked_add(config.max_lifetime_duration),
        });

        for worker in 0..config.workers {
            tokio::spawn(run_worker(
                config.name.clone(),
                worker,
                tx.clone(),
                cancel.clone(),
                limits.clone(),
                config.generate.clone(),
            ));
        }

        tracing::debug!(
            pool = %config.name,
            workers = config.workers,
            size = config.size,
            "Started value pool"
        );

        Ok(Self {
            name: config.name,
            rx: Mutex::new(rx),
            cancel,
            limits,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values generated so far, including buffered ones.
    pub fn generated(&self) -> u64 {
        self.limits.generated.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the next value. Fails with [`Error::PoolClosed`] once the
    /// pool is cancelled, or exhausted and drained.
    pub async fn get(&self) -> Result<T, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::pool_closed(&self.name));
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::pool_closed(&self.name)),
            value = rx.recv() => value.ok_or_else(|| Error::pool_closed(&self.name)),
        }
    }

    /// Takes up to `n` values, stopping early when the pool closes.
    pub async fn get_many(&self, n: usize) -> Vec<T> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            match self.get().await {
                Ok(value) => values.push(value),
                Err(_) => break,
            }
        }
        values
    }

    /// Stops the workers. Buffered values are discarded.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            tracing::warn!(pool = %self.name, "Value pool already cancelled");
            return;
        }
        self.cancel.cancel();
        tracing::debug!(pool = %self.name, "Cancelled value pool");
    }
}

impl<T> Drop for ValueGenPool<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker<T: Send + 'static>(
    pool: String,
    worker: usize,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
    limits: Arc<Limits>,
    generate: GenerateFn<T>,
) {
    while !cancel.is_cancelled() && limits.reserve() {
        let value = match tokio::task::spawn_blocking({
            let generate = generate.clone();
            move || generate()
        })
        .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::error!(%pool, worker, "Value generation failed: {e}");
                return;
            }
            Err(e) => {
                tracing::error!(%pool, worker, "Value generator panicked: {e}");
                return;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = tx.send(value) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    tracing::trace!(%pool, worker, "Value pool worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> GenerateFn<usize> {
        let next = Arc::new(AtomicUsize::new(0));
        Arc::new(move || Ok(next.fetch_add(1, Ordering::SeqCst)))
    }

    fn config(workers: usize, size: usize) -> ValueGenPoolConfig<usize> {
        ValueGenPoolConfig::builder()
            .name("test")
            .workers(workers)
            .size(size)
            .generate(counter())
            .build()
    }

    #[tokio::test]
    async fn hands_out_distinct_values() {
        let pool = ValueGenPool::start(config(2, 4)).unwrap();

        let mut values = pool.get_many(10).await;
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 10);
    }

    #[tokio::test]
    async fn get_after_cancel_fails() {
        let pool = ValueGenPool::start(config(1, 2)).unwrap();
        pool.get().await.unwrap();

        pool.cancel();
        pool.cancel();

        assert!(pool.is_cancelled());
        assert!(matches!(pool.get().await, Err(Error::PoolClosed { .. })));
    }

    #[tokio::test]
    async fn lifetime_value_limit_exhausts_the_pool() {
        let pool = ValueGenPool::start(
            ValueGenPoolConfig::builder()
                .name("limited")
                .workers(1)
                .size(2)
                .max_lifetime_values(3)
                .generate(counter())
                .build(),
        )
        .unwrap();

        let values = pool.get_many(10).await;
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(pool.generated(), 3);
        assert!(matches!(pool.get().await, Err(Error::PoolClosed { .. })));
    }

    #[tokio::test]
    async fn failing_generator_closes_the_pool() {
        let pool = ValueGenPool::<u8>::start(
            ValueGenPoolConfig::builder()
                .name("broken")
                .workers(1)
                .size(1)
                .generate(Arc::new(|| -> Result<u8, Error> {
                    Err(Error::internal(eyre::eyre!("no entropy")))
                }))
                .build(),
        )
        .unwrap();

        assert!(matches!(pool.get().await, Err(Error::PoolClosed { .. })));
    }

    #[test]
    fn config_validation() {
        assert!(config(1, 1).validate().is_ok());

        for bad in [config(0, 1), config(1, 0), config(3, 2)] {
            assert!(matches!(bad.validate(), Err(Error::InvalidParameter { .. })));
        }

        let mut bad = config(1, 4);
        bad.max_lifetime_values = 2;
        assert!(bad.validate().is_err());

        let mut bad = config(1, 1);
        bad.max_lifetime_duration = Duration::ZERO;
        assert!(bad.validate().is_err());
    }
}
