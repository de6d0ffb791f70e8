// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A collection of tokio tasks which execute in parallel, up to a
//! caller-specified maximum amount of parallelism
//!
//! A plain `JoinSet` has no limit on how many tasks run at once; given a
//! large collection to delete, we could spawn an enormous number of
//! concurrent storage calls.  The pool here spawns everything immediately
//! but gates execution behind a semaphore, so storage load stays bounded
//! while bulk-delete latency stays sublinear in collection size.

use std::future::Future;
use std::sync::Arc;
use tessera_common::api::external::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The default number of parallel tasks used by [`ParallelTaskSet`]
pub const DEFAULT_MAX_PARALLELISM: usize = 16;

pub struct ParallelTaskSet<T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<T>,
}

impl<T: 'static + Send> ParallelTaskSet<T> {
    /// Creates a pool running at most `max_parallelism` tasks at once
    ///
    /// A parallelism of zero is clamped to one.
    pub fn new(max_parallelism: usize) -> ParallelTaskSet<T> {
        ParallelTaskSet {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            set: JoinSet::new(),
        }
    }

    /// Spawn a task immediately, but only allow it to execute once the pool
    /// is within its parallelism constraint
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let _abort_handle = self.set.spawn(async move {
            // Hold the permit until the task finishes executing.  The
            // semaphore is never closed, so acquisition can only fail if
            // the runtime is shutting down, in which case the task never
            // runs anyway.
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore unexpectedly closed");
            task.await
        });
    }

    /// Waits for the next task to complete and returns its output
    ///
    /// A task that panicked yields an `Err(Error::InternalError)` rather
    /// than propagating the panic: one misbehaving worker must not take the
    /// caller down with it.
    pub async fn join_next(&mut self) -> Option<Result<T, Error>> {
        self.set.join_next().await.map(|result| {
            result.map_err(|join_error| {
                Error::internal_error(&format!(
                    "worker task failed: {}",
                    join_error
                ))
            })
        })
    }

    /// Waits for every task and returns their outputs
    pub async fn join_all(mut self) -> Vec<Result<T, Error>> {
        let mut results = Vec::new();
        while let Some(result) = self.join_next().await {
            results.push(result);
        }
        results
    }
}

impl<T: 'static + Send> Default for ParallelTaskSet<T> {
    fn default() -> Self {
        ParallelTaskSet::new(DEFAULT_MAX_PARALLELISM)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_parallelism_stays_bounded() {
        let count = Arc::new(AtomicUsize::new(0));

        let task_limit = 8;
        let mut set = ParallelTaskSet::new(task_limit);

        for _ in 0..task_limit * 10 {
            set.spawn({
                let count = count.clone();
                async move {
                    // How many tasks, including our own, are running right
                    // now?
                    let watermark = count.fetch_add(1, Ordering::SeqCst) + 1;

                    let duration_ms = rand::thread_rng().gen_range(0..10);
                    tokio::time::sleep(tokio::time::Duration::from_millis(
                        duration_ms,
                    ))
                    .await;

                    count.fetch_sub(1, Ordering::SeqCst);
                    watermark
                }
            });
        }

        for result in set.join_all().await {
            let watermark = result.unwrap();
            assert!(
                watermark <= task_limit,
                "observed {} simultaneous tasks",
                watermark
            );
        }
    }

    #[tokio::test]
    async fn test_zero_parallelism_is_clamped() {
        let mut set = ParallelTaskSet::new(0);
        set.spawn(async { 7 });
        assert_eq!(set.join_next().await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_error() {
        let mut set = ParallelTaskSet::new(2);
        set.spawn(async { panic!("worker exploded") });
        set.spawn(async { 1 });
        let results = set.join_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }
}
