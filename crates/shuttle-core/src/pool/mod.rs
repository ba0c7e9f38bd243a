//! Worker pool: caps concurrent task execution at N.
//!
//! # 設計
//! - One counting semaphore with N permits. A permit is taken before a task
//!   starts and is owned by the spawned runner, so it is released on every
//!   exit path: success, failure, panic, or the runner being dropped.
//! - Blocking bodies go to `spawn_blocking`; async bodies run on the
//!   runtime with their panics caught at the pool boundary.
//! - Outcomes are written to the [`TaskLedger`]. A bare `submit` has nobody
//!   waiting on it, so failures are logged at `warn`.
//!
//! Build one pool per process and pass it around as `Arc<WorkerPool>`.

mod ledger;

pub use ledger::{LedgerCounts, LedgerEntry, TaskLedger, TaskStatus};

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::task::TaskBody;
use crate::domain::{Task, TaskError, TaskId, TaskResult};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("task {id} failed: {source}")]
    Task {
        id: TaskId,
        #[source]
        source: TaskError,
    },

    #[error("deadline of {deadline:?} elapsed with {unfinished} task(s) unfinished")]
    DeadlineElapsed { deadline: Duration, unfinished: usize },

    #[error("join timed out after {timeout:?} with {unfinished} task(s) still running")]
    JoinTimeout { timeout: Duration, unfinished: usize },

    #[error("worker pool is closed")]
    Closed,
}

/// Handle to one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    join: JoinHandle<TaskResult>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task and return its outcome.
    pub async fn wait(self) -> TaskResult {
        self.join.await.unwrap_or_else(|err| Err(TaskError::from_join(err)))
    }

    async fn outcome(self) -> Result<(), PoolError> {
        let id = self.id;
        self.wait()
            .await
            .map_err(|source| PoolError::Task { id, source })
    }
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    ledger: Arc<Mutex<TaskLedger>>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, ledger_retention: usize) -> Self {
        assert!(capacity > 0, "worker pool capacity must be at least 1");
        debug!(capacity, ledger_retention, "worker pool created");
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            ledger: Arc::new(Mutex::new(TaskLedger::new(ledger_retention))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Tasks currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available_permits()
    }

    fn ledger(&self) -> MutexGuard<'_, TaskLedger> {
        lock_ledger(&self.ledger)
    }

    pub fn ledger_counts(&self) -> LedgerCounts {
        self.ledger().counts()
    }

    pub fn task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.ledger().get(id).map(|entry| entry.status.clone())
    }

    pub fn recent_failures(&self) -> Vec<(TaskId, String)> {
        self.ledger().recent_failures()
    }

    /// Copy of every entry currently held, running ones included.
    pub fn ledger_snapshot(&self) -> Vec<(TaskId, LedgerEntry)> {
        self.ledger().snapshot()
    }

    /// Evict finished ledger entries past the retention bound.
    pub fn reclaim(&self) -> usize {
        self.ledger().evict_finished()
    }

    /// Take a permit (waiting if all N are held) and start the task.
    ///
    /// If the returned future is dropped while waiting, no permit is taken
    /// and the task is dropped unrun.
    pub async fn submit(&self, task: Task) -> Result<TaskHandle, PoolError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(self.spawn_with_permit(task, permit))
    }

    fn spawn_with_permit(&self, task: Task, permit: OwnedSemaphorePermit) -> TaskHandle {
        let (id, label, body) = task.into_parts();
        self.ledger().start(id, label.clone());

        let ledger = Arc::clone(&self.ledger);
        let join = tokio::spawn(async move {
            let _permit = permit;
            let result = run_body(body).await;
            match &result {
                Ok(()) => debug!(task_id = %id, label = ?label, "task finished"),
                Err(err) => warn!(task_id = %id, label = ?label, error = %err, "task failed"),
            }
            lock_ledger(&ledger).finish(id, &result);
            result
        });

        TaskHandle { id, join }
    }

    /// Submit every task concurrently and wait until all finish or
    /// `deadline` elapses. Returns the first failure in completion order.
    ///
    /// On deadline the tasks that already started keep running to
    /// completion; those still waiting for a permit are dropped.
    pub async fn submit_all(&self, tasks: Vec<Task>, deadline: Duration) -> Result<(), PoolError> {
        let pending = tasks
            .into_iter()
            .map(|task| async move { self.submit(task).await?.outcome().await })
            .collect::<FuturesUnordered<_>>();
        collect_outcomes(pending, deadline).await
    }

    /// Run tasks one at a time in submission order, stopping at the first
    /// failure.
    pub async fn run_sequential(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        for task in tasks {
            self.submit(task).await?.outcome().await?;
        }
        Ok(())
    }

    /// Wait on already submitted tasks for at most `timeout`.
    pub async fn join(
        &self,
        handles: impl IntoIterator<Item = TaskHandle>,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let pending = handles
            .into_iter()
            .map(TaskHandle::outcome)
            .collect::<FuturesUnordered<_>>();
        collect_outcomes(pending, timeout).await.map_err(|err| match err {
            PoolError::DeadlineElapsed { unfinished, .. } => PoolError::JoinTimeout { timeout, unfinished },
            other => other,
        })
    }

    /// Wait until no task holds a permit. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.permits.acquire_many(all)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => false,
            Err(_) => false,
        }
    }
}

fn lock_ledger(ledger: &Mutex<TaskLedger>) -> MutexGuard<'_, TaskLedger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_body(body: TaskBody) -> TaskResult {
    match body {
        TaskBody::Blocking(f) => tokio::task::spawn_blocking(f)
            .await
            .unwrap_or_else(|err| Err(TaskError::from_join(err))),
        TaskBody::Async(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload))),
    }
}

async fn collect_outcomes<F>(mut pending: FuturesUnordered<F>, deadline: Duration) -> Result<(), PoolError>
where
    F: std::future::Future<Output = Result<(), PoolError>>,
{
    let sleep = tokio::time::sleep(deadline);
    tokio::pin!(sleep);

    let mut first_failure = None;
    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    first_failure.get_or_insert(err);
                }
                None => break,
            },
            _ = &mut sleep => {
                return Err(PoolError::DeadlineElapsed {
                    deadline,
                    unfinished: pending.len(),
                });
            }
        }
    }

    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
