//! DispatcherLoop - queue pair から worker pool へ
//!
//! # フロー（1 tick）
//! 1. LivenessMonitor::tick()。停止済みなら dequeue も submit もしない
//! 2. `DispatchOrder` の順で 1 件だけ取り出す
//! 3. WorkerPool::submit()（permit が空くまで待つ）
//! 4. queue pair が空なら sleep
//! 5. 回収（終わった handle、空 queue の buffer、ledger）

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{DispatchOrder, MAX_TICK_INTERVAL};
use crate::liveness::LivenessMonitor;
use crate::pool::{TaskHandle, WorkerPool};
use crate::queue::{QueuePair, Tier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub ticks: u64,
    pub dequeued_priority: u64,
    pub dequeued_backlog: u64,
    pub submitted: u64,
}

#[derive(Default)]
pub(crate) struct DispatcherCounters {
    ticks: AtomicU64,
    dequeued_priority: AtomicU64,
    dequeued_backlog: AtomicU64,
    submitted: AtomicU64,
}

impl DispatcherCounters {
    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            dequeued_priority: self.dequeued_priority.load(Ordering::Relaxed),
            dequeued_backlog: self.dequeued_backlog.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
        }
    }
}

pub struct DispatcherLoop {
    queues: Arc<QueuePair>,
    pool: Arc<WorkerPool>,
    monitor: Arc<LivenessMonitor>,
    order: DispatchOrder,
    interval: Duration,
    handles: Vec<TaskHandle>,
    counters: Arc<DispatcherCounters>,
}

impl DispatcherLoop {
    pub fn new(
        queues: Arc<QueuePair>,
        pool: Arc<WorkerPool>,
        monitor: Arc<LivenessMonitor>,
        interval: Duration,
    ) -> Self {
        Self {
            queues,
            pool,
            monitor,
            order: DispatchOrder::default(),
            interval: interval.min(MAX_TICK_INTERVAL),
            handles: Vec::new(),
            counters: Arc::new(DispatcherCounters::default()),
        }
    }

    pub fn with_order(mut self, order: DispatchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<DispatcherCounters> {
        Arc::clone(&self.counters)
    }

    /// Handles of submitted tasks that have not been reclaimed yet.
    pub fn outstanding(&self) -> usize {
        self.handles.len()
    }

    /// One tick without the trailing sleep. Returns the tier of the task
    /// that was submitted, if any.
    pub async fn tick(&mut self) -> Option<Tier> {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        if self.monitor.tick().await.is_stopped() {
            return None;
        }

        let first = match self.order {
            DispatchOrder::PriorityFirst => Tier::Priority,
            DispatchOrder::BacklogFirst => Tier::Backlog,
        };
        let submitted = match self.queues.try_dequeue(first) {
            Some((tier, task)) => {
                let counter = match tier {
                    Tier::Priority => &self.counters.dequeued_priority,
                    Tier::Backlog => &self.counters.dequeued_backlog,
                };
                counter.fetch_add(1, Ordering::Relaxed);

                match self.pool.submit(task).await {
                    Ok(handle) => {
                        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                        self.handles.push(handle);
                        Some(tier)
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to submit task");
                        None
                    }
                }
            }
            None => None,
        };

        self.reclaim();
        submitted
    }

    fn reclaim(&mut self) {
        self.handles.retain(|handle| !handle.is_finished());
        if self.queues.size() == 0 {
            self.queues.shrink();
        }
        let evicted = self.pool.reclaim();
        if evicted > 0 {
            debug!(evicted, "evicted finished ledger entries");
        }
    }

    /// Tick until `shutdown` turns true (or its sender goes away).
    ///
    /// Sleeps between ticks only while there is nothing queued or the stop
    /// marker has been seen; otherwise the next tick starts immediately and
    /// waits on the pool for a permit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DispatcherStats {
        info!(order = ?self.order, interval = ?self.interval, "dispatcher loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown.changed() => break,
            }

            if self.monitor.is_stopped() || self.queues.size() == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            } else {
                // 大量の backlog でも producer 側に順番を回す
                tokio::task::yield_now().await;
            }
        }
        let stats = self.stats();
        info!(submitted = stats.submitted, "dispatcher loop stopped");
        stats
    }
}
