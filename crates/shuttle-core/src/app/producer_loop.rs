//! ProducerLoop - seed source から priority queue へ
//!
//! # フロー（1 tick）
//! 1. LivenessMonitor::tick()。停止済みなら何もしない
//! 2. 手元に sequence が無ければ SeedSource::next_seed()
//! 3. 最大 `burst_size` 個を取り出して priority queue へ
//! 4. interval だけ sleep（0 件でも sleep する）
//!
//! A burst sequence is kept across ticks. It is dropped as soon as it is
//! exhausted, so the next tick asks the source again.

use std::iter::Peekable;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app::crawl::Crawler;
use crate::config::{MAX_TICK_INTERVAL, PriorityOverflow};
use crate::domain::Task;
use crate::liveness::LivenessMonitor;
use crate::ports::{Seed, SeedItem, SeedIter, SeedSource};
use crate::queue::QueuePair;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    pub ticks: u64,
    pub enqueued: u64,
    pub seed_items_skipped: u64,
    /// Priority overflow redirected to the backlog.
    pub overflowed: u64,
    pub priority_rejected: u64,
    /// Seed requests dropped by the request stages.
    pub requests_filtered: u64,
}

#[derive(Default)]
pub(crate) struct ProducerCounters {
    ticks: AtomicU64,
    enqueued: AtomicU64,
    skipped: AtomicU64,
    overflowed: AtomicU64,
    rejected: AtomicU64,
    filtered: AtomicU64,
}

impl ProducerCounters {
    pub(crate) fn snapshot(&self) -> ProducerStats {
        ProducerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            seed_items_skipped: self.skipped.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            priority_rejected: self.rejected.load(Ordering::Relaxed),
            requests_filtered: self.filtered.load(Ordering::Relaxed),
        }
    }
}

/// Puts one task on the priority tier and applies the overflow policy.
struct Placement {
    queues: Arc<QueuePair>,
    overflow: PriorityOverflow,
    counters: Arc<ProducerCounters>,
}

impl Placement {
    async fn place(&self, task: Task) -> bool {
        let Err(full) = self.queues.enqueue_priority(task) else {
            self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            return true;
        };
        match self.overflow {
            PriorityOverflow::FallbackToBacklog => {
                self.counters.overflowed.fetch_add(1, Ordering::Relaxed);
                self.queues.enqueue_backlog(full.into_task()).await;
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            PriorityOverflow::Reject => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(capacity = full.capacity, task = ?full.task, "priority queue full, task rejected");
                false
            }
        }
    }
}

/// `source` is only `Send`, so `tick` never holds `&self` across an await;
/// it borrows the fields it needs instead.
pub struct ProducerLoop {
    source: Box<dyn SeedSource>,
    current: Option<Peekable<SeedIter>>,
    placement: Placement,
    monitor: Arc<LivenessMonitor>,
    crawler: Option<Arc<Crawler>>,
    burst_size: usize,
    interval: Duration,
}

impl ProducerLoop {
    pub fn new(
        source: Box<dyn SeedSource>,
        queues: Arc<QueuePair>,
        monitor: Arc<LivenessMonitor>,
        burst_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            current: None,
            placement: Placement {
                queues,
                overflow: PriorityOverflow::default(),
                counters: Arc::new(ProducerCounters::default()),
            },
            monitor,
            crawler: None,
            burst_size: burst_size.max(1),
            interval: interval.min(MAX_TICK_INTERVAL),
        }
    }

    /// Seed requests are turned into crawl tasks by this crawler. Without
    /// one they are skipped like any other unschedulable item.
    pub fn with_crawler(mut self, crawler: Arc<Crawler>) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn with_overflow(mut self, overflow: PriorityOverflow) -> Self {
        self.placement.overflow = overflow;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> ProducerStats {
        self.placement.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<ProducerCounters> {
        Arc::clone(&self.placement.counters)
    }

    /// One tick without the trailing sleep. Returns how many tasks were
    /// placed on a queue.
    pub async fn tick(&mut self) -> usize {
        let counters = Arc::clone(&self.placement.counters);
        counters.ticks.fetch_add(1, Ordering::Relaxed);
        if self.monitor.tick().await.is_stopped() {
            return 0;
        }

        if self.current.is_none() {
            match self.source.next_seed() {
                None => return 0,
                Some(Seed::Single(task)) => {
                    return usize::from(self.placement.place(task).await);
                }
                Some(Seed::Burst(items)) => self.current = Some(items.peekable()),
            }
        }

        let mut placed = 0;
        for _ in 0..self.burst_size {
            let Some(item) = self.current.as_mut().and_then(Iterator::next) else {
                break;
            };
            match item {
                SeedItem::Task(task) => placed += usize::from(self.placement.place(task).await),
                SeedItem::Request(request) => {
                    let Some(crawler) = self.crawler.as_ref() else {
                        skip(&counters, &request.url);
                        continue;
                    };
                    match crawler.admit(request) {
                        Some(task) => placed += usize::from(self.placement.place(task).await),
                        None => {
                            counters.filtered.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                SeedItem::EndOfBurst => break,
                SeedItem::Unrecognized(what) => skip(&counters, &what),
            }
        }
        // 使い切ったら次の tick で source を呼び直す
        if let Some(items) = self.current.as_mut()
            && items.peek().is_none()
        {
            self.current = None;
        }
        placed
    }

    /// Tick until `shutdown` turns true (or its sender goes away).
    ///
    /// Shutdown interrupts a tick at its next suspension point. A task that
    /// was waiting for backlog room at that moment is dropped unrun.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ProducerStats {
        info!(burst_size = self.burst_size, interval = ?self.interval, "producer loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let placed = tokio::select! {
                placed = self.tick() => placed,
                _ = shutdown.changed() => break,
            };
            if placed > 0 {
                debug!(placed, "producer burst enqueued");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        let stats = self.stats();
        info!(ticks = stats.ticks, enqueued = stats.enqueued, "producer loop stopped");
        stats
    }
}

fn skip(counters: &ProducerCounters, what: &str) {
    counters.skipped.fetch_add(1, Ordering::Relaxed);
    debug!(item = what, "skipping seed item that is not a task");
}
