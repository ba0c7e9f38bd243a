//! Status - 実行中 engine のスナップショット
//!
//! `StatsProbe` is cheap to clone and can be polled from anywhere while the
//! engine runs; every number comes from atomics or short lock sections.

use std::sync::Arc;

use serde::Serialize;

use crate::app::crawl::{CrawlStats, Crawler};
use crate::app::dispatcher_loop::{DispatcherCounters, DispatcherStats};
use crate::app::middleware::MiddlewareDrops;
use crate::app::producer_loop::{ProducerCounters, ProducerStats};
use crate::liveness::LivenessMonitor;
use crate::pool::{LedgerCounts, WorkerPool};
use crate::queue::QueuePair;

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub priority_len: usize,
    pub backlog_len: usize,
    pub priority_capacity: usize,
    pub backlog_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub pid: u32,
    pub iteration: u64,
    pub stopped: bool,
    pub producer: ProducerStats,
    pub dispatcher: DispatcherStats,
    pub queues: QueueStats,
    pub in_flight: usize,
    pub ledger: LedgerCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl: Option<CrawlStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middleware_drops: Option<MiddlewareDrops>,
}

impl EngineStats {
    /// Nothing queued, nothing running and no follow-up waiting for room.
    pub fn is_idle(&self) -> bool {
        let parked = self.crawl.map_or(0, |crawl| crawl.feedback_pending);
        self.queues.priority_len == 0 && self.queues.backlog_len == 0 && self.in_flight == 0 && parked == 0
    }
}

#[derive(Clone)]
pub struct StatsProbe {
    pub(crate) producer: Arc<ProducerCounters>,
    pub(crate) dispatcher: Arc<DispatcherCounters>,
    pub(crate) queues: Arc<QueuePair>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) monitor: Arc<LivenessMonitor>,
    pub(crate) crawler: Option<Arc<Crawler>>,
}

impl StatsProbe {
    pub fn snapshot(&self) -> EngineStats {
        let (priority_capacity, backlog_capacity) = self.queues.capacities();
        EngineStats {
            pid: self.monitor.pid(),
            iteration: self.monitor.iteration(),
            stopped: self.monitor.is_stopped(),
            producer: self.producer.snapshot(),
            dispatcher: self.dispatcher.snapshot(),
            queues: QueueStats {
                priority_len: self.queues.priority_len(),
                backlog_len: self.queues.backlog_len(),
                priority_capacity,
                backlog_capacity,
            },
            in_flight: self.pool.in_flight(),
            ledger: self.pool.ledger_counts(),
            crawl: self.crawler.as_ref().map(|c| c.stats()),
            middleware_drops: self.crawler.as_ref().map(|c| c.middleware().drops()),
        }
    }
}
