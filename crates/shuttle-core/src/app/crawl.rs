//! Crawler - Request から Task を作る
//!
//! # フロー（1 task あたり）
//! 1. `Fetcher::fetch()` で Response を取得
//! 2. response stages
//! 3. extraction stages → records は RecordSink へ
//! 4. 新しい Request は request stages を通して backlog へ戻す
//!
//! Follow-up tasks are pushed with `try_enqueue_backlog`. When the backlog
//! is full the push is handed to a detached feeder so the running task can
//! return its pool permit; a task that waited on the backlog while holding a
//! permit could starve the dispatcher that drains it.
//!
//! Feeders are capped at the backlog capacity. Past the cap a follow-up is
//! dropped and counted in `feedback_dropped`. Feeders still parked at
//! shutdown show up as `feedback_pending`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::app::middleware::MiddlewareChain;
use crate::domain::{Request, Task, TaskError, TaskResult};
use crate::ports::{Fetcher, RecordSink};
use crate::queue::QueuePair;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub fetched: u64,
    pub fetch_failed: u64,
    pub records_emitted: u64,
    pub requests_followed: u64,
    pub feedback_deferred: u64,
    pub feedback_dropped: u64,
    /// Deferred follow-ups still waiting for backlog room.
    pub feedback_pending: u64,
}

#[derive(Default)]
struct CrawlCounters {
    fetched: AtomicU64,
    fetch_failed: AtomicU64,
    records_emitted: AtomicU64,
    requests_followed: AtomicU64,
    feedback_deferred: AtomicU64,
    feedback_dropped: AtomicU64,
}

pub struct Crawler {
    middleware: MiddlewareChain,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn RecordSink>,
    queues: Arc<QueuePair>,
    feeders: Arc<Semaphore>,
    max_feeders: usize,
    counters: CrawlCounters,
}

impl Crawler {
    pub fn new(
        middleware: MiddlewareChain,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn RecordSink>,
        queues: Arc<QueuePair>,
    ) -> Self {
        let (_, backlog_capacity) = queues.capacities();
        let max_feeders = backlog_capacity.max(1);
        Self {
            middleware,
            fetcher,
            sink,
            queues,
            feeders: Arc::new(Semaphore::new(max_feeders)),
            max_feeders,
            counters: CrawlCounters::default(),
        }
    }

    /// Upper bound on deferred follow-ups parked at once.
    pub fn max_feeders(&self) -> usize {
        self.max_feeders
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Run the request stages and wrap the survivor in a task.
    pub fn admit(self: &Arc<Self>, request: Request) -> Option<Task> {
        let request = self.middleware.process_request(request)?;
        let label = request.url.clone();
        let crawler = Arc::clone(self);
        Some(Task::from_future(crawler.crawl(request)).with_label(label))
    }

    async fn crawl(self: Arc<Self>, request: Request) -> TaskResult {
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => {
                self.counters.fetched.fetch_add(1, Ordering::Relaxed);
                response
            }
            Err(err) => {
                self.counters.fetch_failed.fetch_add(1, Ordering::Relaxed);
                return Err(TaskError::failed(err.to_string()));
            }
        };

        let Some(response) = self.middleware.process_response(response) else {
            return Ok(());
        };

        let extraction = self.middleware.extract(&response);
        // 大きい body はここで手放す
        drop(response);

        for record in extraction.records {
            self.sink
                .emit(record)
                .await
                .map_err(|err| TaskError::failed(err.to_string()))?;
            self.counters.records_emitted.fetch_add(1, Ordering::Relaxed);
        }

        for next in extraction.requests {
            if let Some(task) = self.admit(next) {
                self.counters.requests_followed.fetch_add(1, Ordering::Relaxed);
                self.feed_back(task);
            }
        }
        Ok(())
    }

    fn feed_back(&self, task: Task) {
        let Err(full) = self.queues.try_enqueue_backlog(task) else {
            return;
        };
        let Ok(permit) = Arc::clone(&self.feeders).try_acquire_owned() else {
            self.counters.feedback_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                capacity = full.capacity,
                feeders = self.max_feeders,
                label = full.task.label().unwrap_or_default(),
                "backlog and feeders full, dropping follow-up task"
            );
            return;
        };
        self.counters.feedback_deferred.fetch_add(1, Ordering::Relaxed);
        debug!(capacity = full.capacity, "backlog full, deferring follow-up task");

        let queues = Arc::clone(&self.queues);
        let task = full.into_task();
        tokio::spawn(async move {
            queues.enqueue_backlog(task).await;
            drop(permit);
        });
    }

    pub fn stats(&self) -> CrawlStats {
        CrawlStats {
            fetched: self.counters.fetched.load(Ordering::Relaxed),
            fetch_failed: self.counters.fetch_failed.load(Ordering::Relaxed),
            records_emitted: self.counters.records_emitted.load(Ordering::Relaxed),
            requests_followed: self.counters.requests_followed.load(Ordering::Relaxed),
            feedback_deferred: self.counters.feedback_deferred.load(Ordering::Relaxed),
            feedback_dropped: self.counters.feedback_dropped.load(Ordering::Relaxed),
            feedback_pending: self.max_feeders.saturating_sub(self.feeders.available_permits()) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Response;
    use crate::impls::{MemorySink, SeenFilter};
    use crate::pool::WorkerPool;
    use crate::ports::{FetchError, Flow};
    use crate::domain::Extraction;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// `/n` links to `/2n` and `/2n+1` up to `last`; `/missing` fails.
    struct TreeSite {
        last: u32,
    }

    #[async_trait]
    impl Fetcher for TreeSite {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            let n: u32 = request.url.trim_start_matches('/').parse().map_err(|_| FetchError::Failed {
                url: request.url.clone(),
                reason: "no such page".into(),
            })?;
            let links: Vec<String> = [2 * n, 2 * n + 1]
                .into_iter()
                .filter(|c| *c <= self.last)
                .map(|c| format!("/{c}"))
                .collect();
            Ok(Response::new(request.clone(), 200, links.join(" ")))
        }
    }

    fn link_extractor(response: &Response) -> Flow<Extraction> {
        let mut out = Extraction::new().with_record(json!({ "page": response.url() }));
        for link in response.text().split_whitespace() {
            out = out.with_request(response.request.follow(link));
        }
        Flow::Continue(out)
    }

    fn crawler(last: u32, backlog: usize, sink: Arc<MemorySink>) -> (Arc<Crawler>, Arc<QueuePair>) {
        let queues = Arc::new(QueuePair::new(4, backlog));
        let chain = MiddlewareChain::new()
            .with_request_stage(SeenFilter::new())
            .with_extraction_stage(link_extractor);
        let crawler = Arc::new(Crawler::new(chain, Arc::new(TreeSite { last }), sink, Arc::clone(&queues)));
        (crawler, queues)
    }

    #[tokio::test]
    async fn crawl_emits_records_and_feeds_back_children() {
        let sink = Arc::new(MemorySink::new());
        let (crawler, queues) = crawler(3, 16, Arc::clone(&sink));
        let pool = WorkerPool::new(2, 16);

        let root = crawler.admit(Request::new("/1")).unwrap();
        pool.submit(root).await.unwrap().wait().await.unwrap();

        assert_eq!(sink.records(), vec![json!({ "page": "/1" })]);
        assert_eq!(queues.backlog_len(), 2);

        // drain everything that was fed back
        while let Some(task) = queues.try_dequeue_backlog() {
            pool.submit(task).await.unwrap().wait().await.unwrap();
        }
        assert_eq!(sink.len(), 3);
        let stats = crawler.stats();
        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.requests_followed, 2);
        assert_eq!(stats.feedback_deferred, 0);
    }

    #[tokio::test]
    async fn duplicate_requests_are_not_admitted() {
        let sink = Arc::new(MemorySink::new());
        let (crawler, _queues) = crawler(3, 16, sink);
        assert!(crawler.admit(Request::new("/1")).is_some());
        assert!(crawler.admit(Request::new("/1")).is_none());
        assert_eq!(crawler.middleware().drops().requests, 1);
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_task() {
        let sink = Arc::new(MemorySink::new());
        let (crawler, _queues) = crawler(3, 16, Arc::clone(&sink));
        let pool = WorkerPool::new(1, 16);

        let task = crawler.admit(Request::new("/missing")).unwrap();
        let err = pool.submit(task).await.unwrap().wait().await.unwrap_err();
        assert!(matches!(err, TaskError::Failed(ref m) if m.contains("no such page")));
        assert_eq!(crawler.stats().fetch_failed, 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn full_backlog_defers_instead_of_blocking() {
        let sink = Arc::new(MemorySink::new());
        let (crawler, queues) = crawler(3, 1, sink);
        let pool = WorkerPool::new(1, 16);

        let root = crawler.admit(Request::new("/1")).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            pool.submit(root).await.unwrap().wait().await
        })
        .await
        .expect("task must not wait on the backlog")
        .unwrap();

        assert_eq!(crawler.stats().feedback_deferred, 1);
        assert_eq!(queues.backlog_len(), 1);

        // the deferred push lands once there is room
        assert!(queues.try_dequeue_backlog().is_some());
        tokio::time::timeout(Duration::from_secs(1), async {
            while queues.backlog_len() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    /// `/hub` links to `/leaf-0` .. `/leaf-{fan_out - 1}`.
    struct Hub {
        fan_out: usize,
    }

    #[async_trait]
    impl Fetcher for Hub {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            let body = if request.url == "/hub" {
                (0..self.fan_out).map(|i| format!("/leaf-{i}")).collect::<Vec<_>>().join(" ")
            } else {
                String::new()
            };
            Ok(Response::new(request.clone(), 200, body))
        }
    }

    #[tokio::test]
    async fn deferred_follow_ups_are_capped_at_backlog_capacity() {
        let queues = Arc::new(QueuePair::new(4, 2));
        let chain = MiddlewareChain::new().with_extraction_stage(link_extractor);
        let crawler = Arc::new(Crawler::new(
            chain,
            Arc::new(Hub { fan_out: 10 }),
            Arc::new(MemorySink::new()),
            Arc::clone(&queues),
        ));
        assert_eq!(crawler.max_feeders(), 2);
        let pool = WorkerPool::new(1, 16);

        let hub = crawler.admit(Request::new("/hub")).unwrap();
        pool.submit(hub).await.unwrap().wait().await.unwrap();

        let stats = crawler.stats();
        assert_eq!(stats.requests_followed, 10);
        assert_eq!(queues.backlog_len(), 2);
        assert_eq!(stats.feedback_deferred, 2);
        assert_eq!(stats.feedback_dropped, 6);
        assert!(stats.feedback_pending <= crawler.max_feeders() as u64);

        // draining the backlog lets the parked feeders land and release their slots
        let mut landed = 0;
        tokio::time::timeout(Duration::from_secs(1), async {
            while landed < 4 {
                if queues.try_dequeue_backlog().is_some() {
                    landed += 1;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            while crawler.stats().feedback_pending > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(queues.backlog_len(), 0);
    }
}
