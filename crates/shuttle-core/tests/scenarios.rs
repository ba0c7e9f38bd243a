//! End-to-end scenarios across queue, pool, liveness and the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use shuttle_core::app::{DispatcherLoop, MiddlewareChain};
use shuttle_core::config::EngineConfig;
use shuttle_core::domain::{Extraction, Request, Response, Task};
use shuttle_core::impls::{DepthLimit, FileStopChannel, MemorySink, SeenFilter, StartUrls, SuccessOnly};
use shuttle_core::liveness::{LivenessMonitor, LivenessRecord};
use shuttle_core::pool::WorkerPool;
use shuttle_core::ports::{FetchError, Fetcher, Flow, StopChannel};
use shuttle_core::queue::{QueuePair, Tier};
use shuttle_core::EngineBuilder;

fn noop() -> Task {
    Task::blocking(|| Ok(()))
}

/// `/n` links to `/2n` and `/2n+1` while they are `<= last`.
struct TreeSite {
    last: u32,
}

#[async_trait]
impl Fetcher for TreeSite {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let n: u32 = request
            .url
            .trim_start_matches('/')
            .parse()
            .map_err(|_| FetchError::Failed {
                url: request.url.clone(),
                reason: "not found".into(),
            })?;
        let body = [2 * n, 2 * n + 1]
            .into_iter()
            .filter(|c| *c <= self.last)
            .map(|c| format!("/{c}"))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Response::new(request.clone(), 200, body))
    }
}

fn links(response: &Response) -> Flow<Extraction> {
    let mut out = Extraction::new().with_record(json!({ "url": response.url(), "depth": response.request.depth }));
    for link in response.text().split_whitespace() {
        out = out.with_request(response.request.follow(link));
    }
    Flow::Continue(out)
}

#[tokio::test]
async fn backlog_enqueue_waits_for_room() {
    let queues = Arc::new(QueuePair::new(1, 1));
    queues.enqueue_backlog(noop()).await;

    let second = tokio::spawn({
        let queues = Arc::clone(&queues);
        async move { queues.enqueue_backlog(noop()).await }
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(!second.is_finished());
    assert_eq!(queues.backlog_len(), 1);

    assert!(queues.try_dequeue_backlog().is_some());
    tokio::time::timeout(Duration::from_secs(1), second)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queues.backlog_len(), 1);
}

#[tokio::test]
async fn priority_full_hands_the_task_back() {
    let queues = QueuePair::new(1, 1);
    queues.enqueue_priority(noop().with_label("first")).unwrap();
    let full = queues.enqueue_priority(noop().with_label("second")).unwrap_err();
    assert_eq!(full.capacity, 1);
    assert_eq!(full.into_task().label(), Some("second"));
}

#[tokio::test]
async fn one_dispatcher_tick_prefers_priority() {
    let dir = tempfile::tempdir().unwrap();
    let channel: Arc<dyn StopChannel> = Arc::new(FileStopChannel::new(dir.path()));
    let monitor = Arc::new(LivenessMonitor::new(channel, 1001));
    let queues = Arc::new(QueuePair::new(3, 3));
    for _ in 0..3 {
        queues.enqueue_priority(noop()).unwrap();
        queues.enqueue_backlog(noop()).await;
    }
    let pool = Arc::new(WorkerPool::new(10, 16));
    let mut dispatcher = DispatcherLoop::new(Arc::clone(&queues), pool, monitor, Duration::from_millis(10));

    assert_eq!(dispatcher.tick().await, Some(Tier::Priority));
    assert_eq!(queues.priority_len(), 2);
    assert_eq!(queues.backlog_len(), 3);
    let stats = dispatcher.stats();
    assert_eq!((stats.dequeued_priority, stats.dequeued_backlog, stats.submitted), (1, 0, 1));
}

#[tokio::test]
async fn stop_marker_halts_dispatch_and_is_never_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let files = Arc::new(FileStopChannel::new(dir.path()));
    let monitor = Arc::new(LivenessMonitor::new(files.clone(), 1002));
    let queues = Arc::new(QueuePair::new(3, 3));
    queues.enqueue_priority(noop()).unwrap();
    queues.enqueue_backlog(noop()).await;
    let pool = Arc::new(WorkerPool::new(2, 16));
    let mut dispatcher = DispatcherLoop::new(Arc::clone(&queues), Arc::clone(&pool), monitor, Duration::from_millis(10));

    // a normal tick leaves a heartbeat behind
    dispatcher.tick().await;
    assert!(matches!(
        files.poll(1002).await.unwrap(),
        Some(LivenessRecord::Heartbeat { iteration: 1, .. })
    ));

    files.signal_stop(1002).await.unwrap();
    files.signal_stop(1002).await.unwrap();
    for _ in 0..3 {
        assert_eq!(dispatcher.tick().await, None);
    }

    assert_eq!(queues.size(), 1);
    assert_eq!(dispatcher.stats().submitted, 1);
    let contents = std::fs::read_to_string(files.record_path(1002)).unwrap();
    assert_eq!(contents, "stop");
}

#[tokio::test]
async fn crawl_runs_to_completion_and_stops_on_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        pool_capacity: 3,
        priority_capacity: 4,
        backlog_capacity: 4,
        poll_interval_ms: 5,
        shared_dir: dir.path().to_path_buf(),
        shutdown_grace_secs: 1,
        ..EngineConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let chain = MiddlewareChain::new()
        .with_request_stage(DepthLimit::new(8))
        .with_request_stage(SeenFilter::new())
        .with_response_stage(SuccessOnly)
        .with_extraction_stage(links);

    let engine = EngineBuilder::new(config)
        .seed_source(StartUrls::new(["/1"]))
        .fetcher(TreeSite { last: 31 })
        .middleware(chain)
        .record_sink(sink.clone())
        .pid(4242)
        .build()
        .unwrap();
    let shutdown = engine.shutdown_handle();
    let probe = engine.stats_probe();
    let running = tokio::spawn(engine.run());

    tokio::time::timeout(Duration::from_secs(10), async {
        while sink.len() < 31 || !probe.snapshot().is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("crawl did not finish");

    let files = FileStopChannel::new(dir.path());
    assert!(matches!(files.poll(4242).await.unwrap(), Some(LivenessRecord::Heartbeat { .. })));

    // a heartbeat racing the write can clobber it; writing again is harmless
    tokio::time::timeout(Duration::from_secs(5), async {
        while !probe.snapshot().stopped {
            files.signal_stop(4242).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stop marker was not observed");

    shutdown.shutdown();
    let stats = running.await.unwrap();

    assert!(stats.stopped);
    let crawl = stats.crawl.unwrap();
    assert_eq!(crawl.fetched, 31);
    assert_eq!(crawl.fetch_failed, 0);
    assert_eq!(crawl.records_emitted, 31);
    assert_eq!(stats.ledger.succeeded, 31);
    assert_eq!(stats.ledger.failed, 0);
    assert_eq!(stats.producer.enqueued, 1);

    let mut depths: Vec<u64> = sink
        .records()
        .iter()
        .filter_map(|r| r["depth"].as_u64())
        .collect();
    depths.sort_unstable();
    assert_eq!(depths.first(), Some(&0));
    assert_eq!(depths.last(), Some(&4));
}
