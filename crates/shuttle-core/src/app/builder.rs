//! EngineBuilder - engine の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターン
//! - 起動時検証（Fail-fast 設計）: 設定の不備は `build()` で返す
//! - 1 プロセス 1 pool。pool は builder が作って各 loop に `Arc` で渡す

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::app::crawl::Crawler;
use crate::app::dispatcher_loop::DispatcherLoop;
use crate::app::middleware::MiddlewareChain;
use crate::app::producer_loop::ProducerLoop;
use crate::app::status::{EngineStats, StatsProbe};
use crate::config::{ConfigError, EngineConfig};
use crate::impls::{FileStopChannel, TracingSink};
use crate::liveness::LivenessMonitor;
use crate::pool::WorkerPool;
use crate::ports::{Fetcher, RecordSink, SeedSource, StopChannel};
use crate::queue::QueuePair;

/// BuildError は engine 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("no seed source was given")]
    MissingSeedSource,

    #[error("middleware stages were registered but no fetcher was given")]
    MissingFetcher,
}

/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .seed_source(StartUrls::new(["https://example.test/"]))
///     .fetcher(my_fetcher)
///     .middleware(MiddlewareChain::new().with_request_stage(SeenFilter::new()))
///     .build()?;
/// let stats = engine.run().await;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    seed: Option<Box<dyn SeedSource>>,
    middleware: MiddlewareChain,
    fetcher: Option<Arc<dyn Fetcher>>,
    sink: Option<Arc<dyn RecordSink>>,
    stop_channel: Option<Arc<dyn StopChannel>>,
    pid: Option<u32>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            seed: None,
            middleware: MiddlewareChain::new(),
            fetcher: None,
            sink: None,
            stop_channel: None,
            pid: None,
        }
    }

    pub fn seed_source(mut self, source: impl SeedSource + 'static) -> Self {
        self.seed = Some(Box::new(source));
        self
    }

    pub fn middleware(mut self, chain: MiddlewareChain) -> Self {
        self.middleware = chain;
        self
    }

    /// Enables crawl tasks. Without a fetcher, seed requests are skipped.
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Defaults to [`TracingSink`].
    pub fn record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Defaults to a [`FileStopChannel`] under `config.shared_dir`.
    pub fn stop_channel(mut self, channel: Arc<dyn StopChannel>) -> Self {
        self.stop_channel = Some(channel);
        self
    }

    /// Key for the liveness record. Defaults to this process id.
    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// # 検証
    /// - 容量が 0 の設定は `InvalidConfig`
    /// - seed source が無ければ `MissingSeedSource`
    /// - stage があるのに fetcher が無ければ `MissingFetcher`
    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;
        let seed = self.seed.ok_or(BuildError::MissingSeedSource)?;
        if self.fetcher.is_none() && !self.middleware.is_empty() {
            return Err(BuildError::MissingFetcher);
        }

        let config = self.config;
        let queues = Arc::new(QueuePair::new(config.priority_capacity, config.backlog_capacity));
        let pool = Arc::new(WorkerPool::new(config.pool_capacity, config.ledger_retention));

        let channel = self
            .stop_channel
            .unwrap_or_else(|| Arc::new(FileStopChannel::new(config.shared_dir.clone())));
        let pid = self.pid.unwrap_or_else(std::process::id);
        let monitor = Arc::new(LivenessMonitor::new(channel, pid));

        let crawler = self.fetcher.map(|fetcher| {
            let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
            Arc::new(Crawler::new(self.middleware, fetcher, sink, Arc::clone(&queues)))
        });

        let mut producer = ProducerLoop::new(
            seed,
            Arc::clone(&queues),
            Arc::clone(&monitor),
            config.pool_capacity,
            config.tick_interval(),
        )
        .with_overflow(config.priority_overflow);
        if let Some(crawler) = &crawler {
            producer = producer.with_crawler(Arc::clone(crawler));
        }

        let dispatcher = DispatcherLoop::new(
            Arc::clone(&queues),
            Arc::clone(&pool),
            Arc::clone(&monitor),
            config.tick_interval(),
        )
        .with_order(config.dispatch_order);

        let probe = StatsProbe {
            producer: producer.counters(),
            dispatcher: dispatcher.counters(),
            queues: Arc::clone(&queues),
            pool: Arc::clone(&pool),
            monitor: Arc::clone(&monitor),
            crawler,
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Engine {
            config,
            queues,
            pool,
            monitor,
            producer,
            dispatcher,
            shutdown: ShutdownHandle {
                tx: Arc::new(shutdown),
            },
            probe,
        })
    }
}

/// Asks a running engine to stop its loops. Unlike the stop marker this is
/// local to the process and never touches the liveness record.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

pub struct Engine {
    config: EngineConfig,
    queues: Arc<QueuePair>,
    pool: Arc<WorkerPool>,
    monitor: Arc<LivenessMonitor>,
    producer: ProducerLoop,
    dispatcher: DispatcherLoop,
    shutdown: ShutdownHandle,
    probe: StatsProbe,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queues(&self) -> Arc<QueuePair> {
        Arc::clone(&self.queues)
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    pub fn monitor(&self) -> Arc<LivenessMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats_probe(&self) -> StatsProbe {
        self.probe.clone()
    }

    /// Run both loops on the current task until shutdown, then give
    /// in-flight tasks up to `shutdown_grace` to finish.
    pub async fn run(self) -> EngineStats {
        let Engine {
            config,
            pool,
            monitor,
            producer,
            dispatcher,
            shutdown,
            probe,
            ..
        } = self;
        info!(
            pid = monitor.pid(),
            pool_capacity = config.pool_capacity,
            priority_capacity = config.priority_capacity,
            backlog_capacity = config.backlog_capacity,
            "engine started"
        );

        tokio::join!(producer.run(shutdown.subscribe()), dispatcher.run(shutdown.subscribe()));

        let grace = config.shutdown_grace();
        if !pool.wait_idle(grace).await {
            warn!(in_flight = pool.in_flight(), ?grace, "tasks still running after shutdown grace");
        }

        let stats = probe.snapshot();
        let crawl = stats.crawl.unwrap_or_default();
        info!(
            submitted = stats.dispatcher.submitted,
            succeeded = stats.ledger.succeeded,
            failed = stats.ledger.failed,
            fetch_failed = crawl.fetch_failed,
            feedback_dropped = crawl.feedback_dropped,
            feedback_pending = crawl.feedback_pending,
            "engine stopped"
        );
        stats
    }
}
