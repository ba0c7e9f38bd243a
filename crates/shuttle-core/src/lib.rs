//! shuttle-core
//!
//! Bounded-concurrency scheduling engine for crawl pipelines.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, crawl の Request/Response/Extraction）
//! - **queue**: priority / backlog の bounded queue pair
//! - **pool**: permit で同時実行数を制限する worker pool と task ledger
//! - **liveness**: heartbeat と stop marker のプロトコル
//! - **ports**: 抽象化レイヤー（StopChannel, SeedSource, Fetcher, RecordSink, middleware stage）
//! - **impls**: 実装（FileStopChannel, InMemoryStopChannel, 標準 stage など）
//! - **app**: producer / dispatcher loop と EngineBuilder
//! - **config**: EngineConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod liveness;
pub mod pool;
pub mod ports;
pub mod queue;

pub use app::{Engine, EngineBuilder, EngineStats, MiddlewareChain, ShutdownHandle, StatsProbe};
pub use config::EngineConfig;
pub use domain::{Request, Response, Task, TaskError, TaskId};
pub use error::ShuttleError;
