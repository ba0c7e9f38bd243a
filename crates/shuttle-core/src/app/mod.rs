//! App - アプリケーション層
//!
//! ports・queue・pool を組み合わせて engine を組み立てます。
//!
//! # 主要コンポーネント
//! - **EngineBuilder / Engine**: 構築とワイヤリング、2 つの loop の実行
//! - **ProducerLoop**: seed source → priority queue
//! - **DispatcherLoop**: queue pair → worker pool
//! - **Crawler**: Request を fetch → middleware → feedback する Task に変換
//! - **MiddlewareChain**: request / response / extraction stage
//! - **StatsProbe**: 実行中のスナップショット

pub mod builder;
pub mod crawl;
pub mod dispatcher_loop;
pub mod middleware;
pub mod producer_loop;
pub mod status;

pub use self::builder::{BuildError, Engine, EngineBuilder, ShutdownHandle};
pub use self::crawl::{CrawlStats, Crawler};
pub use self::dispatcher_loop::{DispatcherLoop, DispatcherStats};
pub use self::middleware::{MiddlewareChain, MiddlewareDrops};
pub use self::producer_loop::{ProducerLoop, ProducerStats};
pub use self::status::{EngineStats, QueueStats, StatsProbe};
