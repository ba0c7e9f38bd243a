//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileStopChannel**: `<shared-dir>/<pid>_stop` を使う本番用 stop channel
//! - **InMemoryStopChannel**: テスト・組み込み用
//! - **MemorySink / TracingSink**: 開発用の record sink
//! - **DepthLimit / SeenFilter / SuccessOnly**: よく使う middleware stage
//! - **StartUrls**: 固定 URL リストの seed source

pub mod file_stop_channel;
pub mod inmem_stop_channel;
pub mod record_sink;
pub mod seeds;
pub mod stages;

pub use self::file_stop_channel::FileStopChannel;
pub use self::inmem_stop_channel::InMemoryStopChannel;
pub use self::record_sink::{MemorySink, TracingSink};
pub use self::seeds::StartUrls;
pub use self::stages::{DepthLimit, SeenFilter, SuccessOnly};
