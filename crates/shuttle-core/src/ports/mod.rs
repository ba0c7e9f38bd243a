//! Ports - エンジンと外部の境界
//!
//! Each trait is a seam the engine calls through without knowing the
//! transport or collaborator behind it.
//!
//! - **StopChannel**: heartbeat and stop requests (filesystem by default)
//! - **SeedSource**: producer input
//! - **Fetcher**: turns a request into a response
//! - **RecordSink**: receives extracted records
//! - **RequestStage / ResponseStage / ExtractionStage**: middleware

pub mod fetcher;
pub mod middleware;
pub mod record_sink;
pub mod seed_source;
pub mod stop_channel;

pub use self::fetcher::{FetchError, Fetcher};
pub use self::middleware::{ExtractionStage, Flow, RequestStage, ResponseStage};
pub use self::record_sink::{RecordSink, SinkError};
pub use self::seed_source::{Seed, SeedItem, SeedIter, SeedSource};
pub use self::stop_channel::StopChannel;
