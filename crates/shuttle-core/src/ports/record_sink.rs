//! RecordSink port - 抽出されたレコードの出口
//!
//! The engine does not define a storage format; it only hands records over.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record sink rejected record: {0}")]
pub struct SinkError(pub String);

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn emit(&self, record: Value) -> Result<(), SinkError>;
}
