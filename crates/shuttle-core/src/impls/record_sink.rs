//! Record sinks for development and tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::ports::{RecordSink, SinkError};

/// Keeps every record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Value>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<Value> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn emit(&self, record: Value) -> Result<(), SinkError> {
        self.guard().push(record);
        Ok(())
    }
}

/// Logs each record at `info` under the `shuttle::records` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl RecordSink for TracingSink {
    async fn emit(&self, record: Value) -> Result<(), SinkError> {
        info!(target: "shuttle::records", %record, "record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.emit(json!({"n": 1})).await.unwrap();
        sink.emit(json!({"n": 2})).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records(), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn tracing_sink_accepts_everything() {
        TracingSink.emit(json!(null)).await.unwrap();
    }
}
