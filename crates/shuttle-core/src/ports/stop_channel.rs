//! StopChannel port - プロセス間の停止要求と heartbeat の運搬路
//!
//! The engine only ever talks to this trait. The filesystem adapter is the
//! default transport; anything that can store one small record per pid
//! (pipe, socket, key-value store) can replace it.

use async_trait::async_trait;

use crate::liveness::{LivenessError, LivenessRecord};

#[async_trait]
pub trait StopChannel: Send + Sync {
    /// Read the current record for `pid`. `None` if it was never written.
    async fn poll(&self, pid: u32) -> Result<Option<LivenessRecord>, LivenessError>;

    /// Overwrite the record for `pid` with a heartbeat.
    async fn heartbeat(&self, pid: u32, record: LivenessRecord) -> Result<(), LivenessError>;

    /// Ask `pid` to stop admitting new work.
    async fn signal_stop(&self, pid: u32) -> Result<(), LivenessError>;
}
