//! InMemoryStopChannel - テスト・組み込み用の stop channel
//!
//! Keeps the records in a map. `set_writable(false)` makes heartbeats fail,
//! which is how tests exercise the "unwritable shared location" path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::liveness::{LivenessError, LivenessRecord};
use crate::ports::StopChannel;

#[derive(Default)]
struct Slot {
    record: Option<LivenessRecord>,
    heartbeats: u64,
}

#[derive(Default)]
pub struct InMemoryStopChannel {
    slots: Mutex<HashMap<u32, Slot>>,
    read_only: AtomicBool,
}

impl InMemoryStopChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u32, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_writable(&self, writable: bool) {
        self.read_only.store(!writable, Ordering::Release);
    }

    pub fn record(&self, pid: u32) -> Option<LivenessRecord> {
        self.slots().get(&pid).and_then(|slot| slot.record)
    }

    /// Number of successful heartbeat writes for `pid`.
    pub fn heartbeat_count(&self, pid: u32) -> u64 {
        self.slots().get(&pid).map_or(0, |slot| slot.heartbeats)
    }
}

#[async_trait]
impl StopChannel for InMemoryStopChannel {
    async fn poll(&self, pid: u32) -> Result<Option<LivenessRecord>, LivenessError> {
        Ok(self.record(pid))
    }

    async fn heartbeat(&self, pid: u32, record: LivenessRecord) -> Result<(), LivenessError> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(LivenessError::Unavailable(format!(
                "record for pid {pid} is read-only"
            )));
        }
        let mut slots = self.slots();
        let slot = slots.entry(pid).or_default();
        slot.record = Some(record);
        slot.heartbeats += 1;
        Ok(())
    }

    async fn signal_stop(&self, pid: u32) -> Result<(), LivenessError> {
        self.slots().entry(pid).or_default().record = Some(LivenessRecord::Stop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_per_pid() {
        let channel = InMemoryStopChannel::new();
        channel
            .heartbeat(1, LivenessRecord::Heartbeat { iteration: 1, timestamp: 10 })
            .await
            .unwrap();
        channel.signal_stop(2).await.unwrap();

        assert_eq!(
            channel.poll(1).await.unwrap(),
            Some(LivenessRecord::Heartbeat { iteration: 1, timestamp: 10 })
        );
        assert_eq!(channel.poll(2).await.unwrap(), Some(LivenessRecord::Stop));
        assert_eq!(channel.poll(3).await.unwrap(), None);
        assert_eq!(channel.heartbeat_count(1), 1);
        assert_eq!(channel.heartbeat_count(2), 0);
    }

    #[tokio::test]
    async fn read_only_rejects_heartbeats_but_not_stop() {
        let channel = InMemoryStopChannel::new();
        channel.set_writable(false);
        assert!(channel.heartbeat(1, LivenessRecord::heartbeat_now(1)).await.is_err());
        channel.signal_stop(1).await.unwrap();
        assert_eq!(channel.record(1), Some(LivenessRecord::Stop));
    }
}
