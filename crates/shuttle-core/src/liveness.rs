//! Liveness record and stop flag.
//!
//! Each process owns one record, keyed by its pid. Per tick a loop calls
//! [`LivenessMonitor::tick`]:
//! 1. record holds the stop marker → set the stop flag, never write again
//! 2. otherwise → write `<iteration>:<epoch-seconds>` and carry on
//!
//! An operator stops a process by writing the marker into its record.
//! Heartbeat failures are logged and ignored; liveness is best-effort.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ports::StopChannel;

/// Content an operator writes to request a graceful stop.
pub const STOP_MARKER: &str = "stop";

#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("liveness record {path} is not accessible: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed liveness record: {0:?}")]
    Malformed(String),

    #[error("liveness channel is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessRecord {
    Stop,
    Heartbeat { iteration: u64, timestamp: i64 },
}

impl LivenessRecord {
    pub fn heartbeat_now(iteration: u64) -> Self {
        Self::Heartbeat {
            iteration,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

impl fmt::Display for LivenessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str(STOP_MARKER),
            Self::Heartbeat {
                iteration,
                timestamp,
            } => write!(f, "{iteration}:{timestamp}"),
        }
    }
}

impl FromStr for LivenessRecord {
    type Err = LivenessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // echo で書かれた場合の末尾改行を許容する
        let s = s.trim();
        if s == STOP_MARKER {
            return Ok(Self::Stop);
        }
        let malformed = || LivenessError::Malformed(s.to_string());
        let (iteration, timestamp) = s.split_once(':').ok_or_else(malformed)?;
        Ok(Self::Heartbeat {
            iteration: iteration.parse().map_err(|_| malformed())?,
            timestamp: timestamp.parse().map_err(|_| malformed())?,
        })
    }
}

/// Process-wide stop flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `true` if this call flipped the flag.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Proceed { iteration: u64 },
    Stopped,
}

impl Tick {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Runs the per-tick protocol against a [`StopChannel`].
///
/// Shared by the producer and the dispatcher. The iteration counter lives
/// here rather than in the loops so the numbers written to the one record
/// are strictly increasing. `ticking` serializes poll and write so the
/// loops never land their heartbeats out of order.
pub struct LivenessMonitor {
    channel: Arc<dyn StopChannel>,
    pid: u32,
    stop: StopFlag,
    iteration: AtomicU64,
    ticking: Mutex<()>,
}

impl LivenessMonitor {
    pub fn new(channel: Arc<dyn StopChannel>, pid: u32) -> Self {
        Self {
            channel,
            pid,
            stop: StopFlag::new(),
            iteration: AtomicU64::new(0),
            ticking: Mutex::new(()),
        }
    }

    pub fn for_current_process(channel: Arc<dyn StopChannel>) -> Self {
        Self::new(channel, std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_set()
    }

    /// Last iteration written (0 before the first heartbeat).
    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Acquire)
    }

    pub async fn tick(&self) -> Tick {
        if self.stop.is_set() {
            return Tick::Stopped;
        }
        let _ticking = self.ticking.lock().await;
        if self.stop.is_set() {
            return Tick::Stopped;
        }

        match self.channel.poll(self.pid).await {
            Ok(Some(LivenessRecord::Stop)) => {
                if self.stop.set() {
                    info!(pid = self.pid, "stop marker observed, no longer admitting work");
                }
                return Tick::Stopped;
            }
            Ok(_) => {}
            Err(err) => warn!(pid = self.pid, error = %err, "failed to read liveness record"),
        }

        let iteration = self.iteration.fetch_add(1, Ordering::AcqRel) + 1;
        let record = LivenessRecord::heartbeat_now(iteration);
        if let Err(err) = self.channel.heartbeat(self.pid, record).await {
            warn!(pid = self.pid, iteration, error = %err, "failed to write heartbeat");
        }
        Tick::Proceed { iteration }
    }
}
