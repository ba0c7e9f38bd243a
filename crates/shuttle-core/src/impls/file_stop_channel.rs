//! File-backed stop channel: `<shared-dir>/<pid>_stop`.
//!
//! Every write goes to its own sibling temp file (`<pid>_stop.<ulid>.tmp`)
//! and is renamed into place, so a reader never sees a half-written record
//! and concurrent writers (both loops, `shuttle stop`) never share a temp
//! file. The last rename wins. The directory is created on the first write
//! that needs it.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use ulid::Ulid;

use crate::liveness::{LivenessError, LivenessRecord, STOP_MARKER};
use crate::ports::StopChannel;

#[derive(Debug, Clone)]
pub struct FileStopChannel {
    dir: PathBuf,
}

impl FileStopChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{pid}_stop"))
    }

    fn io_error(path: &Path, source: io::Error) -> LivenessError {
        LivenessError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    async fn write_record(&self, pid: u32, contents: String) -> Result<(), LivenessError> {
        let path = self.record_path(pid);
        let tmp = self.dir.join(format!("{pid}_stop.{}.tmp", Ulid::new()));

        if let Err(err) = tokio::fs::write(&tmp, contents.as_bytes()).await {
            if err.kind() != io::ErrorKind::NotFound {
                return Err(Self::io_error(&tmp, err));
            }
            debug!(dir = %self.dir.display(), "creating liveness directory");
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| Self::io_error(&self.dir, e))?;
            tokio::fs::write(&tmp, contents.as_bytes())
                .await
                .map_err(|e| Self::io_error(&tmp, e))?;
        }

        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::io_error(&path, err));
        }
        Ok(())
    }
}

#[async_trait]
impl StopChannel for FileStopChannel {
    async fn poll(&self, pid: u32) -> Result<Option<LivenessRecord>, LivenessError> {
        let path = self.record_path(pid);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents.parse().map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(&path, err)),
        }
    }

    async fn heartbeat(&self, pid: u32, record: LivenessRecord) -> Result<(), LivenessError> {
        self.write_record(pid, record.to_string()).await
    }

    async fn signal_stop(&self, pid: u32) -> Result<(), LivenessError> {
        self.write_record(pid, STOP_MARKER.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::{LivenessMonitor, Tick};
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_record_polls_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStopChannel::new(dir.path());
        assert!(channel.poll(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeat_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let channel = FileStopChannel::new(&nested);

        let record = LivenessRecord::Heartbeat {
            iteration: 3,
            timestamp: 1_700_000_000,
        };
        channel.heartbeat(42, record).await.unwrap();

        let on_disk = std::fs::read_to_string(nested.join("42_stop")).unwrap();
        assert_eq!(on_disk, "3:1700000000");
        assert_eq!(channel.poll(42).await.unwrap(), Some(record));
        assert_eq!(leftover_temp_files(&nested), 0);
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_heartbeat_and_stop_never_corrupt_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(FileStopChannel::new(dir.path()));

        for round in 1..=200u64 {
            let beat = tokio::spawn({
                let channel = Arc::clone(&channel);
                async move {
                    let record = LivenessRecord::Heartbeat {
                        iteration: round,
                        timestamp: 1,
                    };
                    channel.heartbeat(7, record).await
                }
            });
            let stop = tokio::spawn({
                let channel = Arc::clone(&channel);
                async move { channel.signal_stop(7).await }
            });
            let (beat, stop) = (beat.await.unwrap(), stop.await.unwrap());
            beat.unwrap();
            stop.unwrap();

            match channel.poll(7).await.unwrap() {
                Some(LivenessRecord::Stop) => {}
                Some(LivenessRecord::Heartbeat { iteration, .. }) => assert_eq!(iteration, round),
                None => panic!("record missing after round {round}"),
            }

            // a stop written after the heartbeat finished is what stays on disk
            channel
                .heartbeat(7, LivenessRecord::Heartbeat { iteration: round, timestamp: 1 })
                .await
                .unwrap();
            channel.signal_stop(7).await.unwrap();
            assert_eq!(channel.poll(7).await.unwrap(), Some(LivenessRecord::Stop));
        }
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn operator_written_marker_stops_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(FileStopChannel::new(dir.path()));
        let monitor = LivenessMonitor::new(channel.clone(), 4242);

        assert_eq!(monitor.tick().await, Tick::Proceed { iteration: 1 });

        // operator side: plain echo with trailing newline
        std::fs::write(channel.record_path(4242), "stop\n").unwrap();
        assert_eq!(monitor.tick().await, Tick::Stopped);

        let on_disk = std::fs::read_to_string(channel.record_path(4242)).unwrap();
        assert_eq!(on_disk, "stop\n");
    }

    #[tokio::test]
    async fn unwritable_location_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let channel = FileStopChannel::new(&blocker);

        let err = channel
            .heartbeat(1, LivenessRecord::heartbeat_now(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LivenessError::Io { .. }));

        // the monitor shrugs it off
        let monitor = LivenessMonitor::new(Arc::new(channel), 1);
        assert_eq!(monitor.tick().await, Tick::Proceed { iteration: 1 });
    }
}
