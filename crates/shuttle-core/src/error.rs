use thiserror::Error;

use crate::app::BuildError;
use crate::config::ConfigError;
use crate::liveness::LivenessError;
use crate::pool::PoolError;
use crate::ports::{FetchError, SinkError};
use crate::queue::QueueFull;

/// Everything the crate can fail with, for callers that want one type.
#[derive(Debug, Error)]
pub enum ShuttleError {
    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Liveness(#[from] LivenessError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

pub type Result<T, E = ShuttleError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use crate::queue::QueuePair;

    fn fill_priority(queues: &QueuePair) -> Result<()> {
        queues.enqueue_priority(Task::blocking(|| Ok(())))?;
        queues.enqueue_priority(Task::blocking(|| Ok(())))?;
        Ok(())
    }

    #[test]
    fn component_errors_convert_with_question_mark() {
        let queues = QueuePair::new(1, 1);
        let err = fill_priority(&queues).unwrap_err();
        assert!(matches!(err, ShuttleError::QueueFull(QueueFull { capacity: 1, .. })));
        assert_eq!(queues.priority_len(), 1);
    }

    #[test]
    fn transparent_display() {
        let err = ShuttleError::from(ConfigError::ZeroCapacity("pool_capacity"));
        assert_eq!(err.to_string(), "pool_capacity must be at least 1");
    }
}
