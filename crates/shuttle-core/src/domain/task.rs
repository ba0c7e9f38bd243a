//! Task - エンジンが実行する最小単位
//!
//! A task is a zero-argument unit of work. The engine never observes a
//! return value, only whether the body failed. Ownership enforces the
//! "consumed exactly once" rule: the body is an `FnOnce` or a pinned future
//! and is moved out when the pool runs it.

use std::any::Any;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use thiserror::Error;

use super::ids::TaskId;

pub type TaskResult = Result<(), TaskError>;

/// Failure of a single task body, as seen from the pool boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("cancelled before completion")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Self::from_panic(err.into_panic())
        } else {
            Self::Cancelled
        }
    }
}

/// How a task body executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Runs on the blocking thread pool (CPU work, sync I/O).
    Blocking,
    /// Runs as a future on the runtime.
    Async,
}

pub(crate) enum TaskBody {
    Blocking(Box<dyn FnOnce() -> TaskResult + Send + 'static>),
    Async(BoxFuture<'static, TaskResult>),
}

pub struct Task {
    id: TaskId,
    label: Option<String>,
    body: TaskBody,
}

impl Task {
    /// Wrap a blocking closure.
    ///
    /// # 使用例
    /// ```ignore
    /// let task = Task::blocking(|| {
    ///     std::fs::write("out.txt", b"hello").map_err(|e| TaskError::failed(e.to_string()))
    /// });
    /// ```
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        Self {
            id: TaskId::generate(),
            label: None,
            body: TaskBody::Blocking(Box::new(f)),
        }
    }

    /// Wrap a future.
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            id: TaskId::generate(),
            label: None,
            body: TaskBody::Async(Box::pin(fut)),
        }
    }

    /// Attach a human readable label used in logs and the ledger.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> TaskKind {
        match self.body {
            TaskBody::Blocking(_) => TaskKind::Blocking,
            TaskBody::Async(_) => TaskKind::Async,
        }
    }

    pub(crate) fn into_parts(self) -> (TaskId, Option<String>, TaskBody) {
        (self.id, self.label, self.body)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_record_kind_and_label() {
        let t = Task::blocking(|| Ok(())).with_label("write-file");
        assert_eq!(t.kind(), TaskKind::Blocking);
        assert_eq!(t.label(), Some("write-file"));

        let t = Task::from_future(async { Ok(()) });
        assert_eq!(t.kind(), TaskKind::Async);
        assert_eq!(t.label(), None);
    }

    #[test]
    fn debug_does_not_require_body_debug() {
        let t = Task::blocking(|| Ok(())).with_label("x");
        let rendered = format!("{t:?}");
        assert!(rendered.contains("Blocking"));
        assert!(rendered.contains("\"x\""));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert_eq!(err, TaskError::Panicked("boom".to_string()));

        let err = TaskError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "panicked: owned boom");

        let err = TaskError::from_panic(Box::new(42_u32));
        assert!(matches!(err, TaskError::Panicked(_)));
    }
}
