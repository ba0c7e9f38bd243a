//! Domain model (task, ids, crawl values).

pub mod crawl;
pub mod ids;
pub mod task;

pub use crawl::{Extraction, Request, Response};
pub use ids::TaskId;
pub use task::{Task, TaskError, TaskKind, TaskResult};
