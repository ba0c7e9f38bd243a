//! Queue pair: a priority tier for freshly produced work and a backlog tier
//! that absorbs everything else.

mod bounded;

pub use bounded::BoundedQueue;

use thiserror::Error;

use crate::domain::Task;

/// A non-suspending enqueue met a full queue. The task is handed back so the
/// caller decides what happens to it.
#[derive(Debug, Error)]
#[error("queue is full (capacity {capacity}), rejected {task:?}")]
pub struct QueueFull {
    pub task: Task,
    pub capacity: usize,
}

impl QueueFull {
    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Which tier a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Priority,
    Backlog,
}

pub struct QueuePair {
    priority: BoundedQueue<Task>,
    backlog: BoundedQueue<Task>,
}

impl QueuePair {
    pub fn new(priority_capacity: usize, backlog_capacity: usize) -> Self {
        Self {
            priority: BoundedQueue::new(priority_capacity),
            backlog: BoundedQueue::new(backlog_capacity),
        }
    }

    /// Append to the backlog, waiting while it is full. Never drops work.
    pub async fn enqueue_backlog(&self, task: Task) {
        self.backlog.push(task).await
    }

    pub fn try_enqueue_backlog(&self, task: Task) -> Result<(), QueueFull> {
        self.backlog.try_push(task).map_err(|task| QueueFull {
            task,
            capacity: self.backlog.capacity(),
        })
    }

    /// Append to the priority tier without waiting.
    pub fn enqueue_priority(&self, task: Task) -> Result<(), QueueFull> {
        self.priority.try_push(task).map_err(|task| QueueFull {
            task,
            capacity: self.priority.capacity(),
        })
    }

    pub fn try_dequeue_priority(&self) -> Option<Task> {
        self.priority.try_pop()
    }

    pub fn try_dequeue_backlog(&self) -> Option<Task> {
        self.backlog.try_pop()
    }

    pub fn try_dequeue(&self, first: Tier) -> Option<(Tier, Task)> {
        let (a, b) = match first {
            Tier::Priority => (Tier::Priority, Tier::Backlog),
            Tier::Backlog => (Tier::Backlog, Tier::Priority),
        };
        self.try_dequeue_tier(a)
            .map(|t| (a, t))
            .or_else(|| self.try_dequeue_tier(b).map(|t| (b, t)))
    }

    fn try_dequeue_tier(&self, tier: Tier) -> Option<Task> {
        match tier {
            Tier::Priority => self.try_dequeue_priority(),
            Tier::Backlog => self.try_dequeue_backlog(),
        }
    }

    /// Combined length of both tiers.
    pub fn size(&self) -> usize {
        self.priority.len() + self.backlog.len()
    }

    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// `(priority, backlog)` capacities.
    pub fn capacities(&self) -> (usize, usize) {
        (self.priority.capacity(), self.backlog.capacity())
    }

    pub fn shrink(&self) {
        self.priority.shrink();
        self.backlog.shrink();
    }
}
