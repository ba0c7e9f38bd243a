//! SeedSource port - producer の入力
//!
//! A seed source is polled once per producer tick when the producer has no
//! sequence in hand. It returns a single task, a lazy sequence of items, or
//! nothing at all for this tick.

use std::fmt;

use crate::domain::{Request, Task};

/// One element of a seed sequence.
pub enum SeedItem {
    Task(Task),
    /// Turned into a crawl task after the request stages.
    Request(Request),
    /// No more work this burst. The sequence is resumed next tick.
    EndOfBurst,
    /// Anything the producer cannot schedule. Skipped and counted.
    Unrecognized(String),
}

impl fmt::Debug for SeedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(task) => f.debug_tuple("Task").field(task).finish(),
            Self::Request(request) => f.debug_tuple("Request").field(&request.url).finish(),
            Self::EndOfBurst => f.write_str("EndOfBurst"),
            Self::Unrecognized(what) => f.debug_tuple("Unrecognized").field(what).finish(),
        }
    }
}

impl From<Task> for SeedItem {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<Request> for SeedItem {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

pub type SeedIter = Box<dyn Iterator<Item = SeedItem> + Send>;

pub enum Seed {
    Single(Task),
    Burst(SeedIter),
}

impl Seed {
    pub fn burst<I>(items: I) -> Self
    where
        I: IntoIterator<Item = SeedItem>,
        I::IntoIter: Send + 'static,
    {
        Self::Burst(Box::new(items.into_iter()))
    }
}

pub trait SeedSource: Send {
    fn next_seed(&mut self) -> Option<Seed>;
}

impl<F> SeedSource for F
where
    F: FnMut() -> Option<Seed> + Send,
{
    fn next_seed(&mut self) -> Option<Seed> {
        self()
    }
}
