//! Seed sources.

use crate::domain::Request;
use crate::ports::{Seed, SeedItem, SeedSource};

/// Yields a fixed list of start requests once, then nothing.
#[derive(Debug, Clone)]
pub struct StartUrls {
    pending: Option<Vec<Request>>,
}

impl StartUrls {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: Some(urls.into_iter().map(Request::new).collect()),
        }
    }
}

impl SeedSource for StartUrls {
    fn next_seed(&mut self) -> Option<Seed> {
        let requests = self.pending.take()?;
        Some(Seed::burst(requests.into_iter().map(SeedItem::Request)))
    }
}
