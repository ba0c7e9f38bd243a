//! Built-in middleware stages.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::domain::{Request, Response};
use crate::ports::{Flow, RequestStage, ResponseStage};

/// Drops requests deeper than `max_depth` hops from their seed.
#[derive(Debug, Clone, Copy)]
pub struct DepthLimit {
    pub max_depth: u32,
}

impl DepthLimit {
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }
}

impl RequestStage for DepthLimit {
    fn process_request(&self, request: Request) -> Flow<Request> {
        if request.depth > self.max_depth {
            Flow::Drop
        } else {
            Flow::Continue(request)
        }
    }

    fn name(&self) -> &str {
        "depth_limit"
    }
}

/// Lets each URL through once per process.
///
/// The set only grows; a long crawl should bound it with [`DepthLimit`] or
/// a domain filter.
#[derive(Debug, Default)]
pub struct SeenFilter {
    seen: Mutex<HashSet<String>>,
}

impl SeenFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestStage for SeenFilter {
    fn process_request(&self, request: Request) -> Flow<Request> {
        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.url.clone());
        if fresh {
            Flow::Continue(request)
        } else {
            Flow::Drop
        }
    }

    fn name(&self) -> &str {
        "seen_filter"
    }
}

/// Drops non-2xx responses before extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuccessOnly;

impl ResponseStage for SuccessOnly {
    fn process_response(&self, response: Response) -> Flow<Response> {
        if response.is_success() {
            Flow::Continue(response)
        } else {
            Flow::Drop
        }
    }

    fn name(&self) -> &str {
        "success_only"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    fn depth_limit(#[case] depth: u32, #[case] kept: bool) {
        let mut request = Request::new("u");
        request.depth = depth;
        assert_eq!(!DepthLimit::new(2).process_request(request).is_drop(), kept);
    }

    #[test]
    fn seen_filter_passes_each_url_once() {
        let filter = SeenFilter::new();
        assert!(!filter.process_request(Request::new("a")).is_drop());
        assert!(filter.process_request(Request::new("a")).is_drop());
        assert!(!filter.process_request(Request::new("b")).is_drop());
        assert_eq!(filter.len(), 2);
    }

    #[rstest]
    #[case(200, true)]
    #[case(299, true)]
    #[case(301, false)]
    #[case(500, false)]
    fn success_only(#[case] status: u16, #[case] kept: bool) {
        let response = Response::new(Request::new("u"), status, Vec::new());
        assert_eq!(!SuccessOnly.process_response(response).is_drop(), kept);
    }
}
