//! MiddlewareChain - request / response / extraction stage の実行
//!
//! Stages run in registration order. A `Flow::Drop` from any stage ends the
//! chain for that item; it is counted, not treated as an error.
//!
//! Extraction stages each see the same response. Their outputs are
//! concatenated; a drop stops later stages but keeps what earlier stages
//! already produced.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::domain::{Extraction, Request, Response};
use crate::ports::{ExtractionStage, Flow, RequestStage, ResponseStage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MiddlewareDrops {
    pub requests: u64,
    pub responses: u64,
    pub extractions: u64,
}

#[derive(Default)]
struct DropCounters {
    requests: AtomicU64,
    responses: AtomicU64,
    extractions: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    request: Vec<Arc<dyn RequestStage>>,
    response: Vec<Arc<dyn ResponseStage>>,
    extraction: Vec<Arc<dyn ExtractionStage>>,
    drops: Arc<DropCounters>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.request.push(Arc::new(stage));
        self
    }

    pub fn with_response_stage(mut self, stage: impl ResponseStage + 'static) -> Self {
        self.response.push(Arc::new(stage));
        self
    }

    pub fn with_extraction_stage(mut self, stage: impl ExtractionStage + 'static) -> Self {
        self.extraction.push(Arc::new(stage));
        self
    }

    /// `(request, response, extraction)` stage counts.
    pub fn len(&self) -> (usize, usize, usize) {
        (self.request.len(), self.response.len(), self.extraction.len())
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty() && self.extraction.is_empty()
    }

    pub fn process_request(&self, request: Request) -> Option<Request> {
        let mut current = request;
        for stage in &self.request {
            match stage.process_request(current) {
                Flow::Continue(next) => current = next,
                Flow::Drop => {
                    debug!(stage = stage.name(), "request dropped");
                    self.drops.requests.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        Some(current)
    }

    pub fn process_response(&self, response: Response) -> Option<Response> {
        let mut current = response;
        for stage in &self.response {
            let url = current.request.url.clone();
            match stage.process_response(current) {
                Flow::Continue(next) => current = next,
                Flow::Drop => {
                    debug!(stage = stage.name(), %url, "response dropped");
                    self.drops.responses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        Some(current)
    }

    pub fn extract(&self, response: &Response) -> Extraction {
        let mut out = Extraction::new();
        for stage in &self.extraction {
            match stage.extract(response) {
                Flow::Continue(extraction) => out.merge(extraction),
                Flow::Drop => {
                    debug!(stage = stage.name(), url = %response.request.url, "extraction chain stopped");
                    self.drops.extractions.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        out
    }

    pub fn drops(&self) -> MiddlewareDrops {
        MiddlewareDrops {
            requests: self.drops.requests.load(Ordering::Relaxed),
            responses: self.drops.responses.load(Ordering::Relaxed),
            extractions: self.drops.extractions.load(Ordering::Relaxed),
        }
    }
}
