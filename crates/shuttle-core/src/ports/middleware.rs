//! Middleware stage traits.
//!
//! Every stage takes an item and either passes on a (possibly rewritten)
//! item or drops it. Closures implement the traits directly.

use crate::domain::{Extraction, Request, Response};

#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Continue(T),
    Drop,
}

impl<T> Flow<T> {
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Flow<U> {
        match self {
            Self::Continue(item) => Flow::Continue(f(item)),
            Self::Drop => Flow::Drop,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Continue(item) => Some(item),
            Self::Drop => None,
        }
    }
}

/// Runs before a request becomes a queued task. May rewrite or veto it.
pub trait RequestStage: Send + Sync {
    fn process_request(&self, request: Request) -> Flow<Request>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Runs after a fetch completes. May rewrite, annotate or veto the response.
pub trait ResponseStage: Send + Sync {
    fn process_response(&self, response: Response) -> Flow<Response>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Turns a response into follow-up requests and output records.
pub trait ExtractionStage: Send + Sync {
    fn extract(&self, response: &Response) -> Flow<Extraction>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> RequestStage for F
where
    F: Fn(Request) -> Flow<Request> + Send + Sync,
{
    fn process_request(&self, request: Request) -> Flow<Request> {
        self(request)
    }
}

impl<F> ResponseStage for F
where
    F: Fn(Response) -> Flow<Response> + Send + Sync,
{
    fn process_response(&self, response: Response) -> Flow<Response> {
        self(response)
    }
}

impl<F> ExtractionStage for F
where
    F: Fn(&Response) -> Flow<Extraction> + Send + Sync,
{
    fn extract(&self, response: &Response) -> Flow<Extraction> {
        self(response)
    }
}
