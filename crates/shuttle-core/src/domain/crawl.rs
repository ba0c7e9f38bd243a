//! Crawl values that flow through the middleware chain.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A URL to fetch, plus whatever the stages want to carry along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    /// Hops from the seed request (seeds are depth 0).
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            meta: Map::new(),
        }
    }

    /// A request discovered while processing `self`.
    pub fn follow(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: self.depth.saturating_add(1),
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request: Request,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(request: Request, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            request,
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }
}

/// Output of the extraction stages for one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub requests: Vec<Request>,
    pub records: Vec<Value>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(mut self, request: Request) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.records.push(record);
        self
    }

    pub fn merge(&mut self, other: Extraction) {
        self.requests.extend(other.requests);
        self.records.extend(other.records);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn follow_increments_depth_and_drops_meta() {
        let seed = Request::new("https://a.test/").with_meta("tag", json!("seed"));
        let child = seed.follow("https://a.test/b");
        assert_eq!(child.depth, 1);
        assert!(child.meta.is_empty());
        assert_eq!(child.follow("https://a.test/c").depth, 2);
    }

    #[test]
    fn follow_saturates_at_max_depth() {
        let deep = Request {
            depth: u32::MAX,
            ..Request::new("https://a.test/")
        };
        assert_eq!(deep.follow("https://a.test/b").depth, u32::MAX);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let r: Request = serde_json::from_value(json!({ "url": "https://a.test/" })).unwrap();
        assert_eq!(r, Request::new("https://a.test/"));
    }

    #[test]
    fn merge_concatenates_in_order() {
        let mut a = Extraction::new()
            .with_request(Request::new("1"))
            .with_record(json!({"n": 1}));
        let b = Extraction::new()
            .with_request(Request::new("2"))
            .with_record(json!({"n": 2}));
        a.merge(b);
        assert_eq!(a.requests.iter().map(|r| r.url.as_str()).collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(a.records, vec![json!({"n": 1}), json!({"n": 2})]);
        assert!(!a.is_empty());
        assert!(Extraction::new().is_empty());
    }

    #[test]
    fn response_helpers() {
        let ok = Response::new(Request::new("u"), 204, b"hi".to_vec());
        assert!(ok.is_success());
        assert_eq!(ok.text(), "hi");
        assert_eq!(ok.url(), "u");
        assert!(!Response::new(Request::new("u"), 404, Vec::new()).is_success());
    }
}
