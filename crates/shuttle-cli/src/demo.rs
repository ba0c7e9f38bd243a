//! 合成サイト - `run` サブコマンド用の in-process fetcher
//!
//! Page `/n` links to `/2n` and `/2n+1` up to `pages`, plus `/1` again so the
//! seen filter has something to do. Every `fail_every`-th page answers 500.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use shuttle_core::domain::{Extraction, Request, Response};
use shuttle_core::ports::{FetchError, Fetcher, Flow};

pub struct SyntheticSite {
    pub pages: u32,
    pub latency: Duration,
    pub fail_every: Option<u32>,
}

impl SyntheticSite {
    fn page(&self, n: u32) -> String {
        let mut body = format!("<html><title>page {n}</title><body>");
        for child in [2 * n, 2 * n + 1, 1] {
            if child <= self.pages {
                body.push_str(&format!("<a href=\"/{child}\">{child}</a>"));
            }
        }
        body.push_str("</body></html>");
        body
    }
}

#[async_trait]
impl Fetcher for SyntheticSite {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        tokio::time::sleep(self.latency).await;

        let n = request
            .url
            .trim_start_matches('/')
            .parse::<u32>()
            .ok()
            .filter(|n| (1..=self.pages).contains(n));
        let Some(n) = n else {
            return Ok(Response::new(request.clone(), 404, Vec::new()));
        };
        if self.fail_every.is_some_and(|k| k > 0 && n % k == 0) {
            return Ok(Response::new(request.clone(), 500, Vec::new()));
        }
        Ok(Response::new(request.clone(), 200, self.page(n)))
    }
}

fn hrefs(body: &str) -> impl Iterator<Item = &str> {
    body.split("href=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
}

/// Title becomes a record, every link a follow-up request.
pub fn extract_links(response: &Response) -> Flow<Extraction> {
    let text = response.text();
    let title = text
        .split_once("<title>")
        .and_then(|(_, rest)| rest.split_once("</title>"))
        .map(|(title, _)| title.to_string());

    let mut out = Extraction::new().with_record(json!({
        "url": response.url(),
        "depth": response.request.depth,
        "title": title,
    }));
    for link in hrefs(&text) {
        out = out.with_request(response.request.follow(link));
    }
    Flow::Continue(out)
}
