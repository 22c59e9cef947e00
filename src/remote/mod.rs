// ABOUTME: Remote API access: the HTTP client plus the trait seam over it
// ABOUTME: Pipelines depend on RemoteSource so tests can substitute a scripted stub

mod client;

pub use client::ApiClient;

use anyhow::Result;
use serde_json::Value;

/// One request against the remote API.
///
/// `fetch_page` asks for page `start` of a paged collection endpoint and
/// `fetch_children` asks for the child collection at an already-built path.
/// Both return the items of the `{ "data": [...] }` envelope.
#[allow(async_fn_in_trait)]
pub trait RemoteSource {
    async fn fetch_page(&self, path: &str, start: u32) -> Result<Vec<Value>>;

    async fn fetch_children(&self, path: &str) -> Result<Vec<Value>>;
}
