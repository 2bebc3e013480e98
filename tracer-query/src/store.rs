use async_trait::async_trait;
use backtraced_error::{ReqwestError, SerdeJsonError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

pub mod buckets;
pub mod document;
pub mod dsl;
pub mod http;

pub use dsl::SearchRequest;

/// What the read path needs from the document store.
///
/// Implementations must ignore indices that don't exist instead of failing the
/// request, since shards are selected by date and a day may have no data.
/// Retries, if any, belong to the implementation.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        indices: &[String],
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError>;

    /// Responses come back in the same order as `requests`
    async fn multi_search(
        &self,
        indices: &[String],
        requests: &[SearchRequest],
    ) -> Result<Vec<SearchResponse>, StoreError>;
}

/// Wraps a client so every call gives up at `deadline`
#[derive(Clone)]
pub struct DeadlineBoundClient {
    inner: Arc<dyn SearchClient>,
    deadline: Option<Instant>,
}

impl DeadlineBoundClient {
    pub fn new(inner: Arc<dyn SearchClient>, deadline: Option<Instant>) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.deadline {
            None => call.await,
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(result) => result,
                Err(_elapsed) => Err(StoreError::DeadlineExceeded),
            },
        }
    }
}

#[async_trait]
impl SearchClient for DeadlineBoundClient {
    async fn search(
        &self,
        indices: &[String],
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        self.bounded(self.inner.search(indices, request)).await
    }

    async fn multi_search(
        &self,
        indices: &[String],
        requests: &[SearchRequest],
    ) -> Result<Vec<SearchResponse>, StoreError> {
        self.bounded(self.inner.multi_search(indices, requests)).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Transport(#[from] ReqwestError),
    #[error("store answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("item {position} of the multi search failed: {reason}")]
    ItemFailed { position: usize, reason: String },
    #[error(transparent)]
    Body(#[from] SerdeJsonError),
    #[error("deadline exceeded before the store answered")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Hits,
    /// Absent when no shard was searched, e.g. every selected index is missing
    #[serde(default)]
    pub aggregations: Option<Map<String, Value>>,
    /// Only set on failed `_msearch` items
    #[serde(default)]
    pub error: Option<Value>,
}

impl SearchResponse {
    pub fn total_hits(&self) -> u64 {
        self.hits.total.value()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub total: TotalHits,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// ES 6 reports a plain number, ES 7+ an object with a relation
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Count(u64),
    Tracked { value: u64, relation: String },
}

impl TotalHits {
    pub fn value(&self) -> u64 {
        match self {
            TotalHits::Count(count) => *count,
            TotalHits::Tracked { value, .. } => *value,
        }
    }
}

impl Default for TotalHits {
    fn default() -> Self {
        TotalHits::Count(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_source")]
    pub source: Value,
    #[serde(default)]
    pub sort: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiSearchResponse {
    pub responses: Vec<SearchResponse>,
}

#[cfg(test)]
mod test {
    use super::{MultiSearchResponse, SearchResponse};
    use serde_json::json;

    #[test]
    fn total_hits_both_formats() {
        let es6: SearchResponse =
            serde_json::from_value(json!({"hits": {"total": 25, "hits": []}})).unwrap();
        assert_eq!(es6.total_hits(), 25);
        let es7: SearchResponse = serde_json::from_value(
            json!({"hits": {"total": {"value": 25000, "relation": "eq"}, "hits": []}}),
        )
        .unwrap();
        assert_eq!(es7.total_hits(), 25000);
    }

    #[test]
    fn failed_multi_search_item_keeps_error() {
        let resp: MultiSearchResponse = serde_json::from_value(json!({
            "responses": [
                {"hits": {"total": 0, "hits": []}},
                {"error": {"type": "search_phase_execution_exception"}, "status": 400}
            ]
        }))
        .unwrap();
        assert!(resp.responses[0].error.is_none());
        assert!(resp.responses[1].error.is_some());
        assert!(resp.responses[1].aggregations.is_none());
    }
}
