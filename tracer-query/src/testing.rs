//! Store doubles for tests.

use crate::store::dsl::Query;
use crate::store::{
    Hit, Hits, MultiSearchResponse, SearchClient, SearchRequest, SearchResponse, StoreError,
    TotalHits,
};
use async_trait::async_trait;
use backtraced_error::SerdeJsonError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A span document the way the collector writes it
pub fn span_document(trace_id: &str, span_id: &str, start_time: u64) -> Value {
    json!({
        "traceID": trace_id,
        "spanID": span_id,
        "operationName": "/sample",
        "references": [],
        "startTime": start_time,
        "startTimeMillis": start_time / 1000,
        "duration": 1000,
        "tags": [],
        "logs": [],
        "process": {"serviceName": "jboss2", "tags": []}
    })
}

/// Answers trace id lookups from memory, paging like Elasticsearch does with
/// a `[startTime, spanID]` sort and `search_after`
#[derive(Default)]
pub struct InMemorySpanStore {
    documents: Vec<Value>,
    multi_search_calls: AtomicUsize,
}

impl InMemorySpanStore {
    pub fn insert(&mut self, document: Value) {
        self.documents.push(document);
    }

    pub fn multi_search_calls(&self) -> usize {
        self.multi_search_calls.load(Ordering::SeqCst)
    }

    fn sort_key(document: &Value) -> (u64, String) {
        (
            document["startTime"].as_u64().unwrap_or_default(),
            document["spanID"].as_str().unwrap_or_default().to_string(),
        )
    }

    fn answer(&self, request: &SearchRequest) -> SearchResponse {
        let trace_id = match &request.query {
            Some(Query::Term { field, value }) if field == "traceID" => value.as_str(),
            _ => return SearchResponse::default(),
        };
        let mut matching: Vec<&Value> = self
            .documents
            .iter()
            .filter(|doc| doc["traceID"] == trace_id)
            .collect();
        matching.sort_by_key(|doc| Self::sort_key(doc));
        let total = matching.len() as u64;
        let after = match request.search_after.as_slice() {
            [start, span_id] => Some((
                start.as_u64().unwrap_or_default(),
                span_id.as_str().unwrap_or_default().to_string(),
            )),
            _ => None,
        };
        let hits = matching
            .into_iter()
            .filter(|doc| match &after {
                Some(after) => &Self::sort_key(doc) > after,
                None => true,
            })
            .take(request.size)
            .map(|doc| {
                let (start, span_id) = Self::sort_key(doc);
                Hit {
                    source: doc.clone(),
                    sort: vec![json!(start), json!(span_id)],
                }
            })
            .collect();
        SearchResponse {
            hits: Hits {
                total: TotalHits::Tracked {
                    value: total,
                    relation: "eq".to_string(),
                },
                hits,
            },
            aggregations: None,
            error: None,
        }
    }
}

#[async_trait]
impl SearchClient for InMemorySpanStore {
    async fn search(
        &self,
        _indices: &[String],
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        Ok(self.answer(request))
    }

    async fn multi_search(
        &self,
        _indices: &[String],
        requests: &[SearchRequest],
    ) -> Result<Vec<SearchResponse>, StoreError> {
        self.multi_search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(requests.iter().map(|r| self.answer(r)).collect())
    }
}

/// Replays canned JSON bodies in order and records what was asked
pub struct ScriptedStore {
    responses: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<(Vec<String>, Value)>>,
}

impl ScriptedStore {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(vec![]),
        }
    }

    /// `(indices, request body)` per request, `_msearch` items listed one by one
    pub fn requests(&self) -> Vec<(Vec<String>, Value)> {
        self.requests.lock().clone()
    }

    fn next<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let body = self.responses.lock().pop_front().ok_or(StoreError::Status {
            status: 500,
            body: "no scripted response left".to_string(),
        })?;
        serde_json::from_value(body.clone()).map_err(|e| {
            SerdeJsonError::from_serde_json_error(e, "scripted response", body.to_string()).into()
        })
    }
}

#[async_trait]
impl SearchClient for ScriptedStore {
    async fn search(
        &self,
        indices: &[String],
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        self.requests
            .lock()
            .push((indices.to_vec(), request.to_json()));
        self.next()
    }

    async fn multi_search(
        &self,
        indices: &[String],
        requests: &[SearchRequest],
    ) -> Result<Vec<SearchResponse>, StoreError> {
        self.requests.lock().extend(
            requests
                .iter()
                .map(|request| (indices.to_vec(), request.to_json())),
        );
        let response: MultiSearchResponse = self.next()?;
        Ok(response.responses)
    }
}

/// Never answers
pub struct UnresponsiveStore;

#[async_trait]
impl SearchClient for UnresponsiveStore {
    async fn search(
        &self,
        _indices: &[String],
        _request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        std::future::pending().await
    }

    async fn multi_search(
        &self,
        _indices: &[String],
        _requests: &[SearchRequest],
    ) -> Result<Vec<SearchResponse>, StoreError> {
        std::future::pending().await
    }
}
