//! Rebuilds complete traces from paginated span searches.

use crate::config::{ReaderConfig, SPAN_INDEX};
use crate::error::ReaderError;
use crate::indices::{index_prefix, indices_for_time_range};
use crate::query_builder::{SPAN_ID_FIELD, START_TIME_FIELD, TRACE_ID_FIELD};
use crate::store::document::span_from_source;
use crate::store::dsl::{Query, SortOrder};
use crate::store::{SearchClient, SearchRequest, StoreError};
use api_structs::time_conversion::time_to_micros;
use api_structs::{Span, TimeWindow, Trace};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

const FETCH_CONTEXT: &str = "fetching trace spans";

struct Progress {
    spans: Vec<Span>,
    /// `search_after` value: `[startTime, spanID]` of the last span seen
    cursor: Vec<Value>,
    fetched: u64,
}

pub struct TraceFetcher<'a> {
    client: &'a dyn SearchClient,
    span_index_prefix: String,
    page_size: usize,
    margin: chrono::Duration,
}

impl<'a> TraceFetcher<'a> {
    pub fn new(client: &'a dyn SearchClient, config: &ReaderConfig) -> Self {
        Self {
            client,
            span_index_prefix: format!("{}{}", index_prefix(&config.index_prefix), SPAN_INDEX),
            page_size: config.page_size.max(1),
            margin: config.trace_fetch_margin(),
        }
    }

    fn page_request(&self, trace_id: &str, cursor: &[Value]) -> SearchRequest {
        SearchRequest::new()
            .query(Query::term(TRACE_ID_FIELD, trace_id))
            .size(self.page_size)
            .sort(START_TIME_FIELD, SortOrder::Asc)
            .sort(SPAN_ID_FIELD, SortOrder::Asc)
            .search_after(cursor.to_vec())
            .track_total_hits(true)
    }

    /// Every span of every requested trace. One multi search per round, a trace
    /// takes part in a round while it still has spans left to page through.
    /// Any failure aborts the whole fetch.
    #[instrument(skip_all, fields(traces = trace_ids.len()))]
    pub async fn fetch(
        &self,
        trace_ids: &BTreeSet<String>,
        window: TimeWindow,
    ) -> Result<HashMap<String, Trace>, ReaderError> {
        if trace_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let widened = window.widened(self.margin);
        let indices = indices_for_time_range(
            &self.span_index_prefix,
            widened.start_time_min,
            widened.start_time_max,
        );
        let initial_cursor = vec![json!(time_to_micros(widened.start_time_min)), json!("")];
        let mut traces: Vec<(&str, Progress)> = trace_ids
            .iter()
            .map(|id| {
                (
                    id.as_str(),
                    Progress {
                        spans: vec![],
                        cursor: initial_cursor.clone(),
                        fetched: 0,
                    },
                )
            })
            .collect();

        // positions in `traces` still being paged through
        let mut pending: Vec<usize> = (0..traces.len()).collect();
        let mut round = 0;
        while !pending.is_empty() {
            round += 1;
            let requests = pending
                .iter()
                .map(|&index| {
                    let (trace_id, trace) = &traces[index];
                    self.page_request(trace_id, &trace.cursor)
                })
                .collect::<Vec<_>>();
            debug!(round, pending = pending.len(), "fetching a page of spans");
            let responses = self
                .client
                .multi_search(&indices, &requests)
                .await
                .map_err(|e| ReaderError::execution(FETCH_CONTEXT, e))?;
            if responses.len() != requests.len() {
                return Err(ReaderError::decode(
                    "multi search response",
                    format!(
                        "sent {} requests but got {} responses",
                        requests.len(),
                        responses.len()
                    ),
                ));
            }

            let mut next_pending = vec![];
            for (position, (&index, response)) in pending.iter().zip(responses).enumerate() {
                if let Some(error) = response.error {
                    return Err(ReaderError::execution(
                        FETCH_CONTEXT,
                        StoreError::ItemFailed {
                            position,
                            reason: error.to_string(),
                        },
                    ));
                }
                let total_hits = response.total_hits();
                let (_, trace) = &mut traces[index];
                let page_len = response.hits.hits.len();
                for hit in response.hits.hits {
                    let span = span_from_source(hit.source)?;
                    trace.cursor = if hit.sort.is_empty() {
                        vec![json!(span.start_time), json!(span.span_id)]
                    } else {
                        hit.sort
                    };
                    trace.spans.push(span);
                }
                trace.fetched += page_len as u64;
                if page_len > 0 && trace.fetched < total_hits {
                    next_pending.push(index);
                }
            }
            pending = next_pending;
        }
        debug!(rounds = round, "all spans fetched");

        Ok(traces
            .into_iter()
            .map(|(trace_id, progress)| {
                (
                    trace_id.to_string(),
                    Trace {
                        trace_id: trace_id.to_string(),
                        spans: progress.spans,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::TraceFetcher;
    use crate::config::ReaderConfig;
    use crate::error::{ReaderError, Stage};
    use crate::store::StoreError;
    use crate::testing::{span_document, InMemorySpanStore, ScriptedStore};
    use api_structs::TimeWindow;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::{BTreeSet, HashSet};

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 11, 0, 0).unwrap(),
        )
    }

    fn base_micros() -> u64 {
        window().start_time_min.timestamp_micros() as u64
    }

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_input_sends_nothing() {
        let store = InMemorySpanStore::default();
        let fetched = TraceFetcher::new(&store, &ReaderConfig::default())
            .fetch(&BTreeSet::new(), window())
            .await
            .unwrap();
        assert!(fetched.is_empty());
        assert_eq!(store.multi_search_calls(), 0);
    }

    #[tokio::test]
    async fn large_trace_takes_three_rounds() {
        let mut store = InMemorySpanStore::default();
        // pairs of spans share a start time so page boundaries fall on ties
        for i in 0..25_000u64 {
            store.insert(span_document("big", &format!("{i:08}"), base_micros() + i / 2));
        }
        for i in 0..3u64 {
            store.insert(span_document("small", &format!("s{i}"), base_micros() + 10 * i));
        }
        let fetched = TraceFetcher::new(&store, &ReaderConfig::default())
            .fetch(&ids(&["big", "small"]), window())
            .await
            .unwrap();
        assert_eq!(store.multi_search_calls(), 3);

        let big = &fetched["big"];
        assert_eq!(big.spans.len(), 25_000);
        let unique: HashSet<_> = big.spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(unique.len(), 25_000);
        assert!(big
            .spans
            .windows(2)
            .all(|pair| pair[0].start_time <= pair[1].start_time));
        assert_eq!(fetched["small"].spans.len(), 3);
    }

    #[tokio::test]
    async fn trace_without_documents_is_empty() {
        let mut store = InMemorySpanStore::default();
        store.insert(span_document("present", "a", base_micros()));
        let fetched = TraceFetcher::new(&store, &ReaderConfig::default())
            .fetch(&ids(&["missing", "present"]), window())
            .await
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert!(fetched["missing"].spans.is_empty());
        assert_eq!(fetched["present"].spans.len(), 1);
        assert_eq!(store.multi_search_calls(), 1);
    }

    #[tokio::test]
    async fn spans_within_margin_are_found() {
        let mut store = InMemorySpanStore::default();
        let thirty_minutes_early = base_micros() - 30 * 60 * 1_000_000;
        store.insert(span_document("early", "a", thirty_minutes_early));
        let fetched = TraceFetcher::new(&store, &ReaderConfig::default())
            .fetch(&ids(&["early"]), window())
            .await
            .unwrap();
        assert_eq!(fetched["early"].spans.len(), 1);
    }

    #[tokio::test]
    async fn failed_item_aborts_the_fetch() {
        let store = ScriptedStore::new(vec![json!({
            "responses": [
                {"hits": {"total": {"value": 1, "relation": "eq"}, "hits": [
                    {"_source": span_document("a", "1", base_micros()), "sort": [base_micros(), "1"]}
                ]}},
                {"error": {"type": "search_phase_execution_exception"}, "status": 400}
            ]
        })]);
        let err = TraceFetcher::new(&store, &ReaderConfig::default())
            .fetch(&ids(&["a", "b"]), window())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Execute);
        assert!(matches!(
            err,
            ReaderError::QueryExecution {
                source: StoreError::ItemFailed { position: 1, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn zero_page_size_still_returns_every_span() {
        let mut store = InMemorySpanStore::default();
        for i in 0..3u64 {
            store.insert(span_document("t", &format!("s{i}"), base_micros() + i));
        }
        let config = ReaderConfig {
            page_size: 0,
            ..Default::default()
        };
        let fetched = TraceFetcher::new(&store, &config)
            .fetch(&ids(&["t"]), window())
            .await
            .unwrap();
        assert_eq!(fetched["t"].spans.len(), 3);
        assert_eq!(store.multi_search_calls(), 3);
    }

    #[tokio::test]
    async fn page_request_shape() {
        let store = ScriptedStore::new(vec![json!({
            "responses": [{"hits": {"total": {"value": 0, "relation": "eq"}, "hits": []}}]
        })]);
        let config = ReaderConfig {
            index_prefix: "prod".to_string(),
            page_size: 50,
            ..Default::default()
        };
        TraceFetcher::new(&store, &config)
            .fetch(&ids(&["abc"]), window())
            .await
            .unwrap();
        let requests = store.requests();
        let (indices, body) = &requests[0];
        assert_eq!(indices, &vec!["prod:jaeger-span-2020-01-01".to_string()]);
        insta::assert_json_snapshot!(body, @r###"
        {
          "query": {
            "term": {
              "traceID": "abc"
            }
          },
          "search_after": [
            1577869200000000,
            ""
          ],
          "size": 50,
          "sort": [
            {
              "startTime": "asc"
            },
            {
              "spanID": "asc"
            }
          ],
          "track_total_hits": true
        }
        "###);
    }
}
