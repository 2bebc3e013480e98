use crate::analytics::AnalyticsEngine;
use crate::config::{ReaderConfig, SPAN_INDEX};
use crate::error::ReaderError;
use crate::indices::{index_prefix, indices_for_time_range};
use crate::query_builder::{QueryBuilder, TraceQuery, TRACE_IDS_AGGREGATION};
use crate::store::buckets::{buckets, string_key};
use crate::store::{DeadlineBoundClient, SearchClient};
use crate::trace_fetcher::TraceFetcher;
use api_structs::{
    ApplicationThroughput, LayerTypeQueryParameters, NodeAvgThroughput, NodesQueryParameters,
    ServiceAvgResponseTime, ServiceTopResponseTimeQueryParameters, ThermoDynamic,
    ThermoDynamicQueryParameters, TimeWindow, TopThroughputQueryParameters, Trace,
    TraceQueryParameters, TrendQueryParameters,
};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Entry point of the read path. Cheap to clone, holds no per call state.
#[derive(Clone)]
pub struct SpanReader {
    client: Arc<dyn SearchClient>,
    config: ReaderConfig,
    deadline: Option<Instant>,
}

impl SpanReader {
    pub fn new(client: Arc<dyn SearchClient>, config: ReaderConfig) -> Self {
        Self {
            client,
            config,
            deadline: None,
        }
    }

    /// Store calls made through the returned reader fail with
    /// `DeadlineExceeded` once `deadline` passes
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    fn bounded_client(&self) -> DeadlineBoundClient {
        DeadlineBoundClient::new(Arc::clone(&self.client), self.deadline)
    }

    fn lookback_window(&self) -> TimeWindow {
        let now = Utc::now();
        TimeWindow::new(now - self.config.max_lookback(), now)
    }

    pub async fn get_services(&self) -> Result<Vec<String>, ReaderError> {
        self.get_applications(&self.lookback_window()).await
    }

    pub async fn get_operations(&self, service: &str) -> Result<Vec<String>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_operations(&self.lookback_window(), service)
            .await
    }

    async fn trace_ids_for(&self, query: &TraceQuery) -> Result<Vec<String>, ReaderError> {
        let indices = indices_for_time_range(
            &format!("{}{}", index_prefix(&self.config.index_prefix), SPAN_INDEX),
            query.window.start_time_min,
            query.window.start_time_max,
        );
        let response = self
            .bounded_client()
            .search(&indices, &query.trace_ids_request())
            .await
            .map_err(|e| ReaderError::execution("searching for trace ids", e))?;
        let Some(aggregations) = response.aggregations else {
            return Ok(vec![]);
        };
        buckets(&aggregations, TRACE_IDS_AGGREGATION)?
            .iter()
            .map(string_key)
            .collect()
    }

    /// Ids of the most recent matching traces, newest first
    #[instrument(skip_all)]
    pub async fn find_trace_ids(
        &self,
        params: &TraceQueryParameters,
    ) -> Result<Vec<String>, ReaderError> {
        let query = QueryBuilder::new(self.config.default_num_traces).build(params)?;
        self.trace_ids_for(&query).await
    }

    /// Complete matching traces, in the order their ids were found
    #[instrument(skip_all)]
    pub async fn find_traces(
        &self,
        params: &TraceQueryParameters,
    ) -> Result<Vec<Trace>, ReaderError> {
        let query = QueryBuilder::new(self.config.default_num_traces).build(params)?;
        let trace_ids = self.trace_ids_for(&query).await?;
        info!("Found {} matching trace ids", trace_ids.len());
        let unique: BTreeSet<String> = trace_ids.iter().cloned().collect();
        let mut traces = self.fetch_traces(&unique, query.window).await?;
        Ok(trace_ids
            .iter()
            .filter_map(|trace_id| traces.remove(trace_id))
            .collect())
    }

    /// Looks back `max_lookback_hours` from now
    #[instrument(skip_all, fields(trace_id = trace_id))]
    pub async fn get_trace(&self, trace_id: &str) -> Result<Option<Trace>, ReaderError> {
        let ids = BTreeSet::from([trace_id.to_string()]);
        let trace = self
            .fetch_traces(&ids, self.lookback_window())
            .await?
            .remove(trace_id)
            .filter(|trace| !trace.spans.is_empty());
        if trace.is_none() {
            debug!("no spans found");
        }
        Ok(trace)
    }

    pub async fn fetch_traces(
        &self,
        trace_ids: &BTreeSet<String>,
        window: TimeWindow,
    ) -> Result<HashMap<String, Trace>, ReaderError> {
        let client = self.bounded_client();
        TraceFetcher::new(&client, &self.config)
            .fetch(trace_ids, window)
            .await
    }

    pub async fn get_applications(&self, window: &TimeWindow) -> Result<Vec<String>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_applications(window)
            .await
    }

    pub async fn get_layer_services(
        &self,
        params: &LayerTypeQueryParameters,
    ) -> Result<Vec<String>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_layer_services(params)
            .await
    }

    pub async fn get_service_top_response_time(
        &self,
        params: &ServiceTopResponseTimeQueryParameters,
    ) -> Result<Vec<ServiceAvgResponseTime>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_service_top_response_time(params)
            .await
    }

    pub async fn get_thermo_dynamic(
        &self,
        params: &ThermoDynamicQueryParameters,
    ) -> Result<ThermoDynamic, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_thermo_dynamic(params)
            .await
    }

    pub async fn get_application_top_throughput(
        &self,
        params: &TopThroughputQueryParameters,
    ) -> Result<Vec<ApplicationThroughput>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_application_top_throughput(params)
            .await
    }

    pub async fn get_node_top_throughput(
        &self,
        params: &TopThroughputQueryParameters,
    ) -> Result<Vec<NodeAvgThroughput>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_node_top_throughput(params)
            .await
    }

    pub async fn get_throughput_trends(
        &self,
        params: &TrendQueryParameters,
    ) -> Result<Vec<u64>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_throughput_trends(params)
            .await
    }

    pub async fn get_response_time_trends(
        &self,
        params: &TrendQueryParameters,
    ) -> Result<Vec<f64>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_response_time_trends(params)
            .await
    }

    pub async fn get_nodes(&self, params: &NodesQueryParameters) -> Result<Vec<String>, ReaderError> {
        let client = self.bounded_client();
        AnalyticsEngine::new(&client, &self.config)
            .get_nodes(params)
            .await
    }
}

#[cfg(test)]
mod test {
    use super::SpanReader;
    use crate::config::ReaderConfig;
    use crate::error::{ReaderError, Stage, ValidationError};
    use crate::testing::{span_document, InMemorySpanStore, ScriptedStore, UnresponsiveStore};
    use api_structs::{TimeWindow, TraceQueryParameters};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn params() -> TraceQueryParameters {
        TraceQueryParameters {
            window: Some(TimeWindow::new(
                Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 1, 1, 11, 0, 0).unwrap(),
            )),
            service_name: Some("jboss2".to_string()),
            ..Default::default()
        }
    }

    fn hit(trace_id: &str, span_id: &str) -> serde_json::Value {
        json!({"_source": span_document(trace_id, span_id, 1_577_872_800_000_000u64), "sort": [1_577_872_800_000_000u64, span_id]})
    }

    #[tokio::test]
    async fn traces_come_back_in_discovery_order() {
        let store = Arc::new(ScriptedStore::new(vec![
            json!({
                "hits": {"total": 2, "hits": []},
                "aggregations": {"traceIDs": {"buckets": [
                    {"key": "bbb", "doc_count": 1, "startTime": {"value": 2.0}},
                    {"key": "aaa", "doc_count": 1, "startTime": {"value": 1.0}}
                ]}}
            }),
            json!({"responses": [
                {"hits": {"total": {"value": 1, "relation": "eq"}, "hits": [hit("aaa", "1")]}},
                {"hits": {"total": {"value": 1, "relation": "eq"}, "hits": [hit("bbb", "2")]}}
            ]}),
        ]));
        let reader = SpanReader::new(store.clone(), ReaderConfig::default());
        let traces = reader.find_traces(&params()).await.unwrap();
        let ids: Vec<_> = traces.iter().map(|t| t.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["bbb", "aaa"]);
        assert_eq!(traces[0].spans[0].span_id, "2");

        let requests = store.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].1["aggs"]["traceIDs"]["terms"]["size"], 100);
        assert_eq!(requests[1].1["query"], json!({"term": {"traceID": "aaa"}}));
    }

    #[tokio::test]
    async fn no_shard_searched_finds_nothing() {
        let store = Arc::new(ScriptedStore::new(vec![
            json!({"hits": {"total": 0, "hits": []}}),
        ]));
        let reader = SpanReader::new(store.clone(), ReaderConfig::default());
        assert!(reader.find_traces(&params()).await.unwrap().is_empty());
        // nothing to fetch, so no multi search
        assert_eq!(store.requests().len(), 1);
    }

    #[tokio::test]
    async fn invalid_parameters_never_reach_the_store() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let reader = SpanReader::new(store.clone(), ReaderConfig::default());
        let err = reader
            .find_trace_ids(&TraceQueryParameters {
                num_traces: Some(0),
                ..params()
            })
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Build);
        assert!(matches!(
            err,
            ReaderError::Validation(ValidationError::NumTracesZero)
        ));
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn get_trace_by_id() {
        let mut store = InMemorySpanStore::default();
        let an_hour_ago = (Utc::now() - chrono::Duration::hours(1)).timestamp_micros() as u64;
        store.insert(span_document("abc", "2", an_hour_ago + 10));
        store.insert(span_document("abc", "1", an_hour_ago));
        let reader = SpanReader::new(Arc::new(store), ReaderConfig::default());

        let trace = reader.get_trace("abc").await.unwrap().unwrap();
        let span_ids: Vec<_> = trace.spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(span_ids, vec!["1", "2"]);
        assert!(reader.get_trace("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_query_execution_error() {
        let reader = SpanReader::new(Arc::new(UnresponsiveStore), ReaderConfig::default())
            .with_deadline(Instant::now() + Duration::from_millis(20));
        let err = reader.find_traces(&params()).await.unwrap_err();
        assert!(err.is_deadline_exceeded());
        assert_eq!(err.stage(), Stage::Execute);
    }
}
