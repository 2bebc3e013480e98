//! Latency and throughput analytics computed by store side aggregations.

use crate::config::{ReaderConfig, MAX_HISTOGRAM_BUCKETS, SERVICE_INDEX, SPAN_INDEX};
use crate::error::{ReaderError, ValidationError};
use crate::indices::{index_prefix, indices_for_time_range};
use crate::query_builder::{
    micros_bound, DURATION_FIELD, OPERATION_NAME_FIELD, SERVICE_NAME_FIELD,
    START_TIME_MILLIS_FIELD,
};
use crate::store::buckets::{buckets, doc_count, metric_value, numeric_key, string_key, sub_buckets};
use crate::store::dsl::{
    Aggregation, BoolQuery, HistogramAggregation, Query, RangeQuery, SortOrder, TermsAggregation,
};
use crate::store::{SearchClient, SearchRequest};
use api_structs::query::{ENTRY_TYPE, SERVICE_LAYER};
use api_structs::time_conversion::{
    duration_to_micros, duration_to_millis, micros_to_millis, time_to_millis,
};
use api_structs::{
    ApplicationThroughput, GroupBy, LayerTypeQueryParameters, NodeAvgThroughput,
    NodesQueryParameters, ServiceAvgResponseTime, ServiceTopResponseTimeQueryParameters,
    ThermoDynamic, ThermoDynamicQueryParameters, TimeWindow, TopThroughputQueryParameters,
    TrendQueryParameters,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

pub const LAYER_FIELD: &str = "flattenTags.span.layer";
pub const TYPE_FIELD: &str = "flattenTags.span.type";
pub const PEER_FIELD: &str = "flattenTags.peer";
pub const INSTANCE_FIELD: &str = "flattenTags.process.sid";
/// Field names of the service catalog documents
const CATALOG_SERVICE_FIELD: &str = "serviceName";
const CATALOG_OPERATION_FIELD: &str = "operationName";

const TERMS_AGGREGATION: &str = "agg";
const TIME_HISTOGRAM: &str = "date_histogram";
const DURATION_HISTOGRAM: &str = "histogram";
const AVG: &str = "avg";

/// Keys of histogram buckets mapped back to positions on the window.
/// Buckets are half open, `[start, end)` split into `ceil(len / interval)` slots.
struct TimeAxis {
    start_ms: i64,
    end_ms: i64,
    interval_ms: u64,
    len: usize,
}

impl TimeAxis {
    fn new(window: &TimeWindow, interval: Duration) -> Result<Self, ValidationError> {
        let interval_ms = duration_to_millis(interval);
        if interval_ms == 0 {
            return Err(ValidationError::ZeroInterval { name: "time" });
        }
        let start_ms = time_to_millis(window.start_time_min);
        let end_ms = time_to_millis(window.start_time_max);
        let len = end_ms.saturating_sub(start_ms).max(0) as u64;
        let len = len.div_ceil(interval_ms);
        check_bucket_count(len)?;
        Ok(Self {
            start_ms,
            end_ms,
            interval_ms,
            len: len as usize,
        })
    }

    fn histogram(&self) -> HistogramAggregation {
        HistogramAggregation::new(START_TIME_MILLIS_FIELD, self.interval_ms)
            .offset(
                self.start_ms
                    .rem_euclid(i64::try_from(self.interval_ms).unwrap_or(i64::MAX)),
            )
            .extended_bounds(self.start_ms, self.end_ms.saturating_sub(1))
            .min_doc_count(0)
    }

    fn index(&self, key: f64) -> Option<usize> {
        let slot = ((key - self.start_ms as f64) / self.interval_ms as f64).floor();
        if slot >= 0.0 && (slot as usize) < self.len {
            Some(slot as usize)
        } else {
            None
        }
    }
}

fn check_bucket_count(requested: u64) -> Result<(), ValidationError> {
    if requested > MAX_HISTOGRAM_BUCKETS {
        return Err(ValidationError::TooManyBuckets {
            requested,
            max: MAX_HISTOGRAM_BUCKETS,
        });
    }
    Ok(())
}

fn ordered(window: &TimeWindow) -> Result<(), ValidationError> {
    if window.is_ordered() {
        Ok(())
    } else {
        Err(ValidationError::StartTimeMinGreaterThanMax)
    }
}

/// Half open on purpose: a span starting exactly at the end belongs to the next window
fn window_filter(window: &TimeWindow) -> BoolQuery {
    BoolQuery::new().must(
        RangeQuery::new(START_TIME_MILLIS_FIELD)
            .gte(time_to_millis(window.start_time_min))
            .lt(time_to_millis(window.start_time_max)),
    )
}

fn must_match(query: &mut BoolQuery, field: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        query.push_must(Query::match_field(field, value));
    }
}

fn bucket_keys(aggregations: Option<&Map<String, Value>>) -> Result<Vec<String>, ReaderError> {
    let Some(aggregations) = aggregations else {
        return Ok(vec![]);
    };
    buckets(aggregations, TERMS_AGGREGATION)?
        .iter()
        .map(string_key)
        .collect()
}

/// Requests per minute, windows shorter than a minute count as one
fn per_minute(count: u64, window: &TimeWindow) -> f64 {
    count as f64 / window.whole_minutes().max(1) as f64
}

pub struct AnalyticsEngine<'a> {
    client: &'a dyn SearchClient,
    span_index_prefix: String,
    service_index_prefix: String,
    terms_size: usize,
}

impl<'a> AnalyticsEngine<'a> {
    pub fn new(client: &'a dyn SearchClient, config: &ReaderConfig) -> Self {
        let prefix = index_prefix(&config.index_prefix);
        Self {
            client,
            span_index_prefix: format!("{prefix}{SPAN_INDEX}"),
            service_index_prefix: format!("{prefix}{SERVICE_INDEX}"),
            terms_size: config.terms_size,
        }
    }

    fn span_indices(&self, window: &TimeWindow) -> Vec<String> {
        indices_for_time_range(
            &self.span_index_prefix,
            window.start_time_min,
            window.start_time_max,
        )
    }

    fn service_indices(&self, window: &TimeWindow) -> Vec<String> {
        indices_for_time_range(
            &self.service_index_prefix,
            window.start_time_min,
            window.start_time_max,
        )
    }

    /// The aggregation tree of the response, `None` when no shard was searched
    async fn aggregate(
        &self,
        indices: &[String],
        request: SearchRequest,
        shape: &str,
    ) -> Result<Option<Map<String, Value>>, ReaderError> {
        debug!(shape, shards = indices.len(), "running aggregation");
        let response = self
            .client
            .search(indices, &request)
            .await
            .map_err(|e| ReaderError::execution(format!("running the {shape} aggregation"), e))?;
        Ok(response.aggregations)
    }

    /// Services found in the service catalog
    #[instrument(skip_all)]
    pub async fn get_applications(&self, window: &TimeWindow) -> Result<Vec<String>, ReaderError> {
        ordered(window)?;
        let request = SearchRequest::new().aggregation(
            TERMS_AGGREGATION,
            TermsAggregation::new(CATALOG_SERVICE_FIELD).size(self.terms_size),
        );
        let aggregations = self
            .aggregate(&self.service_indices(window), request, "applications")
            .await?;
        bucket_keys(aggregations.as_ref())
    }

    #[instrument(skip_all, fields(service = service))]
    pub async fn get_operations(
        &self,
        window: &TimeWindow,
        service: &str,
    ) -> Result<Vec<String>, ReaderError> {
        ordered(window)?;
        let request = SearchRequest::new()
            .query(Query::term(CATALOG_SERVICE_FIELD, service))
            .aggregation(
                TERMS_AGGREGATION,
                TermsAggregation::new(CATALOG_OPERATION_FIELD).size(self.terms_size),
            );
        let aggregations = self
            .aggregate(&self.service_indices(window), request, "operations")
            .await?;
        bucket_keys(aggregations.as_ref())
    }

    /// Operation names or peers seen on a layer, e.g. HTTP entry points or DB exit calls
    #[instrument(skip_all, fields(group_by = ?params.group_by))]
    pub async fn get_layer_services(
        &self,
        params: &LayerTypeQueryParameters,
    ) -> Result<Vec<String>, ReaderError> {
        ordered(&params.window)?;
        let mut query = window_filter(&params.window);
        must_match(&mut query, LAYER_FIELD, &params.layer);
        must_match(&mut query, TYPE_FIELD, &params.span_type);
        must_match(&mut query, SERVICE_NAME_FIELD, &params.application_name);
        let group_field = match params.group_by {
            GroupBy::OperationName => OPERATION_NAME_FIELD,
            GroupBy::Peer => PEER_FIELD,
        };
        let request = SearchRequest::new().query(query).aggregation(
            TERMS_AGGREGATION,
            TermsAggregation::new(group_field).size(self.terms_size),
        );
        let aggregations = self
            .aggregate(&self.span_indices(&params.window), request, "layer services")
            .await?;
        bucket_keys(aggregations.as_ref())
    }

    /// Slowest HTTP entry points by average duration, in ms
    #[instrument(skip_all, fields(top = params.top))]
    pub async fn get_service_top_response_time(
        &self,
        params: &ServiceTopResponseTimeQueryParameters,
    ) -> Result<Vec<ServiceAvgResponseTime>, ReaderError> {
        ordered(&params.window)?;
        if params.top == 0 {
            return Ok(vec![]);
        }
        let mut query = window_filter(&params.window);
        query.push_must(Query::match_field(LAYER_FIELD, SERVICE_LAYER));
        query.push_must(Query::match_field(TYPE_FIELD, ENTRY_TYPE));
        must_match(&mut query, SERVICE_NAME_FIELD, &params.application_name);
        let by_operation = TermsAggregation::new(OPERATION_NAME_FIELD)
            .size(params.top)
            .order_by(AVG, SortOrder::Desc)
            .sub_aggregation(AVG, Aggregation::avg(DURATION_FIELD));
        let request = SearchRequest::new()
            .query(query)
            .aggregation(TERMS_AGGREGATION, by_operation);
        let Some(aggregations) = self
            .aggregate(&self.span_indices(&params.window), request, "top response time")
            .await?
        else {
            return Ok(vec![]);
        };
        buckets(&aggregations, TERMS_AGGREGATION)?
            .iter()
            .take(params.top)
            .map(|bucket| {
                let service_name = string_key(bucket)?;
                let value = if doc_count(bucket)? == 0 {
                    0.0
                } else {
                    metric_value(bucket, AVG)?.map(micros_to_millis).unwrap_or(0.0)
                };
                Ok(ServiceAvgResponseTime {
                    service_name,
                    value,
                })
            })
            .collect()
    }

    /// Heatmap of span counts per time slot and duration slot
    #[instrument(skip_all)]
    pub async fn get_thermo_dynamic(
        &self,
        params: &ThermoDynamicQueryParameters,
    ) -> Result<ThermoDynamic, ReaderError> {
        ordered(&params.window)?;
        let time_axis = TimeAxis::new(&params.window, params.time_interval)?;
        let duration_interval = duration_to_micros(params.duration_interval);
        if duration_interval == 0 {
            return Err(ValidationError::ZeroInterval { name: "duration" }.into());
        }
        let bounds_min = duration_to_micros(params.duration_extend_bounds_min);
        let bounds_max = duration_to_micros(params.duration_extend_bounds_max);
        if bounds_min > bounds_max {
            return Err(ValidationError::DurationBoundsMinGreaterThanMax.into());
        }
        let duration_slots = (bounds_max - bounds_min).div_ceil(duration_interval).max(1);
        check_bucket_count((time_axis.len as u64).saturating_mul(duration_slots))?;
        let mut result = ThermoDynamic {
            response_time_step: duration_to_millis(params.duration_interval),
            nodes: vec![],
        };
        if time_axis.len == 0 {
            return Ok(result);
        }

        let mut query = window_filter(&params.window);
        must_match(&mut query, SERVICE_NAME_FIELD, &params.service_name);
        must_match(&mut query, OPERATION_NAME_FIELD, &params.operation_name);
        let by_duration = HistogramAggregation::new(DURATION_FIELD, duration_interval)
            .extended_bounds(
                micros_bound(bounds_min),
                micros_bound(bounds_max)
                    .saturating_sub(1)
                    .max(micros_bound(bounds_min)),
            );
        let request = SearchRequest::new().query(query).aggregation(
            TIME_HISTOGRAM,
            time_axis.histogram().sub_aggregation(DURATION_HISTOGRAM, by_duration),
        );
        let Some(aggregations) = self
            .aggregate(&self.span_indices(&params.window), request, "thermodynamic")
            .await?
        else {
            return Ok(result);
        };

        let mut cells: BTreeMap<(u64, u64), u64> = BTreeMap::new();
        for time_bucket in buckets(&aggregations, TIME_HISTOGRAM)? {
            let Some(time_slot) = time_axis.index(numeric_key(time_bucket)?) else {
                continue;
            };
            for duration_bucket in sub_buckets(time_bucket, DURATION_HISTOGRAM)? {
                let offset = (numeric_key(duration_bucket)? - bounds_min as f64).max(0.0);
                // durations outside the bounds land in the first or last slot
                let duration_slot =
                    ((offset / duration_interval as f64).floor() as u64).min(duration_slots - 1);
                *cells.entry((time_slot as u64, duration_slot)).or_default() +=
                    doc_count(duration_bucket)?;
            }
        }
        result.nodes = cells
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|((time_slot, duration_slot), count)| [time_slot, duration_slot, count])
            .collect();
        Ok(result)
    }

    async fn top_throughput(
        &self,
        params: &TopThroughputQueryParameters,
        group_field: &str,
        shape: &str,
    ) -> Result<Vec<(String, f64)>, ReaderError> {
        ordered(&params.window)?;
        if params.top == Some(0) {
            return Ok(vec![]);
        }
        let mut query = window_filter(&params.window);
        must_match(&mut query, SERVICE_NAME_FIELD, &params.application_name);
        let by_group = TermsAggregation::new(group_field)
            .size(params.top.unwrap_or(self.terms_size))
            .order_by("_count", SortOrder::Desc);
        let request = SearchRequest::new()
            .query(query)
            .aggregation(TERMS_AGGREGATION, by_group);
        let Some(aggregations) = self
            .aggregate(&self.span_indices(&params.window), request, shape)
            .await?
        else {
            return Ok(vec![]);
        };
        buckets(&aggregations, TERMS_AGGREGATION)?
            .iter()
            .map(|bucket| {
                Ok((
                    string_key(bucket)?,
                    per_minute(doc_count(bucket)?, &params.window),
                ))
            })
            .collect()
    }

    /// Busiest services, in requests per minute
    #[instrument(skip_all)]
    pub async fn get_application_top_throughput(
        &self,
        params: &TopThroughputQueryParameters,
    ) -> Result<Vec<ApplicationThroughput>, ReaderError> {
        Ok(self
            .top_throughput(params, SERVICE_NAME_FIELD, "application throughput")
            .await?
            .into_iter()
            .map(|(application_name, value)| ApplicationThroughput {
                application_name,
                value,
            })
            .collect())
    }

    /// Busiest instances, in requests per minute
    #[instrument(skip_all)]
    pub async fn get_node_top_throughput(
        &self,
        params: &TopThroughputQueryParameters,
    ) -> Result<Vec<NodeAvgThroughput>, ReaderError> {
        Ok(self
            .top_throughput(params, INSTANCE_FIELD, "node throughput")
            .await?
            .into_iter()
            .map(|(node, value)| NodeAvgThroughput { node, value })
            .collect())
    }

    fn trend_request(&self, params: &TrendQueryParameters, time_axis: &TimeAxis) -> SearchRequest {
        let mut query = window_filter(&params.window);
        must_match(&mut query, SERVICE_NAME_FIELD, &params.application_name);
        must_match(&mut query, OPERATION_NAME_FIELD, &params.operation_name);
        must_match(&mut query, INSTANCE_FIELD, &params.instance);
        SearchRequest::new().query(query).aggregation(
            TIME_HISTOGRAM,
            time_axis
                .histogram()
                .sub_aggregation(AVG, Aggregation::avg(DURATION_FIELD)),
        )
    }

    /// Spans per time slot
    #[instrument(skip_all)]
    pub async fn get_throughput_trends(
        &self,
        params: &TrendQueryParameters,
    ) -> Result<Vec<u64>, ReaderError> {
        ordered(&params.window)?;
        let time_axis = TimeAxis::new(&params.window, params.time_interval)?;
        let mut series = vec![0; time_axis.len];
        if time_axis.len == 0 {
            return Ok(series);
        }
        let request = self.trend_request(params, &time_axis);
        let Some(aggregations) = self
            .aggregate(&self.span_indices(&params.window), request, "throughput trend")
            .await?
        else {
            return Ok(series);
        };
        for bucket in buckets(&aggregations, TIME_HISTOGRAM)? {
            if let Some(slot) = time_axis.index(numeric_key(bucket)?) {
                series[slot] += doc_count(bucket)?;
            }
        }
        Ok(series)
    }

    /// Average duration per time slot in ms, 0 for slots without spans
    #[instrument(skip_all)]
    pub async fn get_response_time_trends(
        &self,
        params: &TrendQueryParameters,
    ) -> Result<Vec<f64>, ReaderError> {
        ordered(&params.window)?;
        let time_axis = TimeAxis::new(&params.window, params.time_interval)?;
        let mut series = vec![0.0; time_axis.len];
        if time_axis.len == 0 {
            return Ok(series);
        }
        let request = self.trend_request(params, &time_axis);
        let Some(aggregations) = self
            .aggregate(&self.span_indices(&params.window), request, "response time trend")
            .await?
        else {
            return Ok(series);
        };
        for bucket in buckets(&aggregations, TIME_HISTOGRAM)? {
            if let Some(slot) = time_axis.index(numeric_key(bucket)?) {
                series[slot] = metric_value(bucket, AVG)?
                    .map(micros_to_millis)
                    .unwrap_or(0.0);
            }
        }
        Ok(series)
    }

    /// Instances that served an application or operation
    #[instrument(skip_all)]
    pub async fn get_nodes(&self, params: &NodesQueryParameters) -> Result<Vec<String>, ReaderError> {
        ordered(&params.window)?;
        let mut query = window_filter(&params.window);
        must_match(&mut query, SERVICE_NAME_FIELD, &params.application_name);
        must_match(&mut query, OPERATION_NAME_FIELD, &params.operation_name);
        let request = SearchRequest::new().query(query).aggregation(
            TERMS_AGGREGATION,
            TermsAggregation::new(INSTANCE_FIELD)
                .size(self.terms_size)
                .order_by("_count", SortOrder::Desc),
        );
        let aggregations = self
            .aggregate(&self.span_indices(&params.window), request, "nodes")
            .await?;
        bucket_keys(aggregations.as_ref())
    }
}
