//! Turns trace search parameters into a store predicate.

use crate::config::{DEFAULT_MAX_DURATION, DEFAULT_NUM_TRACES, MAX_NUM_TRACES};
use crate::error::ValidationError;
use crate::store::dsl::{Aggregation, BoolQuery, Query, RangeQuery, SortOrder, TermsAggregation};
use crate::store::SearchRequest;
use api_structs::time_conversion::{duration_to_micros, time_to_micros};
use api_structs::{TimeWindow, TraceQueryParameters};
use std::time::Duration;

pub const TRACE_ID_FIELD: &str = "traceID";
pub const SPAN_ID_FIELD: &str = "spanID";
pub const START_TIME_FIELD: &str = "startTime";
pub const START_TIME_MILLIS_FIELD: &str = "startTimeMillis";
pub const DURATION_FIELD: &str = "duration";
pub const SERVICE_NAME_FIELD: &str = "process.serviceName";
pub const OPERATION_NAME_FIELD: &str = "operationName";
pub const TRACE_IDS_AGGREGATION: &str = "traceIDs";

/// Collections searched for a tag, a match in any of them is enough
const TAG_PATHS: [&str; 3] = ["tags", "process.tags", "logs.fields"];

/// A validated trace search, ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQuery {
    pub predicate: Query,
    pub num_traces: usize,
    pub window: TimeWindow,
}

impl TraceQuery {
    /// Most recent `num_traces` trace ids matching the predicate
    pub fn trace_ids_request(&self) -> SearchRequest {
        let by_trace_id = TermsAggregation::new(TRACE_ID_FIELD)
            .size(self.num_traces)
            .order_by(START_TIME_FIELD, SortOrder::Desc)
            .sub_aggregation(START_TIME_FIELD, Aggregation::max(START_TIME_FIELD));
        SearchRequest::new()
            .query(self.predicate.clone())
            .aggregation(TRACE_IDS_AGGREGATION, by_trace_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    default_num_traces: usize,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_TRACES)
    }
}

impl QueryBuilder {
    pub fn new(default_num_traces: usize) -> Self {
        Self { default_num_traces }
    }

    pub fn build(&self, params: &TraceQueryParameters) -> Result<TraceQuery, ValidationError> {
        let window = validate(params)?;
        let num_traces = params.num_traces.unwrap_or(self.default_num_traces);
        if num_traces == 0 {
            return Err(ValidationError::NumTracesZero);
        }
        if num_traces > MAX_NUM_TRACES {
            return Err(ValidationError::NumTracesAboveMax {
                max: MAX_NUM_TRACES,
            });
        }

        let mut predicate = BoolQuery::new().must(
            RangeQuery::new(START_TIME_FIELD)
                .gte(time_to_micros(window.start_time_min))
                .lte(time_to_micros(window.start_time_max)),
        );
        if let Some(service_name) = non_empty(&params.service_name) {
            predicate.push_must(Query::match_field(SERVICE_NAME_FIELD, service_name));
        }
        if let Some(operation_name) = non_empty(&params.operation_name) {
            predicate.push_must(Query::match_field(OPERATION_NAME_FIELD, operation_name));
        }
        if params.duration_min.is_some() || params.duration_max.is_some() {
            predicate.push_must(duration_range(params.duration_min, params.duration_max));
        }
        let mut tags: Vec<(&String, &String)> = params.tags.iter().collect();
        tags.sort();
        for (key, value) in tags {
            predicate.push_must(tag_query(key, value));
        }

        Ok(TraceQuery {
            predicate: predicate.into(),
            num_traces,
            window,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn validate(params: &TraceQueryParameters) -> Result<TimeWindow, ValidationError> {
    let window = params.window.ok_or(ValidationError::StartAndEndTimeNotSet)?;
    if !window.is_ordered() {
        return Err(ValidationError::StartTimeMinGreaterThanMax);
    }
    if !params.tags.is_empty() && non_empty(&params.service_name).is_none() {
        return Err(ValidationError::ServiceNameNotSet);
    }
    if let (Some(min), Some(max)) = (params.duration_min, params.duration_max) {
        if min > max {
            return Err(ValidationError::DurationMinGreaterThanMax);
        }
    }
    Ok(window)
}

/// Microseconds as a store bound, saturating at `i64::MAX`
pub fn micros_bound(micros: u64) -> i64 {
    i64::try_from(micros).unwrap_or(i64::MAX)
}

fn duration_range(min: Option<Duration>, max: Option<Duration>) -> RangeQuery {
    let min = min.unwrap_or(Duration::ZERO);
    let max = max.unwrap_or(DEFAULT_MAX_DURATION);
    RangeQuery::new(DURATION_FIELD)
        .gte(micros_bound(duration_to_micros(min)))
        .lte(micros_bound(duration_to_micros(max)))
}

fn tag_query(key: &str, value: &str) -> BoolQuery {
    TAG_PATHS
        .iter()
        .fold(BoolQuery::new().minimum_should_match(1), |query, path| {
            query.should(Query::nested(
                *path,
                BoolQuery::new()
                    .must(Query::match_field(format!("{path}.key"), key))
                    .must(Query::match_field(format!("{path}.value"), value))
                    .into(),
            ))
        })
}
