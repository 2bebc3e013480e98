use crate::time_conversion::MILLIS_IN_1_MINUTE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const SERVICE_LAYER: &str = "HTTP";
pub const DB_LAYER: &str = "DB";
pub const CACHE_LAYER: &str = "CACHE";
pub const ENTRY_TYPE: &str = "Entry";
pub const EXIT_TYPE: &str = "Exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time_min: DateTime<Utc>,
    pub start_time_max: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start_time_min: DateTime<Utc>, start_time_max: DateTime<Utc>) -> Self {
        Self {
            start_time_min,
            start_time_max,
        }
    }
    pub fn is_ordered(&self) -> bool {
        self.start_time_min <= self.start_time_max
    }
    pub fn widened(&self, margin: chrono::Duration) -> Self {
        Self {
            start_time_min: self.start_time_min - margin,
            start_time_max: self.start_time_max + margin,
        }
    }
    pub fn length(&self) -> chrono::Duration {
        self.start_time_max - self.start_time_min
    }
    /// Truncated, a 90s window is 1 minute long
    pub fn whole_minutes(&self) -> i64 {
        self.length().num_milliseconds() / MILLIS_IN_1_MINUTE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceQueryParameters {
    pub window: Option<TimeWindow>,
    pub service_name: Option<String>,
    pub operation_name: Option<String>,
    /// Matched against span tags, process tags and log fields
    pub tags: HashMap<String, String>,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    /// Defaults to 100 when unset
    pub num_traces: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupBy {
    OperationName,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerTypeQueryParameters {
    pub window: TimeWindow,
    pub application_name: Option<String>,
    pub layer: Option<String>,
    pub span_type: Option<String>,
    pub group_by: GroupBy,
}

impl LayerTypeQueryParameters {
    /// Entry points of the HTTP layer, grouped by operation
    pub fn services(window: TimeWindow, application_name: Option<String>) -> Self {
        Self {
            window,
            application_name,
            layer: Some(SERVICE_LAYER.to_string()),
            span_type: Some(ENTRY_TYPE.to_string()),
            group_by: GroupBy::OperationName,
        }
    }
    /// Exit calls into a component layer such as DB or CACHE, grouped by peer
    pub fn peers(window: TimeWindow, layer: &str) -> Self {
        Self {
            window,
            application_name: None,
            layer: Some(layer.to_string()),
            span_type: Some(EXIT_TYPE.to_string()),
            group_by: GroupBy::Peer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTopResponseTimeQueryParameters {
    pub window: TimeWindow,
    pub application_name: Option<String>,
    pub top: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeStep {
    Minute,
    Hour,
    Day,
}

impl TimeStep {
    pub fn as_duration(&self) -> Duration {
        match self {
            TimeStep::Minute => Duration::from_secs(60),
            TimeStep::Hour => Duration::from_secs(60 * 60),
            TimeStep::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermoDynamicQueryParameters {
    pub window: TimeWindow,
    pub service_name: Option<String>,
    pub operation_name: Option<String>,
    pub time_interval: Duration,
    pub duration_interval: Duration,
    pub duration_extend_bounds_min: Duration,
    pub duration_extend_bounds_max: Duration,
}

impl ThermoDynamicQueryParameters {
    /// 100ms wide duration buckets from 0 up to 3s
    pub fn with_default_bounds(window: TimeWindow, step: TimeStep) -> Self {
        Self {
            window,
            service_name: None,
            operation_name: None,
            time_interval: step.as_duration(),
            duration_interval: Duration::from_millis(100),
            duration_extend_bounds_min: Duration::ZERO,
            duration_extend_bounds_max: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopThroughputQueryParameters {
    pub window: TimeWindow,
    pub application_name: Option<String>,
    pub top: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendQueryParameters {
    pub window: TimeWindow,
    pub application_name: Option<String>,
    pub operation_name: Option<String>,
    pub instance: Option<String>,
    pub time_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesQueryParameters {
    pub window: TimeWindow,
    pub application_name: Option<String>,
    pub operation_name: Option<String>,
}
