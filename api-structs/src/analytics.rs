use serde::{Deserialize, Serialize};

/// Response time heatmap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermoDynamic {
    /// Width of a duration bucket, in ms
    pub response_time_step: u64,
    /// `[time_bucket_index, duration_bucket_index, count]`, cells not listed have count 0
    pub nodes: Vec<[u64; 3]>,
}

/// requests per minute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationThroughput {
    pub application_name: String,
    pub value: f64,
}

/// requests per minute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAvgThroughput {
    pub node: String,
    pub value: f64,
}

/// ms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAvgResponseTime {
    pub service_name: String,
    pub value: f64,
}
