pub mod analytics;
pub mod query;
pub mod sampling;
pub mod time_conversion;
pub mod trace;

pub use analytics::{
    ApplicationThroughput, NodeAvgThroughput, ServiceAvgResponseTime, ThermoDynamic,
};
pub use query::{
    GroupBy, LayerTypeQueryParameters, NodesQueryParameters,
    ServiceTopResponseTimeQueryParameters, ThermoDynamicQueryParameters, TimeStep, TimeWindow,
    TopThroughputQueryParameters, TraceQueryParameters, TrendQueryParameters,
};
pub use trace::{Log, Process, Reference, ReferenceType, Span, SpanId, Trace, TraceId};
