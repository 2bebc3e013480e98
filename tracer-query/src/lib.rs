//! Read path of the tracing backend: finds traces and computes latency and
//! throughput analytics over daily Elasticsearch span indices.

pub mod analytics;
pub mod config;
pub mod error;
pub mod indices;
pub mod query_builder;
pub mod reader;
pub mod sampling;
pub mod store;
#[cfg(test)]
mod testing;
pub mod trace_fetcher;

pub use config::{ReaderConfig, StoreConfig};
pub use error::{ReaderError, Stage, ValidationError};
pub use reader::SpanReader;
pub use sampling::SamplingStrategyStore;
pub use store::http::HttpSearchClient;
pub use store::{SearchClient, StoreError};
