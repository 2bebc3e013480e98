use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Spans returned per trace per search round
pub const DEFAULT_PAGE_SIZE: usize = 10_000;
pub const DEFAULT_NUM_TRACES: usize = 100;
/// The store refuses bigger terms aggregations on trace ids
pub const MAX_NUM_TRACES: usize = 10_000;
pub const DEFAULT_TRACE_FETCH_MARGIN_HOURS: i64 = 1;
/// Upper duration bound used when only a minimum is given
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TERMS_SIZE: usize = 10_000;
/// Matches the store's default `search.max_buckets`
pub const MAX_HISTOGRAM_BUCKETS: u64 = 10_000;
pub const DEFAULT_MAX_LOOKBACK_HOURS: i64 = 72;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const SPAN_INDEX: &str = "jaeger-span-";
pub const SERVICE_INDEX: &str = "jaeger-service-";

#[derive(Debug, Clone, PartialEq, Eq, clap::Parser)]
pub struct ReaderConfig {
    /// Prepended to index names as `<prefix>:jaeger-span-...`
    #[clap(long, env, default_value = "")]
    pub index_prefix: String,
    #[clap(
        long,
        env,
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub page_size: usize,
    #[clap(long, env, default_value_t = DEFAULT_NUM_TRACES)]
    pub default_num_traces: usize,
    /// Spans of a trace may start before or after the searched window
    #[clap(long, env, default_value_t = DEFAULT_TRACE_FETCH_MARGIN_HOURS)]
    pub trace_fetch_margin_hours: i64,
    /// How far back trace lookups by id and the service catalog go
    #[clap(long, env, default_value_t = DEFAULT_MAX_LOOKBACK_HOURS)]
    pub max_lookback_hours: i64,
    #[clap(long, env, default_value_t = DEFAULT_TERMS_SIZE)]
    pub terms_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            default_num_traces: DEFAULT_NUM_TRACES,
            trace_fetch_margin_hours: DEFAULT_TRACE_FETCH_MARGIN_HOURS,
            max_lookback_hours: DEFAULT_MAX_LOOKBACK_HOURS,
            terms_size: DEFAULT_TERMS_SIZE,
        }
    }
}

impl ReaderConfig {
    pub fn trace_fetch_margin(&self) -> chrono::Duration {
        chrono::Duration::hours(self.trace_fetch_margin_hours)
    }

    pub fn max_lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_lookback_hours)
    }
}

#[derive(Clone, clap::Parser)]
pub struct StoreConfig {
    #[clap(long = "es-url", env = "ES_URL", default_value = "http://127.0.0.1:9200")]
    pub url: String,
    #[clap(long = "es-username", env = "ES_USERNAME")]
    pub username: Option<String>,
    #[clap(long = "es-password", env = "ES_PASSWORD")]
    pub password: Option<String>,
    #[clap(long, env, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl Debug for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
