use api_structs::{
    LayerTypeQueryParameters, ThermoDynamicQueryParameters, TimeWindow,
    TopThroughputQueryParameters, TraceQueryParameters, TrendQueryParameters,
};
use backtraced_error::error_chain_to_pretty_formatted;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument};
use tracing_subscriber::EnvFilter;
use tracer_query::{HttpSearchClient, ReaderConfig, SpanReader, StoreConfig};

#[derive(Debug, clap::Parser)]
pub struct LaunchConfig {
    #[clap(flatten)]
    pub reader: ReaderConfig,
    #[clap(flatten)]
    pub store: StoreConfig,
    /// Log as JSON lines instead of human readable text
    #[clap(long, env)]
    pub json_logs: bool,
    /// Give up on the whole command after this many seconds
    #[clap(long, env)]
    pub deadline_secs: Option<u64>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args)]
pub struct WindowArgs {
    /// RFC 3339, e.g. 2020-01-01T00:00:00Z
    #[clap(long)]
    pub start: DateTime<Utc>,
    #[clap(long)]
    pub end: DateTime<Utc>,
}

impl WindowArgs {
    fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Services seen in the last `max_lookback_hours`
    Services,
    Operations {
        service: String,
    },
    Trace {
        trace_id: String,
    },
    FindTraces {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long)]
        service: Option<String>,
        #[clap(long)]
        operation: Option<String>,
        /// key=value, repeatable
        #[clap(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
        #[clap(long)]
        duration_min_ms: Option<u64>,
        #[clap(long)]
        duration_max_ms: Option<u64>,
        #[clap(long)]
        num_traces: Option<usize>,
    },
    Applications {
        #[clap(flatten)]
        window: WindowArgs,
        /// HTTP entry points of this application instead of application names
        #[clap(long)]
        entry_points_of: Option<String>,
    },
    Thermodynamic {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long)]
        service: Option<String>,
        #[clap(long)]
        operation: Option<String>,
        #[clap(long, default_value_t = 60)]
        time_interval_secs: u64,
        #[clap(long, default_value_t = 100)]
        duration_interval_ms: u64,
        #[clap(long, default_value_t = 3000)]
        duration_max_ms: u64,
    },
    TopThroughput {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long)]
        application: Option<String>,
        #[clap(long)]
        top: Option<usize>,
        /// Rank instances instead of applications
        #[clap(long)]
        nodes: bool,
    },
    ThroughputTrend {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long)]
        application: Option<String>,
        #[clap(long)]
        operation: Option<String>,
        #[clap(long)]
        instance: Option<String>,
        #[clap(long, default_value_t = 60)]
        time_interval_secs: u64,
        /// Average response time per slot instead of span counts
        #[clap(long)]
        response_time: bool,
    },
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw}"))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    // load env vars so clap can use it when parsing a config
    dotenv::dotenv().ok();
    let config = LaunchConfig::parse();
    init_logging(config.json_logs);
    info!("Using config: {:#?}", config);
    if let Err(e) = run(config).await {
        error!("{}", error_chain_to_pretty_formatted(e.as_ref()));
        std::process::exit(1);
    }
}

#[instrument(skip_all)]
async fn run(config: LaunchConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = HttpSearchClient::new(&config.store)?;
    let mut reader = SpanReader::new(Arc::new(client), config.reader);
    if let Some(secs) = config.deadline_secs {
        reader = reader.with_deadline(Instant::now() + Duration::from_secs(secs));
    }
    match config.command {
        Command::Services => print_json(&reader.get_services().await?),
        Command::Operations { service } => print_json(&reader.get_operations(&service).await?),
        Command::Trace { trace_id } => print_json(&reader.get_trace(&trace_id).await?),
        Command::FindTraces {
            window,
            service,
            operation,
            tags,
            duration_min_ms,
            duration_max_ms,
            num_traces,
        } => {
            let params = TraceQueryParameters {
                window: Some(window.window()),
                service_name: service,
                operation_name: operation,
                tags: tags.into_iter().collect::<HashMap<_, _>>(),
                duration_min: duration_min_ms.map(Duration::from_millis),
                duration_max: duration_max_ms.map(Duration::from_millis),
                num_traces,
            };
            print_json(&reader.find_traces(&params).await?)
        }
        Command::Applications {
            window,
            entry_points_of: None,
        } => print_json(&reader.get_applications(&window.window()).await?),
        Command::Applications {
            window,
            entry_points_of: Some(application),
        } => {
            let params = LayerTypeQueryParameters::services(window.window(), Some(application));
            print_json(&reader.get_layer_services(&params).await?)
        }
        Command::Thermodynamic {
            window,
            service,
            operation,
            time_interval_secs,
            duration_interval_ms,
            duration_max_ms,
        } => {
            let params = ThermoDynamicQueryParameters {
                window: window.window(),
                service_name: service,
                operation_name: operation,
                time_interval: Duration::from_secs(time_interval_secs),
                duration_interval: Duration::from_millis(duration_interval_ms),
                duration_extend_bounds_min: Duration::ZERO,
                duration_extend_bounds_max: Duration::from_millis(duration_max_ms),
            };
            print_json(&reader.get_thermo_dynamic(&params).await?)
        }
        Command::TopThroughput {
            window,
            application,
            top,
            nodes,
        } => {
            let params = TopThroughputQueryParameters {
                window: window.window(),
                application_name: application,
                top,
            };
            if nodes {
                print_json(&reader.get_node_top_throughput(&params).await?)
            } else {
                print_json(&reader.get_application_top_throughput(&params).await?)
            }
        }
        Command::ThroughputTrend {
            window,
            application,
            operation,
            instance,
            time_interval_secs,
            response_time,
        } => {
            let params = TrendQueryParameters {
                window: window.window(),
                application_name: application,
                operation_name: operation,
                instance,
                time_interval: Duration::from_secs(time_interval_secs),
            };
            if response_time {
                print_json(&reader.get_response_time_trends(&params).await?)
            } else {
                print_json(&reader.get_throughput_trends(&params).await?)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{parse_tag, Command, LaunchConfig};
    use clap::Parser;

    #[test]
    fn parses_find_traces() {
        let config = LaunchConfig::parse_from([
            "tracer-query",
            "--es-url",
            "http://es:9200",
            "find-traces",
            "--start",
            "2020-01-01T00:00:00Z",
            "--end",
            "2020-01-01T01:00:00Z",
            "--service",
            "jboss2",
            "--tag",
            "error=true",
        ]);
        assert_eq!(config.store.url, "http://es:9200");
        match config.command {
            Command::FindTraces { tags, service, .. } => {
                assert_eq!(tags, vec![("error".to_string(), "true".to_string())]);
                assert_eq!(service.as_deref(), Some("jboss2"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn tag_needs_an_equals_sign() {
        assert!(parse_tag("error").is_err());
        assert_eq!(
            parse_tag("http.url=/a=b").unwrap(),
            ("http.url".to_string(), "/a=b".to_string())
        );
    }
}
