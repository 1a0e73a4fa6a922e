//! Thin CLI wrapper around the correlation core. Not a server: it wires a
//! handful of endpoints from flags/env into one `CorrelationEngine` call
//! and prints the JSON result. A real deployment would embed `obscore` as
//! a library behind its own HTTP surface (out of scope for this crate).

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use obscore::correlation::{discovery, expression};
use obscore::registry::InMemoryKpiRegistry;
use obscore::sources::federated::single_endpoint_config;
use obscore::sources::logs_source::LogsQlSource;
use obscore::sources::metrics_source::PrometheusSource;
use obscore::sources::traces_source::JaegerSource;
use obscore::{CorrelationEngine, CorrelationQuery, Engine, EngineConfig, QueryExpression, TimeRange};

#[derive(Parser)]
#[command(name = "obscore-demo", about = "Query and correlate telemetry across metrics/logs/traces")]
struct Cli {
    #[arg(long, env = "OBSCORE_METRICS_ENDPOINT", default_value = "http://localhost:9090")]
    metrics_endpoint: String,
    #[arg(long, env = "OBSCORE_LOGS_ENDPOINT", default_value = "http://localhost:9428")]
    logs_endpoint: String,
    #[arg(long, env = "OBSCORE_TRACES_ENDPOINT", default_value = "http://localhost:16686")]
    traces_endpoint: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single expression-form correlation query (label-based).
    Query {
        #[arg(long)]
        metrics_query: Option<String>,
        #[arg(long)]
        logs_query: Option<String>,
        #[arg(long)]
        traces_query: Option<String>,
    },
    /// Discover likely root causes for a regression over the last N minutes.
    Discover {
        #[arg(long, default_value_t = 30)]
        minutes: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    obscore::telemetry::init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<obscore::CoreError>().is_some() => {
            tracing::error!(error = %e, "upstream unavailable");
            ExitCode::from(64)
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let metrics = Arc::new(PrometheusSource::new(&single_endpoint_config(
        "metrics",
        &cli.metrics_endpoint,
    ))?);
    let logs = Arc::new(LogsQlSource::new(&single_endpoint_config("logs", &cli.logs_endpoint))?);
    let traces = Arc::new(JaegerSource::new(&single_endpoint_config(
        "traces",
        &cli.traces_endpoint,
    ))?);
    let registry = Arc::new(InMemoryKpiRegistry::new(Vec::new()));

    let engine = CorrelationEngine::new(metrics, logs, traces, registry, EngineConfig::default());

    match cli.command {
        Command::Query {
            metrics_query,
            logs_query,
            traces_query,
        } => {
            let mut expressions = Vec::new();
            if let Some(q) = metrics_query {
                expressions.push(QueryExpression {
                    engine: Engine::Metrics,
                    query_text: q,
                });
            }
            if let Some(q) = logs_query {
                expressions.push(QueryExpression {
                    engine: Engine::Logs,
                    query_text: q,
                });
            }
            if let Some(q) = traces_query {
                expressions.push(QueryExpression {
                    engine: Engine::Traces,
                    query_text: q,
                });
            }
            let query = CorrelationQuery {
                id: uuid::Uuid::new_v4().to_string(),
                raw_query: "cli".to_string(),
                expressions,
                time_window: None,
            };
            let (results, correlations, summary) = expression::execute(&engine, &query).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            println!("{}", serde_json::to_string_pretty(&correlations)?);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Discover { minutes } => {
            let end = chrono::Utc::now();
            let start = end - chrono::Duration::minutes(minutes);
            let range = TimeRange::new(start, end)?;
            let result = discovery::discover(&engine, &range).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
