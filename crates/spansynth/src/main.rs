mod discover;
mod output;
mod telemetry;
mod worker;

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use opentelemetry_sdk::trace as sdktrace;
use spansynth_core::config::{Config, NdjsonOptions, PlaywrightShape};
use spansynth_core::ids::{SpanId, TraceId};
use spansynth_core::model::context::TelemetryContext;
use spansynth_core::time::parse_timestamp;
use tracing::Instrument;

use crate::output::{print_spans_human, print_spans_json, span_records};
use crate::telemetry::{init_tracing, shutdown_tracing};
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "spansynth")]
#[command(about = "Synthesize OpenTelemetry spans from Playwright and k6 run artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    service_name: Option<String>,

    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    #[arg(long, global = true, help = "Export timeout (e.g. 5s)")]
    export_timeout: Option<String>,

    #[arg(long, global = true, requires = "span_id", help = "Parent trace id (32 hex)")]
    trace_id: Option<String>,

    #[arg(long, global = true, requires = "trace_id", help = "Parent span id (16 hex)")]
    span_id: Option<String>,

    #[command(flatten)]
    ids: RunIds,
}

#[derive(Args, Debug, Clone, Default)]
struct RunIds {
    #[arg(long, global = true)]
    run_id: Option<String>,
    #[arg(long, global = true)]
    test_id: Option<String>,
    #[arg(long, global = true)]
    job_id: Option<String>,
    #[arg(long, global = true)]
    run_type: Option<String>,
    #[arg(long, global = true)]
    project_id: Option<String>,
    #[arg(long, global = true)]
    organization_id: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Synthesize one span per test from a Playwright JSON report")]
    Playwright {
        path: PathBuf,
        #[arg(long, help = "Report layout: auto, results or flat")]
        shape: Option<String>,
    },
    #[command(about = "Synthesize aggregate spans from a k6 summary.json")]
    K6Summary { path: PathBuf },
    #[command(about = "Stream a k6 NDJSON metrics file into aggregated spans")]
    K6Ndjson {
        path: PathBuf,
        #[command(flatten)]
        ndjson: NdjsonArgs,
    },
    #[command(about = "Synthesize every artifact found in a run directory")]
    Run {
        dir: PathBuf,
        #[arg(long, help = "Report layout: auto, results or flat")]
        shape: Option<String>,
        #[command(flatten)]
        ndjson: NdjsonArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct NdjsonArgs {
    #[arg(long, help = "Test start time; scenario and check spans begin here")]
    test_start: Option<String>,
    #[arg(long, help = "Emit spans for the N slowest requests")]
    sample_slow: Option<usize>,
    #[arg(long)]
    no_endpoints: bool,
    #[arg(long)]
    no_scenarios: bool,
    #[arg(long)]
    no_checks: bool,
    #[arg(long)]
    no_failed_samples: bool,
}

impl NdjsonArgs {
    fn options(&self, base: &NdjsonOptions) -> NdjsonOptions {
        let mut opts = base.clone();
        if let Some(n) = self.sample_slow {
            opts.sample_slow_requests = n;
        }
        if self.no_endpoints {
            opts.aggregate_by_endpoint = false;
        }
        if self.no_scenarios {
            opts.include_scenarios = false;
        }
        if self.no_checks {
            opts.include_checks = false;
        }
        if self.no_failed_samples {
            opts.sample_failed_requests = false;
        }
        opts
    }

    fn test_start(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.test_start
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("bad --test-start")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;

    let telemetry = init_tracing(&cfg)?;
    let synthesized = execute(&cli, &cfg, telemetry.tracer()).await;
    let spans = telemetry.collect();
    shutdown_tracing();
    let synthesized = synthesized?;

    let records = span_records(&spans, &cfg.service_name);
    if cli.json {
        print_spans_json(&records, synthesized)?;
    } else {
        print_spans_human(&records, synthesized);
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(name) = &cli.service_name {
        cfg.service_name = name.clone();
    }
    if let Some(endpoint) = &cli.otlp_endpoint {
        cfg.otlp_endpoint = Some(endpoint.clone());
    }
    if let Some(timeout) = &cli.export_timeout {
        cfg.export_timeout = humantime::parse_duration(timeout)
            .with_context(|| format!("bad --export-timeout {timeout}"))?;
    }
    Ok(cfg)
}

async fn execute(cli: &Cli, cfg: &Config, tracer: &sdktrace::Tracer) -> anyhow::Result<usize> {
    let correlation = parse_correlation(cli.trace_id.as_deref(), cli.span_id.as_deref())?;
    let mut context = telemetry_context(&cli.ids, correlation.as_ref());
    if matches!(cli.command, Commands::Run { .. }) && context.run_id.is_none() {
        context.run_id = Some(uuid::Uuid::new_v4().to_string());
    }

    let mut worker = Worker::new(tracer, context);
    if let Some((trace_id, span_id)) = correlation {
        worker = worker.with_correlation(trace_id, span_id);
    }

    match &cli.command {
        Commands::Playwright { path, shape } => {
            let shape = resolve_shape(shape.as_deref(), cfg)?;
            Ok(in_root(&worker, "playwright", worker.playwright(path, shape)).await)
        }
        Commands::K6Summary { path } => {
            Ok(in_root(&worker, "k6 summary", worker.k6_summary(path)).await)
        }
        Commands::K6Ndjson { path, ndjson } => {
            let options = ndjson.options(&cfg.ndjson);
            let test_start = ndjson.test_start()?;
            Ok(in_root(
                &worker,
                "k6 stream",
                worker.k6_ndjson(path, &options, test_start),
            )
            .await)
        }
        Commands::Run { dir, shape, ndjson } => {
            let shape = resolve_shape(shape.as_deref(), cfg)?;
            let options = ndjson.options(&cfg.ndjson);
            let test_start = ndjson.test_start()?;
            in_root(
                &worker,
                "test run",
                worker.run_dir(dir, shape, &options, test_start),
            )
            .await
        }
    }
}

/// Runs `fut` under a fresh root span unless the spans already have an
/// explicit parent.
async fn in_root<F: Future>(worker: &Worker<'_>, name: &str, fut: F) -> F::Output {
    if worker.has_explicit_parent() {
        return fut.await;
    }
    let span = tracing::info_span!("synthesis", otel.name = %name);
    fut.instrument(span).await
}

fn resolve_shape(flag: Option<&str>, cfg: &Config) -> anyhow::Result<PlaywrightShape> {
    match flag {
        Some(raw) => Ok(PlaywrightShape::parse(raw)?),
        None => Ok(cfg.playwright_shape),
    }
}

fn parse_correlation(
    trace_id: Option<&str>,
    span_id: Option<&str>,
) -> anyhow::Result<Option<(TraceId, SpanId)>> {
    match (trace_id, span_id) {
        (Some(trace), Some(span)) => Ok(Some((trace.parse()?, span.parse()?))),
        (None, None) => Ok(None),
        _ => anyhow::bail!("--trace-id and --span-id must be given together"),
    }
}

fn telemetry_context(ids: &RunIds, correlation: Option<&(TraceId, SpanId)>) -> TelemetryContext {
    TelemetryContext {
        run_id: ids.run_id.clone(),
        test_id: ids.test_id.clone(),
        job_id: ids.job_id.clone(),
        run_type: ids.run_type.clone(),
        project_id: ids.project_id.clone(),
        organization_id: ids.organization_id.clone(),
        trace_id: correlation.map(|(trace, _)| trace.as_str().to_string()),
        span_id: correlation.map(|(_, span)| span.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_flags_override_config() {
        let args = NdjsonArgs {
            sample_slow: Some(5),
            no_checks: true,
            no_failed_samples: true,
            ..NdjsonArgs::default()
        };
        let opts = args.options(&NdjsonOptions::default());
        assert_eq!(opts.sample_slow_requests, 5);
        assert!(!opts.include_checks);
        assert!(!opts.sample_failed_requests);
        assert!(opts.aggregate_by_endpoint);
        assert!(opts.include_scenarios);
    }

    #[test]
    fn test_start_must_be_a_timestamp() {
        let args = NdjsonArgs {
            test_start: Some("2026-02-01T00:00:00Z".to_string()),
            ..NdjsonArgs::default()
        };
        assert!(args.test_start().unwrap().is_some());

        let bad = NdjsonArgs {
            test_start: Some("yesterday".to_string()),
            ..NdjsonArgs::default()
        };
        assert!(bad.test_start().is_err());
    }

    #[test]
    fn shape_flag_wins_over_config() {
        let cfg = Config {
            playwright_shape: PlaywrightShape::Flat,
            ..Config::default()
        };
        assert_eq!(resolve_shape(None, &cfg).unwrap(), PlaywrightShape::Flat);
        assert_eq!(
            resolve_shape(Some("results"), &cfg).unwrap(),
            PlaywrightShape::Results
        );
        assert!(resolve_shape(Some("tree"), &cfg).is_err());
    }

    #[test]
    fn correlation_ids_are_validated() {
        let ok = parse_correlation(
            Some("4bf92f3577b34da6a3ce929d0e0e4736"),
            Some("00f067aa0ba902b7"),
        )
        .unwrap();
        assert!(ok.is_some());
        assert!(parse_correlation(None, None).unwrap().is_none());
        assert!(parse_correlation(Some("xyz"), Some("00f067aa0ba902b7")).is_err());
    }

    #[test]
    fn trace_id_requires_span_id() {
        let res = Cli::try_parse_from([
            "spansynth",
            "--trace-id",
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "k6-summary",
            "summary.json",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn run_ids_flow_into_context() {
        let cli = Cli::try_parse_from([
            "spansynth",
            "k6-ndjson",
            "metrics.ndjson",
            "--run-id",
            "run-1",
            "--job-id",
            "job-2",
            "--no-scenarios",
        ])
        .unwrap();
        let ctx = telemetry_context(&cli.ids, None);
        assert_eq!(ctx.run_id.as_deref(), Some("run-1"));
        assert_eq!(ctx.job_id.as_deref(), Some("job-2"));
        assert!(ctx.trace_id.is_none());
        assert!(matches!(
            cli.command,
            Commands::K6Ndjson { ref ndjson, .. } if ndjson.no_scenarios
        ));
    }
}
