use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

use crate::StageKind;

struct StageMetrics {
    runs: Counter<u64>,
    tokens: Counter<u64>,
    duration_ms: Histogram<f64>,
}

static METRICS: OnceCell<StageMetrics> = OnceCell::new();

fn handles() -> &'static StageMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("briefline.pipeline");
        StageMetrics {
            runs: meter
                .u64_counter("briefline_stage_runs_total")
                .with_description("Stage executions by outcome")
                .init(),
            tokens: meter
                .u64_counter("briefline_stage_tokens_total")
                .with_description("Tokens consumed per stage")
                .init(),
            duration_ms: meter
                .f64_histogram("briefline_stage_duration_ms")
                .with_description("Stage runtime in milliseconds")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("BRIEFLINE_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "BRIEFLINE_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export stage metrics."
        );
    }
    Ok(())
}

/// Record OTEL metrics for one stage run (no-op if no provider installed).
pub fn record_stage_metrics(stage: StageKind, fell_back: bool, tokens: u64, duration_ms: u64) {
    let metrics = handles();
    let outcome = if fell_back { "fallback" } else { "success" };
    let stage_attr = KeyValue::new("stage", stage.as_str());

    metrics
        .runs
        .add(1, &[stage_attr.clone(), KeyValue::new("outcome", outcome)]);
    metrics.tokens.add(tokens, &[stage_attr.clone()]);
    metrics.duration_ms.record(duration_ms as f64, &[stage_attr]);
}
