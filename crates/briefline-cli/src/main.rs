use std::path::PathBuf;

use anyhow::Result;
use briefline_agents::{Pipeline, PipelineReport};
use briefline_core::metrics::init_metrics_from_env;
use briefline_core::telemetry::{TelemetryOptions, init_telemetry};
use briefline_core::{
    ConfigLoader, RunLogInput, TraceEvent, TraceSummary, log_run_completion, persist_trace,
};
use clap::{Parser, ValueEnum};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "briefline",
    version,
    about = "Research a topic with a research -> analysis -> summary agent pipeline"
)]
struct Cli {
    /// Topic to research.
    #[arg(long, short = 't')]
    topic: String,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a trace of the stages to stderr.
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Rendering used by `--trace`.
    #[arg(long, value_enum, default_value_t = TraceFormat::Markdown)]
    trace_format: TraceFormat,

    /// Directory where the stage trace is written as JSON.
    #[arg(long)]
    trace_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TraceFormat {
    Markdown,
    Mermaid,
}

fn render_trace(format: TraceFormat, events: &[TraceEvent]) -> String {
    let summary = TraceSummary::from_events(events);
    match format {
        TraceFormat::Markdown => summary.render_markdown(),
        TraceFormat::Mermaid => summary.render_mermaid(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;

    let settings = config.into_settings()?;
    init_metrics_from_env("briefline")?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        info!(topic = %cli.topic, "starting orchestration");
        let pipeline = Pipeline::from_settings(&settings).await?;
        let outcome = pipeline.run(&cli.topic).await;
        pipeline.shutdown().await;
        let report = outcome?;

        print_report(&report);

        let trace_path = match &cli.trace_dir {
            Some(dir) => Some(persist_trace(dir, &report.run_id, &report.trace_events)?),
            None => None,
        };
        if cli.trace {
            eprintln!("{}", render_trace(cli.trace_format, &report.trace_events));
        }

        if let Some(dir) = &settings.run_log_dir {
            let input = RunLogInput {
                run_id: report.run_id.clone(),
                topic: report.topic.clone(),
                summary: report.summary.clone(),
                total_tokens: report.total_tokens,
                fallback_stages: report.fallback_stages(),
                trace_path,
            };
            match log_run_completion(dir, input) {
                Ok(path) => info!(path = %path.display(), "run logged"),
                Err(err) => warn!(error = %err, "failed to write run log"),
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("\n\n======================== FINAL SUMMARY ========================\n");
    println!("{}", report.summary);
    println!("\n===============================================================\n");
    println!("Total Tokens Consumed: {}", report.total_tokens);
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefline_core::StageKind;

    #[test]
    fn trace_format_defaults_to_markdown() {
        let cli = Cli::parse_from(["briefline", "-t", "quantum computing", "--trace"]);
        assert_eq!(cli.topic, "quantum computing");
        assert!(cli.trace);
        assert_eq!(cli.trace_format, TraceFormat::Markdown);
    }

    #[test]
    fn mermaid_format_renders_flowchart() {
        let cli = Cli::parse_from(["briefline", "--topic", "rust", "--trace-format", "mermaid"]);
        assert_eq!(cli.trace_format, TraceFormat::Mermaid);

        let events = vec![
            TraceEvent::new(StageKind::Research, "produced 10 chars (3 tokens)"),
            TraceEvent::new(StageKind::Analysis, "agent call failed; fallback output used"),
        ];
        let rendered = render_trace(cli.trace_format, &events);
        assert!(rendered.starts_with("flowchart TD"));
        assert!(rendered.contains("step1 --> step2"));

        let markdown = render_trace(TraceFormat::Markdown, &events);
        assert!(markdown.contains("2. analysis -> agent call failed; fallback output used"));
    }
}
