use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use daph_core::Source;
use daph_pipeline::PipelineSettings;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "daph-cli")]
#[command(about = "Data-analyst posting harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one source's ingestion pipeline.
    Run { source: String },
    /// Run every source's pipeline, one after another.
    RunAll,
}

fn print_summary(summary: &daph_pipeline::RunSummary) {
    println!(
        "{}: run_id={} window={} pages={} listed={} admitted={} skipped_known={} flushed={}{}",
        summary.source,
        summary.run_id,
        summary.window_token.as_deref().unwrap_or("unbounded"),
        summary.pages_scanned,
        summary.listed,
        summary.admitted,
        summary.skipped_known,
        summary.flushed,
        if summary.aborted { " (aborted)" } else { "" },
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let settings = PipelineSettings::from_env();

    match cli.command {
        Commands::Run { source } => {
            let source = Source::parse(&source)
                .ok_or_else(|| anyhow!("unknown source `{source}` (pracuj, indeed, linkedin)"))?;
            let summary = daph_pipeline::run_source(&settings, source).await?;
            print_summary(&summary);
        }
        Commands::RunAll => {
            // Sources are independent: one failing setup must not block the
            // others.
            for source in Source::ALL {
                match daph_pipeline::run_source(&settings, source).await {
                    Ok(summary) => print_summary(&summary),
                    Err(err) => error!(%source, cause = %format!("{err:#}"), "pipeline failed"),
                }
            }
        }
    }

    Ok(())
}
