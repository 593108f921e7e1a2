use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use songplays_etl::config::{self, JoinStrategy, SinkFormat};
use songplays_etl::{EtlContext, pipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Build the songplay analytics tables from raw song and event logs")]
struct Cli {
    /// Path to the credentials and settings file
    #[arg(long, value_name = "FILE", default_value = "dl.toml")]
    config: PathBuf,

    /// Root holding song_data/ and log_data/ (s3://bucket/prefix or a local path)
    #[arg(long, value_name = "URL")]
    input_root: Option<String>,

    /// Root receiving one directory per output table
    #[arg(long, value_name = "URL")]
    output_root: Option<String>,

    /// exact | normalized | normalized_with_title
    #[arg(long)]
    join_strategy: Option<JoinStrategy>,

    /// parquet | delta
    #[arg(long)]
    sink: Option<SinkFormat>,

    /// Print every table's logical plan and exit without writing
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn settings(cli: &Cli) -> Result<config::Settings> {
    let mut settings = config::load_settings_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = &cli.input_root {
        settings.input_root = config::parse_root(root).context("--input-root")?;
    }
    if let Some(root) = &cli.output_root {
        settings.output_root = config::parse_root(root).context("--output-root")?;
    }
    if let Some(strategy) = cli.join_strategy {
        settings = settings.with_join_strategy(strategy);
    }
    if let Some(sink) = cli.sink {
        settings = settings.with_sink(sink);
    }
    Ok(settings)
}

async fn execute(cli: Cli) -> Result<()> {
    let settings = settings(&cli)?;
    info!(settings = ?settings.summary(), "Loaded settings");
    let ctx = EtlContext::new(settings)?;

    if cli.dry_run {
        let plans = pipeline::plan_all(&ctx).await;
        ctx.shutdown().await?;
        for plan in plans? {
            println!("== {} (partitioned by {:?})", plan.table, plan.partition_columns());
            println!("{}", plan.display_plan());
        }
        return Ok(());
    }

    let outcome = pipeline::run(&ctx).await;
    let released = ctx.shutdown().await;
    let report = outcome?;
    released?;

    for table in &report.tables {
        info!(table = %table.table, rows = table.rows, location = %table.location, "Output");
    }
    info!(
        next_song_events = report.join.next_song_events,
        matched_events = report.join.matched_events(),
        unmatched_events = report.join.unmatched_events,
        drop_rate = report.join.drop_rate(),
        "Join summary"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<songplays_etl::EtlError>() {
                Some(etl) => error!(kind = ?etl.kind(), "Run failed: {e:#}"),
                None => error!("Run failed: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
