use anyhow::{Context, Result};
use clap::Parser;
use enamed_gaps::{
    config::EngineConfig,
    ingest::InputFiles,
    reconcile::{reconcile, InputLayout, ReconcileReport},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Reconcile the inputs once and dump what was detected.
#[derive(Parser)]
#[command(author, version, about = "Show detected column layout and data-quality counters")]
struct Args {
    #[arg(default_value = ".")]
    data_dir: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct InputCheck<'a> {
    files: &'a InputFiles,
    layout: &'a InputLayout,
    report: &'a ReconcileReport,
    institutions: Vec<String>,
    booklets: Vec<i64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };

    let files = InputFiles::discover(&args.data_dir)
        .with_context(|| format!("discovering inputs in {}", args.data_dir.display()))?;
    let (responses, answer_key, taxonomy) = files.load()?;
    let reconciled = reconcile(&responses, &answer_key, &taxonomy, &config)?;

    let check = InputCheck {
        files: &files,
        layout: &reconciled.layout,
        report: &reconciled.report,
        institutions: reconciled.institutions(),
        booklets: reconciled.booklets(),
    };
    print!("{}", serde_yaml::to_string(&check)?);
    Ok(())
}
