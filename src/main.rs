use anyhow::{Context, Result};
use clap::Parser;
use enamed_gaps::{
    config::EngineConfig,
    export::export_report,
    gaps::{compute_gaps, GapQuery, GapReport, TaxonomyLevel},
    ingest::{discover, find_input, InputFiles},
    Engine,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "ENAMED gap analytics: institution vs comparison cohort per taxonomy bucket"
)]
struct Args {
    /// Directory holding base_alunos.*, base_gabarito.* and base_mapeamento.*
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
    /// Per-student responses (overrides discovery)
    #[arg(long)]
    responses: Option<PathBuf>,
    /// Answer key (overrides discovery)
    #[arg(long)]
    answer_key: Option<PathBuf>,
    /// Question taxonomy map (overrides discovery)
    #[arg(long)]
    taxonomy: Option<PathBuf>,
    /// YAML engine configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// List institutions and booklets, then exit
    #[arg(long)]
    list: bool,
    /// Focal institution; repeat for several reports
    #[arg(short, long = "institution")]
    institutions: Vec<String>,
    /// Booklet in scope; repeat for several, omit for all
    #[arg(short, long = "booklet")]
    booklets: Vec<i64>,
    /// Compare against flagged cohort members only
    #[arg(long)]
    cohort_only: bool,
    /// Taxonomy levels to group by
    #[arg(long, value_delimiter = ',', default_value = "area,subspecialty")]
    group_by: Vec<TaxonomyLevel>,
    /// Size of the critical-gaps table (default from config)
    #[arg(long)]
    top: Option<usize>,
    /// Write Parquet/CSV/JSON outputs here
    #[arg(long)]
    out: Option<PathBuf>,
}

fn resolve_inputs(args: &Args) -> Result<InputFiles> {
    let pick = |given: &Option<PathBuf>, stem: &str| -> Result<PathBuf> {
        match given {
            Some(p) => Ok(p.clone()),
            None => find_input(&args.data_dir, stem)
                .with_context(|| format!("looking for {}.* in {}", stem, args.data_dir.display())),
        }
    };
    Ok(InputFiles {
        responses: pick(&args.responses, discover::RESPONSES_STEM)?,
        answer_key: pick(&args.answer_key, discover::ANSWER_KEY_STEM)?,
        taxonomy: pick(&args.taxonomy, discover::TAXONOMY_STEM)?,
    })
}

fn percent(rate: f64) -> String {
    if rate.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.1}%", rate * 100.0)
    }
}

fn points(gap: f64) -> String {
    if gap.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:+.1} pp", gap)
    }
}

fn print_report(report: &GapReport, top: usize, unmapped_area: &str) {
    let s = &report.summary;
    println!();
    println!("== {} ==", report.query.institution);
    println!(
        "  institution {:>8}  ({} answers)",
        percent(s.institution_rate),
        s.institution_records
    );
    println!(
        "  comparison  {:>8}  ({} answers{})",
        percent(s.comparison_rate),
        s.comparison_records,
        if report.query.cohort_only { ", cohort only" } else { "" }
    );
    println!("  gap         {:>8}", points(s.gap_pp));

    if report.gaps.is_empty() {
        println!("  no comparable buckets");
        return;
    }

    println!("  critical gaps:");
    for (i, g) in report.critical(top).iter().enumerate() {
        println!(
            "  {:>3}. {:<60} {:>10}  {:>3} questions",
            i + 1,
            g.bucket.join(" / "),
            points(g.gap_pp),
            g.question_count
        );
    }

    let areas = report.by_area(unmapped_area);
    if !areas.is_empty() {
        println!("  by area (worst bucket):");
        for (area, gaps) in &areas {
            if let Some(worst) = gaps.first() {
                println!("    {:<40} {:>10}  ({} buckets)", area, points(worst.gap_pp), gaps.len());
            }
        }
    }
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(top) = args.top {
        config.top_n = top;
    }

    let files = resolve_inputs(&args)?;
    let (responses, answer_key, taxonomy) = files.load().context("loading inputs")?;

    let mut engine = Engine::new(config)?;
    let reconciled = engine
        .reconcile(&responses, &answer_key, &taxonomy)
        .context("reconciling inputs")?;
    info!(records = reconciled.records.len(), "reconciled");

    if args.list || args.institutions.is_empty() {
        println!("institutions:");
        for name in reconciled.institutions() {
            println!("  {}", name);
        }
        let booklets: Vec<String> = reconciled.booklets().iter().map(i64::to_string).collect();
        println!("booklets: {}", booklets.join(", "));
        return Ok(());
    }

    let top = engine.config().top_n;
    let unmapped_area = engine.config().sentinels.area.clone();
    for institution in &args.institutions {
        let mut query = GapQuery::new(institution.as_str())
            .cohort_only(args.cohort_only)
            .group_by(args.group_by.clone());
        if !args.booklets.is_empty() {
            query = query.with_booklets(args.booklets.iter().copied());
        }

        let report = compute_gaps(&reconciled, &query, engine.config());
        print_report(&report, top, &unmapped_area);

        if let Some(dir) = &args.out {
            let paths = export_report(&reconciled.records, &reconciled.report, &report, top, dir)
                .with_context(|| format!("exporting report for {}", institution))?;
            info!(gaps = %paths.gaps_parquet.display(), summary = %paths.summary.display(), "exported");
        }
    }

    info!(
        hits = engine.cache().hits(),
        misses = engine.cache().misses(),
        "done"
    );
    Ok(())
}
