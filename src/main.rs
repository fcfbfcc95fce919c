mod error;
mod job;
mod distance;
mod cluster;
mod aggregator;
mod report;
mod sql;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the exported job list file(s) (JSON array or one JSON object per line)
    #[arg(long = "files", num_args = 1..)]
    files: Vec<PathBuf>,

    /// Maximum query edit distance for two jobs to count as the same query
    #[arg(long, visible_alias = "min-distance-threshold", default_value_t = 0)]
    threshold: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Order of clusters in JSON output (table and html are always ranked by bytes)
    #[arg(long, value_enum, default_value_t = SortOrder::Creation)]
    sort: SortOrder,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Timezone offset (e.g., "+09:00")
    #[arg(long, default_value = "+00:00")]
    timezone: String,

    /// Number of clusters to show in table and html reports
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Print the INFORMATION_SCHEMA query that exports the job list, then exit
    #[arg(long, requires = "project")]
    emit_sql: bool,

    /// GCP project
    #[arg(long)]
    project: Option<String>,

    /// BigQuery region
    #[arg(long, default_value = "us")]
    region: String,

    /// Which jobs view to check referenced tables against
    #[arg(long, value_enum, default_value_t = Scope::Project)]
    scope: Scope,

    /// Select jobs created after this date (YYYY-MM-DD) [default: 7 days ago]
    #[arg(long)]
    creation_time: Option<NaiveDate>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Table,
    Html,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SortOrder {
    /// Order in which clusters were founded
    Creation,
    /// Total bytes processed, descending
    Bytes,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Project,
    Organization,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    if args.emit_sql {
        let project = args.project.as_deref().unwrap_or_default();
        let creation_time = args
            .creation_time
            .unwrap_or_else(|| (Utc::now() - Duration::days(7)).date_naive());
        let query = sql::generate_query(project, &args.region, args.scope, creation_time)?;
        println!("{}", query);
        return Ok(());
    }

    let jobs = job::load_jobs(&args.files).context("failed to load job list")?;
    info!("loaded {} jobs", jobs.len());

    let clusters = cluster::cluster(&jobs, args.threshold);
    let stats = aggregator::aggregate(&clusters);

    let options = report::ReportOptions {
        format: args.format,
        output: args.output.as_ref(),
        timezone: &args.timezone,
        limit: args.limit,
        sort: args.sort,
        pretty: args.pretty,
    };
    report::print_report(stats, &options)?;

    Ok(())
}
