use crate::aggregator::ClusterStats;
use crate::{OutputFormat, SortOrder};
use chrono::{FixedOffset, Offset, Utc};
use log::warn;
use std::io::Write;
use std::path::PathBuf;
use tabled::{Table, Tabled};

/// How to render the cluster statistics.
#[derive(Debug)]
pub struct ReportOptions<'a> {
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub timezone: &'a str,
    pub limit: usize,
    pub sort: SortOrder,
    pub pretty: bool,
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Count")]
    count: usize,
    #[tabled(rename = "Total Bytes")]
    total_bytes: String,
    #[tabled(rename = "Slot Time")]
    slot_time: String,
    #[tabled(rename = "User")]
    user_email: String,
    #[tabled(rename = "Destination")]
    destination_table: String,
    #[tabled(rename = "Cluster ID")]
    cluster_id: String,
    #[tabled(rename = "Query")]
    query: String,
}

#[derive(Debug)]
struct ReportItem {
    rank: usize,
    cluster_id: String,
    founder_job_id: String,
    count: usize,
    total_bytes: i64,
    mean_bytes: f64,
    total_slot_ms: i64,
    user_email: String,
    destination_table: String,
    time_range: String,
    job_ids: Vec<String>,
    query: String,
}

const MAX_LISTED_JOBS: usize = 10;

pub fn print_report(mut stats: Vec<ClusterStats>, options: &ReportOptions) -> anyhow::Result<()> {
    let mut writer: Box<dyn Write> = if let Some(path) = options.output {
        Box::new(std::fs::File::create(path)?)
    } else {
        Box::new(std::io::stdout())
    };

    match options.format {
        OutputFormat::Json => {
            if let SortOrder::Bytes = options.sort {
                sort_by_bytes(&mut stats);
            }
            print_json(&stats, options.pretty, &mut writer)?;
        }
        OutputFormat::Table => {
            let items = prepare_report_items(stats, options.timezone, options.limit);
            let rows: Vec<Row> = items.iter().map(|item| {
                Row {
                    rank: item.rank,
                    count: item.count,
                    total_bytes: format_bytes(item.total_bytes),
                    slot_time: format_slot_ms(item.total_slot_ms),
                    user_email: item.user_email.clone(),
                    destination_table: item.destination_table.clone(),
                    cluster_id: item.cluster_id.clone(),
                    query: format_query(&item.query, &OutputFormat::Table),
                }
            }).collect();

            print_table(rows, &mut writer)?;

            print_detailed_sections(&items, &mut writer)?;
        }
        OutputFormat::Html => {
            let items = prepare_report_items(stats, options.timezone, options.limit);
            print_html(&items, &mut writer)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Heaviest clusters first; equal totals keep creation order.
fn sort_by_bytes(stats: &mut [ClusterStats]) {
    stats.sort_by(|a, b| b.total_bytes_processed.cmp(&a.total_bytes_processed));
}

fn print_json(stats: &[ClusterStats], pretty: bool, writer: &mut dyn Write) -> anyhow::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, stats)?;
    } else {
        serde_json::to_writer(&mut *writer, stats)?;
    }
    writeln!(writer)?;
    Ok(())
}

fn prepare_report_items(mut stats: Vec<ClusterStats>, timezone_str: &str, limit: usize) -> Vec<ReportItem> {
    sort_by_bytes(&mut stats);

    let tz_offset = match timezone_str.parse::<FixedOffset>() {
        Ok(offset) => offset,
        Err(_) => {
            warn!("Invalid timezone offset '{}', using UTC.", timezone_str);
            Utc.fix()
        }
    };

    stats.into_iter().enumerate().take(limit).map(|(i, stat)| {
        let digest = md5::compute(stat.query);
        let cluster_id = format!("{:x}", digest);

        let mean_bytes = if stat.count > 0 { stat.total_bytes_processed as f64 / stat.count as f64 } else { 0.0 };

        let time_range = if let (Some(first), Some(last)) = (stat.first_seen, stat.last_seen) {
            format!("{} - {}", first.with_timezone(&tz_offset).format("%Y-%m-%d %H:%M:%S %z"), last.with_timezone(&tz_offset).format("%Y-%m-%d %H:%M:%S %z"))
        } else {
            "N/A".to_string()
        };

        ReportItem {
            rank: i + 1,
            cluster_id,
            founder_job_id: stat.key.to_string(),
            count: stat.count,
            total_bytes: stat.total_bytes_processed,
            mean_bytes,
            total_slot_ms: stat.total_slot_ms,
            user_email: stat.user_email.to_string(),
            destination_table: stat.destination_table.unwrap_or("N/A").to_string(),
            time_range,
            job_ids: stat.jobs.iter().map(|j| j.job_id.clone()).collect(),
            query: stat.query.to_string(),
        }
    }).collect()
}

fn print_detailed_sections(items: &[ReportItem], writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer, "\nDetailed Report\n===============")?;

    for item in items {
        writeln!(writer, "\nCluster ID: {}", item.cluster_id)?;
        writeln!(writer, "Rank: {}", item.rank)?;
        writeln!(writer, "  Time Range: {}", item.time_range)?;
        writeln!(writer, "  Job Stats:")?;
        writeln!(writer, "    Count:       {}", item.count)?;
        writeln!(writer, "    Total Bytes: {} ({} bytes)", format_bytes(item.total_bytes), item.total_bytes)?;
        writeln!(writer, "    Mean Bytes:  {}", format_bytes(item.mean_bytes.round() as i64))?;
        writeln!(writer, "    Slot Time:   {}", format_slot_ms(item.total_slot_ms))?;
        writeln!(writer, "  Majority:")?;
        writeln!(writer, "    User:        {}", item.user_email)?;
        writeln!(writer, "    Destination: {}", item.destination_table)?;
        writeln!(writer, "  Jobs (founded by {}):", item.founder_job_id)?;
        writeln!(writer, "    {}", listed_jobs(&item.job_ids))?;
        writeln!(writer, "  Representative Query:")?;
        writeln!(writer, "    {}", item.query.trim())?;
        writeln!(writer, "--------------------------------------------------------------------------------")?;
    }
    Ok(())
}

fn print_html(items: &[ReportItem], writer: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(writer, "<!DOCTYPE html>")?;
    writeln!(writer, "<html>")?;
    writeln!(writer, "<head>")?;
    writeln!(writer, "<title>Query Cluster Report</title>")?;
    writeln!(writer, "<style>")?;
    writeln!(writer, "body {{ font-family: sans-serif; margin: 20px; }}")?;
    writeln!(writer, "table {{ border-collapse: collapse; width: 100%; margin-bottom: 20px; }}")?;
    writeln!(writer, "th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}")?;
    writeln!(writer, "th {{ background-color: #f2f2f2; }}")?;
    writeln!(writer, ".cluster-block {{ border: 1px solid #ccc; padding: 15px; margin-bottom: 20px; border-radius: 5px; }}")?;
    writeln!(writer, ".query-sql {{ background-color: #f8f8f8; padding: 10px; overflow-x: auto; font-family: monospace; }}")?;
    writeln!(writer, ".cluster-id {{ font-family: monospace; }}")?;
    writeln!(writer, ".copy-btn {{ margin-bottom: 5px; padding: 5px 10px; cursor: pointer; }}")?;
    writeln!(writer, "</style>")?;
    writeln!(writer, "<script>")?;
    writeln!(writer, "function copyToClipboard(elementId) {{")?;
    writeln!(writer, "  var copyText = document.getElementById(elementId).innerText;")?;
    writeln!(writer, "  navigator.clipboard.writeText(copyText);")?;
    writeln!(writer, "}}")?;
    writeln!(writer, "</script>")?;
    writeln!(writer, "</head>")?;
    writeln!(writer, "<body>")?;

    writeln!(writer, "<h1 id=\"top\">Query Cluster Report</h1>")?;

    writeln!(writer, "<h2>Summary</h2>")?;
    writeln!(writer, "<table>")?;
    writeln!(writer, "<thead><tr><th>Rank</th><th>Count</th><th>Total Bytes</th><th>Slot Time</th><th>User</th><th>Destination</th><th>Cluster ID</th><th>Query</th></tr></thead>")?;
    writeln!(writer, "<tbody>")?;
    for item in items {
        let query_display = truncate(&format_query(&item.query, &OutputFormat::Html), 100);
        writeln!(writer, "<tr>")?;
        writeln!(writer, "<td>{}</td>", item.rank)?;
        writeln!(writer, "<td>{}</td>", item.count)?;
        writeln!(writer, "<td>{}</td>", format_bytes(item.total_bytes))?;
        writeln!(writer, "<td>{}</td>", format_slot_ms(item.total_slot_ms))?;
        writeln!(writer, "<td>{}</td>", html_escape(&item.user_email))?;
        writeln!(writer, "<td>{}</td>", html_escape(&item.destination_table))?;
        writeln!(writer, "<td class=\"cluster-id\"><a href=\"#{}\">{}</a></td>", item.cluster_id, item.cluster_id)?;
        writeln!(writer, "<td>{}</td>", html_escape(&query_display))?;
        writeln!(writer, "</tr>")?;
    }
    writeln!(writer, "</tbody>")?;
    writeln!(writer, "</table>")?;

    writeln!(writer, "<h2>Detailed Report</h2>")?;
    for item in items {
        writeln!(writer, "<div id=\"{}\" class=\"cluster-block\">", item.cluster_id)?;
        writeln!(writer, "<h3>Rank {}: Cluster ID {}</h3>", item.rank, item.cluster_id)?;
        writeln!(writer, "<p><strong>Time Range:</strong> {}</p>", item.time_range)?;

        writeln!(writer, "<h4>Job Stats</h4>")?;
        writeln!(writer, "<ul>")?;
        writeln!(writer, "<li>Count: {}</li>", item.count)?;
        writeln!(writer, "<li>Total Bytes: {} ({} bytes)</li>", format_bytes(item.total_bytes), item.total_bytes)?;
        writeln!(writer, "<li>Mean Bytes: {}</li>", format_bytes(item.mean_bytes.round() as i64))?;
        writeln!(writer, "<li>Slot Time: {}</li>", format_slot_ms(item.total_slot_ms))?;
        writeln!(writer, "<li>User: {}</li>", html_escape(&item.user_email))?;
        writeln!(writer, "<li>Destination: {}</li>", html_escape(&item.destination_table))?;
        writeln!(writer, "</ul>")?;

        writeln!(writer, "<h4>Jobs</h4>")?;
        writeln!(writer, "<p>Founded by <code>{}</code>: {}</p>", html_escape(&item.founder_job_id), html_escape(&listed_jobs(&item.job_ids)))?;

        writeln!(writer, "<h4>Representative Query</h4>")?;
        writeln!(writer, "<button class=\"copy-btn\" onclick=\"copyToClipboard('sql-{}')\">Copy SQL</button>", item.cluster_id)?;
        writeln!(writer, "<div class=\"query-sql\"><pre id=\"sql-{}\">{}</pre></div>", item.cluster_id, html_escape(item.query.trim()))?;

        writeln!(writer, "<p><a href=\"#top\">Back to Top</a></p>")?;
        writeln!(writer, "</div>")?;
    }

    writeln!(writer, "</body>")?;
    writeln!(writer, "</html>")?;
    Ok(())
}

fn html_escape(s: &str) -> String {
    s.replace("&", "&amp;")
     .replace("<", "&lt;")
     .replace(">", "&gt;")
     .replace("\"", "&quot;")
     .replace("'", "&#39;")
}

fn listed_jobs(job_ids: &[String]) -> String {
    let mut listed = job_ids.iter().take(MAX_LISTED_JOBS).cloned().collect::<Vec<_>>().join(", ");
    if job_ids.len() > MAX_LISTED_JOBS {
        listed.push_str(&format!(", ... and {} more", job_ids.len() - MAX_LISTED_JOBS));
    }
    listed
}

/// Binary units, as the BigQuery console shows them.
fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

fn format_slot_ms(slot_ms: i64) -> String {
    format!("{:.3}s", slot_ms as f64 / 1000.0)
}

/// Cuts at a char boundary so multi-byte query text never panics.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

fn format_query(query: &str, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => truncate(&query.replace("\n", " "), 50),
        _ => query.replace("\n", " "),
    }
}

fn print_table(rows: Vec<Row>, writer: &mut dyn Write) -> anyhow::Result<()> {
    let table = Table::new(rows).to_string();
    writeln!(writer, "{}", table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::cluster::cluster;
    use crate::cluster::tests::job;
    use crate::job::QueryJob;

    fn sample_jobs() -> Vec<QueryJob> {
        vec![
            job("a", "SELECT 1", "alice@example.com", Some(10)),
            job("b", "SELECT * FROM sales", "bob@example.com", Some(5000)),
            job("c", "SELECT 1", "alice@example.com", Some(20)),
            job("d", "SELECT * FROM users", "carol@example.com", None),
        ]
    }

    #[test]
    fn test_prepare_report_items_ranks_by_bytes() {
        let jobs = sample_jobs();
        let items = prepare_report_items(aggregate(&cluster(&jobs, 0)), "+09:00", 20);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].founder_job_id, "b");
        assert_eq!(items[1].founder_job_id, "a");
        assert_eq!(items[1].count, 2);
        assert_eq!(items[1].job_ids, vec!["a", "c"]);
        assert_eq!(items[2].total_bytes, 0);
        assert_eq!(items.iter().map(|i| i.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(items[0].time_range.contains("+0900"));
        assert_eq!(items[0].cluster_id, format!("{:x}", md5::compute("SELECT * FROM sales")));
    }

    #[test]
    fn test_prepare_report_items_respects_limit() {
        let jobs = sample_jobs();
        let items = prepare_report_items(aggregate(&cluster(&jobs, 0)), "+00:00", 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].total_bytes, 5000);
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        let jobs = sample_jobs();
        let items = prepare_report_items(aggregate(&cluster(&jobs, 0)), "Mars/Olympus", 1);
        assert!(items[0].time_range.contains("+0000"));
    }

    #[test]
    fn test_json_keeps_creation_order_unless_sorted() {
        let jobs = sample_jobs();
        let mut stats = aggregate(&cluster(&jobs, 0));

        let mut out = Vec::new();
        print_json(&stats, false, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let queries: Vec<&str> = value.as_array().unwrap().iter().map(|v| v["query"].as_str().unwrap()).collect();
        assert_eq!(queries, vec!["SELECT 1", "SELECT * FROM sales", "SELECT * FROM users"]);

        sort_by_bytes(&mut stats);
        let mut out = Vec::new();
        print_json(&stats, true, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["total_bytes_processed"], 5000);
        assert_eq!(value[0]["count"], 1);
        assert_eq!(value[1]["total_bytes_processed"], 30);
    }

    #[test]
    fn test_empty_json_is_an_empty_array() {
        let mut out = Vec::new();
        print_json(&[], false, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[]\n");
    }

    #[test]
    fn test_detailed_sections() {
        let jobs = sample_jobs();
        let items = prepare_report_items(aggregate(&cluster(&jobs, 0)), "+00:00", 20);
        let mut out = Vec::new();
        print_detailed_sections(&items, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Jobs (founded by a):\n    a, c\n"));
        assert!(text.contains("Total Bytes: 4.88 KiB (5000 bytes)"));
        assert!(text.contains("Destination: acme-analytics:tmp.out"));
    }

    #[test]
    fn test_html_escapes_query() {
        let jobs = vec![job("a", "SELECT * FROM t WHERE a < 'x'", "alice@example.com", Some(1))];
        let items = prepare_report_items(aggregate(&cluster(&jobs, 0)), "+00:00", 20);
        let mut out = Vec::new();
        print_html(&items, &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("SELECT * FROM t WHERE a &lt; &#39;x&#39;"));
        assert!(!html.contains("a < 'x'"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10.00 GiB");
    }

    #[test]
    fn test_listed_jobs_truncates() {
        let ids: Vec<String> = (0..12).map(|i| format!("j{}", i)).collect();
        assert_eq!(listed_jobs(&ids[..2]), "j0, j1");
        assert!(listed_jobs(&ids).ends_with("j9, ... and 2 more"));
    }

    #[test]
    fn test_format_query_truncates_on_char_boundary() {
        let query = format!("SELECT '{}'", "日".repeat(60));
        let shown = format_query(&query, &OutputFormat::Table);
        assert_eq!(shown.chars().count(), 50);
        assert!(shown.ends_with("..."));
        assert_eq!(format_query("SELECT\n1", &OutputFormat::Html), "SELECT 1");
    }
}
