use crate::error::{Error, Result};
use crate::Scope;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

static RE_PROJECT: OnceLock<Regex> = OnceLock::new();
static RE_REGION: OnceLock<Regex> = OnceLock::new();

/// Builds the `INFORMATION_SCHEMA` query that exports the jobs to cluster.
///
/// Selects finished `QUERY` jobs of `project` created after `creation_time`
/// whose destination table is a regular table (dataset not starting with `_`)
/// that no job in the same window reads from. `scope` picks the view used to
/// collect referenced tables; the jobs themselves always come from
/// `JOBS_BY_PROJECT`, since the organization view has no `query` column.
pub fn generate_query(project: &str, region: &str, scope: Scope, creation_time: NaiveDate) -> Result<String> {
    let re_project = RE_PROJECT.get_or_init(|| {
        Regex::new(r"^(?:[a-z][a-z0-9.-]*:)?[a-z][a-z0-9-]{4,28}[a-z0-9]$").unwrap()
    });
    let re_region = RE_REGION.get_or_init(|| Regex::new(r"^[a-z]+(?:-[a-z0-9]+)*$").unwrap());

    if !re_project.is_match(project) {
        return Err(Error::InvalidArgument(format!("invalid project id {:?}", project)));
    }
    if !re_region.is_match(region) {
        return Err(Error::InvalidArgument(format!("invalid region {:?}", region)));
    }

    let jobs_view = format!("`{}`.`region-{}`.INFORMATION_SCHEMA.JOBS_BY_PROJECT", project, region);
    let referenced_view = match scope {
        Scope::Project => jobs_view.clone(),
        Scope::Organization => format!("`region-{}`.INFORMATION_SCHEMA.JOBS_BY_ORGANIZATION", region),
    };
    let since = creation_time.format("%Y-%m-%d");

    Ok(format!(
        r#"
WITH
  filtered_jobs AS (
  SELECT
    *
  FROM
    {jobs_view}
  WHERE
    TRUE
    AND job_type = "QUERY"
    AND state = "DONE"
    AND destination_table.project_id IS NOT NULL
    AND NOT STARTS_WITH(destination_table.dataset_id, "_")
    AND creation_time > "{since}"
  ORDER BY
    total_bytes_processed DESC ),
  referenced_tables AS (
  SELECT
    referenced_tables.project_id,
    referenced_tables.dataset_id,
    referenced_tables.table_id,
  FROM
    {referenced_view},
    UNNEST(referenced_tables) AS referenced_tables
  WHERE
    creation_time > "{since}"
  GROUP BY
    referenced_tables.project_id,
    referenced_tables.dataset_id,
    referenced_tables.table_id )
SELECT
  creation_time AS CreationTime,
  project_id AS ProjectId,
  project_number AS ProjectNumber,
  user_email AS UserEmail,
  job_id AS JobId,
  job_type AS JobType,
  statement_type AS StatementType,
  priority AS Priority,
  start_time AS StartTime,
  end_time AS EndTime,
  query AS Query,
  destination_table.project_id || ":" || destination_table.dataset_id || "." || destination_table.table_id AS DestinationTable,
  state AS State,
  reservation_id AS ReservationId,
  total_bytes_processed AS TotalBytesProcessed,
  total_slot_ms AS TotalSlotMs,
FROM
  filtered_jobs
WHERE
  destination_table.project_id || ":" || destination_table.dataset_id || "." || destination_table.table_id NOT IN (
    SELECT
      project_id || ":" || dataset_id || "." || table_id
    FROM
      referenced_tables
  )
LIMIT 10000
"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_project_scope() {
        let sql = generate_query("acme-analytics", "us", Scope::Project, date()).unwrap();
        assert!(sql.contains("FROM\n    `acme-analytics`.`region-us`.INFORMATION_SCHEMA.JOBS_BY_PROJECT\n  WHERE"));
        assert!(sql.contains("FROM\n    `acme-analytics`.`region-us`.INFORMATION_SCHEMA.JOBS_BY_PROJECT,\n    UNNEST"));
        assert_eq!(sql.matches(r#"creation_time > "2024-03-01""#).count(), 2);
        assert!(sql.trim_end().ends_with("LIMIT 10000"));
    }

    #[test]
    fn test_organization_scope() {
        let sql = generate_query("acme-analytics", "asia-northeast1", Scope::Organization, date()).unwrap();
        assert!(sql.contains("`acme-analytics`.`region-asia-northeast1`.INFORMATION_SCHEMA.JOBS_BY_PROJECT\n"));
        assert!(sql.contains("    `region-asia-northeast1`.INFORMATION_SCHEMA.JOBS_BY_ORGANIZATION,\n"));
    }

    #[test]
    fn test_columns_match_job_aliases() {
        let sql = generate_query("acme-analytics", "eu", Scope::Project, date()).unwrap();
        for alias in ["CreationTime", "JobId", "Query", "DestinationTable", "TotalBytesProcessed", "TotalSlotMs"] {
            assert!(sql.contains(&format!(" AS {},", alias)), "missing {}", alias);
        }
    }

    #[test]
    fn test_domain_scoped_project() {
        assert!(generate_query("example.com:analytics", "us", Scope::Project, date()).is_ok());
    }

    #[test]
    fn test_rejects_invalid_identifiers() {
        let err = generate_query("acme`; DROP", "us", Scope::Project, date()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(generate_query("", "us", Scope::Project, date()).is_err());
        assert!(generate_query("acme-analytics", "US", Scope::Project, date()).is_err());
        assert!(generate_query("acme-analytics", "us`", Scope::Project, date()).is_err());
    }
}
