use crate::cluster::Cluster;
use crate::job::QueryJob;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// Aggregated statistics for one cluster of similar queries.
#[derive(Debug, Serialize)]
pub struct ClusterStats<'a> {
    pub jobs: Vec<&'a QueryJob>,
    pub count: usize,
    pub total_bytes_processed: i64,
    pub query: &'a str,
    pub user_email: &'a str,
    pub destination_table: Option<&'a str>,
    #[serde(skip)]
    pub key: &'a str,
    #[serde(skip)]
    pub total_slot_ms: i64,
    #[serde(skip)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Computes statistics for each cluster, in the order given.
pub fn aggregate<'a>(clusters: &[Cluster<'a>]) -> Vec<ClusterStats<'a>> {
    clusters.iter().map(summarize).collect()
}

fn summarize<'a>(cluster: &Cluster<'a>) -> ClusterStats<'a> {
    let jobs = cluster.members().to_vec();

    let total_bytes_processed = jobs.iter().map(|j| j.bytes_processed()).sum();
    let total_slot_ms = jobs.iter().map(|j| j.slot_ms()).sum();
    let first_seen = jobs.iter().map(|j| j.creation_time).min();
    let last_seen = jobs.iter().map(|j| j.creation_time).max();

    let user_email = majority(jobs.iter().map(|j| j.user_email.as_str())).unwrap_or_default();
    let destination_table = majority(jobs.iter().map(|j| j.destination_table.as_deref())).flatten();

    ClusterStats {
        count: jobs.len(),
        total_bytes_processed,
        query: cluster.representative(),
        user_email,
        destination_table,
        key: cluster.key(),
        total_slot_ms,
        first_seen,
        last_seen,
        jobs,
    }
}

/// Most frequent value; among equally frequent values the one seen first wins.
fn majority<T: Eq + Hash>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut tally: HashMap<T, (usize, usize)> = HashMap::new();
    for (pos, value) in values.enumerate() {
        tally.entry(value).or_insert((0, pos)).0 += 1;
    }
    tally
        .into_iter()
        .max_by(|(_, (count_a, pos_a)), (_, (count_b, pos_b))| count_a.cmp(count_b).then(pos_b.cmp(pos_a)))
        .map(|(value, _)| value)
}
