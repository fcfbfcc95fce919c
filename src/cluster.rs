use crate::distance::distance;
use crate::job::QueryJob;
use log::{debug, info};
use std::collections::HashMap;

/// A group of jobs whose query text is close to the founding job's query.
#[derive(Debug)]
pub struct Cluster<'a> {
    members: Vec<&'a QueryJob>,
}

impl<'a> Cluster<'a> {
    fn new(founder: &'a QueryJob) -> Self {
        Self { members: vec![founder] }
    }

    /// Job id of the founding job.
    pub fn key(&self) -> &'a str {
        &self.members[0].job_id
    }

    /// Query text of the founding job. Every distance is measured against this.
    pub fn representative(&self) -> &'a str {
        &self.members[0].query
    }

    /// Members in encounter order; never empty.
    pub fn members(&self) -> &[&'a QueryJob] {
        &self.members
    }
}

/// Groups `jobs` by edit distance of their query text, in one greedy pass.
///
/// Each job joins the cluster whose representative is nearest, provided that
/// distance is at most `threshold`; otherwise it founds a new cluster. A job
/// whose query text exactly matches one already seen skips the distance scan
/// and joins that job's cluster. Clusters are scanned oldest first and the
/// oldest wins a tie. Clusters are returned in creation order.
pub fn cluster(jobs: &[QueryJob], threshold: usize) -> Vec<Cluster<'_>> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut exact: HashMap<&str, usize> = HashMap::new();

    for job in jobs {
        if let Some(&idx) = exact.get(job.query.as_str()) {
            clusters[idx].members.push(job);
            continue;
        }

        let nearest = clusters
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, distance(&job.query, c.representative())))
            .fold(None, |best: Option<(usize, usize)>, (idx, dist)| match best {
                Some((_, best_dist)) if best_dist <= dist => best,
                _ => Some((idx, dist)),
            });

        let idx = match nearest {
            Some((idx, dist)) if dist <= threshold => {
                debug!("job {} joins cluster {} at distance {}", job.job_id, clusters[idx].key(), dist);
                clusters[idx].members.push(job);
                idx
            }
            _ => {
                debug!("job {} founds cluster {}", job.job_id, clusters.len());
                clusters.push(Cluster::new(job));
                clusters.len() - 1
            }
        };
        exact.insert(&job.query, idx);
    }

    info!("clustered {} jobs into {} clusters (threshold {})", jobs.len(), clusters.len(), threshold);
    clusters
}
