//! Partitioning of child Jobs by completion state.
//!
//! Re-derived from the live Job list on every cycle; nothing here is cached
//! across invocations.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tracing::warn;

/// Condition type marking a Job that finished successfully.
const CONDITION_COMPLETE: &str = "Complete";

/// Condition type marking a Job that finished in failure.
const CONDITION_FAILED: &str = "Failed";

/// The partition of a schedule's child Jobs, plus the latest fire time seen
/// across their scheduled-at annotations.
#[derive(Debug, Default)]
pub struct Classified {
    pub active: Vec<Job>,
    pub succeeded: Vec<Job>,
    pub failed: Vec<Job>,
    pub last_scheduled: Option<DateTime<Utc>>,
}

/// Partition `jobs` into active/succeeded/failed.
///
/// A Job counts as finished iff it carries a `Complete` or `Failed`
/// condition with status `"True"`; everything else is active. A
/// scheduled-at annotation that does not parse is logged and skipped for
/// the latest-fire-time fold, but the Job is still classified.
pub fn classify(jobs: &[Job], scheduled_at_key: &str) -> Classified {
    let mut result = Classified::default();

    for job in jobs {
        match finished_condition(job) {
            Some(CONDITION_FAILED) => result.failed.push(job.clone()),
            Some(_) => result.succeeded.push(job.clone()),
            None => result.active.push(job.clone()),
        }

        if let Some(raw) = job.annotations().get(scheduled_at_key) {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(t) => {
                    let t = t.with_timezone(&Utc);
                    if result.last_scheduled.map_or(true, |prev| prev < t) {
                        result.last_scheduled = Some(t);
                    }
                }
                Err(error) => {
                    warn!(job = %job.name_any(), %raw, %error, "unparseable scheduled-at annotation");
                }
            }
        }
    }

    result
}

/// The terminal condition type carried by `job`, if it has one with a true
/// status.
fn finished_condition(job: &Job) -> Option<&str> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| {
            (c.type_ == CONDITION_COMPLETE || c.type_ == CONDITION_FAILED) && c.status == "True"
        })
        .map(|c| c.type_.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const KEY: &str = "backups.io/scheduled-at";

    fn job(name: &str, condition: Option<(&str, &str)>, scheduled_at: Option<&str>) -> Job {
        let annotations = scheduled_at.map(|raw| {
            let mut map = BTreeMap::new();
            map.insert(KEY.to_string(), raw.to_string());
            map
        });

        let status = condition.map(|(type_, status)| JobStatus {
            conditions: Some(vec![JobCondition {
                type_: type_.to_string(),
                status: status.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });

        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations,
                ..Default::default()
            },
            spec: None,
            status,
        }
    }

    #[test]
    fn partitions_by_terminal_condition() {
        let jobs = vec![
            job("running", None, None),
            job("done", Some(("Complete", "True")), None),
            job("broken", Some(("Failed", "True")), None),
        ];

        let classified = classify(&jobs, KEY);
        assert_eq!(classified.active.len(), 1);
        assert_eq!(classified.succeeded.len(), 1);
        assert_eq!(classified.failed.len(), 1);
    }

    #[test]
    fn complete_job_is_never_active() {
        let jobs = vec![job("done", Some(("Complete", "True")), None)];
        let classified = classify(&jobs, KEY);
        assert!(classified.active.is_empty());
        assert_eq!(classified.succeeded.len(), 1);
    }

    #[test]
    fn false_condition_does_not_finish_a_job() {
        let jobs = vec![job("still-going", Some(("Complete", "False")), None)];
        let classified = classify(&jobs, KEY);
        assert_eq!(classified.active.len(), 1);
        assert!(classified.succeeded.is_empty());
    }

    #[test]
    fn folds_latest_scheduled_time() {
        let jobs = vec![
            job("a", None, Some("2024-01-15T12:00:00Z")),
            job("b", None, Some("2024-01-15T12:05:00Z")),
            job("c", None, Some("2024-01-15T11:55:00Z")),
        ];

        let classified = classify(&jobs, KEY);
        assert_eq!(
            classified.last_scheduled.unwrap().to_rfc3339(),
            "2024-01-15T12:05:00+00:00"
        );
    }

    #[test]
    fn bad_annotation_is_skipped_but_job_still_classified() {
        let jobs = vec![
            job("good", None, Some("2024-01-15T12:00:00Z")),
            job("bad", None, Some("not-a-timestamp")),
        ];

        let classified = classify(&jobs, KEY);
        assert_eq!(classified.active.len(), 2);
        assert_eq!(
            classified.last_scheduled.unwrap().to_rfc3339(),
            "2024-01-15T12:00:00+00:00"
        );
    }
}
