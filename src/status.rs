//! Status projection for backup schedules.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ObjectReference;

use crate::classify::Classified;
use crate::crd::BackupScheduleStatus;

/// Project the classified Job partition into a fresh status.
///
/// The active list is always a full replacement, ordered by name so that
/// repeated cycles over the same live set write identical statuses.
pub fn project_status(classified: &Classified) -> BackupScheduleStatus {
    let mut active: Vec<ObjectReference> = classified.active.iter().map(job_reference).collect();
    active.sort_by(|a, b| a.name.cmp(&b.name));

    BackupScheduleStatus {
        active,
        last_scheduled_time: classified.last_scheduled.map(|t| t.to_rfc3339()),
    }
}

/// A lightweight reference to a Job, carrying just enough identity to find
/// it again.
fn job_reference(job: &Job) -> ObjectReference {
    ObjectReference {
        api_version: Some("batch/v1".to_string()),
        kind: Some("Job".to_string()),
        name: job.metadata.name.clone(),
        namespace: job.metadata.namespace.clone(),
        uid: job.metadata.uid.clone(),
        ..Default::default()
    }
}
