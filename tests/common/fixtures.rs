//! In-memory object store, fixed clock, and resource builders.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::core::ErrorResponse;
use kube::ResourceExt;

use backup_operator::crd::{
    BackupSchedule, BackupScheduleSpec, BackupScheduleStatus, BackupTarget, CloudProvider,
    CloudTarget, ConcurrencyPolicy, DatabaseKind, DatabaseTarget, Workload,
};
use backup_operator::error::Error;
use backup_operator::store::{Clock, CreateOutcome, WorkStore};

use super::NAMESPACE;

/// A clock pinned to one instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// In-memory [`WorkStore`] that records every call the reconciler makes.
#[derive(Default)]
pub struct FakeStore {
    pub schedules: Mutex<BTreeMap<String, BackupSchedule>>,
    pub jobs: Mutex<BTreeMap<String, Job>>,
    /// Job names of every create attempt, including ones that collided.
    pub create_attempts: Mutex<Vec<String>>,
    /// Job names of every delete request.
    pub deletes: Mutex<Vec<String>>,
    /// Every status written, oldest first.
    pub status_updates: Mutex<Vec<BackupScheduleStatus>>,
    pub fail_status_updates: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_schedule(&self, schedule: BackupSchedule) {
        let key = object_key(NAMESPACE, &schedule.name_any());
        self.schedules.lock().unwrap().insert(key, schedule);
    }

    pub fn put_job(&self, job: Job) {
        let key = object_key(NAMESPACE, &job.name_any());
        self.jobs.lock().unwrap().insert(key, job);
    }

    /// Names of the Jobs currently in the store, sorted.
    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .map(|j| j.name_any())
            .collect()
    }

    pub fn last_status(&self) -> Option<BackupScheduleStatus> {
        self.status_updates.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl WorkStore for FakeStore {
    async fn get_schedule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BackupSchedule>, Error> {
        let schedules = self.schedules.lock().unwrap();
        Ok(schedules.get(&object_key(namespace, name)).cloned())
    }

    async fn list_owned(&self, namespace: &str, owner: &str) -> Result<Vec<Job>, Error> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|job| {
                job.metadata.namespace.as_deref() == Some(namespace)
                    && job.owner_references().iter().any(|r| {
                        r.controller == Some(true)
                            && r.kind == "BackupSchedule"
                            && r.name == owner
                    })
            })
            .cloned()
            .collect())
    }

    async fn create(&self, namespace: &str, job: Job) -> Result<CreateOutcome, Error> {
        let name = job.name_any();
        self.create_attempts.lock().unwrap().push(name.clone());

        let mut jobs = self.jobs.lock().unwrap();
        let key = object_key(namespace, &name);
        if jobs.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        jobs.insert(key, job);
        Ok(CreateOutcome::Created)
    }

    async fn delete_background(&self, namespace: &str, name: &str) -> Result<(), Error> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError", "delete rejected"));
        }
        self.deletes.lock().unwrap().push(name.to_string());
        self.jobs.lock().unwrap().remove(&object_key(namespace, name));
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: BackupScheduleStatus,
    ) -> Result<(), Error> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }

        self.status_updates.lock().unwrap().push(status.clone());
        let mut schedules = self.schedules.lock().unwrap();
        if let Some(schedule) = schedules.get_mut(&object_key(namespace, name)) {
            schedule.status = Some(status);
        }
        Ok(())
    }
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

/// A schedule with explicit backup targets, created at `created_at`.
pub fn backup_schedule(name: &str, expr: &str, created_at: DateTime<Utc>) -> BackupSchedule {
    let mut schedule = BackupSchedule::new(
        name,
        BackupScheduleSpec {
            schedule: expr.to_string(),
            concurrency_policy: ConcurrencyPolicy::Allow,
            suspend: None,
            workload: Workload::Backup(BackupTarget {
                database: DatabaseTarget {
                    kind: DatabaseKind::Postgres,
                    host: "postgres.db.svc".to_string(),
                    port: None,
                    name: "orders".to_string(),
                    user: "backup".to_string(),
                    password_secret: "orders-db-credentials".to_string(),
                },
                cloud: CloudTarget {
                    provider: CloudProvider::Aws,
                    bucket: "orders-backups".to_string(),
                    region: Some("eu-central-1".to_string()),
                },
            }),
        },
    );
    schedule.metadata.namespace = Some(NAMESPACE.to_string());
    schedule.metadata.uid = Some(format!("uid-{name}"));
    schedule.metadata.creation_timestamp = Some(Time(created_at));
    schedule
}

/// An unfinished Job owned by the named schedule.
pub fn active_job(name: &str, owner: &str) -> Job {
    owned_job(name, owner, None)
}

/// A Job owned by the named schedule that finished with the given
/// condition type (`Complete` or `Failed`).
pub fn finished_job(name: &str, owner: &str, condition: &str) -> Job {
    owned_job(name, owner, Some(condition))
}

fn owned_job(name: &str, owner: &str, condition: Option<&str>) -> Job {
    let status = condition.map(|type_| JobStatus {
        conditions: Some(vec![JobCondition {
            type_: type_.to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{name}")),
            owner_references: Some(vec![OwnerReference {
                api_version: "backups.io/v1alpha1".to_string(),
                kind: "BackupSchedule".to_string(),
                name: owner.to_string(),
                uid: format!("uid-{owner}"),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: None,
        status,
    }
}
