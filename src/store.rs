//! Ports to the cluster object store and the wall clock.
//!
//! The reconciliation loop only ever talks to these traits, so a test can
//! drive a full cycle against an in-memory store with a fixed clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::config::{MANAGED_BY_LABEL, MANAGER_NAME, SCHEDULE_LABEL};
use crate::crd::{BackupSchedule, BackupScheduleStatus};
use crate::error::Error;

/// Result of a create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A work unit with this name already exists. Because names are
    /// deterministic per fire time, this is success.
    AlreadyExists,
}

/// Object-store operations the reconciler needs.
///
/// `delete_background` and `create` absorb the idempotent outcomes
/// (NotFound, AlreadyExists); every other error is surfaced for the
/// hosting scheduler to retry.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Fetch a schedule; `None` if it no longer exists.
    async fn get_schedule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BackupSchedule>, Error>;

    /// List the Jobs owned by the named schedule.
    async fn list_owned(&self, namespace: &str, owner: &str) -> Result<Vec<Job>, Error>;

    /// Create a Job.
    async fn create(&self, namespace: &str, job: Job) -> Result<CreateOutcome, Error>;

    /// Delete a Job with background cascade; deleting an absent Job is Ok.
    async fn delete_background(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Replace a schedule's status wholesale.
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: BackupScheduleStatus,
    ) -> Result<(), Error>;
}

/// Injectable wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Kubernetes-backed store.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn schedules(&self, namespace: &str) -> Api<BackupSchedule> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkStore for KubeStore {
    async fn get_schedule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BackupSchedule>, Error> {
        match self.schedules(namespace).get(name).await {
            Ok(schedule) => Ok(Some(schedule)),
            Err(e) if is_api_code(&e, 404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_owned(&self, namespace: &str, owner: &str) -> Result<Vec<Job>, Error> {
        // The label pair acts as the owner index; the owner-reference check
        // drops anything that merely copied our labels.
        let selector = format!("{MANAGED_BY_LABEL}={MANAGER_NAME},{SCHEDULE_LABEL}={owner}");
        let list = self
            .jobs(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;

        Ok(list
            .items
            .into_iter()
            .filter(|job| is_controlled_by(job, owner))
            .collect())
    }

    async fn create(&self, namespace: &str, job: Job) -> Result<CreateOutcome, Error> {
        match self.jobs(namespace).create(&PostParams::default(), &job).await {
            Ok(created) => {
                debug!(job = %created.name_any(), "work unit created");
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_api_code(&e, 409) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_background(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_api_code(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: BackupScheduleStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        let pp = PatchParams::apply(MANAGER_NAME);
        self.schedules(namespace)
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

fn is_api_code(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

fn is_controlled_by(job: &Job, owner: &str) -> bool {
    job.owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.kind == "BackupSchedule" && r.name == owner)
}
