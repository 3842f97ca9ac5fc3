//! Custom Resource Definition for backup schedules

use k8s_openapi::api::batch::v1::JobTemplateSpec;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BackupSchedule describes a recurring backup job: when to run it, how to
/// handle overlapping runs, and what each run should execute.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "backups.io",
    version = "v1alpha1",
    kind = "BackupSchedule",
    plural = "backupschedules",
    shortname = "bks",
    status = "BackupScheduleStatus",
    namespaced,
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Policy","type":"string","jsonPath":".spec.concurrencyPolicy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleSpec {
    /// Cron expression (5 fields, minute resolution) driving run creation.
    pub schedule: String,

    /// How to treat a due run while earlier runs are still active.
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,

    /// When true, due runs are skipped but status is still maintained.
    #[serde(default)]
    pub suspend: Option<bool>,

    /// What each run executes.
    #[serde(flatten)]
    pub workload: Workload,
}

/// Concurrency policy for overlapping runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum ConcurrencyPolicy {
    /// Runs may overlap freely.
    #[default]
    Allow,
    /// A due run is skipped while any earlier run is still active.
    Forbid,
    /// Active runs are deleted before the new run is created.
    Replace,
}

/// The two supported workload shapes.
///
/// Everything outside the work-unit factory treats these identically; only
/// the translation into a Job spec differs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Workload {
    /// A full Job template, copied verbatim into each run.
    JobTemplate(JobTemplateSpec),
    /// Explicit backup targets, translated into the runner container.
    Backup(BackupTarget),
}

/// Explicit target fields for the bundled backup runner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupTarget {
    /// Database to dump.
    pub database: DatabaseTarget,

    /// Object storage destination for the dump.
    pub cloud: CloudTarget,
}

/// Connection details for the database being backed up.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseTarget {
    /// Database engine.
    pub kind: DatabaseKind,

    /// Hostname of the database service.
    pub host: String,

    /// Port, defaulting to the engine's standard port.
    #[serde(default)]
    pub port: Option<i32>,

    /// Database name to dump.
    pub name: String,

    /// User to connect as.
    pub user: String,

    /// Name of the Secret holding the `password` key.
    pub password_secret: String,
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Mysql,
}

impl DatabaseKind {
    /// The engine's conventional port.
    pub fn default_port(&self) -> i32 {
        match self {
            DatabaseKind::Postgres => 5432,
            DatabaseKind::Mysql => 3306,
        }
    }
}

/// Object storage destination.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudTarget {
    /// Storage provider.
    pub provider: CloudProvider,

    /// Bucket or container receiving the dump.
    pub bucket: String,

    /// Provider region, where applicable.
    #[serde(default)]
    pub region: Option<String>,
}

/// Supported storage providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

/// Observed state of a BackupSchedule.
///
/// `active` is recomputed from the live Job list on every cycle and always
/// written as a whole; it is never patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleStatus {
    /// References to currently running Jobs owned by this schedule.
    #[serde(default)]
    pub active: Vec<ObjectReference>,

    /// Fire time of the most recently observed run, RFC 3339.
    pub last_scheduled_time: Option<String>,
}
