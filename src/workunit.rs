//! Work unit factory.
//!
//! Builds the Job for one fire time. The name is a deterministic function
//! of the parent name and the fire time, so a re-created Job for the same
//! fire time collides on identity instead of duplicating work.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::config::{Config, MANAGED_BY_LABEL, MANAGER_NAME, SCHEDULE_LABEL};
use crate::crd::{BackupSchedule, BackupTarget, CloudProvider, DatabaseKind, Workload};
use crate::error::Error;

/// Deterministic Job name for a fire time.
pub fn work_unit_name(schedule_name: &str, fired_at: DateTime<Utc>) -> String {
    format!("{}-{}", schedule_name, fired_at.timestamp())
}

/// Build the Job for `fired_at`, owned by `schedule`.
///
/// The Job spec is an independent copy of the template (or a synthesized
/// runner pod for explicit targets); labels and annotations are merged with
/// the operator's own, and the fire time is recorded under the configured
/// scheduled-at annotation.
pub fn build_work_unit(
    schedule: &BackupSchedule,
    config: &Config,
    fired_at: DateTime<Utc>,
) -> Result<Job, Error> {
    let parent_name = schedule.name_any();
    let namespace = schedule
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let owner = schedule
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("metadata.uid"))?;

    let (mut labels, mut annotations, spec) = match &schedule.spec.workload {
        Workload::JobTemplate(template) => {
            let meta = template.metadata.clone().unwrap_or_default();
            let spec = template
                .spec
                .clone()
                .ok_or(Error::MissingObjectKey("spec.jobTemplate.spec"))?;
            (
                meta.labels.unwrap_or_default(),
                meta.annotations.unwrap_or_default(),
                spec,
            )
        }
        Workload::Backup(target) => (
            BTreeMap::new(),
            BTreeMap::new(),
            runner_job_spec(target, config),
        ),
    };

    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string());
    labels.insert(SCHEDULE_LABEL.to_string(), parent_name.clone());
    annotations.insert(
        config.scheduled_at_annotation.clone(),
        fired_at.to_rfc3339(),
    );

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(work_unit_name(&parent_name, fired_at)),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// Translate explicit backup targets into a single-container runner Job.
fn runner_job_spec(target: &BackupTarget, config: &Config) -> JobSpec {
    let database = &target.database;
    let cloud = &target.cloud;

    let kind = match database.kind {
        DatabaseKind::Postgres => "postgres",
        DatabaseKind::Mysql => "mysql",
    };
    let port = database.port.unwrap_or_else(|| database.kind.default_port());

    let mut env = vec![
        env_value("DATABASE_KIND", kind),
        env_value("DATABASE_HOST", &database.host),
        env_value("DATABASE_PORT", &port.to_string()),
        env_value("DATABASE_NAME", &database.name),
        env_value("DATABASE_USER", &database.user),
        env_secret("DATABASE_PASSWORD", &database.password_secret, "password"),
    ];

    match cloud.provider {
        CloudProvider::Aws => {
            env.push(env_value("AWS_S3_BUCKET", &cloud.bucket));
            if let Some(region) = &cloud.region {
                env.push(env_value("AWS_S3_REGION", region));
            }
        }
        CloudProvider::Azure => {
            env.push(env_value("AZURE_STORAGE_CONTAINER", &cloud.bucket));
        }
        CloudProvider::Gcp => {
            env.push(env_value("GCS_BUCKET", &cloud.bucket));
        }
    }

    JobSpec {
        template: PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                restart_policy: Some("OnFailure".to_string()),
                containers: vec![Container {
                    name: "backup-runner".to_string(),
                    image: Some(config.runner_image.clone()),
                    image_pull_policy: Some("Always".to_string()),
                    env: Some(env),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}

fn env_value(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn env_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}
