//! The per-invocation reconciliation cycle.
//!
//! Stateless: everything the cycle acts on is re-read from the object
//! store, so repeated or overlapping invocations converge on the same
//! result and an aborted cycle self-heals on the next one.

use std::time::Duration;

use kube::{Resource, ResourceExt};
use tracing::{debug, error, info};

use crate::classify::classify;
use crate::config::Config;
use crate::crd::{BackupSchedule, ConcurrencyPolicy};
use crate::cron::{compute_schedule, CronExpr};
use crate::error::Error;
use crate::status::project_status;
use crate::store::{Clock, CreateOutcome, WorkStore};
use crate::workunit::build_work_unit;

/// How a completed cycle wants to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The schedule no longer exists; nothing to do.
    Gone,
    /// The schedule expression does not parse; re-running cannot help
    /// until the resource is edited.
    InvalidSchedule,
    /// No future fire time exists (unsatisfiable date combination).
    NoUpcomingRun,
    /// Invoke again after this delay.
    Requeue(Duration),
}

/// Concurrency decision for one due fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Create the work unit.
    Proceed,
    /// Leave the active runs alone and skip creation this cycle.
    SkipThisCycle,
    /// Delete the active runs, then create.
    ReplaceActive,
}

/// Apply the concurrency policy to the observed active count.
pub fn enforce(policy: ConcurrencyPolicy, active: usize) -> Decision {
    match policy {
        ConcurrencyPolicy::Allow => Decision::Proceed,
        ConcurrencyPolicy::Forbid if active > 0 => Decision::SkipThisCycle,
        ConcurrencyPolicy::Forbid => Decision::Proceed,
        ConcurrencyPolicy::Replace if active > 0 => Decision::ReplaceActive,
        ConcurrencyPolicy::Replace => Decision::Proceed,
    }
}

/// Run one reconciliation cycle for the named schedule.
pub async fn run_cycle<S: WorkStore + ?Sized>(
    store: &S,
    clock: &dyn Clock,
    config: &Config,
    namespace: &str,
    name: &str,
) -> Result<Outcome, Error> {
    let Some(schedule) = store.get_schedule(namespace, name).await? else {
        debug!(%name, %namespace, "schedule is gone");
        return Ok(Outcome::Gone);
    };

    let jobs = store.list_owned(namespace, name).await?;
    let classified = classify(&jobs, &config.scheduled_at_annotation);
    info!(
        %name,
        %namespace,
        active = classified.active.len(),
        succeeded = classified.succeeded.len(),
        failed = classified.failed.len(),
        "reconciling backup schedule"
    );

    // Status is always a full overwrite derived from the live list, never
    // an incremental patch.
    let status = project_status(&classified);
    store.update_status(namespace, name, status).await?;

    let created_at = schedule
        .meta()
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .ok_or(Error::MissingObjectKey("metadata.creationTimestamp"))?;

    let expr = match CronExpr::parse(&schedule.spec.schedule) {
        Ok(expr) => expr,
        Err(e) => {
            error!(%name, schedule = %schedule.spec.schedule, error = %e, "unparseable schedule expression");
            return Ok(Outcome::InvalidSchedule);
        }
    };

    let now = clock.now();
    let times = compute_schedule(&expr, created_at, now, config.missed_run_policy);

    let Some(next) = times.next else {
        error!(%name, schedule = %schedule.spec.schedule, "schedule has no upcoming fire time");
        return Ok(Outcome::NoUpcomingRun);
    };
    let requeue = Outcome::Requeue((next - now).to_std().unwrap_or(Duration::ZERO));

    let Some(fired_at) = times.missed else {
        debug!(%name, %next, "nothing due, sleeping until next fire time");
        return Ok(requeue);
    };

    if schedule.spec.suspend == Some(true) {
        debug!(%name, %fired_at, "schedule is suspended, skipping run");
        return Ok(requeue);
    }

    match enforce(schedule.spec.concurrency_policy, classified.active.len()) {
        Decision::SkipThisCycle => {
            debug!(%name, active = classified.active.len(), "concurrency policy forbids a new run");
            return Ok(requeue);
        }
        Decision::ReplaceActive => {
            // All deletions must be accepted before the replacement is
            // created; their completion is left to the store's cascade.
            for job in &classified.active {
                store.delete_background(namespace, &job.name_any()).await?;
            }
        }
        Decision::Proceed => {}
    }

    let job = build_work_unit(&schedule, config, fired_at)?;
    match store.create(namespace, job).await? {
        CreateOutcome::Created => {
            info!(%name, %fired_at, "created work unit for missed fire time");
        }
        CreateOutcome::AlreadyExists => {
            debug!(%name, %fired_at, "work unit for this fire time already exists");
        }
    }

    Ok(requeue)
}
