//! Operator configuration
//!
//! All values that used to be ambient constants (runner image, annotation
//! key, catch-up behavior) live here and are injected when the controller
//! is constructed.

use clap::ValueEnum;

/// Label identifying objects managed by this operator.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on created work units.
pub const MANAGER_NAME: &str = "backup-operator";

/// Label carrying the owning BackupSchedule's name on each work unit.
pub const SCHEDULE_LABEL: &str = "backups.io/schedule";

/// How the reconciler treats fire times that passed without producing a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MissedRunPolicy {
    /// Launch one run for the most recent fire time in the missed window.
    #[default]
    CatchUp,
    /// Never backfill; only the next upcoming fire time is reported.
    Skip,
}

/// Operator configuration carried into every reconcile invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Container image used for the runner when a schedule specifies
    /// explicit backup targets instead of a full job template.
    pub runner_image: String,

    /// Annotation key under which the fire time is recorded on work units.
    pub scheduled_at_annotation: String,

    /// Catch-up behavior for missed fire times.
    pub missed_run_policy: MissedRunPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runner_image: "ghcr.io/backup-operator/runner:latest".to_string(),
            scheduled_at_annotation: "backups.io/scheduled-at".to_string(),
            missed_run_policy: MissedRunPolicy::default(),
        }
    }
}
