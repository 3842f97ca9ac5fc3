//! Kubernetes controller wiring for backup schedules

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::crd::BackupSchedule;
use crate::error::Error;
use crate::metrics;
use crate::reconcile::{run_cycle, Outcome};
use crate::store::{Clock, KubeStore, SystemClock};

/// Shared context handed to every reconcile invocation.
///
/// Holds no mutable state; invocations for different schedules only share
/// the read-only store handle, clock, and configuration.
pub struct Context {
    pub store: KubeStore,
    pub clock: Box<dyn Clock>,
    pub config: Config,
}

/// Main controller for BackupSchedule resources.
pub struct Controller {
    client: Client,
    namespace: String,
    context: Arc<Context>,
}

impl Controller {
    /// Create a new controller against the ambient cluster configuration.
    pub async fn new(namespace: String, config: Config) -> Result<Self, Error> {
        let client = Client::try_default().await?;
        let context = Context {
            store: KubeStore::new(client.clone()),
            clock: Box::new(SystemClock),
            config,
        };

        Ok(Self {
            client,
            namespace,
            context: Arc::new(context),
        })
    }

    /// Run the controller until shutdown.
    pub async fn run(&self) -> Result<(), Error> {
        info!("Starting backup-schedule controller");

        let schedules: Api<BackupSchedule> = if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        };

        // Verify the CRD is installed
        let lp = ListParams::default().limit(1);
        if let Err(e) = schedules.list(&lp).await {
            error!("Failed to list BackupSchedules. Is the CRD installed? Error: {}", e);
            return Err(Error::CrdNotInstalled);
        }

        let jobs: Api<Job> = if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        };

        let context = Arc::clone(&self.context);

        // The owns() watch is the one-time registration that lets the
        // runtime map a changed Job back to its owning schedule.
        KubeController::new(schedules.clone(), watcher::Config::default())
            .owns(jobs, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => {
                        debug!(name = %obj.name, ?action, "Reconciliation successful");
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation error");
                    }
                }
            })
            .await;

        info!("Controller stopped");
        Ok(())
    }
}

/// Reconcile one BackupSchedule.
async fn reconcile(schedule: Arc<BackupSchedule>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = schedule.name_any();
    let namespace = schedule.namespace().unwrap_or_default();
    let started = Instant::now();

    let result = run_cycle(
        &ctx.store,
        ctx.clock.as_ref(),
        &ctx.config,
        &namespace,
        &name,
    )
    .await;

    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(outcome) => {
            metrics::record_cycle_success(&name, elapsed);
            Ok(match outcome {
                Outcome::Requeue(delay) => Action::requeue(delay),
                Outcome::Gone | Outcome::InvalidSchedule | Outcome::NoUpcomingRun => {
                    Action::await_change()
                }
            })
        }
        Err(e) => {
            metrics::record_cycle_failure(&name, elapsed);
            Err(e)
        }
    }
}

/// Error policy for reconciliation failures: the runtime owns retry timing.
fn error_policy(schedule: Arc<BackupSchedule>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(name = %schedule.name_any(), error = %error, "Reconciliation error, will retry");
    Action::requeue(Duration::from_secs(60))
}
