use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::domain::TurnoId;
use super::error::TurnoError;
use super::notify::NotificationDispatcher;
use super::policy::SweepPolicy;
use super::repository::TurnoRepository;
use super::review::ReviewWorkflow;

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: Vec<TurnoId>,
    /// Turnos that left `approved` between selection and expiry.
    pub skipped: Vec<TurnoId>,
    pub failures: Vec<(TurnoId, String)>,
}

/// Cancels approved turnos whose service day has passed without a delivery.
pub struct ExpirySweeper<R, N> {
    workflow: Arc<ReviewWorkflow<R, N>>,
    policy: SweepPolicy,
}

impl<R, N> ExpirySweeper<R, N>
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(workflow: Arc<ReviewWorkflow<R, N>>, policy: SweepPolicy) -> Self {
        Self { workflow, policy }
    }

    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Expires every due turno independently; one failure never stops the rest.
    pub fn sweep_once(&self) -> SweepReport {
        let now = self.workflow.now();
        let mut report = SweepReport::default();

        let due = match self.workflow.due_for_expiry(now, self.policy.cutoff) {
            Ok(ids) => ids,
            Err(error) => {
                warn!(%error, "expiry sweep could not list due turnos");
                return report;
            }
        };
        report.examined = due.len();

        for id in due {
            match self.workflow.expire(id) {
                Ok(_) => report.expired.push(id),
                Err(TurnoError::InvalidStateTransition { status, .. }) => {
                    debug!(turno_id = %id, %status, "turno no longer approved; skipped");
                    report.skipped.push(id);
                }
                Err(error) => {
                    warn!(turno_id = %id, %error, "failed to expire turno");
                    report.failures.push((id, error.to_string()));
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                expired = report.expired.len(),
                skipped = report.skipped.len(),
                failed = report.failures.len(),
                "expiry sweep finished"
            );
        }
        report
    }
}

/// Runs `sweep_once` on a fixed interval until the task is dropped.
pub async fn run_sweeper<R, N>(sweeper: Arc<ExpirySweeper<R, N>>, every: Duration)
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let worker = Arc::clone(&sweeper);
        match tokio::task::spawn_blocking(move || worker.sweep_once()).await {
            Ok(report) => debug!(expired = report.expired.len(), "sweeper tick"),
            Err(error) => warn!(%error, "sweeper task failed"),
        }
    }
}
