use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::domain::{Requisition, TriggerReason};
use super::report::{ReportError, ReportGenerator, ReportOutcome};
use super::repository::ProcurementStore;
use super::tracker::CompletionTracker;

/// Counters for one scan over overdue requisitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub scanned: usize,
    pub generated: usize,
    pub skipped_existing: usize,
    pub skipped_no_completed: usize,
    pub failed: usize,
    /// Another tick held the run flag; nothing was scanned.
    pub already_running: bool,
}

enum Disposition {
    Generated,
    SkippedExisting,
    SkippedNoCompleted,
}

/// Periodic trigger source for DEADLINE_REACHED reports.
///
/// The only state is the running flag; everything else is re-read from the store
/// each tick.
pub struct DeadlineScheduler {
    store: Arc<dyn ProcurementStore>,
    generator: Arc<ReportGenerator>,
    interval: Duration,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DeadlineScheduler {
    pub fn new(
        store: Arc<dyn ProcurementStore>,
        generator: Arc<ReportGenerator>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the periodic loop until the returned task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "deadline scheduler started");

            loop {
                ticker.tick().await;
                let summary = self.tick(Utc::now()).await;
                if summary.scanned > 0 || summary.failed > 0 {
                    info!(
                        scanned = summary.scanned,
                        generated = summary.generated,
                        skipped_existing = summary.skipped_existing,
                        skipped_no_completed = summary.skipped_no_completed,
                        failed = summary.failed,
                        "deadline scan finished"
                    );
                }
            }
        })
    }

    /// Scan overdue requisitions once. A tick that finds another still running is a no-op.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("deadline scan already in progress; skipping tick");
            summary.already_running = true;
            return summary;
        }
        let _running = RunningGuard(&self.running);

        let due = match self.store.requisitions_past_deadline(now).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "deadline scan could not list requisitions");
                summary.failed += 1;
                return summary;
            }
        };

        for requisition in due {
            summary.scanned += 1;
            match self.process(&requisition, now).await {
                Ok(Disposition::Generated) => summary.generated += 1,
                Ok(Disposition::SkippedExisting) => summary.skipped_existing += 1,
                Ok(Disposition::SkippedNoCompleted) => summary.skipped_no_completed += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        requisition_id = %requisition.id,
                        error = %err,
                        "deadline report generation failed; will retry next tick"
                    );
                }
            }
        }

        summary
    }

    async fn process(
        &self,
        requisition: &Requisition,
        now: DateTime<Utc>,
    ) -> Result<Disposition, ReportError> {
        let report_exists = self.store.report_for(&requisition.id).await?.is_some();
        if report_exists {
            return Ok(Disposition::SkippedExisting);
        }

        let sessions = self.store.sessions_for(&requisition.id).await?;
        let status = CompletionTracker::assess(requisition, &sessions, report_exists, now);
        if status.completed_vendors == 0 {
            debug!(requisition_id = %requisition.id, "deadline passed with nothing to compare");
            return Ok(Disposition::SkippedNoCompleted);
        }

        match self
            .generator
            .generate(&requisition.id, TriggerReason::DeadlineReached, now)
            .await
        {
            Ok(ReportOutcome::Generated(_)) => Ok(Disposition::Generated),
            Ok(ReportOutcome::AlreadyExists(_)) => Ok(Disposition::SkippedExisting),
            Err(ReportError::NoCompletedOffers) => Ok(Disposition::SkippedNoCompleted),
            Err(err) => Err(err),
        }
    }
}
