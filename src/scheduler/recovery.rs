//! Startup recovery and the reconciliation sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{FireOutcome, FlowScheduler, SchedulerError};
use crate::flows::ExecutionTrigger;
use crate::storage;

/// What a recovery pass did with the pending schedules it found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    /// Future schedules that got a timer.
    pub armed: usize,
    /// Overdue schedules handed to the executor.
    pub executed: usize,
    /// Schedules that already had a timer in this process.
    pub already_armed: usize,
}

impl FlowScheduler {
    /// Rebuild the timer registry from the schedule store.
    ///
    /// Every pending schedule is either armed for its remaining delay or, if
    /// its time passed while the process was down, executed right away.
    pub async fn recover(&self) -> Result<RecoverySummary, SchedulerError> {
        let pending = {
            let conn = self.get_pool().get()?;
            storage::schedules::list_pending(&conn)?
        };
        let now = Utc::now();
        let mut summary = RecoverySummary::default();

        for schedule in pending {
            if self.timers().is_armed(schedule.id) {
                summary.already_armed += 1;
                continue;
            }
            if schedule.scheduled_for > now {
                self.arm(&schedule, ExecutionTrigger::Timer);
                summary.armed += 1;
            } else {
                warn!(
                    schedule_id = %schedule.id,
                    scheduled_for = %schedule.scheduled_for.to_rfc3339(),
                    "Schedule missed while offline, executing now"
                );
                self.execute_blocking(schedule.id, ExecutionTrigger::Recovery).await;
                summary.executed += 1;
            }
        }

        info!(
            armed = summary.armed,
            executed = summary.executed,
            already_armed = summary.already_armed,
            "Schedule recovery complete"
        );
        Ok(summary)
    }

    /// Execute every pending schedule whose time is at or before `now`.
    ///
    /// Picks up schedules created by other instances and timers that never
    /// fired. Returns how many executions were started.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let due = {
            let conn = self.get_pool().get()?;
            storage::schedules::list_due(&conn, now)?
        };

        let mut started = 0;
        for schedule in due {
            if let Some(FireOutcome::Started(_)) = self
                .execute_blocking(schedule.id, ExecutionTrigger::Sweep)
                .await
            {
                started += 1;
            }
            self.timers().cancel(schedule.id);
        }
        Ok(started)
    }
}
