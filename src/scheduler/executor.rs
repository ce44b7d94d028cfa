//! Executor: turns a due schedule into an active flow execution.

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{FireOutcome, FlowScheduler, ScheduleStatus, SchedulerError};
use crate::flows::{ExecutionStatus, ExecutionTrigger, FlowExecution};
use crate::storage;

impl FlowScheduler {
    /// Run the executor for one schedule.
    ///
    /// Marking the schedule `executed` and inserting the execution happen in
    /// one transaction. The mark only applies to a `pending` row, so firing
    /// the same schedule twice starts at most one execution.
    ///
    /// A missing flow, or one without an entry node, still consumes the
    /// schedule: it commits as `executed` with no execution row.
    pub fn fire(
        &self,
        schedule_id: Uuid,
        trigger: ExecutionTrigger,
    ) -> Result<FireOutcome, SchedulerError> {
        let mut conn = self.get_pool().get()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        if !storage::schedules::finish(&tx, schedule_id, ScheduleStatus::Executed, now)? {
            return match storage::schedules::get(&tx, schedule_id)? {
                Some(s) => Ok(FireOutcome::Skipped(s.status)),
                None => Err(SchedulerError::not_found("schedule", schedule_id)),
            };
        }
        let schedule = storage::schedules::get(&tx, schedule_id)?
            .ok_or_else(|| SchedulerError::not_found("schedule", schedule_id))?;

        let flow = match storage::flows::get(&tx, schedule.flow_id) {
            Ok(Some(flow)) => flow,
            Ok(None) => {
                tx.commit()?;
                return Ok(FireOutcome::FlowNotFound);
            }
            Err(rusqlite::Error::FromSqlConversionFailure(_, _, e)) => {
                warn!(flow_id = %schedule.flow_id, "Flow definition unreadable: {}", e);
                tx.commit()?;
                return Ok(FireOutcome::NoEntryNode);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(entry) = flow.entry_node() else {
            tx.commit()?;
            return Ok(FireOutcome::NoEntryNode);
        };

        let execution = FlowExecution {
            id: Uuid::new_v4(),
            flow_id: flow.id,
            patient_id: schedule.patient_id,
            current_node_id: Some(entry.id.clone()),
            status: ExecutionStatus::Active,
            started_at: now,
            completed_at: None,
            execution_data: json!({
                "scheduled": true,
                "automatic": true,
                "schedule_id": schedule.id,
                "trigger": trigger,
                "scheduled_for": storage::timestamp(schedule.scheduled_for),
                "delay": { "amount": schedule.delay_amount, "unit": schedule.delay_unit },
            }),
        };
        storage::executions::insert(&tx, &execution)?;
        tx.commit()?;

        Ok(FireOutcome::Started(execution))
    }

    /// Fire a schedule unattended: every outcome and failure is logged, nothing is returned
    /// to a caller beyond the outcome for bookkeeping.
    pub fn execute(&self, schedule_id: Uuid, trigger: ExecutionTrigger) -> Option<FireOutcome> {
        match self.fire(schedule_id, trigger) {
            Ok(outcome) => {
                match &outcome {
                    FireOutcome::Started(execution) => info!(
                        schedule_id = %schedule_id,
                        execution_id = %execution.id,
                        flow_id = %execution.flow_id,
                        patient_id = %execution.patient_id,
                        node = execution.current_node_id.as_deref().unwrap_or_default(),
                        %trigger,
                        "Scheduled flow started"
                    ),
                    FireOutcome::Skipped(status) => info!(
                        schedule_id = %schedule_id,
                        %status,
                        %trigger,
                        "Schedule no longer pending, skipping"
                    ),
                    FireOutcome::FlowNotFound => warn!(
                        schedule_id = %schedule_id,
                        %trigger,
                        "Flow not found, scheduled run abandoned"
                    ),
                    FireOutcome::NoEntryNode => warn!(
                        schedule_id = %schedule_id,
                        %trigger,
                        "Flow has no start node, scheduled run abandoned"
                    ),
                }
                Some(outcome)
            }
            Err(e) => {
                error!(schedule_id = %schedule_id, %trigger, "Failed to execute schedule: {}", e);
                None
            }
        }
    }

    /// [`execute`](Self::execute) on the blocking thread pool, off the async workers.
    pub(crate) async fn execute_blocking(
        &self,
        schedule_id: Uuid,
        trigger: ExecutionTrigger,
    ) -> Option<FireOutcome> {
        let scheduler = self.clone();
        match tokio::task::spawn_blocking(move || scheduler.execute(schedule_id, trigger)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(schedule_id = %schedule_id, %trigger, "Executor task failed: {}", e);
                None
            }
        }
    }
}
