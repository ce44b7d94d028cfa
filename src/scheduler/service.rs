use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CancelOutcome, DelayUnit, FlowSchedule, ScheduleFilter, ScheduleStatus, SchedulerError,
    TimerRegistry,
};
use crate::flows::{ExecutionFilter, ExecutionStatus, ExecutionTrigger, Flow, FlowExecution};
use crate::storage::{self, Pool};

/// Schedules deferred flow runs, persists them, and owns their timers.
#[derive(Clone)]
pub struct FlowScheduler {
    pool: Pool,
    timers: TimerRegistry,
}

impl FlowScheduler {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            timers: TimerRegistry::new(),
        }
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Persist a run of `flow_id` for `patient_id` after `amount` `unit`s and arm its timer.
    pub async fn schedule(
        &self,
        flow_id: Uuid,
        patient_id: Uuid,
        amount: i64,
        unit: DelayUnit,
    ) -> Result<FlowSchedule, SchedulerError> {
        let now = Utc::now();
        let schedule = FlowSchedule {
            id: Uuid::new_v4(),
            flow_id,
            patient_id,
            scheduled_for: unit.after(now, amount)?,
            delay_amount: amount,
            delay_unit: unit,
            status: ScheduleStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let conn = self.pool.get()?;
        storage::schedules::insert(&conn, &schedule).inspect_err(|e| {
            warn!(flow_id = %flow_id, patient_id = %patient_id, "Failed to persist schedule: {}", e);
        })?;
        drop(conn);

        self.arm(&schedule, ExecutionTrigger::Timer);
        info!(
            schedule_id = %schedule.id,
            flow_id = %flow_id,
            patient_id = %patient_id,
            delay = %format!("{amount} {unit}"),
            scheduled_for = %schedule.scheduled_for.to_rfc3339(),
            "Flow run scheduled"
        );
        Ok(schedule)
    }

    /// Arm the in-process timer for a pending schedule.
    ///
    /// A `scheduled_for` in the past fires on the next tick of the runtime.
    pub(crate) fn arm(&self, schedule: &FlowSchedule, trigger: ExecutionTrigger) {
        let delay = (schedule.scheduled_for - Utc::now())
            .to_std()
            .unwrap_or_default();
        let scheduler = self.clone();
        let schedule_id = schedule.id;

        debug!(timer = %schedule.timer_key(), delay_ms = delay.as_millis() as u64, "Arming timer");
        self.timers.arm(schedule.timer_key(), delay, move || async move {
            scheduler.execute_blocking(schedule_id, trigger).await;
        });
    }

    /// Cancel a pending schedule and drop its timer.
    ///
    /// A schedule that already ran keeps its `executed` status.
    pub async fn cancel(&self, schedule_id: Uuid) -> Result<CancelOutcome, SchedulerError> {
        let conn = self.pool.get()?;
        let cancelled = storage::schedules::finish(
            &conn,
            schedule_id,
            ScheduleStatus::Cancelled,
            Utc::now(),
        )?;

        let outcome = if cancelled {
            CancelOutcome::Cancelled
        } else {
            match storage::schedules::get(&conn, schedule_id)? {
                None => return Err(SchedulerError::not_found("schedule", schedule_id)),
                Some(s) if s.status == ScheduleStatus::Executed => CancelOutcome::AlreadyExecuted,
                Some(_) => CancelOutcome::AlreadyCancelled,
            }
        };

        let disarmed = self.timers.cancel(schedule_id);
        info!(schedule_id = %schedule_id, ?outcome, disarmed, "Schedule cancellation");
        Ok(outcome)
    }

    pub async fn get_schedule(&self, id: Uuid) -> Result<FlowSchedule, SchedulerError> {
        let conn = self.pool.get()?;
        storage::schedules::get(&conn, id)?.ok_or_else(|| SchedulerError::not_found("schedule", id))
    }

    pub async fn list_schedules(
        &self,
        filter: &ScheduleFilter,
    ) -> Result<Vec<FlowSchedule>, SchedulerError> {
        let conn = self.pool.get()?;
        Ok(storage::schedules::list(&conn, filter)?)
    }

    /// Store (or replace) a flow definition.
    pub async fn register_flow(&self, flow: &Flow) -> Result<(), SchedulerError> {
        let conn = self.pool.get()?;
        storage::flows::upsert(&conn, flow, Utc::now())?;
        info!(flow_id = %flow.id, name = %flow.name, has_entry = flow.entry_node().is_some(), "Flow registered");
        Ok(())
    }

    /// Parse an editor document and store it as flow `id`.
    pub async fn register_flow_document(
        &self,
        id: Uuid,
        name: &str,
        document: Value,
    ) -> Result<Flow, SchedulerError> {
        let flow = Flow {
            id,
            name: name.to_string(),
            flow_data: serde_json::from_value(document)?,
        };
        self.register_flow(&flow).await?;
        Ok(flow)
    }

    pub async fn get_flow(&self, id: Uuid) -> Result<Flow, SchedulerError> {
        let conn = self.pool.get()?;
        storage::flows::get(&conn, id)?.ok_or_else(|| SchedulerError::not_found("flow", id))
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<FlowExecution, SchedulerError> {
        let conn = self.pool.get()?;
        storage::executions::get(&conn, id)?
            .ok_or_else(|| SchedulerError::not_found("execution", id))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<FlowExecution>, SchedulerError> {
        let conn = self.pool.get()?;
        Ok(storage::executions::list(&conn, filter)?)
    }

    /// Pause, resume, complete or cancel an unfinished execution.
    pub async fn set_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
    ) -> Result<FlowExecution, SchedulerError> {
        let conn = self.pool.get()?;
        if !storage::executions::set_status(&conn, id, status, Utc::now())? {
            return match storage::executions::get(&conn, id)? {
                None => Err(SchedulerError::not_found("execution", id)),
                Some(e) => Err(SchedulerError::ExecutionFinished { id, status: e.status }),
            };
        }
        info!(execution_id = %id, %status, "Execution status updated");
        storage::executions::get(&conn, id)?.ok_or_else(|| SchedulerError::not_found("execution", id))
    }
}
