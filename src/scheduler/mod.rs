//! Deferred flow execution: schedule store, in-process timers, executor and recovery.
//!
//! The `flow_schedules` table is authoritative. Timers only decide *when* the
//! executor looks at a row; recovery and the reconciliation sweep rebuild
//! them from the table after a restart.

pub mod delay;
pub mod engine;
mod executor;
mod recovery;
mod service;
pub mod timers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use self::delay::DelayUnit;
pub use self::engine::run_scheduler_loop;
pub use self::recovery::RecoverySummary;
pub use self::service::FlowScheduler;
pub use self::timers::{TimerKey, TimerRegistry};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("invalid delay unit '{0}' (expected minutes, hours, days or weeks)")]
    InvalidDelayUnit(String),

    #[error("delay of {amount} {unit} is out of range")]
    DelayOutOfRange { amount: i64, unit: DelayUnit },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("execution {id} is already {status}")]
    ExecutionFinished {
        id: Uuid,
        status: crate::flows::ExecutionStatus,
    },

    #[error("invalid flow definition: {0}")]
    InvalidFlow(#[from] serde_json::Error),
}

impl SchedulerError {
    pub(crate) fn not_found(kind: &'static str, id: Uuid) -> Self {
        SchedulerError::NotFound { kind, id }
    }
}

/// Status of a deferred run. Moves one way: `pending` to `executed` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Executed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Executed => "executed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "executed" => Ok(ScheduleStatus::Executed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(format!("unknown schedule status '{other}'")),
        }
    }
}

/// "Run flow X for patient Y at time T."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSchedule {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub delay_amount: i64,
    pub delay_unit: DelayUnit,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowSchedule {
    pub fn timer_key(&self) -> TimerKey {
        TimerKey {
            flow_id: self.flow_id,
            patient_id: self.patient_id,
            schedule_id: self.id,
        }
    }
}

/// Optional filters for listing schedules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleFilter {
    pub status: Option<ScheduleStatus>,
    pub patient_id: Option<Uuid>,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The schedule was pending and is now cancelled.
    Cancelled,
    /// Too late: the executor already consumed it.
    AlreadyExecuted,
    AlreadyCancelled,
}

impl CancelOutcome {
    /// Status the schedule row holds after the request.
    pub fn status(&self) -> ScheduleStatus {
        match self {
            CancelOutcome::AlreadyExecuted => ScheduleStatus::Executed,
            CancelOutcome::Cancelled | CancelOutcome::AlreadyCancelled => ScheduleStatus::Cancelled,
        }
    }
}

/// What the executor did with one schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    /// A new execution was started.
    Started(crate::flows::FlowExecution),
    /// The schedule was no longer pending; nothing happened.
    Skipped(ScheduleStatus),
    /// The schedule was consumed but the flow is missing.
    FlowNotFound,
    /// The schedule was consumed but the flow has no entry node.
    NoEntryNode,
}
