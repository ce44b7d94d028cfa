//! Queries against `flow_executions`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, timestamp};
use crate::flows::{ExecutionFilter, ExecutionStatus, FlowExecution};

const COLUMNS: &str =
    "id, flow_id, patient_id, current_node_id, status, started_at, completed_at, execution_data";

fn from_row(row: &Row<'_>) -> rusqlite::Result<FlowExecution> {
    let status: String = row.get(4)?;
    let completed_at: Option<String> = row.get(6)?;
    let data: String = row.get(7)?;

    Ok(FlowExecution {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        flow_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        patient_id: parse_uuid(2, &row.get::<_, String>(2)?)?,
        current_node_id: row.get(3)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        started_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
        completed_at: completed_at
            .map(|raw| parse_timestamp(6, &raw))
            .transpose()?,
        execution_data: serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
    })
}

pub fn insert(conn: &Connection, execution: &FlowExecution) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO flow_executions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            execution.id.to_string(),
            execution.flow_id.to_string(),
            execution.patient_id.to_string(),
            execution.current_node_id,
            execution.status.as_str(),
            timestamp(execution.started_at),
            execution.completed_at.map(timestamp),
            execution.execution_data.to_string(),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<FlowExecution>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM flow_executions WHERE id = ?1"),
        [id.to_string()],
        from_row,
    )
    .optional()
}

/// Executions matching `filter`, newest first.
pub fn list(conn: &Connection, filter: &ExecutionFilter) -> rusqlite::Result<Vec<FlowExecution>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM flow_executions
         WHERE (?1 IS NULL OR patient_id = ?1) AND (?2 IS NULL OR flow_id = ?2)
         ORDER BY started_at DESC"
    ))?;
    let rows = stmt.query_map(
        params![
            filter.patient_id.map(|p| p.to_string()),
            filter.flow_id.map(|f| f.to_string()),
        ],
        from_row,
    )?;
    rows.collect()
}

/// Set the status of an execution that has not finished yet.
///
/// Completing or cancelling stamps `completed_at`. Returns `false` when the
/// row is missing or already terminal.
pub fn set_status(
    conn: &Connection,
    id: Uuid,
    status: ExecutionStatus,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let completed_at = status.is_terminal().then(|| timestamp(now));
    let changed = conn.execute(
        "UPDATE flow_executions SET status = ?1, completed_at = ?2
         WHERE id = ?3 AND status IN ('active', 'paused')",
        params![status.as_str(), completed_at, id.to_string()],
    )?;
    Ok(changed == 1)
}
