//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS flows (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            flow_data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS flow_schedules (
            id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            scheduled_for TEXT NOT NULL,
            delay_amount INTEGER NOT NULL,
            delay_unit TEXT NOT NULL
                CHECK (delay_unit IN ('minutes', 'hours', 'days', 'weeks')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'executed', 'cancelled')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS flow_executions (
            id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            current_node_id TEXT,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'paused', 'completed', 'cancelled')),
            started_at TEXT NOT NULL,
            completed_at TEXT,
            execution_data TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS scheduler_lease (
            name TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_flow_schedules_pending
            ON flow_schedules(status, scheduled_for);
        CREATE INDEX IF NOT EXISTS idx_flow_schedules_patient ON flow_schedules(patient_id);
        CREATE INDEX IF NOT EXISTS idx_flow_executions_patient ON flow_executions(patient_id);
        CREATE INDEX IF NOT EXISTS idx_flow_executions_flow ON flow_executions(flow_id);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
