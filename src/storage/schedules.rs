//! Queries against `flow_schedules`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, timestamp};
use crate::scheduler::{FlowSchedule, ScheduleFilter, ScheduleStatus};

const COLUMNS: &str = "id, flow_id, patient_id, scheduled_for, delay_amount, delay_unit, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<FlowSchedule> {
    let text = |idx: usize| row.get::<_, String>(idx);
    let convert = |idx: usize, e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };

    Ok(FlowSchedule {
        id: parse_uuid(0, &text(0)?)?,
        flow_id: parse_uuid(1, &text(1)?)?,
        patient_id: parse_uuid(2, &text(2)?)?,
        scheduled_for: parse_timestamp(3, &text(3)?)?,
        delay_amount: row.get(4)?,
        delay_unit: text(5)?.parse().map_err(|e: crate::scheduler::SchedulerError| convert(5, e.to_string()))?,
        status: text(6)?.parse().map_err(|e| convert(6, e))?,
        created_at: parse_timestamp(7, &text(7)?)?,
        updated_at: parse_timestamp(8, &text(8)?)?,
    })
}

pub fn insert(conn: &Connection, schedule: &FlowSchedule) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO flow_schedules ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        params![
            schedule.id.to_string(),
            schedule.flow_id.to_string(),
            schedule.patient_id.to_string(),
            timestamp(schedule.scheduled_for),
            schedule.delay_amount,
            schedule.delay_unit.as_str(),
            schedule.status.as_str(),
            timestamp(schedule.created_at),
            timestamp(schedule.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<FlowSchedule>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM flow_schedules WHERE id = ?1"),
        [id.to_string()],
        from_row,
    )
    .optional()
}

/// Schedules matching `filter`, soonest first.
pub fn list(conn: &Connection, filter: &ScheduleFilter) -> rusqlite::Result<Vec<FlowSchedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM flow_schedules
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR patient_id = ?2)
         ORDER BY scheduled_for ASC"
    ))?;
    let rows = stmt.query_map(
        params![
            filter.status.map(|s| s.as_str()),
            filter.patient_id.map(|p| p.to_string()),
        ],
        from_row,
    )?;
    rows.collect()
}

/// All pending schedules, ordered by `scheduled_for` ascending.
pub fn list_pending(conn: &Connection) -> rusqlite::Result<Vec<FlowSchedule>> {
    list(
        conn,
        &ScheduleFilter {
            status: Some(ScheduleStatus::Pending),
            patient_id: None,
        },
    )
}

/// Pending schedules whose time has come.
pub fn list_due(conn: &Connection, now: DateTime<Utc>) -> rusqlite::Result<Vec<FlowSchedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM flow_schedules
         WHERE status = 'pending' AND scheduled_for <= ?1
         ORDER BY scheduled_for ASC"
    ))?;
    let rows = stmt.query_map([timestamp(now)], from_row)?;
    rows.collect()
}

/// Move a schedule from `pending` to `to`.
///
/// Returns `false` when the row is missing or no longer pending, which is
/// what keeps a schedule from being executed or cancelled twice.
pub fn finish(
    conn: &Connection,
    id: Uuid,
    to: ScheduleStatus,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE flow_schedules SET status = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![to.as_str(), timestamp(now), id.to_string()],
    )?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DelayUnit;
    use crate::storage::schema::migrate;
    use chrono::Duration;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn pending(patient_id: Uuid, scheduled_for: DateTime<Utc>) -> FlowSchedule {
        let now = Utc::now();
        FlowSchedule {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            patient_id,
            scheduled_for,
            delay_amount: 1,
            delay_unit: DelayUnit::Hours,
            status: ScheduleStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = conn();
        let s = pending(Uuid::new_v4(), Utc::now() + Duration::hours(1));
        insert(&conn, &s).unwrap();

        let loaded = get(&conn, s.id).unwrap().unwrap();
        assert_eq!(loaded.id, s.id);
        assert_eq!(loaded.delay_unit, DelayUnit::Hours);
        assert_eq!(loaded.status, ScheduleStatus::Pending);
        assert_eq!(
            loaded.scheduled_for.timestamp_micros(),
            s.scheduled_for.timestamp_micros()
        );
        assert!(get(&conn, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_pending_ordered_by_time() {
        let conn = conn();
        let now = Utc::now();
        let late = pending(Uuid::new_v4(), now + Duration::days(2));
        let early = pending(Uuid::new_v4(), now - Duration::minutes(5));
        let done = pending(Uuid::new_v4(), now - Duration::days(1));
        for s in [&late, &early, &done] {
            insert(&conn, s).unwrap();
        }
        assert!(finish(&conn, done.id, ScheduleStatus::Executed, now).unwrap());

        let ids: Vec<Uuid> = list_pending(&conn).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let due: Vec<Uuid> = list_due(&conn, now).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(due, vec![early.id]);
    }

    #[test]
    fn test_finish_is_one_way() {
        let conn = conn();
        let s = pending(Uuid::new_v4(), Utc::now());
        insert(&conn, &s).unwrap();

        assert!(finish(&conn, s.id, ScheduleStatus::Executed, Utc::now()).unwrap());
        assert!(!finish(&conn, s.id, ScheduleStatus::Cancelled, Utc::now()).unwrap());
        assert!(!finish(&conn, s.id, ScheduleStatus::Executed, Utc::now()).unwrap());
        assert_eq!(get(&conn, s.id).unwrap().unwrap().status, ScheduleStatus::Executed);
    }

    #[test]
    fn test_list_filters_by_patient() {
        let conn = conn();
        let patient = Uuid::new_v4();
        let mine = pending(patient, Utc::now());
        insert(&conn, &mine).unwrap();
        insert(&conn, &pending(Uuid::new_v4(), Utc::now())).unwrap();

        let filter = ScheduleFilter { status: None, patient_id: Some(patient) };
        let found = list(&conn, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);
        assert_eq!(list(&conn, &ScheduleFilter::default()).unwrap().len(), 2);
    }
}
