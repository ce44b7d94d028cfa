//! Single-owner lease for the recovery and sweep loop.
//!
//! Several service instances may share one database. Only the instance that
//! holds the lease re-arms timers at startup and runs reconciliation sweeps.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_timestamp, timestamp};

/// Name of the lease row the flow scheduler competes for.
pub const SCHEDULER_LEASE: &str = "flow-scheduler";

/// Take or renew the lease `name` for `owner`.
///
/// Succeeds when nobody holds it, the holder's lease expired, or `owner`
/// already holds it. Returns whether `owner` holds the lease afterwards.
pub fn try_acquire(
    conn: &Connection,
    name: &str,
    owner: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO scheduler_lease (name, owner, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
         WHERE scheduler_lease.owner = excluded.owner OR scheduler_lease.expires_at <= ?4",
        params![name, owner, timestamp(now + ttl), timestamp(now)],
    )?;
    Ok(changed == 1)
}

/// Give the lease up early, if `owner` holds it.
pub fn release(conn: &Connection, name: &str, owner: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "DELETE FROM scheduler_lease WHERE name = ?1 AND owner = ?2",
        params![name, owner],
    )?;
    Ok(changed == 1)
}

/// Current holder and expiry.
pub fn holder(conn: &Connection, name: &str) -> rusqlite::Result<Option<(String, DateTime<Utc>)>> {
    conn.query_row(
        "SELECT owner, expires_at FROM scheduler_lease WHERE name = ?1",
        [name],
        |row| {
            let expires: String = row.get(1)?;
            Ok((row.get(0)?, parse_timestamp(1, &expires)?))
        },
    )
    .optional()
}
