//! Queries against `flows`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{parse_uuid, timestamp};
use crate::flows::Flow;

/// Insert a flow definition or replace the stored one with the same id.
pub fn upsert(conn: &Connection, flow: &Flow, now: DateTime<Utc>) -> rusqlite::Result<()> {
    let flow_data = serde_json::to_string(&flow.flow_data)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO flows (id, name, flow_data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            flow_data = excluded.flow_data,
            updated_at = excluded.updated_at",
        params![flow.id.to_string(), flow.name, flow_data, timestamp(now)],
    )?;
    Ok(())
}

/// Load a flow definition.
///
/// A stored document that no longer parses comes back as
/// `FromSqlConversionFailure` on column 2.
pub fn get(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<Flow>> {
    conn.query_row(
        "SELECT id, name, flow_data FROM flows WHERE id = ?1",
        [id.to_string()],
        |row| {
            let data: String = row.get(2)?;
            Ok(Flow {
                id: parse_uuid(0, &row.get::<_, String>(0)?)?,
                name: row.get(1)?,
                flow_data: serde_json::from_str(&data).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::migrate;
    use serde_json::json;

    fn flow(name: &str) -> Flow {
        Flow {
            id: Uuid::new_v4(),
            name: name.into(),
            flow_data: serde_json::from_value(json!({
                "nodes": [{ "id": "start-1", "type": "start" }],
                "edges": []
            }))
            .unwrap(),
        }
    }

    #[test]
    fn test_upsert_replaces_definition() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let mut f = flow("Welcome");
        upsert(&conn, &f, Utc::now()).unwrap();
        f.name = "Welcome v2".into();
        f.flow_data.nodes.clear();
        upsert(&conn, &f, Utc::now()).unwrap();

        let loaded = get(&conn, f.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Welcome v2");
        assert!(loaded.entry_node().is_none());
        assert!(loaded.flow_data.extra.contains_key("edges"));
    }

    #[test]
    fn test_corrupt_document_is_a_conversion_failure() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO flows (id, name, flow_data, created_at, updated_at) VALUES (?1, 'x', 'not json', 'x', 'x')",
            [id.to_string()],
        )
        .unwrap();

        let err = get(&conn, id).unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(2, _, _)));
    }
}
