//! Registered infrastructure resources (clusters).

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Destination {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub endpoint: String,
    pub ca: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationRecord {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub ca: String,
}

const COLUMNS: &str = "id, name, kind, endpoint, ca, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Destination> {
    Ok(Destination {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        endpoint: row.get(3)?,
        ca: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Destination>> {
    let destination = conn
        .query_row(
            &format!("SELECT {} FROM destinations WHERE name = ?1", COLUMNS),
            params![name],
            from_row,
        )
        .optional()?;
    Ok(destination)
}

/// Inserts or updates a destination keyed by name. The flag is true when the
/// row did not exist before.
pub fn upsert_destination(conn: &Connection, record: &DestinationRecord) -> Result<(Destination, bool)> {
    let created = get_by_name(conn, &record.name)?.is_none();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO destinations (name, kind, endpoint, ca, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(name) DO UPDATE SET
             kind = excluded.kind,
             endpoint = excluded.endpoint,
             ca = excluded.ca,
             updated_at = excluded.updated_at",
        params![record.name, record.kind, record.endpoint, record.ca, now],
    )?;

    let destination = get_by_name(conn, &record.name)?
        .ok_or_else(|| anyhow::anyhow!("destination {} vanished after upsert", record.name))?;
    Ok((destination, created))
}

pub fn list_destinations(conn: &Connection) -> Result<Vec<Destination>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM destinations ORDER BY name", COLUMNS))?;
    let destinations = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(destinations)
}
