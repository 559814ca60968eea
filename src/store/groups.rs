//! Groups and group membership.

use super::{parse_column, Provenance};
use crate::error::Result;
use crate::grants::Subject;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, provenance, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        provenance: parse_column(row, 2)?,
        created_at: row.get(3)?,
    })
}

pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Group>> {
    let group = conn
        .query_row(
            &format!("SELECT {} FROM groups WHERE name = ?1", COLUMNS),
            params![name],
            from_row,
        )
        .optional()?;
    Ok(group)
}

/// Returns the named group, creating it with `provenance` when absent. An
/// existing group keeps its original provenance.
pub fn find_or_create(conn: &Connection, name: &str, provenance: Provenance) -> Result<Group> {
    if let Some(group) = get_by_name(conn, name)? {
        return Ok(group);
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO groups (name, provenance, created_at) VALUES (?1, ?2, ?3)",
        params![name, provenance.as_str(), now],
    )?;
    Ok(Group {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        provenance,
        created_at: now,
    })
}

pub fn set_provenance(conn: &Connection, id: i64, provenance: Provenance) -> Result<()> {
    conn.execute(
        "UPDATE groups SET provenance = ?2 WHERE id = ?1",
        params![id, provenance.as_str()],
    )?;
    Ok(())
}

pub fn list_groups(conn: &Connection) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM groups ORDER BY name", COLUMNS))?;
    let groups = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(groups)
}

pub fn list_by_provenance(conn: &Connection, provenance: Provenance) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM groups WHERE provenance = ?1 ORDER BY name",
        COLUMNS
    ))?;
    let groups = stmt
        .query_map(params![provenance.as_str()], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(groups)
}

/// Deletes a group, its memberships and every grant whose subject is the group.
pub fn delete_group(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM group_members WHERE group_id = ?1", params![id])?;
    conn.execute(
        "DELETE FROM grants WHERE subject = ?1",
        params![Subject::Group(id).to_string()],
    )?;
    let deleted = conn.execute("DELETE FROM groups WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn add_member(conn: &Connection, group_id: i64, identity_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, identity_id) VALUES (?1, ?2)",
        params![group_id, identity_id],
    )?;
    Ok(())
}

pub fn remove_memberships(conn: &Connection, identity_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM group_members WHERE identity_id = ?1",
        params![identity_id],
    )?;
    Ok(())
}

/// IDs of every group containing the identity.
pub fn group_ids_for_identity(conn: &Connection, identity_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT group_id FROM group_members WHERE identity_id = ?1 ORDER BY group_id",
    )?;
    let ids = stmt
        .query_map(params![identity_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn member_ids(conn: &Connection, group_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT identity_id FROM group_members WHERE group_id = ?1 ORDER BY identity_id",
    )?;
    let ids = stmt
        .query_map(params![group_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}
