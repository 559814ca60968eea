//! Grant rows: (subject, resource, privilege) with a uniqueness constraint on
//! the whole tuple.

use super::{parse_column, ParseColumnError};
use crate::error::Result;
use crate::grants::Subject;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;
use std::str::FromStr;

/// Why a grant exists. Reconciliation only replaces `Config` grants; default
/// grants are owned by the grant resolver's materialization procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantOrigin {
    Config,
    Runtime,
    Default,
}

impl GrantOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantOrigin::Config => "config",
            GrantOrigin::Runtime => "runtime",
            GrantOrigin::Default => "default",
        }
    }
}

impl FromStr for GrantOrigin {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(GrantOrigin::Config),
            "runtime" => Ok(GrantOrigin::Runtime),
            "default" => Ok(GrantOrigin::Default),
            other => Err(ParseColumnError {
                kind: "grant origin",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grant {
    pub id: i64,
    pub subject: Subject,
    pub resource: String,
    pub privilege: String,
    pub origin: GrantOrigin,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, subject, resource, privilege, origin, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Grant> {
    Ok(Grant {
        id: row.get(0)?,
        subject: parse_column(row, 1)?,
        resource: row.get(2)?,
        privilege: row.get(3)?,
        origin: parse_column(row, 4)?,
        created_at: row.get(5)?,
    })
}

/// Inserts a grant unless the (subject, resource, privilege) tuple already
/// exists. Returns true when a row was written.
pub fn insert_grant(
    conn: &Connection,
    subject: Subject,
    resource: &str,
    privilege: &str,
    origin: GrantOrigin,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO grants (subject, resource, privilege, origin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(subject, resource, privilege) DO NOTHING",
        params![subject.to_string(), resource, privilege, origin.as_str(), Utc::now()],
    )?;
    Ok(inserted > 0)
}

pub fn list_grants(conn: &Connection) -> Result<Vec<Grant>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM grants ORDER BY id", COLUMNS))?;
    let grants = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(grants)
}

pub fn list_for_resource(conn: &Connection, resource: &str) -> Result<Vec<Grant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM grants WHERE resource = ?1 ORDER BY id",
        COLUMNS
    ))?;
    let grants = stmt
        .query_map(params![resource], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(grants)
}

/// Privileges held on `resource` by any of `subjects`.
pub fn privileges_for_subjects(
    conn: &Connection,
    subjects: &[Subject],
    resource: &str,
) -> Result<Vec<String>> {
    if subjects.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = (0..subjects.len())
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT DISTINCT privilege FROM grants WHERE resource = ?1 AND subject IN ({})",
        placeholders
    );

    let mut values = Vec::with_capacity(subjects.len() + 1);
    values.push(resource.to_string());
    values.extend(subjects.iter().map(|s| s.to_string()));

    let mut stmt = conn.prepare(&sql)?;
    let privileges = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(privileges)
}

/// True when the subject already holds any grant on the resource.
pub fn subject_has_any(conn: &Connection, subject: Subject, resource: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM grants WHERE subject = ?1 AND resource = ?2)",
        params![subject.to_string(), resource],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn delete_by_origin(conn: &Connection, origin: GrantOrigin) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM grants WHERE origin = ?1", params![origin.as_str()])?;
    Ok(deleted)
}
