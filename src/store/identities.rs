//! Identity and password-credential rows.

use super::{parse_column, ParseColumnError, Provenance};
use crate::error::Result;
use crate::grants::Subject;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::str::FromStr;

/// A user or machine principal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub kind: IdentityKind,
    pub admin: bool,
    #[serde(skip)]
    pub provenance: Provenance,
    /// Provider the identity was synced from or logged in through, if any.
    #[serde(skip)]
    pub provider_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Machine,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::Machine => "machine",
        }
    }
}

impl FromStr for IdentityKind {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(IdentityKind::User),
            "machine" => Ok(IdentityKind::Machine),
            other => Err(ParseColumnError {
                kind: "identity kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Fields needed to insert an identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub name: String,
    pub kind: IdentityKind,
    pub admin: bool,
    pub provenance: Provenance,
    pub provider_id: Option<i64>,
}

impl NewIdentity {
    pub fn user(name: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            name: name.into(),
            kind: IdentityKind::User,
            admin: false,
            provenance,
            provider_id: None,
        }
    }
}

const COLUMNS: &str = "id, name, kind, admin, provenance, provider_id, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: parse_column(row, 2)?,
        admin: row.get(3)?,
        provenance: parse_column(row, 4)?,
        provider_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Inserts the identity row only. Use `grants::create_identity` to also
/// materialize default grants.
pub fn insert_identity(conn: &Connection, new: &NewIdentity) -> Result<Identity> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO identities (name, kind, admin, provenance, provider_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            new.name,
            new.kind.as_str(),
            new.admin,
            new.provenance.as_str(),
            new.provider_id,
            now
        ],
    )?;
    Ok(Identity {
        id: conn.last_insert_rowid(),
        name: new.name.clone(),
        kind: new.kind,
        admin: new.admin,
        provenance: new.provenance,
        provider_id: new.provider_id,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_identity(conn: &Connection, id: i64) -> Result<Option<Identity>> {
    let identity = conn
        .query_row(
            &format!("SELECT {} FROM identities WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(identity)
}

pub fn get_identity_by_name(conn: &Connection, name: &str) -> Result<Option<Identity>> {
    let identity = conn
        .query_row(
            &format!("SELECT {} FROM identities WHERE name = ?1", COLUMNS),
            params![name],
            from_row,
        )
        .optional()?;
    Ok(identity)
}

pub fn list_identities(conn: &Connection) -> Result<Vec<Identity>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM identities ORDER BY id", COLUMNS))?;
    let identities = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(identities)
}

pub fn list_by_provenance(conn: &Connection, provenance: Provenance) -> Result<Vec<Identity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM identities WHERE provenance = ?1 ORDER BY id",
        COLUMNS
    ))?;
    let identities = stmt
        .query_map(params![provenance.as_str()], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(identities)
}

pub fn list_by_provider(conn: &Connection, provider_id: i64) -> Result<Vec<Identity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM identities WHERE provider_id = ?1 ORDER BY id",
        COLUMNS
    ))?;
    let identities = stmt
        .query_map(params![provider_id], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(identities)
}

pub fn set_admin(conn: &Connection, id: i64, admin: bool) -> Result<()> {
    conn.execute(
        "UPDATE identities SET admin = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, admin, Utc::now()],
    )?;
    Ok(())
}

pub fn set_provider(conn: &Connection, id: i64, provider_id: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE identities SET provider_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, provider_id, Utc::now()],
    )?;
    Ok(())
}

/// Deletes an identity together with everything that hangs off it: password
/// credential, access keys, session tokens, group memberships and grants whose
/// subject is this identity. Returns false when no such identity existed.
pub fn delete_identity(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM credentials WHERE identity_id = ?1", params![id])?;
    conn.execute("DELETE FROM access_keys WHERE issued_for = ?1", params![id])?;
    conn.execute("DELETE FROM session_tokens WHERE identity_id = ?1", params![id])?;
    conn.execute("DELETE FROM group_members WHERE identity_id = ?1", params![id])?;
    conn.execute(
        "DELETE FROM grants WHERE subject = ?1",
        params![Subject::Identity(id).to_string()],
    )?;
    let deleted = conn.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Stores (or replaces) the password hash for an identity. Callers hash first;
/// plaintext never reaches this layer.
pub fn set_password_hash(conn: &Connection, identity_id: i64, password_hash: &str) -> Result<()> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO credentials (identity_id, password_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(identity_id) DO UPDATE SET
             password_hash = excluded.password_hash,
             updated_at = excluded.updated_at",
        params![identity_id, password_hash, now],
    )?;
    Ok(())
}

/// Removes the password credential. Returns false when there was none.
pub fn delete_password_hash(conn: &Connection, identity_id: i64) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM credentials WHERE identity_id = ?1",
        params![identity_id],
    )?;
    Ok(deleted > 0)
}

pub fn get_password_hash(conn: &Connection, identity_id: i64) -> Result<Option<String>> {
    let hash = conn
        .query_row(
            "SELECT password_hash FROM credentials WHERE identity_id = ?1",
            params![identity_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash)
}
