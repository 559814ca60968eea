//! Access-key and session-token rows. Only SHA-256 digests of the secret
//! segments are stored.

use super::{parse_column, Provenance};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

/// Long-lived bearer credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessKey {
    pub key_id: String,
    pub name: Option<String>,
    #[serde(skip)]
    pub secret_checksum: Vec<u8>,
    pub issued_for: i64,
    pub expires_at: Option<DateTime<Utc>>,
    /// `Config` for keys loaded from the declared config.
    #[serde(skip)]
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

/// Short-lived bearer credential created by login.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionToken {
    pub token_id: String,
    pub secret_checksum: Vec<u8>,
    pub identity_id: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

fn access_key_from_row(row: &Row<'_>) -> rusqlite::Result<AccessKey> {
    Ok(AccessKey {
        key_id: row.get(0)?,
        name: row.get(1)?,
        secret_checksum: row.get(2)?,
        issued_for: row.get(3)?,
        expires_at: row.get(4)?,
        provenance: parse_column(row, 5)?,
        created_at: row.get(6)?,
    })
}

const ACCESS_KEY_COLUMNS: &str = "key_id, name, secret_checksum, issued_for, expires_at, provenance, created_at";

fn session_token_from_row(row: &Row<'_>) -> rusqlite::Result<SessionToken> {
    Ok(SessionToken {
        token_id: row.get(0)?,
        secret_checksum: row.get(1)?,
        identity_id: row.get(2)?,
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn insert_access_key(conn: &Connection, key: &AccessKey) -> Result<()> {
    conn.execute(
        "INSERT INTO access_keys (key_id, name, secret_checksum, issued_for, expires_at, provenance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            key.key_id,
            key.name,
            key.secret_checksum,
            key.issued_for,
            key.expires_at,
            key.provenance.as_str(),
            key.created_at
        ],
    )?;
    Ok(())
}

/// Overwrites the digest, expiry and provenance of an existing key row,
/// keeping its owner.
pub fn update_access_key_secret(conn: &Connection, key: &AccessKey) -> Result<()> {
    conn.execute(
        "UPDATE access_keys SET secret_checksum = ?2, expires_at = ?3, provenance = ?4 WHERE key_id = ?1",
        params![key.key_id, key.secret_checksum, key.expires_at, key.provenance.as_str()],
    )?;
    Ok(())
}

pub fn get_access_key(conn: &Connection, key_id: &str) -> Result<Option<AccessKey>> {
    let key = conn
        .query_row(
            &format!("SELECT {} FROM access_keys WHERE key_id = ?1", ACCESS_KEY_COLUMNS),
            params![key_id],
            access_key_from_row,
        )
        .optional()?;
    Ok(key)
}

pub fn list_access_keys(conn: &Connection, identity_id: i64) -> Result<Vec<AccessKey>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM access_keys WHERE issued_for = ?1 ORDER BY created_at, key_id",
        ACCESS_KEY_COLUMNS
    ))?;
    let keys = stmt
        .query_map(params![identity_id], access_key_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

pub fn list_by_provenance(conn: &Connection, provenance: Provenance) -> Result<Vec<AccessKey>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM access_keys WHERE provenance = ?1 ORDER BY key_id",
        ACCESS_KEY_COLUMNS
    ))?;
    let keys = stmt
        .query_map(params![provenance.as_str()], access_key_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

pub fn delete_access_key(conn: &Connection, key_id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM access_keys WHERE key_id = ?1", params![key_id])?;
    Ok(deleted > 0)
}

pub fn insert_session_token(conn: &Connection, token: &SessionToken) -> Result<()> {
    conn.execute(
        "INSERT INTO session_tokens (token_id, secret_checksum, identity_id, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            token.token_id,
            token.secret_checksum,
            token.identity_id,
            token.expires_at,
            token.created_at
        ],
    )?;
    Ok(())
}

pub fn get_session_token(conn: &Connection, token_id: &str) -> Result<Option<SessionToken>> {
    let token = conn
        .query_row(
            "SELECT token_id, secret_checksum, identity_id, expires_at, created_at
             FROM session_tokens WHERE token_id = ?1",
            params![token_id],
            session_token_from_row,
        )
        .optional()?;
    Ok(token)
}

pub fn delete_session_token(conn: &Connection, token_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM session_tokens WHERE token_id = ?1",
        params![token_id],
    )?;
    Ok(deleted > 0)
}

/// Removes session tokens whose expiry has passed.
pub fn delete_expired_session_tokens(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM session_tokens WHERE expires_at <= ?1",
        params![now],
    )?;
    Ok(deleted)
}
