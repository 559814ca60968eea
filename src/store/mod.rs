//! Persistence for identities, credentials, providers, groups, grants and
//! destinations, backed by SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Store                              │
//! │  - one connection behind a Mutex         │
//! │  - transaction(): commit on Ok,          │
//! │    rollback on Err or drop               │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Row modules                        │
//! │  identities / keys / providers /         │
//! │  groups / grants / destinations          │
//! │  plain functions over &Connection        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Cascades are explicit procedures (`identities::delete_identity`,
//! `groups::delete_group`, `providers::delete_provider`) rather than
//! triggers, so every caller sees exactly which rows go away.
//!
//! The uniqueness constraints are part of the observable contract:
//! `access_keys.key_id`, `providers.name`, `identities.name`, `groups.name`,
//! `destinations.name` and `grants(subject, resource, privilege)`.

pub mod destinations;
pub mod grants;
pub mod groups;
pub mod identities;
pub mod keys;
pub mod providers;
mod schema;

use crate::error::Result;
use anyhow::{anyhow, Context};
use rusqlite::{Connection, Row, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

pub use destinations::Destination;
pub use grants::{Grant, GrantOrigin};
pub use groups::Group;
pub use identities::{Identity, IdentityKind};
pub use keys::{AccessKey, SessionToken};
pub use providers::{Provider, ProviderKind, SealedSecret};

/// Handle to the persistent store. Constructed once and passed down; there is
/// no global connection.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database at `db_path` and ensures the schema exists.
    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and ephemeral servers.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        schema::migrate(&conn).context("Failed to create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside one transaction. The transaction commits only when `f`
    /// returns `Ok`; an error, a panic or an early drop rolls it back, so no
    /// partial mutation is ever visible to other callers.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Runs a side-effect-free read against committed state.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection lock poisoned").into())
    }
}

/// Returned when a stored enum column holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseColumnError {
    pub kind: &'static str,
    pub value: String,
}

/// Reads a TEXT column and parses it into a typed value.
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseColumnError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Provenance of a row: declared by the reconciler, or created at runtime
/// (login, signup, API, directory sync). Reconciliation only ever prunes
/// `Config` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Config,
    Runtime,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Config => "config",
            Provenance::Runtime => "runtime",
        }
    }
}

impl FromStr for Provenance {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Provenance::Config),
            "runtime" => Ok(Provenance::Runtime),
            other => Err(ParseColumnError {
                kind: "provenance",
                value: other.to_string(),
            }),
        }
    }
}

/// Number of rows in `table`. Table names are fixed identifiers, never input.
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}
