//! Identity-provider rows. Client secrets are stored sealed (AES-256-GCM
//! ciphertext plus nonce); this module never sees plaintext.

use super::{parse_column, ParseColumnError, Provenance};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the always-present internal provider.
pub const INTERNAL_PROVIDER_NAME: &str = "infra";

/// OIDC dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The built-in password/access-key provider.
    Infra,
    Oidc,
    Okta,
    Azure,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Infra => "infra",
            ProviderKind::Oidc => "oidc",
            ProviderKind::Okta => "okta",
            ProviderKind::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ParseColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infra" => Ok(ProviderKind::Infra),
            "oidc" => Ok(ProviderKind::Oidc),
            "okta" => Ok(ProviderKind::Okta),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(ParseColumnError {
                kind: "provider kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Encrypted-at-rest secret: base64 ciphertext and base64 nonce.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: String,
    pub nonce: String,
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedSecret(..)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub client_id: String,
    /// Absent only for the internal provider.
    pub client_secret: Option<SealedSecret>,
    pub kind: ProviderKind,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    pub fn is_internal(&self) -> bool {
        self.kind == ProviderKind::Infra
    }
}

/// Fields written by `upsert_provider`.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub name: String,
    pub url: String,
    pub client_id: String,
    pub client_secret: Option<SealedSecret>,
    pub kind: ProviderKind,
    pub provenance: Provenance,
}

const COLUMNS: &str =
    "id, name, url, client_id, client_secret, client_secret_nonce, kind, provenance, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    let ciphertext: Option<String> = row.get(4)?;
    let nonce: Option<String> = row.get(5)?;
    let client_secret = match (ciphertext, nonce) {
        (Some(ciphertext), Some(nonce)) => Some(SealedSecret { ciphertext, nonce }),
        _ => None,
    };

    Ok(Provider {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        client_id: row.get(3)?,
        client_secret,
        kind: parse_column(row, 6)?,
        provenance: parse_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Inserts or updates a provider keyed by name. Returns the stored row.
pub fn upsert_provider(conn: &Connection, record: &ProviderRecord) -> Result<Provider> {
    let now = Utc::now();
    let (ciphertext, nonce) = match &record.client_secret {
        Some(sealed) => (Some(sealed.ciphertext.as_str()), Some(sealed.nonce.as_str())),
        None => (None, None),
    };

    conn.execute(
        "INSERT INTO providers (
             name, url, client_id, client_secret, client_secret_nonce,
             kind, provenance, created_at, updated_at
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(name) DO UPDATE SET
             url = excluded.url,
             client_id = excluded.client_id,
             client_secret = excluded.client_secret,
             client_secret_nonce = excluded.client_secret_nonce,
             kind = excluded.kind,
             provenance = excluded.provenance,
             updated_at = excluded.updated_at",
        params![
            record.name,
            record.url,
            record.client_id,
            ciphertext,
            nonce,
            record.kind.as_str(),
            record.provenance.as_str(),
            now
        ],
    )?;

    get_provider_by_name(conn, &record.name)?
        .ok_or_else(|| anyhow::anyhow!("provider {} vanished after upsert", record.name).into())
}

pub fn get_provider_by_name(conn: &Connection, name: &str) -> Result<Option<Provider>> {
    let provider = conn
        .query_row(
            &format!("SELECT {} FROM providers WHERE name = ?1", COLUMNS),
            params![name],
            from_row,
        )
        .optional()?;
    Ok(provider)
}

pub fn get_provider(conn: &Connection, id: i64) -> Result<Option<Provider>> {
    let provider = conn
        .query_row(
            &format!("SELECT {} FROM providers WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(provider)
}

pub fn list_providers(conn: &Connection) -> Result<Vec<Provider>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM providers ORDER BY name", COLUMNS))?;
    let providers = stmt
        .query_map([], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(providers)
}

/// Deletes a provider. Identities linked to it are detached, not deleted;
/// directory sync is the only path that removes provider-sourced identities.
pub fn delete_provider(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute(
        "UPDATE identities SET provider_id = NULL WHERE provider_id = ?1",
        params![id],
    )?;
    let deleted = conn.execute("DELETE FROM providers WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn okta_record(url: &str) -> ProviderRecord {
        ProviderRecord {
            name: "okta".to_string(),
            url: url.to_string(),
            client_id: "client-id".to_string(),
            client_secret: Some(SealedSecret {
                ciphertext: "c2VhbGVk".to_string(),
                nonce: "bm9uY2U=".to_string(),
            }),
            kind: ProviderKind::Oidc,
            provenance: Provenance::Config,
        }
    }

    #[test]
    fn test_upsert_is_keyed_by_name() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                let first = upsert_provider(tx, &okta_record("demo.okta.com"))?;
                let second = upsert_provider(tx, &okta_record("new-demo.okta.com"))?;
                assert_eq!(first.id, second.id);
                assert_eq!(second.url, "new-demo.okta.com");
                assert_eq!(list_providers(tx)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_internal_provider_has_no_secret() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                let infra = upsert_provider(
                    tx,
                    &ProviderRecord {
                        name: INTERNAL_PROVIDER_NAME.to_string(),
                        url: String::new(),
                        client_id: String::new(),
                        client_secret: None,
                        kind: ProviderKind::Infra,
                        provenance: Provenance::Runtime,
                    },
                )?;
                assert!(infra.is_internal());
                assert!(infra.client_secret.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_detaches_identities() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                let okta = upsert_provider(tx, &okta_record("demo.okta.com"))?;
                let mut new = crate::store::identities::NewIdentity::user("sue", Provenance::Runtime);
                new.provider_id = Some(okta.id);
                let sue = crate::store::identities::insert_identity(tx, &new)?;

                assert!(delete_provider(tx, okta.id)?);
                let sue = crate::store::identities::get_identity(tx, sue.id)?.unwrap();
                assert_eq!(sue.provider_id, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_sealed_secret_debug_hides_contents() {
        let sealed = SealedSecret {
            ciphertext: "abc".to_string(),
            nonce: "def".to_string(),
        };
        assert_eq!(format!("{:?}", sealed), "SealedSecret(..)");
    }
}
