//! Credential store: password credentials, bearer credentials (access keys
//! and session tokens) and at-rest encryption of provider client secrets.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       verify_bearer / issue_*            │
//! │  - classify by shape                     │
//! │  - look up digest by ID prefix           │
//! │  - constant-time digest compare          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       bearer / password / encryption     │
//! │  - SHA-256 digests of random secrets     │
//! │  - argon2 PHC password hashes            │
//! │  - AES-256-GCM for provider secrets      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       store::keys / store::identities    │
//! │  - digests and hashes only, never        │
//! │    plaintext                             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - Bearer secrets are shown once, at issuance; only digests are persisted
//! - Digest comparison never short-circuits
//! - A missing ID still pays for a digest comparison
//! - Expired credentials fail even when the digest matches
//! - Provider secrets use a key unrelated to any digest or hash

pub mod bearer;
pub mod encryption;
pub mod password;

pub use bearer::{classify, parse_access_key, Bearer};
pub use encryption::{validate_key, SecretCipher};
pub use password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};

use crate::error::{Error, Result};
use crate::store::identities::{self, Identity};
use crate::store::keys::{self, AccessKey, SessionToken};
use crate::store::{Provenance, Store};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which bearer credential authenticated a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    SessionToken,
    AccessKey,
}

/// Outcome of a successful bearer verification.
#[derive(Debug, Clone)]
pub struct Verified {
    pub identity: Identity,
    pub kind: CredentialKind,
    /// Session token ID or access key ID.
    pub credential_id: String,
}

/// A freshly issued access key. `bearer` is the only copy of the secret.
#[derive(Debug, Clone)]
pub struct IssuedAccessKey {
    pub key: AccessKey,
    pub bearer: String,
}

/// A freshly issued session token.
#[derive(Debug, Clone)]
pub struct IssuedSessionToken {
    pub bearer: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues a new access key for `identity_id`. `ttl` of `None` never expires.
pub fn issue_access_key(
    conn: &Connection,
    identity_id: i64,
    name: Option<&str>,
    ttl: Option<Duration>,
) -> Result<IssuedAccessKey> {
    let key_id = bearer::generate_secret(bearer::KEY_ID_LEN);
    let secret = bearer::generate_secret(bearer::KEY_SECRET_LEN);
    let now = Utc::now();

    let key = AccessKey {
        key_id,
        name: name.map(str::to_string),
        secret_checksum: bearer::digest(&secret),
        issued_for: identity_id,
        expires_at: ttl.map(|ttl| now + ttl),
        provenance: Provenance::Runtime,
        created_at: now,
    };
    keys::insert_access_key(conn, &key)?;
    debug!(key_id = %key.key_id, identity_id, "Access key issued");

    let bearer = format!("{}.{}", key.key_id, secret);
    Ok(IssuedAccessKey { key, bearer })
}

/// Issues a session token for `identity_id` valid for `ttl`.
pub fn issue_session_token(conn: &Connection, identity_id: i64, ttl: Duration) -> Result<IssuedSessionToken> {
    let id = bearer::generate_secret(bearer::TOKEN_ID_LEN);
    let secret = bearer::generate_secret(bearer::TOKEN_SECRET_LEN);
    let now = Utc::now();

    let token = SessionToken {
        token_id: id,
        secret_checksum: bearer::digest(&secret),
        identity_id,
        expires_at: now + ttl,
        created_at: now,
    };
    keys::insert_session_token(conn, &token)?;

    Ok(IssuedSessionToken {
        bearer: format!("{}{}", token.token_id, secret),
        expires_at: token.expires_at,
    })
}

/// Resolves a bearer string to the identity it was issued for.
///
/// Every failure (bad shape, unknown ID, wrong secret, expired, orphaned
/// credential) is `Error::Authentication` with no further detail.
pub fn verify_bearer(conn: &Connection, bearer: &str, now: DateTime<Utc>) -> Result<Verified> {
    let (kind, credential_id, stored, identity_id, expires_at, secret) = match classify(bearer)? {
        Bearer::SessionToken { id, secret } => {
            let token = keys::get_session_token(conn, id)?;
            (
                CredentialKind::SessionToken,
                id,
                token.as_ref().map(|t| t.secret_checksum.clone()),
                token.as_ref().map(|t| t.identity_id),
                token.map(|t| t.expires_at),
                secret,
            )
        }
        Bearer::AccessKey { key_id, secret } => {
            let key = keys::get_access_key(conn, key_id)?;
            (
                CredentialKind::AccessKey,
                key_id,
                key.as_ref().map(|k| k.secret_checksum.clone()),
                key.as_ref().map(|k| k.issued_for),
                key.and_then(|k| k.expires_at),
                secret,
            )
        }
    };

    // Compare even when the ID is unknown so both paths cost the same.
    let matches = bearer::digest_matches(stored.as_deref().unwrap_or(&[0u8; 32]), secret);
    let Some(identity_id) = identity_id.filter(|_| matches) else {
        debug!(credential_id, "Bearer verification failed");
        return Err(Error::Authentication);
    };

    if expires_at.is_some_and(|expires_at| expires_at <= now) {
        debug!(credential_id, "Bearer credential expired");
        return Err(Error::Authentication);
    }

    let identity = identities::get_identity(conn, identity_id)?.ok_or(Error::Authentication)?;
    Ok(Verified {
        identity,
        kind,
        credential_id: credential_id.to_string(),
    })
}

/// Stored material for a password login, read under the store lock.
/// `verify` does the argon2 work and needs no connection.
#[derive(Debug)]
pub struct PasswordLogin {
    identity: Option<Identity>,
    hash: Option<String>,
}

/// Looks up the identity and password hash behind `name`.
pub fn lookup_password_login(conn: &Connection, name: &str) -> Result<PasswordLogin> {
    let identity = identities::get_identity_by_name(conn, name)?;
    let hash = match &identity {
        Some(identity) => identities::get_password_hash(conn, identity.id)?,
        None => None,
    };
    Ok(PasswordLogin { identity, hash })
}

impl PasswordLogin {
    /// Checks `password`. Unknown names and identities without a password
    /// credential cost one dummy verification.
    pub fn verify(self, password: &str) -> Result<Identity> {
        match (self.identity, self.hash) {
            (Some(identity), Some(hash)) if password::verify_password(&hash, password) => Ok(identity),
            (_, Some(_)) => Err(Error::Authentication),
            _ => {
                password::verify_dummy(password);
                Err(Error::Authentication)
            }
        }
    }
}

/// Validates and hashes a new password. The result goes to
/// `identities::set_password_hash`.
pub fn hash_new_password(password: &str) -> Result<String> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::validation(
            "password",
            "length",
            format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }
    Ok(hash_password(password)?)
}

/// Deletes the session token a caller authenticated with. Access keys are
/// left alone.
pub fn revoke_session(conn: &Connection, kind: CredentialKind, credential_id: &str) -> Result<bool> {
    match kind {
        CredentialKind::SessionToken => keys::delete_session_token(conn, credential_id),
        CredentialKind::AccessKey => Ok(false),
    }
}

/// Periodically deletes expired session tokens.
pub async fn run_session_cleanup(store: Arc<Store>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match store.transaction(|tx| keys::delete_expired_session_tokens(tx, Utc::now())) {
            Ok(removed) => debug!(removed, "Expired session tokens swept"),
            Err(e) => warn!(error = %e, "Session token sweep failed"),
        }
    }
}
