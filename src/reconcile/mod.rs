//! Applies a declared desired-state document onto the store.
//!
//! One `apply` is one transaction. Declared providers, identities, groups and
//! grants replace whatever the previous document declared; rows created at
//! runtime (signup, login, API, directory sync) and default grants are never
//! touched. The internal provider and the connector identity with its grant
//! are anchors: ensured on every apply, never pruned.
//!
//! Config grants are deleted and re-inserted. Providers, identities and groups
//! are upserted and then swept, which keeps row IDs (and anything hanging off
//! them) stable for entities declared by both documents. Credentials loaded
//! from the document follow it: a config-loaded access key the document no
//! longer declares is deleted, and a config-managed identity declared without
//! a password loses its password credential.
//!
//! Declared passwords are hashed before the transaction opens.

use crate::config::{DeclaredConfig, GrantEntry, ProviderEntry, UserEntry};
use crate::credentials::{self, bearer, SecretCipher};
use crate::error::{Error, Result};
use crate::grants::{self, privilege, Subject, INFRA_RESOURCE};
use crate::store::grants::{self as grant_rows, GrantOrigin};
use crate::store::identities::{self, Identity, IdentityKind, NewIdentity};
use crate::store::keys::{self, AccessKey};
use crate::store::providers::{self, ProviderKind, ProviderRecord, INTERNAL_PROVIDER_NAME};
use crate::store::{count_rows, groups, Provenance, Store};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Name of the machine identity the cluster connector authenticates as.
pub const CONNECTOR_IDENTITY_NAME: &str = "connector";

/// Row counts after a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub providers: i64,
    pub identities: i64,
    pub groups: i64,
    pub grants: i64,
}

/// Drives the store towards a declared document. Holds the at-rest cipher
/// for provider client secrets.
#[derive(Debug, Clone)]
pub struct Reconciler {
    cipher: SecretCipher,
}

impl Reconciler {
    pub fn new(cipher: SecretCipher) -> Self {
        Self { cipher }
    }

    /// Applies `desired` atomically. On any error the store is unchanged.
    pub fn apply(&self, store: &Store, desired: &DeclaredConfig) -> Result<ReconcileSummary> {
        validate(desired)?;
        let passwords = desired
            .users
            .iter()
            .map(|user| user.password.as_deref().map(credentials::hash_new_password).transpose())
            .collect::<Result<Vec<_>>>()?;
        let summary = store.transaction(|tx| self.apply_in(tx, desired, &passwords))?;
        info!(
            providers = summary.providers,
            identities = summary.identities,
            groups = summary.groups,
            grants = summary.grants,
            "Declared config applied"
        );
        Ok(summary)
    }

    fn apply_in(
        &self,
        conn: &Connection,
        desired: &DeclaredConfig,
        passwords: &[Option<String>],
    ) -> Result<ReconcileSummary> {
        ensure_anchors(conn)?;

        let removed = grant_rows::delete_by_origin(conn, GrantOrigin::Config)?;
        debug!(removed, "Cleared config grants");

        self.apply_providers(conn, &desired.providers)?;

        let mut declared_identities = HashSet::new();
        let mut with_password = HashSet::new();
        let mut declared_keys = HashSet::new();
        let mut pending_keys = Vec::new();
        for (user, hash) in desired.users.iter().zip(passwords) {
            let name = user
                .identity_name()
                .ok_or_else(|| Error::validation("user", "name", "or email is required"))?;
            let identity = find_or_create_identity(conn, name)?;
            declared_identities.insert(identity.id);

            if let Some(hash) = hash {
                identities::set_password_hash(conn, identity.id, hash)?;
                with_password.insert(identity.id);
            }
            if let Some(key) = user.access_key.as_deref() {
                let (key_id, _) = bearer::parse_access_key(key)?;
                declared_keys.insert((identity.id, key_id.to_string()));
                pending_keys.push((identity, key));
            }
        }

        for key in keys::list_by_provenance(conn, Provenance::Config)? {
            if !declared_keys.contains(&(key.issued_for, key.key_id.clone())) {
                debug!(key_id = %key.key_id, "Deleting undeclared config access key");
                keys::delete_access_key(conn, &key.key_id)?;
            }
        }
        for (identity, key) in &pending_keys {
            load_access_key(conn, identity, key)?;
        }

        let mut declared_groups = HashSet::new();
        for grant in &desired.grants {
            let subject = resolve_subject(conn, grant)?;
            match subject {
                Subject::Identity(id) => declared_identities.insert(id),
                Subject::Group(id) => declared_groups.insert(id),
            };
            let role = grant
                .role
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(privilege::CONNECT);
            grant_rows::insert_grant(conn, subject, grant.resource.trim(), role, GrantOrigin::Config)?;
        }

        for identity in identities::list_by_provenance(conn, Provenance::Config)? {
            if !declared_identities.contains(&identity.id) {
                debug!(identity = %identity.name, "Pruning undeclared identity");
                identities::delete_identity(conn, identity.id)?;
            } else if !with_password.contains(&identity.id)
                && identities::delete_password_hash(conn, identity.id)?
            {
                debug!(identity = %identity.name, "Removed undeclared password");
            }
        }

        for group in groups::list_by_provenance(conn, Provenance::Config)? {
            if !declared_groups.contains(&group.id) {
                debug!(group = %group.name, "Pruning undeclared group");
                groups::delete_group(conn, group.id)?;
            }
        }

        Ok(ReconcileSummary {
            providers: count_rows(conn, "providers")?,
            identities: count_rows(conn, "identities")?,
            groups: count_rows(conn, "groups")?,
            grants: count_rows(conn, "grants")?,
        })
    }

    fn apply_providers(&self, conn: &Connection, entries: &[ProviderEntry]) -> Result<()> {
        let mut declared = HashSet::new();
        for entry in entries {
            let kind = provider_kind(entry)?;
            let sealed = self.cipher.seal(&entry.client_secret)?;
            let provider = providers::upsert_provider(
                conn,
                &ProviderRecord {
                    name: entry.name.trim().to_string(),
                    url: entry.url.trim().to_string(),
                    client_id: entry.client_id.clone(),
                    client_secret: Some(sealed),
                    kind,
                    provenance: Provenance::Config,
                },
            )?;
            declared.insert(provider.id);
        }

        for provider in providers::list_providers(conn)? {
            if provider.provenance == Provenance::Config
                && !provider.is_internal()
                && !declared.contains(&provider.id)
            {
                debug!(provider = %provider.name, "Pruning undeclared provider");
                providers::delete_provider(conn, provider.id)?;
            }
        }
        Ok(())
    }
}

/// Ensures the internal provider, the connector identity and its grant exist.
/// Idempotent; called on every apply and at startup.
pub fn ensure_anchors(conn: &Connection) -> Result<()> {
    if providers::get_provider_by_name(conn, INTERNAL_PROVIDER_NAME)?.is_none() {
        providers::upsert_provider(
            conn,
            &ProviderRecord {
                name: INTERNAL_PROVIDER_NAME.to_string(),
                url: String::new(),
                client_id: String::new(),
                client_secret: None,
                kind: ProviderKind::Infra,
                provenance: Provenance::Runtime,
            },
        )?;
    }

    let connector = match identities::get_identity_by_name(conn, CONNECTOR_IDENTITY_NAME)? {
        Some(identity) => identity,
        None => identities::insert_identity(
            conn,
            &NewIdentity {
                name: CONNECTOR_IDENTITY_NAME.to_string(),
                kind: IdentityKind::Machine,
                admin: false,
                provenance: Provenance::Runtime,
                provider_id: None,
            },
        )?,
    };

    grant_rows::insert_grant(
        conn,
        Subject::Identity(connector.id),
        INFRA_RESOURCE,
        privilege::CONNECTOR,
        GrantOrigin::Runtime,
    )?;
    Ok(())
}

/// Loads a pre-provisioned `{KeyID}.{secret}` for `identity` as a
/// config-loaded key.
///
/// Re-loading a key for the identity it already belongs to overwrites its
/// digest. A `KeyID` owned by anyone else is a conflict.
pub fn load_access_key(conn: &Connection, identity: &Identity, key: &str) -> Result<()> {
    let (key_id, secret) = bearer::parse_access_key(key)?;

    let row = AccessKey {
        key_id: key_id.to_string(),
        name: Some(format!("{}-access-key", identity.name)),
        secret_checksum: bearer::digest(secret),
        issued_for: identity.id,
        expires_at: None,
        provenance: Provenance::Config,
        created_at: Utc::now(),
    };

    match keys::get_access_key(conn, key_id)? {
        Some(existing) if existing.issued_for != identity.id => Err(Error::Conflict(format!(
            "access key assigned to \"{}\" is already assigned to another user, a user's access key must have a unique ID",
            identity.name
        ))),
        Some(_) => keys::update_access_key_secret(conn, &row),
        None => keys::insert_access_key(conn, &row),
    }
}

/// Existing identities (runtime ones included) are adopted as-is; missing
/// ones are created config-managed, with default grants.
fn find_or_create_identity(conn: &Connection, name: &str) -> Result<Identity> {
    match identities::get_identity_by_name(conn, name)? {
        Some(identity) => Ok(identity),
        None => grants::create_identity(conn, &NewIdentity::user(name, Provenance::Config)),
    }
}

fn resolve_subject(conn: &Connection, grant: &GrantEntry) -> Result<Subject> {
    match (non_empty(&grant.user), non_empty(&grant.group)) {
        (Some(user), None) => Ok(Subject::Identity(find_or_create_identity(conn, user)?.id)),
        (None, Some(group)) => Ok(Subject::Group(
            groups::find_or_create(conn, group, Provenance::Config)?.id,
        )),
        _ => Err(Error::validation(
            "grant",
            "subject",
            "must name exactly one of user or group",
        )),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn provider_kind(entry: &ProviderEntry) -> Result<ProviderKind> {
    match entry.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        None => Ok(ProviderKind::Oidc),
        Some(kind) => match kind.parse::<ProviderKind>() {
            Ok(ProviderKind::Infra) | Err(_) => Err(Error::validation(
                format!("provider \"{}\"", entry.name),
                "kind",
                format!("'{}' is not a supported provider kind", kind),
            )),
            Ok(kind) => Ok(kind),
        },
    }
}

/// Checks every entry before anything is written, so the error names the
/// first malformed entry rather than a side effect of it.
fn validate(desired: &DeclaredConfig) -> Result<()> {
    let mut names = HashSet::new();
    for entry in &desired.providers {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(Error::validation("provider", "name", "is required"));
        }
        let entity = format!("provider \"{}\"", name);
        if name == INTERNAL_PROVIDER_NAME {
            return Err(Error::validation(entity, "name", "is reserved"));
        }
        if !names.insert(name) {
            return Err(Error::validation(entity, "name", "is declared more than once"));
        }
        for (field, value) in [
            ("url", &entry.url),
            ("clientId", &entry.client_id),
            ("clientSecret", &entry.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(entity, field, "is required"));
            }
        }
        provider_kind(entry)?;
    }

    for user in &desired.users {
        let name = user
            .identity_name()
            .ok_or_else(|| Error::validation("user", "name", "or email is required"))?;
        if let Some(key) = user.access_key.as_deref() {
            bearer::parse_access_key(key).map_err(|_| {
                Error::validation(
                    format!("user \"{}\"", name),
                    "accessKey",
                    "must be {KeyID}.{secret}",
                )
            })?;
        }
    }

    for grant in &desired.grants {
        if non_empty(&grant.user).is_some() == non_empty(&grant.group).is_some() {
            return Err(Error::validation(
                "grant",
                "subject",
                "must name exactly one of user or group",
            ));
        }
        if grant.resource.trim().is_empty() {
            return Err(Error::validation("grant", "resource", "is required"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
