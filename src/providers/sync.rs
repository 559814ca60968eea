//! Directory sync: mirror a provider's member list into runtime identities
//! and group memberships.

use super::{DirectoryMember, IdentityProviderClient, ProviderSettings};
use crate::credentials::SecretCipher;
use crate::error::Result;
use crate::grants;
use crate::store::groups;
use crate::store::identities::{self, NewIdentity};
use crate::store::providers::{self, Provider};
use crate::store::{Provenance, Store};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub provider: String,
    pub members: usize,
    pub created: usize,
    pub removed: usize,
}

/// Syncs one provider. The directory is fetched before the transaction opens;
/// a provider failure leaves the store untouched.
pub async fn sync_directory(
    store: &Store,
    client: &dyn IdentityProviderClient,
    cipher: &SecretCipher,
    provider: &Provider,
) -> Result<SyncSummary> {
    let settings = ProviderSettings::from_provider(provider, cipher)?;
    let members = client.list_directory_members(&settings).await?;

    let summary = store.transaction(|tx| apply_members(tx, provider, &members))?;
    info!(
        provider = %summary.provider,
        members = summary.members,
        created = summary.created,
        removed = summary.removed,
        "Directory synced"
    );
    Ok(summary)
}

/// Syncs every external provider. A failing provider is logged and skipped.
pub async fn sync_all(
    store: &Store,
    client: &dyn IdentityProviderClient,
    cipher: &SecretCipher,
) -> Result<Vec<SyncSummary>> {
    let all = store.read(providers::list_providers)?;

    let mut summaries = Vec::new();
    for provider in all.iter().filter(|p| !p.is_internal()) {
        match sync_directory(store, client, cipher, provider).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => warn!(provider = %provider.name, error = %e, retryable = e.is_retryable(), "Directory sync failed"),
        }
    }
    Ok(summaries)
}

/// Runs `sync_all` every `interval_seconds`.
pub async fn run_directory_sync(
    store: Arc<Store>,
    client: Arc<dyn IdentityProviderClient>,
    cipher: SecretCipher,
    interval_seconds: u64,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match sync_all(&store, client.as_ref(), &cipher).await {
            Ok(summaries) => debug!(providers = summaries.len(), "Directory sync round complete"),
            Err(e) => warn!(error = %e, "Directory sync round failed"),
        }
    }
}

fn apply_members(conn: &Connection, provider: &Provider, members: &[DirectoryMember]) -> Result<SyncSummary> {
    let mut summary = SyncSummary {
        provider: provider.name.clone(),
        members: members.len(),
        ..Default::default()
    };

    let mut listed = HashSet::new();
    for member in members {
        let email = member.email.trim();
        if email.is_empty() || !listed.insert(email.to_string()) {
            continue;
        }

        let identity = match identities::get_identity_by_name(conn, email)? {
            Some(existing) => {
                if existing.provider_id != Some(provider.id) {
                    identities::set_provider(conn, existing.id, Some(provider.id))?;
                }
                existing
            }
            None => {
                let mut new = NewIdentity::user(email, Provenance::Runtime);
                new.provider_id = Some(provider.id);
                summary.created += 1;
                grants::create_identity(conn, &new)?
            }
        };

        groups::remove_memberships(conn, identity.id)?;
        for name in member.groups.iter().map(|g| g.trim()).filter(|g| !g.is_empty()) {
            let group = groups::find_or_create(conn, name, Provenance::Runtime)?;
            groups::add_member(conn, group.id, identity.id)?;
        }
    }

    // Declared identities belong to the reconciler even when linked here.
    for identity in identities::list_by_provider(conn, provider.id)? {
        if identity.provenance == Provenance::Runtime && !listed.contains(&identity.name) {
            identities::delete_identity(conn, identity.id)?;
            summary.removed += 1;
        }
    }

    Ok(summary)
}
