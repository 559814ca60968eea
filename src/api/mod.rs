//! HTTP surface of the control plane.
//!
//! Each handler authenticates and authorizes for itself through
//! `Authenticator::authorize`, then runs its store work inside one
//! transaction. Provider calls and password hashing happen outside any
//! transaction.

mod error;
mod identities;
mod resources;
mod session;

pub use error::AppError;

use crate::authz::Authenticator;
use crate::config::TokenConfig;
use crate::credentials::SecretCipher;
use crate::error::{Error, Result};
use crate::providers::IdentityProviderClient;
use crate::reconcile::Reconciler;
use crate::store::Store;
use axum::Router;
use std::sync::Arc;

/// Shared application state for every route.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub authenticator: Authenticator,
    pub reconciler: Reconciler,
    pub cipher: SecretCipher,
    pub provider_client: Arc<dyn IdentityProviderClient>,
    pub tokens: TokenConfig,
}

impl ApiState {
    pub fn new(
        store: Arc<Store>,
        cipher: SecretCipher,
        provider_client: Arc<dyn IdentityProviderClient>,
        tokens: TokenConfig,
    ) -> Self {
        Self {
            authenticator: Authenticator::new(store.clone()),
            reconciler: Reconciler::new(cipher.clone()),
            store,
            cipher,
            provider_client,
            tokens,
        }
    }
}

/// Runs argon2 work on the blocking pool with no store lock held.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(anyhow::Error::new(e).context("blocking task failed")))?
}

/// Builds the `/v1` router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .merge(session::routes())
        .merge(identities::routes())
        .merge(resources::routes())
        .with_state(Arc::new(state))
}
