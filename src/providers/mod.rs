//! External identity providers.
//!
//! The control plane needs three things from a provider: its OIDC endpoints,
//! an authorization-code exchange that yields the caller's email, and a
//! directory listing for sync. `IdentityProviderClient` is that capability;
//! `HttpProviderClient` is the real implementation and `StaticProviderClient`
//! stands in for it wherever a network is unwanted.
//!
//! Every call is bounded by a timeout. A timeout surfaces as
//! `Error::Timeout`, any other transport or protocol failure as
//! `Error::Upstream`; both are retryable and neither is retried here.

mod http;
mod fake;
mod sync;

pub use fake::StaticProviderClient;
pub use http::HttpProviderClient;
pub use sync::{run_directory_sync, sync_all, sync_directory, SyncSummary};

use crate::credentials::SecretCipher;
use crate::error::{Error, Result};
use crate::store::{Provider, ProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Endpoints advertised by a provider's discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
}

/// A directory member as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMember {
    pub email: String,
    pub groups: Vec<String>,
}

/// Plaintext view of a provider row, built right before talking to it.
#[derive(Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    pub kind: ProviderKind,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ProviderSettings {
    /// Opens the sealed client secret. The internal provider has none and
    /// cannot be talked to.
    pub fn from_provider(provider: &Provider, cipher: &SecretCipher) -> Result<Self> {
        let sealed = provider.client_secret.as_ref().ok_or_else(|| {
            Error::validation(
                format!("provider \"{}\"", provider.name),
                "clientSecret",
                "is not configured",
            )
        })?;

        Ok(Self {
            name: provider.name.clone(),
            url: provider.url.clone(),
            client_id: provider.client_id.clone(),
            client_secret: cipher.open(sealed)?,
            kind: provider.kind,
        })
    }

    /// Provider URL with an `https://` scheme when none was configured.
    pub fn base_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }

    /// OIDC discovery document location. Azure serves the v2.0 document
    /// under a versioned path.
    pub fn discovery_url(&self) -> String {
        match self.kind {
            ProviderKind::Azure => format!("{}/v2.0/.well-known/openid-configuration", self.base_url()),
            _ => format!("{}/.well-known/openid-configuration", self.base_url()),
        }
    }

    /// Browser redirect for the authorization-code flow.
    pub fn authorization_url(&self, endpoints: &ProviderEndpoints, state: &str, redirect_url: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
            endpoints.authorization_endpoint,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_url),
            urlencoding::encode("openid email groups"),
            urlencoding::encode(state)
        )
    }
}

/// What the control plane needs from an external identity provider.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    async fn discover_endpoint(&self, provider: &ProviderSettings) -> Result<ProviderEndpoints>;

    /// Exchanges an authorization code and returns the caller's email.
    async fn exchange_code(&self, provider: &ProviderSettings, code: &str, redirect_url: &str) -> Result<String>;

    async fn list_directory_members(&self, provider: &ProviderSettings) -> Result<Vec<DirectoryMember>>;
}
