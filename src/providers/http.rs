//! reqwest-backed provider client.

use super::{DirectoryMember, IdentityProviderClient, ProviderEndpoints, ProviderSettings};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Page size for SCIM member listing.
const SCIM_PAGE_SIZE: usize = 100;

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize, Debug)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScimListResponse {
    #[serde(default)]
    total_results: usize,
    #[serde(default, rename = "Resources")]
    resources: Vec<ScimUser>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScimUser {
    user_name: String,
    #[serde(default)]
    emails: Vec<ScimEmail>,
    #[serde(default)]
    groups: Vec<ScimGroupRef>,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct ScimEmail {
    value: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Deserialize, Debug)]
struct ScimGroupRef {
    display: String,
}

impl ScimUser {
    fn into_member(self) -> DirectoryMember {
        let email = self
            .emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| self.emails.first())
            .map(|e| e.value.clone())
            .unwrap_or(self.user_name);
        DirectoryMember {
            email,
            groups: self.groups.into_iter().map(|g| g.display).collect(),
        }
    }
}

/// Talks OIDC discovery, the authorization-code grant, userinfo and SCIM
/// member listing. Every request shares one timeout.
#[derive(Clone)]
pub struct HttpProviderClient {
    client: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn fetch_json<T: DeserializeOwned>(&self, provider: &str, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(provider, %status, body = %body, "Provider request rejected");
            return Err(Error::Upstream(format!("provider {} answered {}", provider, status)));
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(provider, e)
            } else {
                Error::Upstream(format!("provider {} sent an unreadable response: {}", provider, e))
            }
        })
    }

    /// Client-credentials token used for directory listing.
    async fn client_token(&self, provider: &ProviderSettings, endpoints: &ProviderEndpoints) -> Result<String> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
            ("scope", "scim"),
        ];
        let token: TokenResponse = self
            .fetch_json(&provider.name, self.client.post(&endpoints.token_endpoint).form(&form))
            .await?;
        Ok(token.access_token)
    }
}

fn transport_error(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("provider {} did not answer in time", provider))
    } else {
        Error::Upstream(format!("provider {} unreachable: {}", provider, e))
    }
}

#[async_trait]
impl IdentityProviderClient for HttpProviderClient {
    async fn discover_endpoint(&self, provider: &ProviderSettings) -> Result<ProviderEndpoints> {
        let url = provider.discovery_url();
        debug!(provider = %provider.name, url = %url, "Fetching discovery document");
        self.fetch_json(&provider.name, self.client.get(&url)).await
    }

    async fn exchange_code(&self, provider: &ProviderSettings, code: &str, redirect_url: &str) -> Result<String> {
        let endpoints = self.discover_endpoint(provider).await?;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_url),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];
        let token: TokenResponse = self
            .fetch_json(&provider.name, self.client.post(&endpoints.token_endpoint).form(&form))
            .await?;

        let userinfo_url = endpoints.userinfo_endpoint.ok_or_else(|| {
            Error::Upstream(format!("provider {} advertises no userinfo endpoint", provider.name))
        })?;
        let info: UserInfo = self
            .fetch_json(
                &provider.name,
                self.client.get(&userinfo_url).bearer_auth(&token.access_token),
            )
            .await?;

        let email = info
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::Upstream(format!("provider {} returned no email", provider.name)))?;
        debug!(provider = %provider.name, "Authorization code exchanged");
        Ok(email)
    }

    async fn list_directory_members(&self, provider: &ProviderSettings) -> Result<Vec<DirectoryMember>> {
        let endpoints = self.discover_endpoint(provider).await?;
        let token = self.client_token(provider, &endpoints).await?;
        let users_url = format!("{}/scim/v2/Users", provider.base_url());

        let mut members = Vec::new();
        let mut start_index = 1;
        loop {
            let page: ScimListResponse = self
                .fetch_json(
                    &provider.name,
                    self.client
                        .get(&users_url)
                        .query(&[("startIndex", start_index), ("count", SCIM_PAGE_SIZE)])
                        .bearer_auth(&token),
                )
                .await?;

            let fetched = page.resources.len();
            members.extend(
                page.resources
                    .into_iter()
                    .filter(|u| u.active)
                    .map(ScimUser::into_member),
            );

            start_index += fetched;
            if fetched == 0 || start_index > page.total_results {
                break;
            }
        }

        debug!(provider = %provider.name, members = members.len(), "Directory listed");
        Ok(members)
    }
}
