use super::{DirectoryMember, IdentityProviderClient, ProviderEndpoints, ProviderSettings};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Upstream,
    Timeout,
}

/// In-process provider with canned answers. Codes map to emails; the
/// directory is a fixed member list that can be replaced between syncs.
#[derive(Default)]
pub struct StaticProviderClient {
    codes: Mutex<HashMap<String, String>>,
    members: Mutex<Vec<DirectoryMember>>,
    failure: Mutex<Option<Failure>>,
}

impl StaticProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(self, code: &str, email: &str) -> Self {
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert(code.to_string(), email.to_string());
        }
        self
    }

    pub fn with_member(self, email: &str, groups: &[&str]) -> Self {
        if let Ok(mut members) = self.members.lock() {
            members.push(DirectoryMember {
                email: email.to_string(),
                groups: groups.iter().map(|g| g.to_string()).collect(),
            });
        }
        self
    }

    pub fn set_members(&self, members: Vec<DirectoryMember>) {
        if let Ok(mut current) = self.members.lock() {
            *current = members;
        }
    }

    /// Every later call fails with `Error::Upstream`.
    pub fn fail_upstream(&self) {
        self.set_failure(Some(Failure::Upstream));
    }

    /// Every later call fails with `Error::Timeout`.
    pub fn fail_timeout(&self) {
        self.set_failure(Some(Failure::Timeout));
    }

    pub fn recover(&self) {
        self.set_failure(None);
    }

    fn set_failure(&self, failure: Option<Failure>) {
        if let Ok(mut current) = self.failure.lock() {
            *current = failure;
        }
    }

    fn check(&self, provider: &ProviderSettings) -> Result<()> {
        let failure = self.failure.lock().map(|f| *f).unwrap_or(None);
        match failure {
            Some(Failure::Upstream) => Err(Error::Upstream(format!("provider {} unavailable", provider.name))),
            Some(Failure::Timeout) => Err(Error::Timeout(format!(
                "provider {} did not answer in time",
                provider.name
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProviderClient for StaticProviderClient {
    async fn discover_endpoint(&self, provider: &ProviderSettings) -> Result<ProviderEndpoints> {
        self.check(provider)?;
        let base = provider.base_url();
        Ok(ProviderEndpoints {
            issuer: Some(base.clone()),
            authorization_endpoint: format!("{}/oauth2/v1/authorize", base),
            token_endpoint: format!("{}/oauth2/v1/token", base),
            userinfo_endpoint: Some(format!("{}/oauth2/v1/userinfo", base)),
        })
    }

    async fn exchange_code(&self, provider: &ProviderSettings, code: &str, _redirect_url: &str) -> Result<String> {
        self.check(provider)?;
        let codes = self
            .codes
            .lock()
            .map_err(|_| anyhow::anyhow!("provider code table poisoned"))?;
        codes
            .get(code)
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("provider {} rejected the authorization code", provider.name)))
    }

    async fn list_directory_members(&self, provider: &ProviderSettings) -> Result<Vec<DirectoryMember>> {
        self.check(provider)?;
        let members = self
            .members
            .lock()
            .map_err(|_| anyhow::anyhow!("provider member list poisoned"))?;
        Ok(members.clone())
    }
}
