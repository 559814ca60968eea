use crate::auth::extract_bearer_token;
use crate::credentials::{self, CredentialKind};
use crate::error::{Error, Result};
use crate::grants::{self, privilege, Required, INFRA_RESOURCE};
use crate::store::{Identity, Store};
use axum::http::HeaderMap;
use chrono::Utc;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::debug;

/// Operations exposed to authenticated callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    Logout,
    ValidateCredential,
    ListIdentities,
    CreateIdentity,
    DeleteIdentity,
    UpdatePassword { identity_id: i64 },
    IssueAccessKey { identity_id: i64 },
    ListAccessKeys { identity_id: i64 },
    DeleteAccessKey,
    ListGrants { resource: &'a str },
    ListGroups,
    RegisterDestination,
    ListDestinations,
    ApplyConfig,
}

/// What the caller must hold for an operation to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement<'a> {
    /// Any verified identity.
    Authenticated,
    /// `identity.admin`, or `admin` on the infra resource.
    Admin,
    /// The named identity itself, or an admin.
    SelfOrAdmin(i64),
    /// `connector` on the infra resource, or an admin.
    Connector,
    /// Any grant on the resource, or an admin.
    AnyGrantOn(&'a str),
}

impl<'a> Operation<'a> {
    pub fn requirement(&self) -> Requirement<'a> {
        match *self {
            Operation::Logout
            | Operation::ValidateCredential
            | Operation::ListIdentities
            | Operation::ListGroups
            | Operation::ListDestinations => Requirement::Authenticated,
            Operation::CreateIdentity
            | Operation::DeleteIdentity
            | Operation::DeleteAccessKey
            | Operation::ApplyConfig => Requirement::Admin,
            Operation::UpdatePassword { identity_id }
            | Operation::IssueAccessKey { identity_id }
            | Operation::ListAccessKeys { identity_id } => Requirement::SelfOrAdmin(identity_id),
            Operation::RegisterDestination => Requirement::Connector,
            Operation::ListGrants { resource } => Requirement::AnyGrantOn(resource),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity: Identity,
    pub kind: CredentialKind,
    /// Session token ID or access key ID the call was made with.
    pub credential_id: String,
}

/// Resolves inbound bearer credentials and checks them against the
/// operation's requirement.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<Store>,
}

impl Authenticator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Verifies the bearer credential in `headers`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        let bearer = extract_bearer_token(headers).map_err(|e| {
            debug!(error = %e, "Rejected authorization header");
            Error::from(e)
        })?;

        let verified = self
            .store
            .read(|conn| credentials::verify_bearer(conn, &bearer, Utc::now()))?;

        Ok(Principal {
            identity: verified.identity,
            kind: verified.kind,
            credential_id: verified.credential_id,
        })
    }

    /// Authenticates, then checks the operation's requirement. Authentication
    /// failures are `Error::Authentication`; insufficient privilege is
    /// `Error::Authorization`.
    pub fn authorize(&self, headers: &HeaderMap, operation: Operation<'_>) -> Result<Principal> {
        let principal = self.authenticate(headers)?;
        let allowed = self
            .store
            .read(|conn| satisfies(conn, &principal.identity, operation.requirement()))?;

        if !allowed {
            debug!(identity = %principal.identity.name, ?operation, "Operation forbidden");
            return Err(Error::Authorization);
        }
        Ok(principal)
    }
}

/// Whether the identity is an administrator of the control plane.
pub fn is_admin(conn: &Connection, identity: &Identity) -> Result<bool> {
    if identity.admin {
        return Ok(true);
    }
    grants::has_privilege(conn, identity.id, INFRA_RESOURCE, Required::Privilege(privilege::ADMIN))
}

pub fn satisfies(conn: &Connection, identity: &Identity, requirement: Requirement<'_>) -> Result<bool> {
    match requirement {
        Requirement::Authenticated => Ok(true),
        Requirement::Admin => is_admin(conn, identity),
        Requirement::SelfOrAdmin(id) => Ok(identity.id == id || is_admin(conn, identity)?),
        Requirement::Connector => Ok(grants::has_privilege(
            conn,
            identity.id,
            INFRA_RESOURCE,
            Required::Privilege(privilege::CONNECTOR),
        )? || is_admin(conn, identity)?),
        Requirement::AnyGrantOn(resource) => {
            Ok(grants::has_privilege(conn, identity.id, resource, Required::Any)? || is_admin(conn, identity)?)
        }
    }
}
