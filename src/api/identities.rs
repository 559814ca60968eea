//! Identity, password and access-key management.

use super::{blocking, ApiState, AppError};
use crate::authz::Operation;
use crate::credentials;
use crate::error::{Error, Result};
use crate::grants;
use crate::reconcile::CONNECTOR_IDENTITY_NAME;
use crate::store::identities::{self, Identity, IdentityKind, NewIdentity};
use crate::store::keys::{self, AccessKey};
use crate::store::Provenance;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::session::SuccessResponse;

#[derive(Serialize)]
pub struct ListIdentitiesResponse {
    pub identities: Vec<Identity>,
}

/// Body of POST /v1/identities
#[derive(Deserialize)]
pub struct CreateIdentityRequest {
    pub name: String,
    /// `user` (default) or `machine`
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// Body of POST /v1/identities/:id/access-keys
#[derive(Deserialize, Default)]
pub struct IssueAccessKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides the configured lifetime; 0 never expires.
    #[serde(default)]
    pub ttl_hours: Option<i64>,
}

/// The only response that ever carries an access key secret.
#[derive(Serialize)]
pub struct IssuedAccessKeyResponse {
    pub key_id: String,
    pub name: Option<String>,
    pub issued_for: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_key: String,
}

#[derive(Serialize)]
pub struct ListAccessKeysResponse {
    pub access_keys: Vec<AccessKey>,
}

pub(super) fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/v1/identities", get(list_identities).post(create_identity))
        .route("/v1/identities/:id", delete(delete_identity))
        .route("/v1/identities/:id/password", put(update_password))
        .route(
            "/v1/identities/:id/access-keys",
            post(issue_access_key).get(list_access_keys),
        )
        .route("/v1/access-keys/:key_id", delete(delete_access_key))
}

fn require_identity(conn: &Connection, id: i64) -> Result<Identity> {
    identities::get_identity(conn, id)?.ok_or_else(|| Error::NotFound(format!("identity {}", id)))
}

/// GET /v1/identities
async fn list_identities(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ListIdentitiesResponse>, AppError> {
    state.authenticator.authorize(&headers, Operation::ListIdentities)?;
    let identities = state.store.read(identities::list_identities)?;
    Ok(Json(ListIdentitiesResponse { identities }))
}

/// POST /v1/identities
async fn create_identity(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<CreateIdentityRequest>,
) -> Result<(StatusCode, Json<Identity>), AppError> {
    let principal = state.authenticator.authorize(&headers, Operation::CreateIdentity)?;

    let name = request.name.trim();
    if name.is_empty() {
        return Err(Error::validation("identity", "name", "is required").into());
    }
    let kind = match request.kind.as_deref().map(str::trim) {
        None | Some("") => IdentityKind::User,
        Some(kind) => kind
            .parse()
            .map_err(|_| Error::validation(format!("identity \"{}\"", name), "kind", "must be user or machine"))?,
    };

    let hash = match request.password.clone() {
        Some(password) => Some(blocking(move || credentials::hash_new_password(&password)).await?),
        None => None,
    };

    let identity = state.store.transaction(|tx| {
        let identity = grants::create_identity(
            tx,
            &NewIdentity {
                name: name.to_string(),
                kind,
                admin: request.admin,
                provenance: Provenance::Runtime,
                provider_id: None,
            },
        )?;
        if let Some(hash) = &hash {
            identities::set_password_hash(tx, identity.id, hash)?;
        }
        Ok(identity)
    })?;

    info!(identity = %identity.name, created_by = %principal.identity.name, "Identity created");
    Ok((StatusCode::CREATED, Json(identity)))
}

/// DELETE /v1/identities/:id
async fn delete_identity(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    let principal = state.authenticator.authorize(&headers, Operation::DeleteIdentity)?;

    let identity = state.store.transaction(|tx| {
        let identity = require_identity(tx, id)?;
        if identity.name == CONNECTOR_IDENTITY_NAME {
            return Err(Error::Conflict("the connector identity cannot be deleted".to_string()));
        }
        if identity.provenance == Provenance::Config {
            return Err(Error::Conflict(format!(
                "identity \"{}\" is managed by the declared config",
                identity.name
            )));
        }
        identities::delete_identity(tx, id)?;
        Ok(identity)
    })?;

    info!(identity = %identity.name, deleted_by = %principal.identity.name, "Identity deleted");
    Ok(Json(SuccessResponse { success: true }))
}

/// PUT /v1/identities/:id/password
async fn update_password(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<PasswordRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .authenticator
        .authorize(&headers, Operation::UpdatePassword { identity_id: id })?;

    let hash = blocking(move || credentials::hash_new_password(&request.password)).await?;
    state.store.transaction(|tx| {
        require_identity(tx, id)?;
        identities::set_password_hash(tx, id, &hash)
    })?;

    info!(identity_id = id, "Password updated");
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /v1/identities/:id/access-keys
async fn issue_access_key(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Option<Json<IssueAccessKeyRequest>>,
) -> Result<(StatusCode, Json<IssuedAccessKeyResponse>), AppError> {
    state
        .authenticator
        .authorize(&headers, Operation::IssueAccessKey { identity_id: id })?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let ttl = match request.ttl_hours {
        Some(hours) if hours < 0 => {
            return Err(Error::validation("access key", "ttl_hours", "must not be negative").into());
        }
        Some(0) => None,
        Some(hours) => Some(chrono::Duration::hours(hours)),
        None => Some(state.tokens.access_key_ttl()),
    };
    let name = request.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let issued = state.store.transaction(|tx| {
        require_identity(tx, id)?;
        credentials::issue_access_key(tx, id, name, ttl)
    })?;

    info!(key_id = %issued.key.key_id, identity_id = id, "Access key issued");
    Ok((
        StatusCode::CREATED,
        Json(IssuedAccessKeyResponse {
            key_id: issued.key.key_id,
            name: issued.key.name,
            issued_for: issued.key.issued_for,
            expires_at: issued.key.expires_at,
            access_key: issued.bearer,
        }),
    ))
}

/// GET /v1/identities/:id/access-keys
async fn list_access_keys(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ListAccessKeysResponse>, AppError> {
    state
        .authenticator
        .authorize(&headers, Operation::ListAccessKeys { identity_id: id })?;

    let access_keys = state.store.read(|conn| {
        require_identity(conn, id)?;
        keys::list_access_keys(conn, id)
    })?;
    Ok(Json(ListAccessKeysResponse { access_keys }))
}

/// DELETE /v1/access-keys/:key_id
async fn delete_access_key(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.authenticator.authorize(&headers, Operation::DeleteAccessKey)?;

    let deleted = state.store.transaction(|tx| keys::delete_access_key(tx, &key_id))?;
    if !deleted {
        return Err(Error::NotFound(format!("access key {}", key_id)).into());
    }

    info!(key_id = %key_id, "Access key deleted");
    Ok(Json(SuccessResponse { success: true }))
}
