//! Login, signup, logout and credential validation.

use super::{blocking, ApiState, AppError};
use crate::authz::Operation;
use crate::credentials::{self, bearer, CredentialKind};
use crate::error::{Error, Result};
use crate::grants;
use crate::providers::ProviderSettings;
use crate::store::identities::{self, Identity, IdentityKind, NewIdentity};
use crate::store::providers;
use crate::store::Provenance;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const AUTHORIZE_STATE_LEN: usize = 24;

/// Body of POST /v1/login. Exactly one credential form must be present.
#[derive(Deserialize, Default)]
pub struct LoginRequest {
    pub name: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
    pub provider: Option<String>,
    pub code: Option<String>,
    pub redirect_url: Option<String>,
}

enum LoginMethod<'a> {
    Password { name: &'a str, password: &'a str },
    AccessKey(&'a str),
    Oidc { provider: &'a str, code: &'a str, redirect_url: &'a str },
}

impl LoginRequest {
    fn method(&self) -> Result<LoginMethod<'_>> {
        let password = self.name.is_some() || self.password.is_some();
        let access_key = self.access_key.is_some();
        let oidc = self.provider.is_some() || self.code.is_some() || self.redirect_url.is_some();

        match (password, access_key, oidc) {
            (true, false, false) => Ok(LoginMethod::Password {
                name: self.name.as_deref().unwrap_or_default(),
                password: self.password.as_deref().unwrap_or_default(),
            }),
            (false, true, false) => Ok(LoginMethod::AccessKey(self.access_key.as_deref().unwrap_or_default())),
            (false, false, true) => Ok(LoginMethod::Oidc {
                provider: self.provider.as_deref().unwrap_or_default(),
                code: self.code.as_deref().unwrap_or_default(),
                redirect_url: self.redirect_url.as_deref().unwrap_or_default(),
            }),
            _ => Err(Error::validation(
                "login request",
                "credentials",
                "must be exactly one of password, access_key or provider",
            )),
        }
    }
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub password: String,
}

/// A freshly issued session.
#[derive(Serialize, Debug)]
pub struct SessionResponse {
    pub identity_id: i64,
    pub name: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_url: String,
}

/// Where to send the browser to start a provider login. The caller checks
/// `state` when the provider redirects back, then posts the code to
/// /v1/login.
#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub url: String,
    pub state: String,
}

/// Response for GET /v1/access-keys/validate
#[derive(Serialize)]
pub struct ValidateResponse {
    pub identity: Identity,
    pub kind: CredentialKind,
    pub credential_id: String,
}

pub(super) fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/v1/login", post(login))
        .route("/v1/signup", post(signup))
        .route("/v1/logout", post(logout))
        .route("/v1/access-keys/validate", get(validate))
        .route("/v1/providers/:name/authorize", get(authorize))
}

/// POST /v1/login
async fn login(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let identity = match request.method()? {
        LoginMethod::Password { name, password } => {
            let login = state
                .store
                .read(|conn| credentials::lookup_password_login(conn, name))?;
            let password = password.to_string();
            blocking(move || login.verify(&password)).await?
        }
        LoginMethod::AccessKey(bearer) => {
            state
                .store
                .read(|conn| credentials::verify_bearer(conn, bearer, Utc::now()))?
                .identity
        }
        LoginMethod::Oidc { provider, code, redirect_url } => {
            oidc_identity(&state, provider, code, redirect_url).await?
        }
    };

    let session = state.store.transaction(|tx| start_session(tx, &state, &identity))?;
    info!(identity = %identity.name, "Login succeeded");
    Ok(Json(session))
}

/// GET /v1/providers/:name/authorize?redirect_url=URL
async fn authorize(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let redirect_url = query.redirect_url.trim();
    if redirect_url.is_empty() {
        return Err(Error::validation("authorize request", "redirect_url", "is required").into());
    }

    let provider = state
        .store
        .read(|conn| providers::get_provider_by_name(conn, &name))?
        .filter(|p| !p.is_internal())
        .ok_or_else(|| Error::NotFound(format!("provider {}", name)))?;
    let settings = ProviderSettings::from_provider(&provider, &state.cipher)?;
    let endpoints = state.provider_client.discover_endpoint(&settings).await?;

    let csrf_state = bearer::generate_secret(AUTHORIZE_STATE_LEN);
    debug!(provider = %provider.name, "Provider login started");
    Ok(Json(AuthorizeResponse {
        url: settings.authorization_url(&endpoints, &csrf_state, redirect_url),
        state: csrf_state,
    }))
}

/// Exchanges the code with the named provider and resolves the email to an
/// identity, creating a runtime identity linked to the provider when absent.
async fn oidc_identity(state: &ApiState, provider: &str, code: &str, redirect_url: &str) -> Result<Identity> {
    let provider = state
        .store
        .read(|conn| providers::get_provider_by_name(conn, provider))?
        .filter(|p| !p.is_internal())
        .ok_or_else(|| {
            debug!(provider, "Login through unknown provider");
            Error::Authentication
        })?;
    let settings = ProviderSettings::from_provider(&provider, &state.cipher)?;

    let email = state
        .provider_client
        .exchange_code(&settings, code, redirect_url)
        .await?;

    state.store.transaction(|tx| match identities::get_identity_by_name(tx, &email)? {
        Some(identity) => Ok(identity),
        None => {
            let mut new = NewIdentity::user(email.as_str(), Provenance::Runtime);
            new.provider_id = Some(provider.id);
            info!(identity = %email, provider = %provider.name, "Creating identity on first login");
            grants::create_identity(tx, &new)
        }
    })
}

fn start_session(conn: &Connection, state: &ApiState, identity: &Identity) -> Result<SessionResponse> {
    let session = credentials::issue_session_token(conn, identity.id, state.tokens.session_ttl())?;
    Ok(SessionResponse {
        identity_id: identity.id,
        name: identity.name.clone(),
        token: session.bearer,
        expires_at: session.expires_at,
    })
}

/// Whether any user identity has been created at runtime. Config-managed
/// identities and the connector machine identity do not count.
pub(super) fn signup_enabled(conn: &Connection) -> Result<bool> {
    let runtime_users = identities::list_by_provenance(conn, Provenance::Runtime)?
        .into_iter()
        .filter(|i| i.kind == IdentityKind::User)
        .count();
    Ok(runtime_users == 0)
}

/// POST /v1/signup
async fn signup(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(Error::validation("signup", "name", "is required").into());
    }

    if !state.store.read(signup_enabled)? {
        return Err(Error::Authorization.into());
    }
    let password = request.password.clone();
    let hash = blocking(move || credentials::hash_new_password(&password)).await?;

    // Checked again: another signup may have landed while hashing.
    let session = state.store.transaction(|tx| {
        if !signup_enabled(tx)? {
            return Err(Error::Authorization);
        }

        let mut new = NewIdentity::user(name, Provenance::Runtime);
        new.admin = true;
        let identity = grants::create_identity(tx, &new)?;
        identities::set_password_hash(tx, identity.id, &hash)?;
        start_session(tx, &state, &identity)
    })?;

    info!(identity = %session.name, "Signup completed");
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /v1/logout
async fn logout(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let principal = state.authenticator.authorize(&headers, Operation::Logout)?;

    state
        .store
        .transaction(|tx| credentials::revoke_session(tx, principal.kind, &principal.credential_id))?;

    debug!(identity = %principal.identity.name, "Logged out");
    Ok(Json(SuccessResponse { success: true }))
}

/// GET /v1/access-keys/validate
async fn validate(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, AppError> {
    let principal = state.authenticator.authorize(&headers, Operation::ValidateCredential)?;
    Ok(Json(ValidateResponse {
        identity: principal.identity,
        kind: principal.kind,
        credential_id: principal.credential_id,
    }))
}
