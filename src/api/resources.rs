use super::session::signup_enabled;
use super::{blocking, ApiState, AppError};
use crate::authz::Operation;
use crate::config::DeclaredConfig;
use crate::error::Error;
use crate::grants;
use crate::reconcile::ReconcileSummary;
use crate::store::destinations::{self, Destination, DestinationRecord};
use crate::store::grants::{self as grant_rows, Grant};
use crate::store::groups::{self, Group};
use crate::store::providers::{self, ProviderKind};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub signup_enabled: bool,
}

/// Public view of a provider. The client secret never leaves the store.
#[derive(Serialize, Debug, PartialEq)]
pub struct ProviderSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub client_id: String,
    pub kind: ProviderKind,
}

#[derive(Serialize)]
pub struct ListProvidersResponse {
    pub providers: Vec<ProviderSummary>,
}

#[derive(Deserialize)]
pub struct GrantsQuery {
    pub resource: String,
}

#[derive(Serialize)]
pub struct ListGrantsResponse {
    pub grants: Vec<Grant>,
}

#[derive(Serialize)]
pub struct ListGroupsResponse {
    pub groups: Vec<Group>,
}

#[derive(Serialize)]
pub struct ListDestinationsResponse {
    pub destinations: Vec<Destination>,
}

pub(super) fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/v1/status", get(status))
        .route("/v1/providers", get(list_providers))
        .route("/v1/grants", get(list_grants))
        .route("/v1/groups", get(list_groups))
        .route("/v1/destinations", get(list_destinations).post(register_destination))
        .route("/v1/config", post(apply_config))
}

/// GET /v1/status
async fn status(State(state): State<Arc<ApiState>>) -> Result<Json<StatusResponse>, AppError> {
    let enabled = state.store.read(signup_enabled)?;
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        signup_enabled: enabled,
    }))
}

/// GET /v1/providers
async fn list_providers(State(state): State<Arc<ApiState>>) -> Result<Json<ListProvidersResponse>, AppError> {
    let providers = state
        .store
        .read(providers::list_providers)?
        .into_iter()
        .map(|p| ProviderSummary {
            id: p.id,
            name: p.name,
            url: p.url,
            client_id: p.client_id,
            kind: p.kind,
        })
        .collect();
    Ok(Json(ListProvidersResponse { providers }))
}

/// GET /v1/grants?resource=R
async fn list_grants(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<GrantsQuery>,
) -> Result<Json<ListGrantsResponse>, AppError> {
    let resource = query.resource.trim();
    state
        .authenticator
        .authorize(&headers, Operation::ListGrants { resource })?;

    let grants = state
        .store
        .read(|conn| grant_rows::list_for_resource(conn, resource))?;
    Ok(Json(ListGrantsResponse { grants }))
}

/// GET /v1/groups
async fn list_groups(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ListGroupsResponse>, AppError> {
    state.authenticator.authorize(&headers, Operation::ListGroups)?;
    let groups = state.store.read(groups::list_groups)?;
    Ok(Json(ListGroupsResponse { groups }))
}

/// GET /v1/destinations
async fn list_destinations(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<ListDestinationsResponse>, AppError> {
    state.authenticator.authorize(&headers, Operation::ListDestinations)?;
    let destinations = state.store.read(destinations::list_destinations)?;
    Ok(Json(ListDestinationsResponse { destinations }))
}

/// POST /v1/destinations
async fn register_destination(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(mut record): Json<DestinationRecord>,
) -> Result<(StatusCode, Json<Destination>), AppError> {
    let principal = state
        .authenticator
        .authorize(&headers, Operation::RegisterDestination)?;

    record.name = record.name.trim().to_string();
    if record.name.is_empty() {
        return Err(Error::validation("destination", "name", "is required").into());
    }

    let destination = state
        .store
        .transaction(|tx| grants::register_destination(tx, &record))?;

    info!(
        destination = %destination.name,
        registered_by = %principal.identity.name,
        "Destination registered"
    );
    Ok((StatusCode::CREATED, Json(destination)))
}

/// POST /v1/config
async fn apply_config(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(desired): Json<DeclaredConfig>,
) -> Result<Json<ReconcileSummary>, AppError> {
    let principal = state.authenticator.authorize(&headers, Operation::ApplyConfig)?;
    let store = Arc::clone(&state.store);
    let reconciler = state.reconciler.clone();
    let summary = blocking(move || reconciler.apply(&store, &desired)).await?;
    info!(applied_by = %principal.identity.name, "Declared config applied over the API");
    Ok(Json(summary))
}
