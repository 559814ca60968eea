use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use warden::api::{create_router, ApiState};
use warden::config::{load_config, DeclaredConfig, ServerConfig};
use warden::credentials::{run_session_cleanup, SecretCipher};
use warden::providers::{run_directory_sync, HttpProviderClient, IdentityProviderClient};
use warden::reconcile::{ensure_anchors, Reconciler};
use warden::Store;

/// Expired session tokens are swept this often.
const SESSION_CLEANUP_INTERVAL_SECONDS: u64 = 600;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=info".into()),
        )
        .init();

    info!("Warden starting...");

    // Config file: first argument, then WARDEN_CONFIG, else built-in defaults
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WARDEN_CONFIG").ok());
    let mut config = match &config_path {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env_overrides();

    info!(
        config = ?config_path,
        database = %config.database.path,
        bind = %config.api.bind,
        "Configuration loaded"
    );

    let encryption_key = std::env::var(&config.secrets.encryption_key_env).with_context(|| {
        format!(
            "{} is required (base64-encoded 32-byte key)",
            config.secrets.encryption_key_env
        )
    })?;
    let cipher = SecretCipher::from_base64(&encryption_key).context("Invalid encryption key")?;

    let store = Arc::new(Store::open(&config.database.path)?);
    store
        .transaction(|tx| ensure_anchors(tx))
        .context("Failed to create anchor rows")?;
    info!("Store initialized");

    if let Some(path) = &config.declared_config {
        let desired = DeclaredConfig::load(path)?;
        let summary = Reconciler::new(cipher.clone())
            .apply(&store, &desired)
            .with_context(|| format!("Failed to apply declared config {}", path.display()))?;
        info!(
            path = %path.display(),
            providers = summary.providers,
            identities = summary.identities,
            grants = summary.grants,
            "Declared config loaded"
        );
    }

    let provider_client: Arc<dyn IdentityProviderClient> =
        Arc::new(HttpProviderClient::new(config.providers.request_timeout())?);

    tokio::spawn(run_session_cleanup(
        Arc::clone(&store),
        SESSION_CLEANUP_INTERVAL_SECONDS,
    ));

    if config.providers.sync_interval_seconds > 0 {
        tokio::spawn(run_directory_sync(
            Arc::clone(&store),
            Arc::clone(&provider_client),
            cipher.clone(),
            config.providers.sync_interval_seconds,
        ));
        info!(
            interval_seconds = config.providers.sync_interval_seconds,
            "Directory sync scheduled"
        );
    } else {
        warn!("Directory sync disabled");
    }

    let state = ApiState::new(
        Arc::clone(&store),
        cipher,
        provider_client,
        config.tokens.clone(),
    );
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind))?;
    info!(bind = %config.api.bind, "API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("API server error")?;

    info!("Warden stopped");
    Ok(())
}
