use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jvs_service::clock::{system_clock, Clock};
use jvs_service::config::Config;
use jvs_service::errors::JvsError;
use jvs_service::handlers::AppState;
use jvs_service::keystore::memory::MemoryKeyStore;
use jvs_service::keystore::KeyStore;
use jvs_service::routes;
use jvs_service::services::jwks_service::JwksService;
use jvs_service::services::minting_service::{MintOptions, MintingService};
use jvs_service::services::primary;
use jvs_service::services::rotation_service::RotationService;
use jvs_service::services::signer_service::SignerService;
use jvs_service::validators::ValidatorRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jvs_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Justification Verification Service");

    // Install the Prometheus recorder before any metric is recorded.
    let metrics_handle = routes::init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    if config.allow_breakglass {
        tracing::warn!(
            "breakglass is enabled: verifiers built from this deployment will accept \
             self-attested HS256 tokens"
        );
    }

    let clock: Clock = system_clock();
    let keystore: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::with_clock(Arc::clone(&clock)));

    // First run: make sure the managed key has a version and a primary.
    bootstrap_key(keystore.as_ref(), &config.key_name).await?;

    let registry = Arc::new(ValidatorRegistry::new());

    let signer = Arc::new(SignerService::new(
        Arc::clone(&keystore),
        config.key_name.clone(),
        config.signer_cache_timeout,
    ));

    let minting = Arc::new(MintingService::new(
        Arc::clone(&registry),
        signer,
        MintOptions::from(&config),
        Arc::clone(&clock),
    ));

    let rotation = Arc::new(RotationService::new(
        Arc::clone(&keystore),
        config.key_name.clone(),
        config.rotation.clone(),
        Arc::clone(&clock),
    ));

    let jwks = Arc::new(JwksService::new(
        Arc::clone(&keystore),
        config.key_name.clone(),
        config.jwks_cache_timeout,
    ));

    // Background rotation: one tick at a time per key.
    let rotation_interval = config.rotation_interval;
    let background_rotation = Arc::clone(&rotation);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(rotation_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match background_rotation.rotate().await {
                Ok(actions) if actions.is_empty() => {}
                Ok(actions) => info!(count = actions.len(), "rotation tick applied actions"),
                Err(e) => error!("rotation tick failed: {}", e),
            }
        }
    });

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        minting,
        rotation,
        jwks,
        registry,
        jwks_cache_timeout: config.jwks_cache_timeout,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("JVS listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("JVS shutdown complete");

    Ok(())
}

/// Create version 1 and point the primary label at it when the managed key
/// has no versions yet.
async fn bootstrap_key(keystore: &dyn KeyStore, key_name: &str) -> Result<(), JvsError> {
    if !keystore.list_versions(key_name).await?.is_empty() {
        return Ok(());
    }

    let version = keystore.create_version(key_name).await?;
    let ordinal = version.ordinal().ok_or_else(|| {
        JvsError::Internal(format!("created version has malformed name {}", version.name))
    })?;

    let snapshot = keystore.get_labels(key_name).await?;
    let mut labels = snapshot.labels.clone();
    labels.insert(primary::PRIMARY_LABEL_KEY.to_string(), primary::encode(ordinal));
    keystore.set_labels(key_name, labels, &snapshot.etag).await?;

    info!(version = %version.name, "bootstrapped signing key");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
