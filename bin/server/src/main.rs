//! Process entrypoint: loads configuration, wires the shared services, and
//! serves the REST and RPC transports side by side until either fails or
//! the process receives a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use sync_authn::{AuthnConfig, AuthnService, HttpOrgDirectory, IdentityMode, OrgDirectory, TenantResolver};
use sync_config::{AppConfig, IdentityModeConfig};
use sync_core::SyncService;
use sync_epoch::EpochCoordinator;
use sync_ratelimit::{RateLimitDefaults, RateLimiter};
use sync_session::SessionStore;
use sync_storage::{Storage, StorageConfig};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(bind_rest = %config.bind_rest, bind_rpc = %config.bind_rpc, "starting sync backend");

    let storage = Storage::connect(&StorageConfig { dsn: config.storage_dsn.clone(), max_connections: 10 }).await?;
    let sessions = SessionStore::new();
    sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);

    let authn_config = AuthnConfig {
        mode: match config.identity_mode {
            IdentityModeConfig::Oidc => IdentityMode::Oidc,
            IdentityModeConfig::Symmetric => IdentityMode::Symmetric,
        },
        issuer: config.identity_issuer.clone(),
        audience: config.identity_audience.clone(),
        enforce_audience: config.identity_enforce_audience,
        symmetric_secret: config.identity_symmetric_secret.clone(),
        dev_mode: config.dev_mode,
    };
    let authn = Arc::new(AuthnService::new(authn_config, config.identity_jwks_url.as_deref(), storage.clone()));

    let directory: Option<Arc<dyn OrgDirectory>> = match (&config.org_directory_base_url, &config.org_directory_api_key) {
        (Some(base_url), Some(api_key)) => Some(Arc::new(HttpOrgDirectory::new(base_url.clone(), api_key.clone()))),
        _ => None,
    };
    let tenant = Arc::new(TenantResolver::new(directory, config.default_tenant_id.clone(), config.default_tenant_name.clone()));

    let rate_limiter = RateLimiter::new(RateLimitDefaults::default());
    let epoch = Arc::new(EpochCoordinator::new(storage.clone(), sessions.clone()));
    let sync = SyncService::new(storage.clone());

    let rest_state = sync_transport_rest::AppState {
        storage: storage.clone(),
        sync: sync.clone(),
        sessions: sessions.clone(),
        epoch: epoch.clone(),
        authn: authn.clone(),
        tenant: tenant.clone(),
        rate_limiter: rate_limiter.clone(),
        default_tenant_id: config.default_tenant_id.clone(),
    };
    let rest_router = sync_transport_rest::router(rest_state);
    let rest_addr: std::net::SocketAddr = config.bind_rest.parse()?;

    let rpc_state = sync_transport_rpc::RpcState {
        storage,
        sync,
        sessions,
        authn,
        tenant,
        rate_limiter,
    };
    let rpc_addr: std::net::SocketAddr = config.bind_rpc.parse()?;
    let control_service = sync_transport_rpc::proto::sync_control_server::SyncControlServer::new(
        sync_transport_rpc::SyncControlService::new(rpc_state.clone()),
    );
    let data_service = sync_transport_rpc::proto::sync_data_server::SyncDataServer::new(sync_transport_rpc::SyncDataService::new(
        rpc_state,
    ));

    let rest_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(rest_addr).await?;
        tracing::info!(addr = %rest_addr, "REST transport listening");
        axum::serve(listener, rest_router).await
    });

    let rpc_task = tokio::spawn(async move {
        tracing::info!(addr = %rpc_addr, "RPC transport listening");
        tonic::transport::Server::builder()
            .add_service(control_service)
            .add_service(data_service)
            .serve(rpc_addr)
            .await
    });

    tokio::select! {
        res = rest_task => { res??; }
        res = rpc_task => { res??; }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
