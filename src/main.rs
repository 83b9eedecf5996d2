//! Vault Orchestrator - cross-chain vault deposits and withdrawals
//!
//! Runs the orchestrator as a long-lived service: flows are started and
//! inspected over HTTP, the relay wallet is funded from the user's primary
//! wallet, and relay-side actions go through the delegated-signer ability
//! service.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use vault_orchestrator::api::{self, AppState, FlowRegistry};
use vault_orchestrator::chain::{ChainDirectory, ChainRegistry, HealthProbe};
use vault_orchestrator::config::Settings;
use vault_orchestrator::coordination::{
    ExecutionServices, ExecutorConfig, FundingGuard, OperationPlanner, Orchestrator, StepExecutor,
};
use vault_orchestrator::metrics::MetricsServer;
use vault_orchestrator::services::AbilityClient;
use vault_orchestrator::session::{Session, SessionCredential, StaticSigner};
use vault_orchestrator::tx::PrimaryWallet;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Vault Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Chain access
    let chains = Arc::new(ChainRegistry::new(&settings)?);
    let directory = Arc::new(ChainDirectory::from_settings(&settings));
    info!("Chain connections initialized");

    let session = load_session(&settings);

    // Primary wallet funds the relay and signs the direct path
    let primary = Arc::new(PrimaryWallet::load(
        chains.clone(),
        &settings.wallet.private_key_env,
        Duration::from_secs(settings.orchestrator.funding_confirmation_timeout_secs),
    )?);

    // Relay-side actions go through the ability service
    let abilities = Arc::new(AbilityClient::new(
        settings.abilities.base_url.clone(),
        Duration::from_secs(settings.abilities.request_timeout_secs),
        session.clone(),
    )?);

    let services = ExecutionServices {
        owner_transfer: primary.clone(),
        owner_vault: primary.clone(),
        relay_transfer: abilities.clone(),
        relay_vault: abilities.clone(),
        dex: abilities.clone(),
        bridge: abilities,
    };

    let guard = FundingGuard::new(chains.clone(), primary, settings.minimum_relay_balance()?)
        .with_policies(settings.same_chain_retry(), settings.cross_chain_retry());

    let executor = StepExecutor::new(
        &session,
        services,
        directory.clone(),
        ExecutorConfig {
            call_timeout: Duration::from_secs(settings.orchestrator.call_timeout_secs),
            bridge_settle_delay: Duration::from_secs(
                settings.orchestrator.bridge_settle_delay_secs,
            ),
            swap_slippage_bps: settings.orchestrator.swap_slippage_bps,
        },
    );

    let orchestrator = Arc::new(Orchestrator::new(
        session,
        OperationPlanner::new(settings.funding_tiers()?),
        guard,
        executor,
        chains.clone(),
        directory,
    ));
    info!(
        "Orchestrator initialized for relay wallet {:?}",
        orchestrator.relay_address()
    );

    // Flow registry follows the progress stream
    let flows = Arc::new(FlowRegistry::new());
    let feeder_handle = flows.clone().spawn_feeder(orchestrator.subscribe());

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            orchestrator: orchestrator.clone(),
            flows,
            health: chains.clone(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let chains = chains.clone();
        async move {
            loop {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;

                for (chain_id, healthy) in chains.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }
            }
        }
    });

    info!("Vault Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    if orchestrator.is_executing() {
        warn!("Stopping while a flow is executing; submitted steps are not rolled back");
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    feeder_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Vault Orchestrator stopped");
    Ok(())
}

/// Relay signer from configuration; the credential is optional at startup
/// and flows are refused until one is present.
fn load_session(settings: &Settings) -> Session {
    let signer = StaticSigner::new(
        settings.session.relay_address,
        settings.session.permitted_abilities.iter().copied(),
    );

    let credential = match std::env::var(&settings.session.credential_env) {
        Ok(token) => match SessionCredential::from_jwt(token.trim()) {
            Ok(credential) => {
                info!("Session credential valid until {}", credential.expires_at());
                Some(credential)
            }
            Err(e) => {
                warn!("Ignoring session credential: {}", e);
                None
            }
        },
        Err(_) => {
            warn!(
                "No session credential in {}; flows will be refused",
                settings.session.credential_env
            );
            None
        }
    };

    Session::new(Arc::new(signer), credential)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vault_orchestrator=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
