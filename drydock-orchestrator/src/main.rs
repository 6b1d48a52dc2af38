//! Drydock Orchestrator
//!
//! Creates ephemeral CI runners on demand: each runner is a container that takes
//! exactly one job and is destroyed afterwards.
//!
//! Architecture:
//! - Configuration: settings from the environment
//! - Platform: GitHub API access (registration tokens, demand discovery)
//! - Runtime: container lifecycle through the docker/podman CLI
//! - Services: credential issuer, container manager, runner registry and the
//!   command entry points
//! - Scheduler: reconciliation loop and cleanup sweeper
//! - API: internal HTTP façade over the runner service

mod api;
mod config;
mod error;
mod platform;
mod retry;
mod runtime;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::platform::{GitHubPlatform, Platform};
use crate::runtime::CliRuntime;
use crate::scheduler::{CleanupSweeper, Reconciler};
use crate::service::{ContainerManager, CredentialIssuer, RunnerRegistry, RunnerService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drydock_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Drydock Orchestrator");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!("Loaded configuration: {:?}", config);

    // Outbound seams
    let platform: Arc<dyn Platform> = Arc::new(
        GitHubPlatform::new(&config.github_api_url, &config.github_token, config.api_timeout)
            .context("Failed to initialize GitHub client")?,
    );
    let runtime = Arc::new(CliRuntime::new(
        config.container_runtime.clone(),
        config.runtime_timeout,
    ));

    // Services
    let registry = Arc::new(RunnerRegistry::new());
    let issuer = Arc::new(CredentialIssuer::new(Arc::clone(&platform)));
    let containers = Arc::new(ContainerManager::new(runtime, &config));
    let sweeper = Arc::new(CleanupSweeper::new(
        &config,
        Arc::clone(&registry),
        Arc::clone(&containers),
    ));

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();

    let service = Arc::new(RunnerService::new(
        &config,
        Arc::clone(&registry),
        issuer,
        Arc::clone(&containers),
        Arc::clone(&sweeper),
        tasks.clone(),
        shutdown.clone(),
    ));

    if let Err(e) = containers.ping().await {
        warn!("Container runtime '{}' does not answer: {}", config.container_runtime, e);
    }

    if config.adopt_orphans {
        match service.adopt_orphans().await {
            Ok(0) => {}
            Ok(n) => info!("Adopted {} runner(s) from a previous run", n),
            Err(e) => warn!("Failed to adopt orphan containers: {}", e),
        }
    }

    // Background loops
    let loops = TaskTracker::new();
    loops.spawn(Arc::clone(&sweeper).run(shutdown.clone()));

    if config.auto_create_runners {
        let reconciler = Arc::new(Reconciler::new(
            &config,
            platform,
            Arc::clone(&registry),
            Arc::clone(&service),
        ));
        loops.spawn(reconciler.run(shutdown.clone()));
    } else {
        info!("Automatic runner creation disabled");
    }
    loops.close();

    // Build router with all API endpoints
    let bind_addr = config.bind_addr.clone();
    let app = api::create_router(Arc::new(AppState {
        service,
        config: Arc::new(config),
    }));

    info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    // Stop loops and wait for in-flight provisioning
    shutdown.cancel();
    info!("Waiting for background tasks to finish");
    tasks.close();
    tokio::join!(loops.wait(), tasks.wait());
    info!("Drydock Orchestrator stopped");

    served.context("HTTP server failed")
}

/// Resolves on Ctrl+C or when `shutdown` is cancelled elsewhere
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}
