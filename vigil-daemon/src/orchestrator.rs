//! Daemon orchestrator -- assembles and manages the scan components.
//!
//! The orchestrator is responsible for:
//! 1. Loading and validating configuration
//! 2. Opening the configured job store and external scanner engine
//! 3. Building the dispatcher and the submission service on one
//!    shared cancellation registry
//! 4. Starting the dispatcher and the HTTP API
//! 5. Handling graceful shutdown on SIGTERM/SIGINT
//!
//! # Shutdown Order
//!
//! The API stops accepting requests first so no new jobs arrive, then the
//! dispatcher stops claiming, waits out the grace period and cancels
//! whatever is still running.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use vigil_core::config::VigilConfig;
use vigil_core::pipeline::{HealthStatus, Pipeline};
use vigil_scanner::{
    Dispatcher, ProcessEngine, ProcessEngineConfig, ScanService, ScannerBuilder, ScannerConfig,
};
use vigil_store::JobStore;

use crate::api::{self, ApiState};
use crate::health::{DaemonHealth, ModuleHealth};
use crate::metrics_server;
use crate::store::Store;

/// Interval between health report refreshes.
const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Central orchestrator that owns all daemon components.
pub struct Orchestrator {
    config: VigilConfig,
    dispatcher: Dispatcher<Store, ProcessEngine>,
    service: ScanService<Store>,
    start_time: Instant,
    health_tx: watch::Sender<DaemonHealth>,
    api_serving: bool,
}

impl Orchestrator {
    /// Build the orchestrator from a configuration file path.
    ///
    /// Loads the TOML file, applies environment overrides, validates,
    /// then assembles all components.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = VigilConfig::load(config_path).await?;
        Self::build_from_config(config).await
    }

    /// Build the orchestrator from an already-loaded configuration.
    ///
    /// Installs the Prometheus recorder when `[metrics] enabled = true`.
    pub async fn build_from_config(config: VigilConfig) -> Result<Self> {
        config.validate()?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let store = Arc::new(Store::from_config(&config.store)?);
        let engine = ProcessEngine::new(ProcessEngineConfig::from_core(&config.engine));

        let (dispatcher, service) = ScannerBuilder::new(Arc::clone(&store), engine)
            .config(ScannerConfig::from_core(&config))
            .build()?;

        tracing::info!(
            store = store.name(),
            engine_binary = %config.engine.binary,
            api_enabled = config.api.enabled,
            "orchestrator assembled"
        );

        Ok(Self {
            config,
            dispatcher,
            service,
            start_time: Instant::now(),
            health_tx: watch::Sender::new(DaemonHealth::starting()),
            api_serving: false,
        })
    }

    /// Run the daemon until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Run the daemon until `shutdown` resolves.
    ///
    /// `shutdown` yields the name of the event that ended the run.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        tracing::info!("starting dispatcher");
        self.dispatcher.start().await?;

        let api_token = CancellationToken::new();
        let api_task = if self.config.api.enabled {
            match self.spawn_api(api_token.clone()).await {
                Ok(task) => {
                    self.api_serving = true;
                    Some(task)
                }
                Err(e) => {
                    tracing::warn!("api startup failed, stopping dispatcher");
                    if let Err(stop_err) = self.dispatcher.stop().await {
                        tracing::error!(
                            startup_error = %e,
                            rollback_error = %stop_err,
                            "dispatcher stop also failed during startup failure cleanup"
                        );
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.refresh_health().await;

        // Main event loop
        tracing::info!("entering main event loop");
        let mut refresh = tokio::time::interval(HEALTH_REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal,
                _ = refresh.tick() => self.refresh_health().await,
            }
        };
        match &signal {
            Ok(name) => tracing::info!(signal = *name, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "shutdown signal handling failed"),
        }

        tracing::info!("stopping scan api");
        api_token.cancel();
        self.api_serving = false;
        if let Some(task) = api_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "scan api exited with error"),
                Err(e) => tracing::warn!(error = %e, "scan api task failed"),
            }
        }

        self.shutdown().await?;
        signal.map(|_| ())
    }

    async fn spawn_api(
        &self,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<std::io::Result<()>>> {
        let bind: SocketAddr = self
            .config
            .api
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid api bind address: {}", e))?;
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind scan api on {}: {}", bind, e))?;

        let state = ApiState {
            service: self.service.clone(),
            health: self.health_tx.subscribe(),
        };
        Ok(tokio::spawn(api::serve(listener, state, shutdown)))
    }

    /// Stop the dispatcher, cancelling scans that outlive the grace period.
    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping dispatcher");
        self.dispatcher.stop().await?;
        self.refresh_health().await;
        tracing::info!("vigil daemon stopped");
        Ok(())
    }

    async fn refresh_health(&self) {
        let report = self.health().await;
        if !report.status.is_healthy() {
            tracing::warn!(status = ?report.status, "daemon health degraded");
        }
        self.health_tx.send_replace(report);
    }

    /// Get the current aggregated health status of all components.
    pub async fn health(&self) -> DaemonHealth {
        let api = if !self.config.api.enabled {
            ModuleHealth::disabled("api")
        } else if self.api_serving {
            ModuleHealth::enabled("api", HealthStatus::Healthy)
        } else {
            ModuleHealth::enabled("api", HealthStatus::Unhealthy("not serving".to_owned()))
        };
        let metrics = if self.config.metrics.enabled {
            ModuleHealth::enabled("metrics", HealthStatus::Healthy)
        } else {
            ModuleHealth::disabled("metrics")
        };
        let modules = vec![
            ModuleHealth::enabled("job-store", self.service.health().await),
            ModuleHealth::enabled("dispatcher", self.dispatcher.health_check().await),
            api,
            metrics,
        ];
        DaemonHealth::from_modules(self.start_time.elapsed().as_secs(), modules)
    }

    /// Subscribe to health reports published by the main loop.
    pub fn subscribe_health(&self) -> watch::Receiver<DaemonHealth> {
        self.health_tx.subscribe()
    }

    /// Submission/query service backed by this daemon's store.
    pub fn service(&self) -> ScanService<Store> {
        self.service.clone()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &VigilConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
