//! Application wiring
//!
//! Loads configuration, picks the store and gateway implementations, and
//! assembles the orchestrator and reconciler around them. Production and
//! development differ only in which store and gateway are injected.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::{Config, GatewayConfig, GatewayMode};
use crate::db;
use crate::gateway::{HttpGateway, SimulatedGateway, WorkflowGateway};
use crate::reconcile::CallbackReconciler;
use crate::server::{self, AppState};
use crate::store::{LifecycleStore, MemoryLifecycleStore, PgLifecycleStore};
use crate::submission::{SubmissionOrchestrator, SubmissionPolicy};

/// The service instance with all components wired
pub struct Application {
    pub config: Config,
    pub pool: Option<PgPool>,
    pub store: Arc<dyn LifecycleStore>,
    pub submissions: Arc<SubmissionOrchestrator>,
    pub reconciler: Arc<CallbackReconciler>,
}

impl Application {
    /// Pure instantiation, no I/O
    pub fn new(
        config: Config,
        store: Arc<dyn LifecycleStore>,
        gateway: Arc<dyn WorkflowGateway>,
    ) -> Self {
        let policy = SubmissionPolicy::from(&config.submission);
        Self {
            submissions: Arc::new(SubmissionOrchestrator::new(store.clone(), gateway, policy)),
            reconciler: Arc::new(CallbackReconciler::new(store.clone())),
            store,
            config,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: Option<PgPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            submissions: self.submissions.clone(),
            reconciler: self.reconciler.clone(),
        }
    }

    pub fn router(&self) -> Router {
        server::router(self.state())
    }

    /// Serve HTTP on the configured bind address until shutdown
    pub async fn serve(&self) -> Result<()> {
        server::serve(self.router(), &self.config.server.bind).await
    }
}

/// Options for initializing the application
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Database URL (overrides config file and env vars)
    pub database_url: Option<String>,

    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Run migrations on startup; also requires `database.auto_migrate`
    pub auto_migrate: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            database_url: None,
            config_path: None,
            auto_migrate: true,
        }
    }
}

/// Builder for constructing InitOptions
#[derive(Default)]
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.options.database_url = Some(url.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn auto_migrate(mut self, auto: bool) -> Self {
        self.options.auto_migrate = auto;
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

/// Load configuration and build an [`Application`]
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .database_url(options.database_url)
        .config_path(options.config_path.map(std::path::PathBuf::from))
        .build()
        .context("Failed to load configuration")?;

    initialize_with_config(config, options.auto_migrate).await
}

/// Build an [`Application`] from an already loaded configuration
pub async fn initialize_with_config(config: Config, auto_migrate: bool) -> Result<Application> {
    let (store, pool): (Arc<dyn LifecycleStore>, Option<PgPool>) = match &config.database.url {
        Some(_) => {
            let pool = db::create_pool(&config.database).await?;
            if auto_migrate && config.database.auto_migrate {
                db::migrate(&pool)
                    .await
                    .context("Failed to run automatic migrations")?;
            }
            let store: Arc<dyn LifecycleStore> = Arc::new(PgLifecycleStore::new(pool.clone()));
            (store, Some(pool))
        }
        None => {
            warn!("No database.url configured; execution records are kept in memory only");
            let store: Arc<dyn LifecycleStore> = Arc::new(MemoryLifecycleStore::new());
            (store, None)
        }
    };

    let gateway = build_gateway(&config.gateway)?;
    info!(
        gateway = gateway.kind(),
        store = if pool.is_some() { "postgres" } else { "memory" },
        "Application initialized"
    );

    Ok(Application::new(config, store, gateway).with_pool(pool))
}

/// Pick the gateway implementation named by `gateway.mode`
pub fn build_gateway(config: &GatewayConfig) -> Result<Arc<dyn WorkflowGateway>> {
    let gateway: Arc<dyn WorkflowGateway> = match config.mode {
        GatewayMode::Http => {
            Arc::new(HttpGateway::new(config).context("Failed to configure HTTP gateway")?)
        }
        GatewayMode::Simulated => {
            warn!("Using the simulated execution engine; no real jobs are scheduled");
            Arc::new(SimulatedGateway::from_config(config))
        }
    };
    Ok(gateway)
}
