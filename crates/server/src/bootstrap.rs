use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use sokoni_agent::graph::TurnRunner;
use sokoni_agent::handlers::Specialists;
use sokoni_agent::llm::HttpLlmClient;
use sokoni_agent::router::{RoutingEngine, RoutingPolicy};
use sokoni_agent::runtime::AgentRuntime;
use sokoni_agent::tools::default_registry;
use sokoni_core::audit::InMemoryAuditSink;
use sokoni_core::config::{AppConfig, ConfigError};
use sokoni_core::stores::TenantStore;
use sokoni_db::repositories::{
    SqlCartRepository, SqlCatalogRepository, SqlCheckpointRepository, SqlCustomerRepository,
    SqlOrderRepository, SqlTenantRepository,
};
use sokoni_db::{connect_with_settings, migrations, DbPool};
use sokoni_payments::PaylinkGateway;
use sokoni_whatsapp::channel::{MessagingChannel, TwilioChannel};

/// Explicitly wired application: no global singletons, one runtime with
/// a process-scoped lifecycle.
pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub tenants: Arc<dyn TenantStore>,
    pub channel: Arc<dyn MessagingChannel>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client initialization failed: {0}")]
    Llm(String),
    #[error("payment gateway initialization failed: {0}")]
    Payment(String),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database migrations applied"
    );

    let llm = Arc::new(
        HttpLlmClient::from_config(&config.llm)
            .map_err(|error| BootstrapError::Llm(error.to_string()))?,
    );
    let gateway = Arc::new(
        PaylinkGateway::from_config(&config.payment)
            .map_err(|error| BootstrapError::Payment(error.to_string()))?,
    );

    let catalog = Arc::new(SqlCatalogRepository::new(db_pool.clone()));
    let cart = Arc::new(SqlCartRepository::new(db_pool.clone()));
    let orders = Arc::new(SqlOrderRepository::new(db_pool.clone()));
    let customers = Arc::new(SqlCustomerRepository::new(db_pool.clone()));
    let checkpoint = Arc::new(SqlCheckpointRepository::new(db_pool.clone()));
    let tenants: Arc<dyn TenantStore> = Arc::new(SqlTenantRepository::new(db_pool.clone()));

    let registry =
        Arc::new(default_registry(catalog.clone(), cart, orders.clone(), gateway));
    let specialists = Specialists::new(catalog, orders, llm.clone(), registry);
    let router = RoutingEngine::new(llm, RoutingPolicy::from(&config.routing));
    let runner = TurnRunner::new(router, specialists, Arc::new(InMemoryAuditSink::default()));
    let runtime = Arc::new(AgentRuntime::new(runner, checkpoint, customers));

    let channel: Arc<dyn MessagingChannel> = Arc::new(TwilioChannel::from_config(&config.whatsapp));

    info!(
        event_name = "system.bootstrap.runtime_wired",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "agent runtime wired"
    );

    Ok(Application { config, db_pool, runtime, tenants, channel })
}
