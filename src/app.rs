//! Application assembly: pool, migrations, service registration.

use crate::cli::ServiceName;
use crate::config::Config;
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::worker::WorkerService;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Attempts to reach the database before startup is abandoned (exit code 1).
const DB_CONNECT_ATTEMPTS: u32 = 5;
const DB_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Main application struct containing all necessary components
pub struct App {
    config: Arc<Config>,
    db_pool: sqlx::PgPool,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance: connect (with retries), migrate, and build
    /// shared state.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);

        let mut attempt = 1;
        let db_pool = loop {
            let connected = PgPoolOptions::new()
                .min_connections(0)
                .max_connections(8)
                .acquire_timeout(Duration::from_secs(4))
                .idle_timeout(Duration::from_secs(60 * 2))
                .max_lifetime(Duration::from_secs(60 * 30))
                .connect(&config.database_url)
                .await;

            match connected {
                Ok(pool) => break pool,
                Err(e) if attempt < DB_CONNECT_ATTEMPTS => {
                    warn!(attempt, error = %e, "database not reachable, retrying");
                    attempt += 1;
                    tokio::time::sleep(DB_CONNECT_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "database unreachable after {DB_CONNECT_ATTEMPTS} attempts"
                    )));
                }
            }
        };
        info!("database pool established");

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("database migrations applied");

        let app_state = AppState::new(db_pool.clone(), config.clone());

        Ok(App {
            config,
            db_pool,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Register the requested services with the manager.
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Api) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager
                .register_service(ServiceName::Api.as_str(), web_service);
        }

        if services.contains(&ServiceName::Worker) {
            let worker_service = Box::new(WorkerService::new(
                self.db_pool.clone(),
                self.config.clone(),
                self.app_state.service_statuses.clone(),
            ));
            self.service_manager
                .register_service(ServiceName::Worker.as_str(), worker_service);
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}
