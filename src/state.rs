//! Application state shared across the API handlers and services.

use crate::config::Config;
use crate::status::ServiceStatusRegistry;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Arc<Config>,
    pub service_statuses: ServiceStatusRegistry,
}

impl AppState {
    pub fn new(db_pool: PgPool, config: Arc<Config>) -> Self {
        Self {
            db_pool,
            config,
            service_statuses: ServiceStatusRegistry::new(),
        }
    }
}
