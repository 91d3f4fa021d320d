//! Background worker service: queue claim loop plus optional cron scheduler.

pub mod runner;
pub mod scheduler;

use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::assemble::assembler_from_config;
use crate::config::Config;
use crate::data::tasks;
use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};

use self::runner::Worker;
use self::scheduler::Scheduler;

/// Service wrapper owning the worker loop and, when enabled, the scheduler.
pub struct WorkerService {
    db_pool: PgPool,
    config: Arc<Config>,
    service_statuses: ServiceStatusRegistry,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl WorkerService {
    pub fn new(db_pool: PgPool, config: Arc<Config>, service_statuses: ServiceStatusRegistry) -> Self {
        Self {
            db_pool,
            config,
            service_statuses,
            handles: Vec::new(),
            shutdown_tx: None,
        }
    }

    async fn start(&mut self) {
        // Requeue leases left behind by a previous unclean shutdown so that
        // work resumes immediately instead of waiting out the lease.
        match tasks::recover(&self.db_pool).await {
            Ok(0) => {}
            Ok(count) => warn!(count, "recovered stale leases from previous run"),
            Err(e) => warn!(error = ?e, "startup lease recovery failed"),
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let assembler = assembler_from_config(&self.config);
        info!(assembler = assembler.name(), "worker starting");

        let worker = Worker::new(self.db_pool.clone(), self.config.clone(), assembler);
        let worker_rx = shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            worker.run(worker_rx).await;
        }));

        if self.config.run_scheduler {
            let scheduler = Scheduler::new(self.db_pool.clone(), self.config.clone());
            let scheduler_rx = shutdown_tx.subscribe();
            self.handles.push(tokio::spawn(async move {
                scheduler.run(scheduler_rx).await;
            }));
            info!("scheduler enabled in this process");
        }

        self.service_statuses.set("worker", ServiceStatus::Active);
    }
}

#[async_trait::async_trait]
impl Service for WorkerService {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start().await;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("worker", ServiceStatus::Disabled);

        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            warn!("no shutdown channel found for worker service");
            return Err(anyhow::anyhow!("No shutdown channel available"));
        };
        let _ = shutdown_tx.send(());

        let results = futures::future::join_all(self.handles.drain(..)).await;
        let panicked = results.iter().filter(|r| r.is_err()).count();
        if panicked > 0 {
            warn!(panicked, "worker tasks panicked during shutdown");
            return Err(anyhow::anyhow!("{panicked} task(s) panicked"));
        }

        info!("worker service shutdown complete");
        Ok(())
    }
}
