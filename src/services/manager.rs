use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::services::{Service, ServiceResult, run_service};

/// Manages the lifecycle of all registered services.
///
/// Services are spawned onto a [`JoinSet`]; a broadcast channel fans the
/// shutdown signal out to every runner.
pub struct ServiceManager {
    registered: Vec<(String, Box<dyn Service>)>,
    tasks: JoinSet<(String, ServiceResult)>,
    running: HashSet<String>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered: Vec::new(),
            tasks: JoinSet::new(),
            running: HashSet::new(),
            shutdown_tx,
        }
    }

    /// Register a service to be managed (not yet spawned)
    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered.push((name.to_string(), service));
    }

    /// Whether any services have been registered.
    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.running.is_empty()
    }

    /// Spawn all registered services
    pub fn spawn_all(&mut self) {
        let service_names: Vec<_> = self.registered.iter().map(|(n, _)| n.clone()).collect();

        for (name, service) in self.registered.drain(..) {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let task_name = name.clone();
            self.tasks
                .spawn(async move { (task_name, run_service(service, shutdown_rx).await) });
            self.running.insert(name);
        }

        info!(
            service_count = service_names.len(),
            services = ?service_names,
            "spawned {} services",
            service_names.len()
        );
    }

    /// Wait until the first service completes (or fails), returning its name
    /// and result.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        match self.tasks.join_next().await {
            None => (
                "none".to_string(),
                ServiceResult::Error(anyhow::anyhow!("No services to run")),
            ),
            Some(Ok((name, result))) => {
                self.running.remove(&name);
                (name, result)
            }
            Some(Err(e)) => (
                "unknown".to_string(),
                ServiceResult::Error(anyhow::anyhow!("Service task panicked: {e}")),
            ),
        }
    }

    /// Shutdown all services gracefully within the given timeout.
    ///
    /// Returns the elapsed duration on success, or the names of the services
    /// that did not complete in time.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let service_names: Vec<_> = self.running.iter().cloned().collect();
        info!(
            service_count = service_names.len(),
            services = ?service_names,
            timeout = format!("{timeout:.2?}"),
            "shutting down services"
        );

        let _ = self.shutdown_tx.send(());

        let start_time = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        while !self.running.is_empty() {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(Ok((name, _result)))) => {
                    debug!(service = name, "service shutdown completed");
                    self.running.remove(&name);
                }
                Ok(Some(Err(e))) => {
                    // Panicked task; its name is unknowable, it will show up
                    // in the pending list if anything is left.
                    warn!(error = ?e, "service task panicked during shutdown");
                    if self.tasks.is_empty() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let pending: Vec<String> = self.running.drain().collect();
                    warn!(
                        pending_count = pending.len(),
                        pending_services = ?pending,
                        "graceful shutdown elapsed - {} service(s) did not complete",
                        pending.len()
                    );
                    return Err(pending);
                }
            }
        }

        let elapsed = start_time.elapsed();
        info!(
            elapsed = format!("{elapsed:.2?}"),
            "services shutdown completed: {}",
            service_names.join(", ")
        );
        Ok(elapsed)
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}
