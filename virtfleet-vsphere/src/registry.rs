//! Connection registry: fleet-wide polling orchestration.
//!
//! Owns one `HostConnection` per configured endpoint and drives them all on
//! a fixed cycle. Each cycle:
//! 1. reconciles the connection set against the (hot-reloadable) config
//! 2. dispatches one load per host as its own task
//! 3. awaits results under a shared dispatch deadline; a load that misses
//!    the deadline is carried over to the next cycle, never cancelled and
//!    never redispatched while still running
//! 4. rebuilds the machine-to-host index and writes reconciled state back
//!    to the projection store
//!
//! The registry also maintains the machine index used by the command facade
//! to route an operation to the owning host without scanning.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::VimClientFactory;
use crate::config::FleetConfig;
use crate::error::Result;
use crate::health::{HealthState, HostHealth};
use crate::host::HostConnection;
use crate::store::VmStore;
use crate::types::{MachineRecord, VmBackend};

pub struct ConnectionRegistry {
    config: Arc<RwLock<FleetConfig>>,
    factory: Arc<dyn VimClientFactory>,
    store: Arc<dyn VmStore>,

    connections: DashMap<String, Arc<HostConnection>>,
    /// Machine id to owning host address
    machine_hosts: DashMap<Uuid, String>,
    /// Loads still running from previous cycles, keyed by host address
    inflight: Mutex<HashMap<String, JoinHandle<Result<Vec<MachineRecord>>>>>,

    health: Arc<HealthState>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ConnectionRegistry {
    pub fn new(
        config: Arc<RwLock<FleetConfig>>,
        factory: Arc<dyn VimClientFactory>,
        store: Arc<dyn VmStore>,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        Self {
            config,
            factory,
            store,
            connections: DashMap::new(),
            machine_hosts: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            health: Arc::new(HealthState::new()),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    pub fn health(&self) -> Arc<HealthState> {
        self.health.clone()
    }

    /// Trigger an immediate polling cycle (e.g., after a config reload).
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub fn connection(&self, address: &str) -> Option<Arc<HostConnection>> {
        self.connections.get(address).map(|e| e.value().clone())
    }

    pub fn connections(&self) -> Vec<Arc<HostConnection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// The host currently owning a machine, per the index.
    pub fn connection_for_machine(&self, id: &Uuid) -> Option<Arc<HostConnection>> {
        let address = self.machine_hosts.get(id).map(|e| e.value().clone())?;
        self.connection(&address)
    }

    /// Main polling loop. Runs until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut wake = match self.wake_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                error!("Registry loop started twice");
                return;
            }
        };

        info!("Connection registry started");
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Registry cycle failed");
            }

            let interval = self.config.read().await.poll_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake.recv() => {
                    debug!("Immediate poll requested");
                }
                _ = shutdown.recv() => {
                    info!("Connection registry shutting down");
                    return;
                }
            }
        }
    }

    /// Run one polling cycle immediately.
    pub async fn run_cycle(&self) -> Result<()> {
        let config = self.config.read().await.clone();

        self.sync_connections(&config).await;

        let results = self.dispatch_loads(&config).await;

        self.update_index(&results);
        self.write_back(&results).await?;
        debug!(
            hosts = results.len(),
            machines = results.iter().map(|(_, m)| m.len()).sum::<usize>(),
            indexed = self.machine_hosts.len(),
            "Cycle merged"
        );

        let mut hosts = Vec::new();
        for conn in self.connections() {
            hosts.push(HostHealth {
                address: conn.address().to_string(),
                enabled: conn.is_enabled(),
                connected: conn.is_session_ready().await,
            });
        }
        self.health.set_connections(hosts);
        self.health.mark_started();
        self.health
            .record_cycle(chrono::Utc::now(), config.poll_interval() + config.health_allowance());
        Ok(())
    }

    /// Reconcile the connection set against the configured host list.
    async fn sync_connections(&self, config: &FleetConfig) {
        let mut to_update = Vec::new();
        for host in &config.hosts {
            match self.connections.get(&host.address) {
                Some(entry) => to_update.push((entry.value().clone(), host.clone())),
                None => {
                    info!(host = %host.address, "Adding host connection");
                    self.connections.insert(
                        host.address.clone(),
                        Arc::new(HostConnection::new(
                            host.clone(),
                            config,
                            self.factory.clone(),
                        )),
                    );
                }
            }
        }
        for (conn, host) in to_update {
            conn.update_config(host, config).await;
        }

        let configured: HashSet<&str> = config.hosts.iter().map(|h| h.address.as_str()).collect();
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|e| !configured.contains(e.key().as_str()))
            .map(|e| e.key().clone())
            .collect();
        for address in stale {
            if let Some((_, conn)) = self.connections.remove(&address) {
                info!(host = %address, "Removing de-configured host connection");
                // Detach any still-running load; its result is discarded
                self.inflight.lock().await.remove(&address);
                conn.disconnect().await;
            }
        }
    }

    /// Dispatch one load per host and collect results under a shared
    /// deadline. Loads that miss the deadline stay inflight.
    async fn dispatch_loads(&self, config: &FleetConfig) -> Vec<(String, Vec<MachineRecord>)> {
        let deadline = tokio::time::Instant::now() + config.dispatch_timeout();
        let mut inflight = self.inflight.lock().await;

        for entry in self.connections.iter() {
            let address = entry.key().clone();
            if inflight.contains_key(&address) {
                warn!(host = %address, "Previous load still running, not redispatching");
                continue;
            }
            let conn = entry.value().clone();
            inflight.insert(address, tokio::spawn(async move { conn.load().await }));
        }

        let mut results = Vec::new();
        let mut carried = HashMap::new();
        for (address, mut handle) in inflight.drain() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(machines))) => {
                    // A host removed mid-flight no longer gets indexed
                    if self.connections.contains_key(&address) {
                        results.push((address, machines));
                    }
                }
                Ok(Ok(Err(e))) => {
                    warn!(host = %address, error = %e, "Host load failed");
                }
                Ok(Err(e)) => {
                    error!(host = %address, error = %e, "Host load task aborted");
                }
                Err(_) => {
                    warn!(host = %address, "Load exceeded dispatch timeout, carrying over");
                    carried.insert(address, handle);
                }
            }
        }
        *inflight = carried;
        results
    }

    /// Rebuild the machine-to-host index from this cycle's results, then
    /// drop entries whose host no longer caches the machine.
    fn update_index(&self, results: &[(String, Vec<MachineRecord>)]) {
        for (address, machines) in results {
            for machine in machines {
                self.machine_hosts.insert(machine.id, address.clone());
            }
        }
        self.machine_hosts.retain(|id, address| {
            self.connections
                .get(address)
                .map(|c| c.contains_machine(id))
                .unwrap_or(false)
        });
    }

    /// Write reconciled power state, addresses and snapshot presence back to
    /// the projection store. Only existing projections are touched.
    async fn write_back(&self, results: &[(String, Vec<MachineRecord>)]) -> Result<()> {
        for (address, machines) in results {
            if machines.is_empty() {
                continue;
            }
            let ids: Vec<Uuid> = machines.iter().map(|m| m.id).collect();
            let mut projections: HashMap<Uuid, _> = self
                .store
                .get_by_ids(&ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect();

            let mut updated = Vec::new();
            for machine in machines {
                if let Some(mut projection) = projections.remove(&machine.id) {
                    projection.power_state = machine.power_state;
                    projection.ip_addresses = machine.ip_addresses.clone();
                    projection.has_snapshot = machine.has_snapshot;
                    projection.backend = VmBackend::Vsphere;
                    updated.push(projection);
                }
            }
            if !updated.is_empty() {
                debug!(host = %address, count = updated.len(), "Writing back machine state");
                self.store.save(updated).await?;
            }
        }
        Ok(())
    }
}
