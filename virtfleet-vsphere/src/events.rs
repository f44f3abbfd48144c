//! Power-event polling.
//!
//! Power state can change outside this system's own commands (operator
//! actions in another client, DRS placement). This loop polls each host's
//! event collector for power events and folds them into the projection
//! store ahead of the next full reconciliation.
//!
//! The per-host checkpoint only advances on a successful poll, so events
//! arriving while a host is unreachable are picked up on the next
//! successful cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FleetConfig;
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::store::VmStore;
use crate::types::{ManagedRef, PowerEvent, PowerState};

pub struct PowerEventPoller {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn VmStore>,
    config: Arc<RwLock<FleetConfig>>,
    /// Per-host checkpoint of the last successful event poll
    last_checked: DashMap<String, DateTime<Utc>>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl PowerEventPoller {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn VmStore>,
        config: Arc<RwLock<FleetConfig>>,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        Self {
            registry,
            store,
            config,
            last_checked: DashMap::new(),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    /// Sender that triggers an immediate event poll.
    pub fn wake_sender(&self) -> mpsc::Sender<()> {
        self.wake_tx.clone()
    }

    /// Main polling loop. Runs until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut wake = match self.wake_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                error!("Power event loop started twice");
                return;
            }
        };

        info!("Power event poller started");
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Power event cycle failed");
            }

            let interval = self.config.read().await.event_poll();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake.recv() => {
                    debug!("Immediate event poll requested");
                }
                _ = shutdown.recv() => {
                    info!("Power event poller shutting down");
                    return;
                }
            }
        }
    }

    async fn run_cycle(&self) -> Result<()> {
        let window = self.config.read().await.event_poll();
        let mut updates: HashMap<Uuid, PowerState> = HashMap::new();

        for conn in self.registry.connections() {
            if !conn.is_enabled() || !conn.is_session_ready().await {
                continue;
            }
            let address = conn.address().to_string();
            let poll_start = Utc::now();
            let since = self
                .last_checked
                .get(&address)
                .map(|e| *e.value())
                .unwrap_or_else(|| {
                    poll_start
                        - chrono::Duration::from_std(window)
                            .unwrap_or_else(|_| chrono::Duration::zero())
                });

            let client = match conn.client().await {
                Ok(client) => client,
                Err(e) => {
                    warn!(host = %address, error = %e, "No client for event poll");
                    continue;
                }
            };
            let events = match client.power_events_since(since).await {
                Ok(events) => events,
                Err(e) => {
                    // Checkpoint not advanced; these events are retried
                    warn!(host = %address, error = %e, "Event poll failed");
                    continue;
                }
            };
            self.last_checked.insert(address.clone(), poll_start);

            // Last write wins per machine
            let mut latest: HashMap<ManagedRef, PowerEvent> = HashMap::new();
            for event in events {
                let replace = latest
                    .get(&event.vm_ref)
                    .map(|existing| event.created_at >= existing.created_at)
                    .unwrap_or(true);
                if replace {
                    latest.insert(event.vm_ref.clone(), event);
                }
            }

            for (vm_ref, event) in latest {
                match conn.machine_id_for_ref(&vm_ref) {
                    Some(id) => {
                        debug!(
                            host = %address,
                            machine = %id,
                            state = ?event.kind.power_state(),
                            "Power event"
                        );
                        updates.insert(id, event.kind.power_state());
                    }
                    None => {
                        debug!(host = %address, vm = %vm_ref, "Power event for unknown machine, skipping");
                    }
                }
            }
        }

        if updates.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = updates.keys().copied().collect();
        let mut changed = Vec::new();
        for mut projection in self.store.get_by_ids(&ids).await? {
            if let Some(state) = updates.get(&projection.id) {
                if projection.power_state != *state {
                    projection.power_state = *state;
                    changed.push(projection);
                }
            }
        }
        if !changed.is_empty() {
            debug!(machines = changed.len(), "Power events applied");
            self.store.save(changed).await?;
        }
        Ok(())
    }
}
