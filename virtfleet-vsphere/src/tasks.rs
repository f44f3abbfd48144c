//! Recent-task polling and progress notification.
//!
//! Polls every connected host's recent-task list, reduces the records to at
//! most one notification per machine (latest submission wins), broadcasts
//! progress to per-machine subscriber groups, and maintains the
//! `has_pending_tasks` flag on the projection store.
//!
//! The poll cadence adapts: a fast interval while any task is active, a
//! slow one while idle. A completed power task triggers an immediate
//! reconciliation wake so the new power state lands without waiting a full
//! cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::TaskRecord;
use crate::config::FleetConfig;
use crate::error::Result;
use crate::host::HostConnection;
use crate::notify::Notifier;
use crate::registry::ConnectionRegistry;
use crate::store::VmStore;
use crate::types::{TaskKind, TaskNotification};

pub struct TaskPoller {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn VmStore>,
    notifier: Arc<dyn Notifier>,
    /// Wake signal for the power-state reconciliation loops
    recheck: mpsc::Sender<()>,
    config: Arc<RwLock<FleetConfig>>,
}

impl TaskPoller {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn VmStore>,
        notifier: Arc<dyn Notifier>,
        recheck: mpsc::Sender<()>,
        config: Arc<RwLock<FleetConfig>>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            recheck,
            config,
        }
    }

    /// Main polling loop. Runs until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Task poller started");
        loop {
            let pending = match self.run_cycle().await {
                Ok(pending) => pending,
                Err(e) => {
                    error!(error = %e, "Task poll cycle failed");
                    false
                }
            };

            let config = self.config.read().await;
            let interval = if pending {
                config.task_poll_fast()
            } else {
                config.task_poll_slow()
            };
            drop(config);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("Task poller shutting down");
                    return;
                }
            }
        }
    }

    /// One poll cycle. Returns whether any task is still active.
    async fn run_cycle(&self) -> Result<bool> {
        let flagged: HashSet<Uuid> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|p| p.has_pending_tasks)
            .map(|p| p.id)
            .collect();

        let mut ready = Vec::new();
        for conn in self.registry.connections() {
            if conn.is_enabled() && conn.is_session_ready().await {
                ready.push(conn);
            }
        }

        let fetches = ready.iter().map(|conn| {
            let conn = conn.clone();
            async move {
                let records = fetch_tasks(&conn).await;
                (conn, records)
            }
        });

        let mut latest: HashMap<Uuid, (TaskRecord, TaskKind)> = HashMap::new();
        let mut polled_hosts = HashSet::new();

        for (conn, records) in join_all(fetches).await {
            let records = match records {
                Ok(records) => records,
                Err(e) => {
                    warn!(host = %conn.address(), error = %e, "Task list poll failed");
                    continue;
                }
            };
            polled_hosts.insert(conn.address().to_string());

            for record in records {
                let machine_id = match record
                    .entity
                    .as_ref()
                    .and_then(|entity| conn.machine_id_for_ref(entity))
                {
                    Some(id) => id,
                    None => {
                        debug!(
                            host = %conn.address(),
                            task = %record.key,
                            "Task entity not in machine cache, skipping"
                        );
                        continue;
                    }
                };

                let kind = TaskKind::from_descriptor(&record.descriptor);
                // Latest submission wins per machine
                match latest.get(&machine_id) {
                    Some((existing, _)) if existing.queued_at >= record.queued_at => {}
                    _ => {
                        latest.insert(machine_id, (record, kind));
                    }
                }
            }
        }

        let mut active = HashSet::new();
        let mut power_completed = false;

        for (machine_id, (record, kind)) in &latest {
            if record.state.is_active() {
                active.insert(*machine_id);
            } else if *kind == TaskKind::PowerOn || *kind == TaskKind::PowerOff {
                power_completed = true;
            }

            let notification = TaskNotification {
                machine_id: *machine_id,
                task_key: record.key.clone(),
                kind: *kind,
                state: record.state,
                progress: record.progress,
                error: record.error.clone(),
            };
            let payload = serde_json::to_value(&notification)
                .map_err(|e| crate::error::VsphereError::Internal(e.to_string()))?;
            if let Err(e) = self
                .notifier
                .broadcast(&machine_id.to_string(), "Progress", payload)
                .await
            {
                warn!(machine = %machine_id, error = %e, "Progress broadcast failed");
            }
        }

        self.update_flags(&flagged, &active, &polled_hosts).await?;

        if power_completed {
            debug!("Power task completed, requesting immediate reconciliation");
            let _ = self.recheck.try_send(());
        }

        debug!(observed = latest.len(), active = active.len(), "Task cycle complete");
        Ok(!active.is_empty())
    }

    /// Reconcile `has_pending_tasks`: set it for newly-active machines and
    /// clear it for flagged machines with no remaining active task. A flag
    /// is only cleared when the owning host was successfully polled this
    /// cycle.
    async fn update_flags(
        &self,
        flagged: &HashSet<Uuid>,
        active: &HashSet<Uuid>,
        polled_hosts: &HashSet<String>,
    ) -> Result<()> {
        let mut changed: Vec<Uuid> = active.difference(flagged).copied().collect();
        for id in flagged.difference(active) {
            let host_polled = self
                .registry
                .connection_for_machine(id)
                .map(|c| polled_hosts.contains(c.address()))
                .unwrap_or(false);
            if host_polled {
                changed.push(*id);
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        let mut updated = Vec::new();
        for mut projection in self.store.get_by_ids(&changed).await? {
            projection.has_pending_tasks = active.contains(&projection.id);
            updated.push(projection);
        }
        if !updated.is_empty() {
            self.store.save(updated).await?;
        }
        Ok(())
    }
}

async fn fetch_tasks(conn: &Arc<HostConnection>) -> Result<Vec<TaskRecord>> {
    let client = conn.client().await?;
    client.recent_tasks().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InventoryObject, MachineProps};
    use crate::config::HostConfig;
    use crate::mock::{MockVimClient, MockVimFactory};
    use crate::notify::{BroadcastMessage, ChannelNotifier};
    use crate::store::MemoryVmStore;
    use crate::types::{ManagedRef, TaskState, VmBackend, VmProjection};
    use chrono::{Duration as ChronoDuration, Utc};

    struct Harness {
        poller: TaskPoller,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryVmStore>,
        factory: Arc<MockVimFactory>,
        rx: mpsc::Receiver<BroadcastMessage>,
        recheck_rx: mpsc::Receiver<()>,
    }

    fn host(address: &str) -> HostConfig {
        HostConfig {
            address: address.to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            inventory_every_n_cycles: Some(1),
            ..Default::default()
        }
    }

    fn harness(hosts: Vec<HostConfig>) -> Harness {
        let factory = Arc::new(MockVimFactory::new());
        let store = Arc::new(MemoryVmStore::new());
        let config = Arc::new(RwLock::new(FleetConfig {
            hosts,
            ..Default::default()
        }));
        let registry = Arc::new(ConnectionRegistry::new(
            config.clone(),
            factory.clone(),
            store.clone(),
        ));
        let (notifier, rx) = ChannelNotifier::channel(32);
        let (recheck_tx, recheck_rx) = mpsc::channel(1);
        let poller = TaskPoller::new(
            registry.clone(),
            store.clone(),
            Arc::new(notifier),
            recheck_tx,
            config,
        );
        Harness {
            poller,
            registry,
            store,
            factory,
            rx,
            recheck_rx,
        }
    }

    fn mock_for(factory: &MockVimFactory, address: &str) -> Arc<MockVimClient> {
        let mock = Arc::new(MockVimClient::new(address));
        factory.register(address, mock.clone());
        mock
    }

    fn task(key: &str, descriptor: &str, vm: &str, state: TaskState, age_secs: i64) -> TaskRecord {
        TaskRecord {
            key: key.to_string(),
            descriptor: descriptor.to_string(),
            name: descriptor.to_string(),
            state,
            progress: Some(40),
            entity: Some(ManagedRef::vm(vm)),
            cancelled: false,
            error: None,
            queued_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    async fn connect(h: &Harness, mock: &MockVimClient, vm: &str) -> Uuid {
        let id = Uuid::new_v4();
        mock.set_inventory(vec![InventoryObject::Machine(MachineProps::new(
            ManagedRef::vm(vm),
            id,
            "web-01",
        ))]);
        h.registry.run_cycle().await.unwrap();
        h.store
            .seed(vec![VmProjection::new(id, VmBackend::Vsphere)])
            .await;
        id
    }

    #[tokio::test]
    async fn test_latest_task_wins_per_machine() {
        let mut h = harness(vec![host("vc-1")]);
        let mock = mock_for(&h.factory, "vc-1");
        let id = connect(&h, &mock, "vm-1").await;

        mock.set_recent_tasks(vec![
            task("task-old", "VirtualMachine.powerOff", "vm-1", TaskState::Success, 120),
            task("task-new", "VirtualMachine.powerOn", "vm-1", TaskState::Running, 5),
        ]);

        let pending = h.poller.run_cycle().await.unwrap();
        assert!(pending);

        let msg = h.rx.recv().await.unwrap();
        assert_eq!(msg.group, id.to_string());
        assert_eq!(msg.payload["task_key"], "task-new");
        assert_eq!(msg.payload["state"], "running");
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pending_flag_set_and_cleared() {
        let mut h = harness(vec![host("vc-1")]);
        let mock = mock_for(&h.factory, "vc-1");
        let id = connect(&h, &mock, "vm-1").await;

        mock.set_recent_tasks(vec![task(
            "task-1",
            "VirtualMachine.reconfigure",
            "vm-1",
            TaskState::Running,
            5,
        )]);
        assert!(h.poller.run_cycle().await.unwrap());
        assert!(h.store.get(&id).await.unwrap().has_pending_tasks);
        assert_eq!(h.rx.recv().await.unwrap().payload["state"], "running");

        mock.set_recent_tasks(vec![task(
            "task-1",
            "VirtualMachine.reconfigure",
            "vm-1",
            TaskState::Success,
            5,
        )]);
        assert!(!h.poller.run_cycle().await.unwrap());
        assert!(!h.store.get(&id).await.unwrap().has_pending_tasks);
        assert_eq!(h.rx.recv().await.unwrap().payload["state"], "success");
    }

    #[tokio::test]
    async fn test_flag_survives_host_poll_failure() {
        let mut h = harness(vec![host("vc-1")]);
        let mock = mock_for(&h.factory, "vc-1");
        let id = connect(&h, &mock, "vm-1").await;

        mock.set_recent_tasks(vec![task(
            "task-1",
            "VirtualMachine.powerOn",
            "vm-1",
            TaskState::Running,
            5,
        )]);
        h.poller.run_cycle().await.unwrap();
        assert!(h.store.get(&id).await.unwrap().has_pending_tasks);

        mock.set_fail_tasks(true);
        h.poller.run_cycle().await.unwrap();
        assert!(h.store.get(&id).await.unwrap().has_pending_tasks);
    }

    #[tokio::test]
    async fn test_completed_power_task_triggers_recheck() {
        let mut h = harness(vec![host("vc-1")]);
        let mock = mock_for(&h.factory, "vc-1");
        connect(&h, &mock, "vm-1").await;

        mock.set_recent_tasks(vec![task(
            "task-1",
            "VirtualMachine.powerOn",
            "vm-1",
            TaskState::Success,
            5,
        )]);
        h.poller.run_cycle().await.unwrap();
        assert!(h.recheck_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_non_power_completion_does_not_recheck() {
        let mut h = harness(vec![host("vc-1")]);
        let mock = mock_for(&h.factory, "vc-1");
        connect(&h, &mock, "vm-1").await;

        mock.set_recent_tasks(vec![task(
            "task-1",
            "VirtualMachine.reconfigure",
            "vm-1",
            TaskState::Success,
            5,
        )]);
        h.poller.run_cycle().await.unwrap();
        assert!(h.recheck_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_host_does_not_block_others() {
        let mut h = harness(vec![host("vc-1"), host("vc-2")]);
        let m1 = mock_for(&h.factory, "vc-1");
        let m2 = mock_for(&h.factory, "vc-2");
        let _a = connect(&h, &m1, "vm-1").await;

        let b = Uuid::new_v4();
        m2.set_inventory(vec![InventoryObject::Machine(MachineProps::new(
            ManagedRef::vm("vm-7"),
            b,
            "db-01",
        ))]);
        h.registry.run_cycle().await.unwrap();
        h.store
            .seed(vec![VmProjection::new(b, VmBackend::Vsphere)])
            .await;

        m1.set_fail_tasks(true);
        m2.set_recent_tasks(vec![task(
            "task-9",
            "VirtualMachine.powerOff",
            "vm-7",
            TaskState::Running,
            3,
        )]);

        assert!(h.poller.run_cycle().await.unwrap());
        assert!(h.store.get(&b).await.unwrap().has_pending_tasks);
        let msg = h.rx.recv().await.unwrap();
        assert_eq!(msg.group, b.to_string());
    }

    #[tokio::test]
    async fn test_task_for_unknown_entity_skipped() {
        let mut h = harness(vec![host("vc-1")]);
        let mock = mock_for(&h.factory, "vc-1");
        connect(&h, &mock, "vm-1").await;

        mock.set_recent_tasks(vec![task(
            "task-1",
            "VirtualMachine.powerOn",
            "vm-unknown",
            TaskState::Running,
            5,
        )]);
        let pending = h.poller.run_cycle().await.unwrap();
        assert!(!pending);
        assert!(h.rx.try_recv().is_err());
    }
}
