//! Per-host connection: session lifecycle and inventory caches.
//!
//! One `HostConnection` owns the authenticated session against a single
//! management endpoint plus the caches built from its inventory. The caches
//! are keyed by stable identity (machine UUID, datastore name) because
//! remote object references do not survive reconnects.
//!
//! Session lifecycle per polling cycle:
//! - no session: connect (probe, then login)
//! - session past the refresh threshold: proactive renewal on a fresh client
//! - otherwise: cheap liveness probe; a failed probe tears the session down
//!   so the next cycle reconnects from scratch
//!
//! Caches are retained while the host is unreachable or disabled; they are
//! only rewritten by a successful full inventory load.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{
    ChannelState, DatastoreProps, InventoryObject, MachineProps, NetworkProps, PortgroupProps,
    SwitchProps, VimClient, VimClientFactory,
};
use crate::config::{FleetConfig, HostConfig};
use crate::error::{Result, VsphereError};
use crate::session::Session;
use crate::types::{
    DatastoreRecord, MachineRecord, ManagedRef, NetworkRecord, PowerState, ToolsStatus,
};

/// Connection to one hypervisor management endpoint.
pub struct HostConnection {
    address: String,
    config: RwLock<HostConfig>,
    factory: Arc<dyn VimClientFactory>,

    client: RwLock<Option<Arc<dyn VimClient>>>,
    session: RwLock<Option<Session>>,

    /// Effective session renewal threshold (config-derived, hot-reloadable)
    session_refresh: RwLock<Duration>,
    /// Effective full-inventory cadence in cycles
    inventory_cadence: AtomicU32,
    enabled: AtomicBool,

    machines: DashMap<Uuid, MachineRecord>,
    ids_by_ref: DashMap<ManagedRef, Uuid>,
    /// Network records grouped by the physical host that can see them
    networks: DashMap<ManagedRef, Vec<NetworkRecord>>,
    datastores: DashMap<String, DatastoreRecord>,

    cycles_since_inventory: AtomicU32,
    force_reload: AtomicBool,
}

impl HostConnection {
    pub fn new(config: HostConfig, fleet: &FleetConfig, factory: Arc<dyn VimClientFactory>) -> Self {
        Self {
            address: config.address.clone(),
            session_refresh: RwLock::new(config.session_refresh(fleet)),
            inventory_cadence: AtomicU32::new(config.inventory_cadence(fleet)),
            enabled: AtomicBool::new(config.enabled),
            config: RwLock::new(config),
            factory,
            client: RwLock::new(None),
            session: RwLock::new(None),
            machines: DashMap::new(),
            ids_by_ref: DashMap::new(),
            networks: DashMap::new(),
            datastores: DashMap::new(),
            cycles_since_inventory: AtomicU32::new(0),
            // First successful connect always does a full inventory load
            force_reload: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn is_session_ready(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// The live client, or `NoSession` if the host is not connected.
    pub async fn client(&self) -> Result<Arc<dyn VimClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(VsphereError::NoSession)
    }

    pub async fn host_config(&self) -> HostConfig {
        self.config.read().await.clone()
    }

    /// Request a full inventory load on the next cycle.
    pub fn request_reload(&self) {
        self.force_reload.store(true, Ordering::SeqCst);
    }

    /// Apply an updated host configuration without restarting the connection.
    ///
    /// A credential change tears the session down so the next cycle logs in
    /// with the new identity.
    pub async fn update_config(&self, new: HostConfig, fleet: &FleetConfig) {
        let credentials_changed = {
            let old = self.config.read().await;
            old.username != new.username || old.password != new.password
        };
        *self.session_refresh.write().await = new.session_refresh(fleet);
        self.inventory_cadence
            .store(new.inventory_cadence(fleet), Ordering::SeqCst);
        self.enabled.store(new.enabled, Ordering::SeqCst);
        *self.config.write().await = new;
        if credentials_changed {
            info!(host = %self.address, "Credentials changed, dropping session");
            self.disconnect().await;
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    async fn connect(&self) -> Result<()> {
        let config = self.config.read().await.clone();
        let client = self.factory.create(&config);

        let content = client.retrieve_service_content().await.map_err(|e| {
            warn!(host = %self.address, error = %e, "Endpoint probe failed during connect");
            e
        })?;
        let handle = client.login(&config.username, &config.password).await?;

        info!(
            host = %self.address,
            api = %content.api_name,
            version = %content.api_version,
            user = %handle.user_name,
            "Connected to management endpoint"
        );

        *self.client.write().await = Some(client);
        *self.session.write().await = Some(Session::new(handle, content));
        Ok(())
    }

    /// Proactive renewal: establish a fresh client and session before
    /// swapping out the old one, so a renewal failure behaves like a lost
    /// connection rather than leaving a half-open state.
    async fn renew(&self) -> Result<()> {
        debug!(host = %self.address, "Session past refresh threshold, renewing");
        let config = self.config.read().await.clone();
        let fresh = self.factory.create(&config);

        let renewed = async {
            let content = fresh.retrieve_service_content().await?;
            let handle = fresh.login(&config.username, &config.password).await?;
            Ok::<_, VsphereError>(Session::new(handle, content))
        }
        .await;

        match renewed {
            Ok(session) => {
                let old = self.client.write().await.replace(fresh);
                *self.session.write().await = Some(session);
                if let Some(old) = old {
                    // Best effort; the old session expires server-side anyway
                    let _ = old.logout().await;
                }
                info!(host = %self.address, "Session renewed");
                Ok(())
            }
            Err(e) => {
                warn!(host = %self.address, error = %e, "Session renewal failed, disconnecting");
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Cheap liveness probe on the existing session.
    async fn probe(&self) -> Result<()> {
        let client = self.client().await?;
        match client.channel_state() {
            ChannelState::Open => match client.retrieve_service_content().await {
                Ok(_) => {
                    if let Some(session) = self.session.write().await.as_mut() {
                        session.touch();
                    }
                    Ok(())
                }
                Err(e) => {
                    warn!(host = %self.address, error = %e, "Liveness probe failed, disconnecting");
                    self.disconnect().await;
                    Err(VsphereError::ChannelLost(self.address.clone()))
                }
            },
            state => {
                warn!(host = %self.address, state = ?state, "Channel no longer open, disconnecting");
                self.disconnect().await;
                Err(VsphereError::ChannelLost(self.address.clone()))
            }
        }
    }

    /// Ensure an authenticated, live session exists, renewing or
    /// reconnecting as needed.
    async fn ensure_session(&self) -> Result<()> {
        let refresh = *self.session_refresh.read().await;
        let status = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.needs_refresh(refresh));
        match status {
            None => self.connect().await,
            Some(true) => self.renew().await,
            Some(false) => self.probe().await,
        }
    }

    /// Tear down the session. Caches are retained; the next successful
    /// connect performs a full inventory load.
    pub async fn disconnect(&self) {
        let client = self.client.write().await.take();
        let had_session = self.session.write().await.take().is_some();
        if let Some(client) = client {
            let _ = client.logout().await;
        }
        if had_session {
            info!(host = %self.address, "Disconnected");
        }
        self.force_reload.store(true, Ordering::SeqCst);
    }

    // =========================================================================
    // Polling entry point
    // =========================================================================

    /// One polling cycle: ensure the session, reload inventory when due, and
    /// return a snapshot of the machine cache.
    ///
    /// Disabled hosts are a no-op returning an empty snapshot.
    pub async fn load(&self) -> Result<Vec<MachineRecord>> {
        if !self.is_enabled() {
            debug!(host = %self.address, "Host disabled, skipping");
            return Ok(Vec::new());
        }

        self.ensure_session().await?;

        let cadence = self.inventory_cadence.load(Ordering::SeqCst).max(1);
        let cycle = self.cycles_since_inventory.fetch_add(1, Ordering::SeqCst);
        let due = self.force_reload.swap(false, Ordering::SeqCst) || cycle % cadence == 0;

        if due {
            if let Err(e) = self.load_inventory().await {
                warn!(host = %self.address, error = %e, "Inventory load failed");
                self.force_reload.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }

        Ok(self.machines.iter().map(|e| e.value().clone()).collect())
    }

    async fn load_inventory(&self) -> Result<()> {
        let client = self.client().await?;
        let root = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.root_folder().clone())
            .ok_or(VsphereError::NoSession)?;

        let objects = client.retrieve_inventory(&root).await?;
        self.apply_inventory(objects);

        debug!(
            host = %self.address,
            machines = self.machines.len(),
            datastores = self.datastores.len(),
            "Inventory loaded"
        );
        Ok(())
    }

    fn apply_inventory(&self, objects: Vec<InventoryObject>) {
        let mut machines = Vec::new();
        let mut networks = Vec::new();
        let mut portgroups = Vec::new();
        let mut switches = Vec::new();
        let mut datastores = Vec::new();

        for obj in objects {
            match obj {
                InventoryObject::Machine(m) => machines.push(m),
                InventoryObject::Network(n) => networks.push(n),
                InventoryObject::DistributedPortgroup(p) => portgroups.push(p),
                InventoryObject::DistributedSwitch(s) => switches.push(s),
                InventoryObject::Datastore(d) => datastores.push(d),
                InventoryObject::Unrecognized(r) => {
                    warn!(host = %self.address, object = %r, "Unrecognized inventory object, skipping");
                }
            }
        }

        self.rebuild_machines(machines);
        self.rebuild_networks(networks, portgroups, switches);
        self.rebuild_datastores(datastores);
    }

    fn rebuild_machines(&self, props: Vec<MachineProps>) {
        let mut seen = HashSet::new();
        for m in props {
            let id = match m
                .instance_uuid
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                Some(id) => id,
                None => {
                    error!(
                        host = %self.address,
                        vm = %m.vm_ref,
                        name = %m.name,
                        "Machine has no parsable instance UUID, skipping"
                    );
                    continue;
                }
            };

            let ip_addresses = m
                .guest_nets
                .iter()
                .flat_map(|net| net.ip_addresses.iter())
                .filter_map(|ip| ip.clone())
                .collect();

            let record = MachineRecord {
                id,
                name: m.name,
                power_state: PowerState::from_wire(&m.power_state),
                tools_status: ToolsStatus::from_wire(m.tools_status.as_deref()),
                vm_ref: m.vm_ref.clone(),
                devices: m.devices,
                ip_addresses,
                has_snapshot: m.has_snapshot,
            };

            seen.insert(id);
            self.ids_by_ref.insert(m.vm_ref, id);
            self.machines.insert(id, record);
        }

        // Evict machines that disappeared from the inventory
        self.machines.retain(|id, _| seen.contains(id));
        self.ids_by_ref.retain(|_, id| seen.contains(id));
    }

    fn rebuild_networks(
        &self,
        networks: Vec<NetworkProps>,
        portgroups: Vec<PortgroupProps>,
        switches: Vec<SwitchProps>,
    ) {
        let switch_ids: HashMap<ManagedRef, String> = switches
            .iter()
            .map(|s| (s.switch_ref.clone(), s.uuid.clone()))
            .collect();
        let uplinks: HashSet<ManagedRef> = switches
            .iter()
            .flat_map(|s| s.uplink_portgroups.iter().cloned())
            .collect();

        let mut groups: HashMap<ManagedRef, Vec<NetworkRecord>> = HashMap::new();

        for n in networks {
            for host_ref in &n.host_refs {
                groups.entry(host_ref.clone()).or_default().push(NetworkRecord {
                    name: n.name.clone(),
                    net_ref: n.net_ref.clone(),
                    distributed: false,
                    switch_id: None,
                });
            }
        }

        for p in portgroups {
            // Uplink portgroups carry physical NICs, not guest traffic
            if uplinks.contains(&p.pg_ref) {
                continue;
            }
            let switch_id = match switch_ids.get(&p.switch_ref) {
                Some(id) => id.clone(),
                None => {
                    error!(
                        host = %self.address,
                        portgroup = %p.name,
                        switch = %p.switch_ref,
                        "Portgroup references unknown distributed switch, skipping"
                    );
                    continue;
                }
            };
            for host_ref in &p.host_refs {
                groups.entry(host_ref.clone()).or_default().push(NetworkRecord {
                    name: p.name.clone(),
                    net_ref: p.pg_ref.clone(),
                    distributed: true,
                    switch_id: Some(switch_id.clone()),
                });
            }
        }

        for (host_ref, records) in &groups {
            self.networks.insert(host_ref.clone(), records.clone());
        }
        self.networks.retain(|host_ref, _| groups.contains_key(host_ref));
    }

    fn rebuild_datastores(&self, props: Vec<DatastoreProps>) {
        let mut seen = HashSet::new();
        for d in props {
            seen.insert(d.name.clone());
            self.datastores.insert(
                d.name.clone(),
                DatastoreRecord {
                    name: d.name,
                    ds_ref: d.ds_ref,
                    browser_ref: d.browser_ref,
                },
            );
        }
        self.datastores.retain(|name, _| seen.contains(name));
    }

    // =========================================================================
    // Cache accessors
    // =========================================================================

    pub fn machine_ids(&self) -> Vec<Uuid> {
        self.machines.iter().map(|e| *e.key()).collect()
    }

    pub fn contains_machine(&self, id: &Uuid) -> bool {
        self.machines.contains_key(id)
    }

    pub fn machine(&self, id: &Uuid) -> Option<MachineRecord> {
        self.machines.get(id).map(|e| e.value().clone())
    }

    pub fn machine_id_for_ref(&self, vm_ref: &ManagedRef) -> Option<Uuid> {
        self.ids_by_ref.get(vm_ref).map(|e| *e.value())
    }

    pub fn vm_ref_for(&self, id: &Uuid) -> Option<ManagedRef> {
        self.machines.get(id).map(|e| e.value().vm_ref.clone())
    }

    /// Find a network record by name across all host groups.
    pub fn find_network(&self, name: &str) -> Option<NetworkRecord> {
        self.networks
            .iter()
            .flat_map(|e| e.value().clone())
            .find(|n| n.name == name)
    }

    pub fn datastore(&self, name: &str) -> Option<DatastoreRecord> {
        self.datastores.get(name).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GuestNet;
    use crate::mock::{MockVimClient, MockVimFactory};
    use crate::types::{DeviceKind, VirtualDevice};

    fn host_config(address: &str) -> HostConfig {
        HostConfig {
            address: address.to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            datastore: "iso-store".to_string(),
            inventory_every_n_cycles: Some(1),
            ..Default::default()
        }
    }

    fn setup(address: &str) -> (Arc<HostConnection>, Arc<MockVimClient>) {
        let factory = Arc::new(MockVimFactory::new());
        let mock = Arc::new(MockVimClient::new(address));
        factory.register(address, mock.clone());
        let conn = Arc::new(HostConnection::new(
            host_config(address),
            &FleetConfig::default(),
            factory,
        ));
        (conn, mock)
    }

    fn machine(vm: &str, id: Uuid, name: &str) -> InventoryObject {
        InventoryObject::Machine(MachineProps::new(ManagedRef::vm(vm), id, name))
    }

    #[tokio::test]
    async fn test_connect_and_load() {
        let (conn, mock) = setup("vc-1");
        let id = Uuid::new_v4();
        mock.set_inventory(vec![machine("vm-1", id, "web-01")]);

        let machines = conn.load().await.unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].id, id);
        assert!(conn.is_session_ready().await);
        assert_eq!(conn.machine_id_for_ref(&ManagedRef::vm("vm-1")), Some(id));
        assert_eq!(mock.login_count(), 1);
    }

    #[tokio::test]
    async fn test_reload_evicts_vanished_machines() {
        let (conn, mock) = setup("vc-1");
        let keep = Uuid::new_v4();
        let gone = Uuid::new_v4();
        mock.set_inventory(vec![
            machine("vm-1", keep, "web-01"),
            machine("vm-2", gone, "web-02"),
        ]);
        conn.load().await.unwrap();
        assert_eq!(conn.machine_ids().len(), 2);

        mock.set_inventory(vec![machine("vm-1", keep, "web-01")]);
        conn.load().await.unwrap();
        assert!(conn.contains_machine(&keep));
        assert!(!conn.contains_machine(&gone));
        assert!(conn.machine_id_for_ref(&ManagedRef::vm("vm-2")).is_none());
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let (conn, mock) = setup("vc-1");
        let id = Uuid::new_v4();
        mock.set_inventory(vec![machine("vm-1", id, "web-01")]);

        let first = conn.load().await.unwrap();
        let second = conn.load().await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(conn.machine_ids().len(), 1);
        // Still one login; subsequent cycles only probe
        assert_eq!(mock.login_count(), 1);
    }

    #[tokio::test]
    async fn test_machine_without_uuid_is_skipped() {
        let (conn, mock) = setup("vc-1");
        let id = Uuid::new_v4();
        let mut bad = MachineProps::new(ManagedRef::vm("vm-9"), Uuid::new_v4(), "broken");
        bad.instance_uuid = Some("not-a-uuid".to_string());
        mock.set_inventory(vec![
            machine("vm-1", id, "web-01"),
            InventoryObject::Machine(bad),
        ]);

        let machines = conn.load().await.unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].id, id);
    }

    #[tokio::test]
    async fn test_machine_record_fields() {
        let (conn, mock) = setup("vc-1");
        let id = Uuid::new_v4();
        let mut props = MachineProps::new(ManagedRef::vm("vm-1"), id, "web-01");
        props.power_state = "poweredOn".to_string();
        props.tools_status = Some("toolsOk".to_string());
        props.has_snapshot = true;
        props.guest_nets = vec![GuestNet {
            ip_addresses: vec![Some("10.0.0.5".to_string()), None],
        }];
        props.devices = vec![VirtualDevice {
            key: 3002,
            label: "CD/DVD drive 1".to_string(),
            kind: DeviceKind::Cdrom,
            backing: None,
            connected: false,
        }];
        mock.set_inventory(vec![InventoryObject::Machine(props)]);

        conn.load().await.unwrap();
        let record = conn.machine(&id).unwrap();
        assert_eq!(record.power_state, PowerState::On);
        assert_eq!(record.tools_status, ToolsStatus::Ok);
        assert_eq!(record.ip_addresses, vec!["10.0.0.5".to_string()]);
        assert!(record.has_snapshot);
        assert_eq!(record.devices[0].kind, DeviceKind::Cdrom);
    }

    #[tokio::test]
    async fn test_uplink_portgroups_excluded() {
        let (conn, mock) = setup("vc-1");
        let host_ref = ManagedRef::new("HostSystem", "host-1");
        let switch_ref = ManagedRef::new("VmwareDistributedVirtualSwitch", "dvs-1");
        let uplink_ref = ManagedRef::new("DistributedVirtualPortgroup", "pg-uplink");
        mock.set_inventory(vec![
            InventoryObject::DistributedSwitch(SwitchProps {
                switch_ref: switch_ref.clone(),
                uuid: "50 2e ..".to_string(),
                uplink_portgroups: vec![uplink_ref.clone()],
            }),
            InventoryObject::DistributedPortgroup(PortgroupProps {
                pg_ref: uplink_ref,
                name: "dvs-1-uplinks".to_string(),
                switch_ref: switch_ref.clone(),
                host_refs: vec![host_ref.clone()],
            }),
            InventoryObject::DistributedPortgroup(PortgroupProps {
                pg_ref: ManagedRef::new("DistributedVirtualPortgroup", "pg-1"),
                name: "guest-net".to_string(),
                switch_ref,
                host_refs: vec![host_ref],
            }),
        ]);

        conn.load().await.unwrap();
        assert!(conn.find_network("guest-net").is_some());
        assert!(conn.find_network("dvs-1-uplinks").is_none());
        let net = conn.find_network("guest-net").unwrap();
        assert!(net.distributed);
        assert_eq!(net.switch_id.as_deref(), Some("50 2e .."));
    }

    #[tokio::test]
    async fn test_portgroup_with_unknown_switch_skipped() {
        let (conn, mock) = setup("vc-1");
        mock.set_inventory(vec![InventoryObject::DistributedPortgroup(PortgroupProps {
            pg_ref: ManagedRef::new("DistributedVirtualPortgroup", "pg-1"),
            name: "orphan-net".to_string(),
            switch_ref: ManagedRef::new("VmwareDistributedVirtualSwitch", "dvs-missing"),
            host_refs: vec![ManagedRef::new("HostSystem", "host-1")],
        })]);

        conn.load().await.unwrap();
        assert!(conn.find_network("orphan-net").is_none());
    }

    #[tokio::test]
    async fn test_probe_failure_drops_session_then_reconnects() {
        let (conn, mock) = setup("vc-1");
        mock.set_inventory(vec![machine("vm-1", Uuid::new_v4(), "web-01")]);
        conn.load().await.unwrap();
        assert_eq!(mock.login_count(), 1);

        mock.set_fail_connect(true);
        assert!(conn.load().await.is_err());
        assert!(!conn.is_session_ready().await);

        mock.set_fail_connect(false);
        conn.load().await.unwrap();
        assert_eq!(mock.login_count(), 2);
        assert_eq!(conn.machine_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_faulted_channel_disconnects() {
        let (conn, mock) = setup("vc-1");
        conn.load().await.unwrap();

        mock.set_channel_state(Some(ChannelState::Faulted));
        let err = conn.load().await.unwrap_err();
        assert!(matches!(err, VsphereError::ChannelLost(_)));
        assert!(!conn.is_session_ready().await);
    }

    #[tokio::test]
    async fn test_session_renewal() {
        let factory = Arc::new(MockVimFactory::new());
        let mock = Arc::new(MockVimClient::new("vc-1"));
        factory.register("vc-1", mock.clone());
        let mut config = host_config("vc-1");
        // Threshold zero: every cycle after the first renews
        config.session_refresh_minutes = Some(0);
        let conn = HostConnection::new(config, &FleetConfig::default(), factory);

        conn.load().await.unwrap();
        assert_eq!(mock.login_count(), 1);

        conn.load().await.unwrap();
        assert_eq!(mock.login_count(), 2);
        assert_eq!(mock.logout_count(), 1);
        assert!(conn.is_session_ready().await);
    }

    #[tokio::test]
    async fn test_disabled_host_is_noop() {
        let factory = Arc::new(MockVimFactory::new());
        let mock = Arc::new(MockVimClient::new("vc-1"));
        factory.register("vc-1", mock.clone());
        let mut config = host_config("vc-1");
        config.enabled = false;
        let conn = HostConnection::new(config, &FleetConfig::default(), factory);

        let machines = conn.load().await.unwrap();
        assert!(machines.is_empty());
        assert_eq!(mock.login_count(), 0);
        assert!(!conn.is_session_ready().await);
    }

    #[tokio::test]
    async fn test_disabling_keeps_caches() {
        let (conn, mock) = setup("vc-1");
        let id = Uuid::new_v4();
        mock.set_inventory(vec![machine("vm-1", id, "web-01")]);
        conn.load().await.unwrap();

        let mut config = host_config("vc-1");
        config.enabled = false;
        conn.update_config(config, &FleetConfig::default()).await;

        assert!(conn.load().await.unwrap().is_empty());
        assert!(conn.contains_machine(&id));
    }

    #[tokio::test]
    async fn test_inventory_failure_keeps_caches_and_retries() {
        let (conn, mock) = setup("vc-1");
        let id = Uuid::new_v4();
        mock.set_inventory(vec![machine("vm-1", id, "web-01")]);
        conn.load().await.unwrap();

        mock.set_fail_inventory(true);
        assert!(conn.load().await.is_err());
        assert!(conn.contains_machine(&id));

        mock.set_fail_inventory(false);
        let machines = conn.load().await.unwrap();
        assert_eq!(machines.len(), 1);
    }
}
