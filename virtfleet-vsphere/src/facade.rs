//! Remote operations facade.
//!
//! Routes a machine-scoped command to the owning host and submits it. Bulk
//! power operations deliberately return a submission status string instead
//! of waiting for completion; the task poller reports progress and the
//! reconciliation loops fold in the resulting state. The one exception is
//! reboot, which waits for its internal power-off before powering back on.
//!
//! Machine resolution prefers the registry index and falls back to asking
//! every connected host, which covers machines created since the last
//! inventory load.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{
    ConsoleTicket, DatastoreFile, GuestAuth, ReconfigureSpec, TaskOutcome, TicketKind,
};
use crate::error::{Result, VsphereError};
use crate::host::HostConnection;
use crate::registry::ConnectionRegistry;
use crate::types::{DeviceKind, ManagedRef};

/// Status string for a successfully submitted operation.
pub const SUBMITTED: &str = "submitted";

pub struct RemoteOperations {
    registry: Arc<ConnectionRegistry>,
    http: reqwest::Client,
}

impl RemoteOperations {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            http: reqwest::Client::new(),
        }
    }

    /// Resolve a machine to its owning connection and remote reference.
    ///
    /// Falls back to scanning every connected host when the index has no
    /// entry, so machines that appeared since the last inventory load are
    /// still reachable.
    async fn resolve(&self, id: &Uuid) -> Result<(Arc<HostConnection>, ManagedRef)> {
        if let Some(conn) = self.registry.connection_for_machine(id) {
            if let Some(vm_ref) = conn.vm_ref_for(id) {
                return Ok((conn, vm_ref));
            }
        }

        debug!(machine = %id, "Machine not indexed, scanning hosts");
        for conn in self.registry.connections() {
            if !conn.is_enabled() || !conn.is_session_ready().await {
                continue;
            }
            let client = conn.client().await?;
            match client.find_by_uuid(*id).await {
                Ok(Some(vm_ref)) => {
                    info!(machine = %id, host = %conn.address(), "Machine found by scan");
                    return Ok((conn, vm_ref));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(host = %conn.address(), error = %e, "Machine scan failed on host");
                }
            }
        }
        Err(VsphereError::MachineNotFound(*id))
    }

    fn status(result: Result<()>) -> String {
        match result {
            Ok(()) => SUBMITTED.to_string(),
            Err(e) => format!("error: {}", e),
        }
    }

    // =========================================================================
    // Power
    // =========================================================================

    pub async fn power_on(&self, id: &Uuid) -> String {
        Self::status(self.submit_power_on(id).await)
    }

    async fn submit_power_on(&self, id: &Uuid) -> Result<()> {
        let (conn, vm_ref) = self.resolve(id).await?;
        conn.client().await?.power_on(&vm_ref).await?;
        info!(machine = %id, host = %conn.address(), "Power on submitted");
        Ok(())
    }

    pub async fn power_off(&self, id: &Uuid) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            conn.client().await?.power_off(&vm_ref).await?;
            info!(machine = %id, host = %conn.address(), "Power off submitted");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    /// Hard reboot: power off, wait for the power-off to complete, then
    /// power back on. The final power-on is submitted, not awaited.
    pub async fn reboot(&self, id: &Uuid) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            let client = conn.client().await?;

            let off = client.power_off(&vm_ref).await?;
            match client.wait_for_task(&off).await? {
                TaskOutcome::Success => {}
                TaskOutcome::Error(msg) => {
                    return Err(VsphereError::TaskFailed(format!("power off failed: {}", msg)));
                }
                TaskOutcome::Cancelled => {
                    return Err(VsphereError::TaskFailed("power off cancelled".to_string()));
                }
            }

            client.power_on(&vm_ref).await?;
            info!(machine = %id, host = %conn.address(), "Reboot submitted");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    /// Graceful shutdown through the guest tools.
    pub async fn shutdown_guest(&self, id: &Uuid) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            conn.client().await?.shutdown_guest(&vm_ref).await?;
            info!(machine = %id, host = %conn.address(), "Guest shutdown requested");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    pub async fn revert_snapshot(&self, id: &Uuid) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            conn.client().await?.revert_to_current_snapshot(&vm_ref).await?;
            info!(machine = %id, "Snapshot revert submitted");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    // =========================================================================
    // Console
    // =========================================================================

    pub async fn console_ticket(&self, id: &Uuid, kind: TicketKind) -> Result<ConsoleTicket> {
        let (conn, vm_ref) = self.resolve(id).await?;
        conn.client().await?.acquire_console_ticket(&vm_ref, kind).await
    }

    pub async fn set_resolution(&self, id: &Uuid, width: u32, height: u32) -> Result<()> {
        let (conn, vm_ref) = self.resolve(id).await?;
        conn.client()
            .await?
            .set_screen_resolution(&vm_ref, width, height)
            .await
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Find the first device of a kind in the machine's cached record.
    fn device_key(
        conn: &HostConnection,
        id: &Uuid,
        kind: DeviceKind,
        label: &str,
    ) -> Result<i32> {
        conn.machine(id)
            .and_then(|m| m.devices.iter().find(|d| d.kind == kind).map(|d| d.key))
            .ok_or_else(|| {
                VsphereError::InvalidInventory(format!("machine {} has no {} device", id, label))
            })
    }

    pub async fn mount_iso(&self, id: &Uuid, datastore_path: &str) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            let key = Self::device_key(&conn, id, DeviceKind::Cdrom, "CD/DVD")?;
            conn.client()
                .await?
                .reconfigure(
                    &vm_ref,
                    ReconfigureSpec::MountIso {
                        device_key: key,
                        datastore_path: datastore_path.to_string(),
                    },
                )
                .await?;
            info!(machine = %id, path = %datastore_path, "ISO mount submitted");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    pub async fn eject_iso(&self, id: &Uuid) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            let key = Self::device_key(&conn, id, DeviceKind::Cdrom, "CD/DVD")?;
            conn.client()
                .await?
                .reconfigure(&vm_ref, ReconfigureSpec::EjectIso { device_key: key })
                .await?;
            info!(machine = %id, "ISO eject submitted");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    /// Attach the machine's first network adapter to a named network from
    /// the host's network cache.
    pub async fn connect_network(&self, id: &Uuid, network_name: &str) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            let network = conn.find_network(network_name).ok_or_else(|| {
                VsphereError::InvalidInventory(format!("unknown network {}", network_name))
            })?;
            let key = Self::device_key(&conn, id, DeviceKind::Ethernet, "network")?;
            conn.client()
                .await?
                .reconfigure(
                    &vm_ref,
                    ReconfigureSpec::ConnectNetwork {
                        device_key: key,
                        network_name: network.name,
                        distributed: network.distributed,
                        switch_id: network.switch_id,
                    },
                )
                .await?;
            info!(machine = %id, network = %network_name, "Network connect submitted");
            Ok(())
        }
        .await;
        Self::status(result)
    }

    pub async fn set_boot_delay(&self, id: &Uuid, millis: i64) -> String {
        let result = async {
            let (conn, vm_ref) = self.resolve(id).await?;
            conn.client()
                .await?
                .reconfigure(&vm_ref, ReconfigureSpec::BootDelay { millis })
                .await?;
            Ok(())
        }
        .await;
        Self::status(result)
    }

    // =========================================================================
    // Guest files
    // =========================================================================

    pub async fn upload_guest_file(
        &self,
        id: &Uuid,
        auth: &GuestAuth,
        guest_path: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let (conn, vm_ref) = self.resolve(id).await?;
        let url = conn
            .client()
            .await?
            .initiate_file_upload(&vm_ref, auth, guest_path, data.len() as u64)
            .await?;

        let response = self
            .http
            .put(&url)
            .body(data)
            .send()
            .await
            .map_err(|e| VsphereError::FileTransfer(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VsphereError::FileTransfer(format!(
                "upload returned {}",
                response.status()
            )));
        }
        info!(machine = %id, path = %guest_path, "Guest file uploaded");
        Ok(())
    }

    pub async fn download_guest_file(
        &self,
        id: &Uuid,
        auth: &GuestAuth,
        guest_path: &str,
    ) -> Result<Vec<u8>> {
        let (conn, vm_ref) = self.resolve(id).await?;
        let info = conn
            .client()
            .await?
            .initiate_file_download(&vm_ref, auth, guest_path)
            .await?;

        let response = self
            .http
            .get(&info.url)
            .send()
            .await
            .map_err(|e| VsphereError::FileTransfer(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VsphereError::FileTransfer(format!(
                "download returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VsphereError::FileTransfer(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    // =========================================================================
    // Datastore
    // =========================================================================

    /// List ISO images on a host's configured datastore.
    pub async fn list_isos(&self, address: &str) -> Result<Vec<DatastoreFile>> {
        let conn = self
            .registry
            .connection(address)
            .ok_or_else(|| VsphereError::ConnectionFailed(format!("unknown host {}", address)))?;
        let config = conn.host_config().await;
        let datastore = conn.datastore(&config.datastore).ok_or_else(|| {
            VsphereError::InvalidInventory(format!("datastore {} not in cache", config.datastore))
        })?;
        conn.client()
            .await?
            .browse_datastore(&datastore.browser_ref, &datastore.name, "", "*.iso")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DatastoreProps, InventoryObject, MachineProps};
    use crate::config::{FleetConfig, HostConfig};
    use crate::mock::{MockVimClient, MockVimFactory};
    use crate::store::MemoryVmStore;
    use crate::types::VirtualDevice;
    use tokio::sync::RwLock;

    struct Harness {
        ops: RemoteOperations,
        registry: Arc<ConnectionRegistry>,
        factory: Arc<MockVimFactory>,
    }

    fn harness() -> Harness {
        let factory = Arc::new(MockVimFactory::new());
        let store = Arc::new(MemoryVmStore::new());
        let config = Arc::new(RwLock::new(FleetConfig {
            hosts: vec![HostConfig {
                address: "vc-1".to_string(),
                username: "admin".to_string(),
                password: "secret".to_string(),
                datastore: "iso-store".to_string(),
                inventory_every_n_cycles: Some(1),
                ..Default::default()
            }],
            ..Default::default()
        }));
        let registry = Arc::new(ConnectionRegistry::new(config, factory.clone(), store));
        let ops = RemoteOperations::new(registry.clone());
        Harness {
            ops,
            registry,
            factory,
        }
    }

    fn mock_for(factory: &MockVimFactory, address: &str) -> Arc<MockVimClient> {
        let mock = Arc::new(MockVimClient::new(address));
        factory.register(address, mock.clone());
        mock
    }

    fn machine_with_devices(vm: &str, id: Uuid, devices: Vec<VirtualDevice>) -> InventoryObject {
        let mut props = MachineProps::new(ManagedRef::vm(vm), id, "web-01");
        props.devices = devices;
        InventoryObject::Machine(props)
    }

    fn cdrom(key: i32) -> VirtualDevice {
        VirtualDevice {
            key,
            label: "CD/DVD drive 1".to_string(),
            kind: DeviceKind::Cdrom,
            backing: None,
            connected: false,
        }
    }

    fn nic(key: i32) -> VirtualDevice {
        VirtualDevice {
            key,
            label: "Network adapter 1".to_string(),
            kind: DeviceKind::Ethernet,
            backing: Some("old-net".to_string()),
            connected: true,
        }
    }

    async fn connect(h: &Harness, mock: &MockVimClient, inventory: Vec<InventoryObject>) {
        mock.set_inventory(inventory);
        h.registry.run_cycle().await.unwrap();
    }

    #[tokio::test]
    async fn test_power_on_submitted() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(&h, &mock, vec![machine_with_devices("vm-1", id, vec![])]).await;

        assert_eq!(h.ops.power_on(&id).await, SUBMITTED);
        assert_eq!(mock.submitted_ops(), vec!["powerOn vm-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_machine_is_error_status() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        connect(&h, &mock, vec![]).await;

        let status = h.ops.power_on(&Uuid::new_v4()).await;
        assert!(status.starts_with("error: Machine not found"));
        assert!(mock.submitted_ops().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_scan() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        connect(&h, &mock, vec![]).await;

        // Machine appeared after the last inventory load
        let id = Uuid::new_v4();
        mock.set_inventory(vec![machine_with_devices("vm-new", id, vec![])]);

        assert_eq!(h.ops.power_on(&id).await, SUBMITTED);
        assert_eq!(mock.submitted_ops(), vec!["powerOn vm-new".to_string()]);
    }

    #[tokio::test]
    async fn test_reboot_powers_off_then_on() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(&h, &mock, vec![machine_with_devices("vm-1", id, vec![])]).await;

        assert_eq!(h.ops.reboot(&id).await, SUBMITTED);
        assert_eq!(
            mock.submitted_ops(),
            vec!["powerOff vm-1".to_string(), "powerOn vm-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reboot_aborts_when_power_off_fails() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(&h, &mock, vec![machine_with_devices("vm-1", id, vec![])]).await;

        mock.set_power_off_outcome(TaskOutcome::Error("guest busy".to_string()));
        let status = h.ops.reboot(&id).await;
        assert!(status.contains("power off failed"));
        assert_eq!(mock.submitted_ops(), vec!["powerOff vm-1".to_string()]);
    }

    #[tokio::test]
    async fn test_mount_iso_uses_cdrom_key() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(
            &h,
            &mock,
            vec![machine_with_devices("vm-1", id, vec![cdrom(3002)])],
        )
        .await;

        let status = h.ops.mount_iso(&id, "[iso-store] images/debian.iso").await;
        assert_eq!(status, SUBMITTED);
        assert_eq!(
            mock.submitted_ops(),
            vec!["reconfigure.mountIso vm-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mount_iso_without_cdrom_is_error() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(&h, &mock, vec![machine_with_devices("vm-1", id, vec![])]).await;

        let status = h.ops.mount_iso(&id, "[iso-store] images/debian.iso").await;
        assert!(status.contains("no CD/DVD device"));
        assert!(mock.submitted_ops().is_empty());
    }

    #[tokio::test]
    async fn test_connect_network_unknown_name() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(
            &h,
            &mock,
            vec![machine_with_devices("vm-1", id, vec![nic(4000)])],
        )
        .await;

        let status = h.ops.connect_network(&id, "missing-net").await;
        assert!(status.contains("unknown network"));
    }

    #[tokio::test]
    async fn test_console_ticket() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(&h, &mock, vec![machine_with_devices("vm-1", id, vec![])]).await;

        let ticket = h.ops.console_ticket(&id, TicketKind::WebMks).await.unwrap();
        assert_eq!(ticket.ticket, "webmks-ticket-vm-1");
        assert_eq!(ticket.port, Some(443));
    }

    #[tokio::test]
    async fn test_set_resolution() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        connect(&h, &mock, vec![machine_with_devices("vm-1", id, vec![])]).await;

        h.ops.set_resolution(&id, 1920, 1080).await.unwrap();
        assert_eq!(mock.resolution(), Some((1920, 1080)));
    }

    #[tokio::test]
    async fn test_list_isos() {
        let h = harness();
        let mock = mock_for(&h.factory, "vc-1");
        let id = Uuid::new_v4();
        mock.set_datastore_files(
            "iso-store",
            vec![DatastoreFile {
                path: "[iso-store] images/debian.iso".to_string(),
                size: 700 << 20,
            }],
        );
        connect(
            &h,
            &mock,
            vec![
                machine_with_devices("vm-1", id, vec![]),
                InventoryObject::Datastore(DatastoreProps {
                    ds_ref: ManagedRef::new("Datastore", "datastore-1"),
                    name: "iso-store".to_string(),
                    browser_ref: ManagedRef::new("HostDatastoreBrowser", "browser-1"),
                }),
            ],
        )
        .await;

        let isos = h.ops.list_isos("vc-1").await.unwrap();
        assert_eq!(isos.len(), 1);
        assert!(isos[0].path.ends_with(".iso"));
    }

    #[tokio::test]
    async fn test_list_isos_unknown_host() {
        let h = harness();
        let err = h.ops.list_isos("vc-nowhere").await.unwrap_err();
        assert!(matches!(err, VsphereError::ConnectionFailed(_)));
    }
}
