//! Mock VIM backend for testing and development.
//!
//! Simulates one management endpoint in memory without any network I/O.
//! Supports fault injection (connect/login/inventory/task/event failures,
//! channel faulting) and artificial latency so connection-lifecycle and
//! dispatch-timeout behavior can be exercised deterministically.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::*;
use crate::config::HostConfig;
use crate::error::{Result, VsphereError};
use crate::types::*;

#[derive(Default)]
struct MockState {
    channel: Option<ChannelState>,
    inventory: Vec<InventoryObject>,
    recent: Vec<TaskRecord>,
    events: Vec<PowerEvent>,
    datastore_files: HashMap<String, Vec<DatastoreFile>>,

    fail_connect: bool,
    fail_login: bool,
    fail_inventory: bool,
    fail_tasks: bool,
    fail_events: bool,

    connect_delay: Duration,

    session_counter: u32,
    login_count: u32,
    logout_count: u32,
    probe_count: u32,
    inventory_count: u32,

    task_counter: u32,
    task_outcomes: HashMap<String, TaskOutcome>,
    power_on_outcome: Option<TaskOutcome>,
    power_off_outcome: Option<TaskOutcome>,

    submitted: Vec<String>,
    resolution: Option<(u32, u32)>,
}

/// Mock client for one endpoint.
pub struct MockVimClient {
    address: String,
    state: RwLock<MockState>,
}

impl MockVimClient {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        info!(host = %address, "Creating mock VIM client");
        Self {
            address,
            state: RwLock::new(MockState::default()),
        }
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MockState>> {
        self.state
            .write()
            .map_err(|_| VsphereError::Internal("Lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MockState>> {
        self.state
            .read()
            .map_err(|_| VsphereError::Internal("Lock poisoned".to_string()))
    }

    // =========================================================================
    // Scripting surface (tests and dev mode)
    // =========================================================================

    pub fn set_inventory(&self, objects: Vec<InventoryObject>) {
        if let Ok(mut s) = self.state.write() {
            s.inventory = objects;
        }
    }

    pub fn set_recent_tasks(&self, tasks: Vec<TaskRecord>) {
        if let Ok(mut s) = self.state.write() {
            s.recent = tasks;
        }
    }

    pub fn set_events(&self, events: Vec<PowerEvent>) {
        if let Ok(mut s) = self.state.write() {
            s.events = events;
        }
    }

    pub fn set_datastore_files(&self, datastore: impl Into<String>, files: Vec<DatastoreFile>) {
        if let Ok(mut s) = self.state.write() {
            s.datastore_files.insert(datastore.into(), files);
        }
    }

    /// Force the channel into a given state; `None` restores normal behavior
    /// (open once connected).
    pub fn set_channel_state(&self, channel: Option<ChannelState>) {
        if let Ok(mut s) = self.state.write() {
            s.channel = channel;
        }
    }

    pub fn set_fail_connect(&self, fail: bool) {
        if let Ok(mut s) = self.state.write() {
            s.fail_connect = fail;
        }
    }

    pub fn set_fail_login(&self, fail: bool) {
        if let Ok(mut s) = self.state.write() {
            s.fail_login = fail;
        }
    }

    pub fn set_fail_inventory(&self, fail: bool) {
        if let Ok(mut s) = self.state.write() {
            s.fail_inventory = fail;
        }
    }

    pub fn set_fail_tasks(&self, fail: bool) {
        if let Ok(mut s) = self.state.write() {
            s.fail_tasks = fail;
        }
    }

    pub fn set_fail_events(&self, fail: bool) {
        if let Ok(mut s) = self.state.write() {
            s.fail_events = fail;
        }
    }

    /// Artificial latency applied to the service-content probe, which makes
    /// the whole connect/load path slow.
    pub fn set_connect_delay(&self, delay: Duration) {
        if let Ok(mut s) = self.state.write() {
            s.connect_delay = delay;
        }
    }

    pub fn set_power_on_outcome(&self, outcome: TaskOutcome) {
        if let Ok(mut s) = self.state.write() {
            s.power_on_outcome = Some(outcome);
        }
    }

    pub fn set_power_off_outcome(&self, outcome: TaskOutcome) {
        if let Ok(mut s) = self.state.write() {
            s.power_off_outcome = Some(outcome);
        }
    }

    pub fn login_count(&self) -> u32 {
        self.state.read().map(|s| s.login_count).unwrap_or(0)
    }

    pub fn logout_count(&self) -> u32 {
        self.state.read().map(|s| s.logout_count).unwrap_or(0)
    }

    pub fn probe_count(&self) -> u32 {
        self.state.read().map(|s| s.probe_count).unwrap_or(0)
    }

    pub fn inventory_count(&self) -> u32 {
        self.state.read().map(|s| s.inventory_count).unwrap_or(0)
    }

    /// Commands submitted through this client, in order.
    pub fn submitted_ops(&self) -> Vec<String> {
        self.state.read().map(|s| s.submitted.clone()).unwrap_or_default()
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.state.read().map(|s| s.resolution).unwrap_or(None)
    }

    fn next_task(&self, op: &str, vm: &ManagedRef, outcome: TaskOutcome) -> Result<TaskRef> {
        let mut s = self.write()?;
        s.task_counter += 1;
        let key = format!("task-{}", s.task_counter);
        s.submitted.push(format!("{} {}", op, vm.value));
        s.task_outcomes.insert(key.clone(), outcome);
        debug!(host = %self.address, op = %op, vm = %vm, task = %key, "Mock task submitted");
        Ok(TaskRef {
            task_ref: ManagedRef::new("Task", key.clone()),
            key,
        })
    }
}

#[async_trait]
impl VimClient for MockVimClient {
    fn channel_state(&self) -> ChannelState {
        self.state
            .read()
            .ok()
            .and_then(|s| s.channel)
            .unwrap_or(ChannelState::Open)
    }

    async fn retrieve_service_content(&self) -> Result<ServiceContent> {
        let delay = {
            let mut s = self.write()?;
            s.probe_count += 1;
            if s.fail_connect {
                return Err(VsphereError::ConnectionFailed(format!(
                    "{}: connection refused",
                    self.address
                )));
            }
            if s.channel == Some(ChannelState::Faulted) {
                return Err(VsphereError::ChannelLost(self.address.clone()));
            }
            s.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(ServiceContent {
            api_name: "Mock VIM".to_string(),
            api_version: "1.0".to_string(),
            root_folder: ManagedRef::new("Folder", "group-d1"),
            property_collector: ManagedRef::new("PropertyCollector", "propertyCollector"),
            session_manager: ManagedRef::new("SessionManager", "SessionManager"),
        })
    }

    async fn login(&self, username: &str, _password: &str) -> Result<SessionHandle> {
        let mut s = self.write()?;
        if s.fail_login {
            return Err(VsphereError::AuthFailed(format!(
                "{}: invalid credentials",
                self.address
            )));
        }
        s.login_count += 1;
        s.session_counter += 1;
        Ok(SessionHandle {
            key: format!("session-{}", s.session_counter),
            user_name: username.to_string(),
            login_time: Utc::now(),
        })
    }

    async fn logout(&self) -> Result<()> {
        let mut s = self.write()?;
        s.logout_count += 1;
        Ok(())
    }

    async fn retrieve_inventory(&self, _root: &ManagedRef) -> Result<Vec<InventoryObject>> {
        let mut s = self.write()?;
        s.inventory_count += 1;
        if s.fail_inventory {
            return Err(VsphereError::RemoteCall(format!(
                "{}: property retrieval failed",
                self.address
            )));
        }
        Ok(s.inventory.clone())
    }

    async fn find_by_uuid(&self, instance_uuid: Uuid) -> Result<Option<ManagedRef>> {
        let s = self.read()?;
        let wanted = instance_uuid.to_string();
        for obj in &s.inventory {
            if let InventoryObject::Machine(m) = obj {
                if m.instance_uuid.as_deref() == Some(wanted.as_str()) {
                    return Ok(Some(m.vm_ref.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn recent_tasks(&self) -> Result<Vec<TaskRecord>> {
        let s = self.read()?;
        if s.fail_tasks {
            return Err(VsphereError::RemoteCall(format!(
                "{}: task manager unavailable",
                self.address
            )));
        }
        Ok(s.recent.clone())
    }

    async fn power_events_since(&self, since: DateTime<Utc>) -> Result<Vec<PowerEvent>> {
        let s = self.read()?;
        if s.fail_events {
            return Err(VsphereError::RemoteCall(format!(
                "{}: event collector unavailable",
                self.address
            )));
        }
        Ok(s
            .events
            .iter()
            .filter(|e| e.created_at > since)
            .cloned()
            .collect())
    }

    async fn wait_for_task(&self, task: &TaskRef) -> Result<TaskOutcome> {
        let s = self.read()?;
        Ok(s.task_outcomes
            .get(&task.key)
            .cloned()
            .unwrap_or(TaskOutcome::Success))
    }

    async fn power_on(&self, vm: &ManagedRef) -> Result<TaskRef> {
        let outcome = self
            .read()?
            .power_on_outcome
            .clone()
            .unwrap_or(TaskOutcome::Success);
        self.next_task("powerOn", vm, outcome)
    }

    async fn power_off(&self, vm: &ManagedRef) -> Result<TaskRef> {
        let outcome = self
            .read()?
            .power_off_outcome
            .clone()
            .unwrap_or(TaskOutcome::Success);
        self.next_task("powerOff", vm, outcome)
    }

    async fn shutdown_guest(&self, vm: &ManagedRef) -> Result<()> {
        let mut s = self.write()?;
        s.submitted.push(format!("shutdownGuest {}", vm.value));
        Ok(())
    }

    async fn acquire_console_ticket(
        &self,
        vm: &ManagedRef,
        kind: TicketKind,
    ) -> Result<ConsoleTicket> {
        let prefix = match kind {
            TicketKind::WebMks => "webmks",
            TicketKind::Mks => "mks",
        };
        Ok(ConsoleTicket {
            ticket: format!("{}-ticket-{}", prefix, vm.value),
            host: Some(self.address.clone()),
            port: Some(443),
        })
    }

    async fn reconfigure(&self, vm: &ManagedRef, spec: ReconfigureSpec) -> Result<TaskRef> {
        let op = match spec {
            ReconfigureSpec::MountIso { .. } => "reconfigure.mountIso",
            ReconfigureSpec::EjectIso { .. } => "reconfigure.ejectIso",
            ReconfigureSpec::ConnectNetwork { .. } => "reconfigure.connectNetwork",
            ReconfigureSpec::BootDelay { .. } => "reconfigure.bootDelay",
        };
        self.next_task(op, vm, TaskOutcome::Success)
    }

    async fn revert_to_current_snapshot(&self, vm: &ManagedRef) -> Result<TaskRef> {
        self.next_task("revertSnapshot", vm, TaskOutcome::Success)
    }

    async fn set_screen_resolution(&self, vm: &ManagedRef, width: u32, height: u32) -> Result<()> {
        let mut s = self.write()?;
        s.submitted.push(format!("setResolution {}", vm.value));
        s.resolution = Some((width, height));
        Ok(())
    }

    async fn initiate_file_upload(
        &self,
        vm: &ManagedRef,
        _auth: &GuestAuth,
        guest_path: &str,
        _size: u64,
    ) -> Result<String> {
        let mut s = self.write()?;
        s.submitted.push(format!("fileUpload {}", vm.value));
        Ok(format!(
            "https://{}/guestFile?path={}",
            self.address,
            urlencoding::encode(guest_path)
        ))
    }

    async fn initiate_file_download(
        &self,
        vm: &ManagedRef,
        _auth: &GuestAuth,
        guest_path: &str,
    ) -> Result<FileTransferInfo> {
        let mut s = self.write()?;
        s.submitted.push(format!("fileDownload {}", vm.value));
        Ok(FileTransferInfo {
            url: format!(
                "https://{}/guestFile?path={}",
                self.address,
                urlencoding::encode(guest_path)
            ),
            size: 0,
        })
    }

    async fn browse_datastore(
        &self,
        _browser: &ManagedRef,
        datastore_name: &str,
        _folder: &str,
        pattern: &str,
    ) -> Result<Vec<DatastoreFile>> {
        let s = self.read()?;
        let files = s
            .datastore_files
            .get(datastore_name)
            .cloned()
            .unwrap_or_default();
        if let Some(suffix) = pattern.strip_prefix('*') {
            Ok(files
                .into_iter()
                .filter(|f| f.path.ends_with(suffix))
                .collect())
        } else {
            Ok(files)
        }
    }
}

/// Factory handing out one shared mock client per host address.
///
/// Reconnects and session renewals get the same underlying mock, so a
/// scripted endpoint keeps its inventory and counters across client swaps.
pub struct MockVimFactory {
    clients: DashMap<String, Arc<MockVimClient>>,
}

impl MockVimFactory {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Pre-register a scripted client for an address.
    pub fn register(&self, address: impl Into<String>, client: Arc<MockVimClient>) {
        self.clients.insert(address.into(), client);
    }

    /// Get the client for an address, if one exists.
    pub fn client(&self, address: &str) -> Option<Arc<MockVimClient>> {
        self.clients.get(address).map(|e| e.value().clone())
    }
}

impl Default for MockVimFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl VimClientFactory for MockVimFactory {
    fn create(&self, host: &HostConfig) -> Arc<dyn VimClient> {
        self.clients
            .entry(host.address.clone())
            .or_insert_with(|| Arc::new(MockVimClient::new(host.address.clone())))
            .value()
            .clone()
    }
}
