//! Core VIM client abstraction trait.
//!
//! This trait defines the interface every management-endpoint backend must
//! implement. The protocol contract is: authenticate, obtain a
//! property-collector handle, then issue typed property-filter queries and
//! task-returning calls. A SOAP/vim25 binding and the in-tree mock backend
//! both plug in behind this seam.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::error::Result;
use crate::types::*;

/// State of the underlying communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel is usable
    Open,
    /// Channel entered a faulted state and must be torn down
    Faulted,
    /// Channel was closed
    Closed,
}

/// Opaque authentication handle returned by a successful login.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Remote session key
    pub key: String,
    /// Authenticated user
    pub user_name: String,
    /// Remote login time
    pub login_time: DateTime<Utc>,
}

/// Service content retrieved from the endpoint; doubles as liveness probe.
#[derive(Debug, Clone)]
pub struct ServiceContent {
    /// Endpoint product name
    pub api_name: String,
    /// Endpoint API version
    pub api_version: String,
    /// Inventory root folder
    pub root_folder: ManagedRef,
    /// Property collector handle
    pub property_collector: ManagedRef,
    /// Session manager handle
    pub session_manager: ManagedRef,
}

/// Guest network info attached to a machine's inventory properties.
#[derive(Debug, Clone, Default)]
pub struct GuestNet {
    /// Reported addresses; entries may be unset
    pub ip_addresses: Vec<Option<String>>,
}

/// Raw machine properties from an inventory retrieval.
#[derive(Debug, Clone)]
pub struct MachineProps {
    pub vm_ref: ManagedRef,
    /// Stable instance UUID; machines without a parsable one are skipped
    pub instance_uuid: Option<String>,
    pub name: String,
    /// Authoritative power state wire string
    pub power_state: String,
    /// Tools status wire string, if reported
    pub tools_status: Option<String>,
    pub guest_nets: Vec<GuestNet>,
    pub devices: Vec<VirtualDevice>,
    pub has_snapshot: bool,
}

impl MachineProps {
    /// Convenience constructor with sensible defaults for the optional parts.
    pub fn new(vm_ref: ManagedRef, instance_uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            vm_ref,
            instance_uuid: Some(instance_uuid.to_string()),
            name: name.into(),
            power_state: "poweredOff".to_string(),
            tools_status: None,
            guest_nets: Vec::new(),
            devices: Vec::new(),
            has_snapshot: false,
        }
    }
}

/// Raw plain-network properties.
#[derive(Debug, Clone)]
pub struct NetworkProps {
    pub net_ref: ManagedRef,
    pub name: String,
    /// Physical hosts that can see this network
    pub host_refs: Vec<ManagedRef>,
}

/// Raw distributed portgroup properties.
#[derive(Debug, Clone)]
pub struct PortgroupProps {
    pub pg_ref: ManagedRef,
    pub name: String,
    /// Owning distributed switch
    pub switch_ref: ManagedRef,
    pub host_refs: Vec<ManagedRef>,
}

/// Raw distributed switch properties.
#[derive(Debug, Clone)]
pub struct SwitchProps {
    pub switch_ref: ManagedRef,
    /// Switch id used by portgroup records
    pub uuid: String,
    /// Uplink portgroups, excluded from the network cache
    pub uplink_portgroups: Vec<ManagedRef>,
}

/// Raw datastore properties.
#[derive(Debug, Clone)]
pub struct DatastoreProps {
    pub ds_ref: ManagedRef,
    pub name: String,
    pub browser_ref: ManagedRef,
}

/// One object from the recursive inventory retrieval, partitioned by type.
#[derive(Debug, Clone)]
pub enum InventoryObject {
    Machine(MachineProps),
    Network(NetworkProps),
    DistributedPortgroup(PortgroupProps),
    DistributedSwitch(SwitchProps),
    Datastore(DatastoreProps),
    /// Object type this system does not understand; logged and skipped
    Unrecognized(ManagedRef),
}

/// Reference to a submitted long-running task.
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub task_ref: ManagedRef,
    pub key: String,
}

/// Final outcome of a long-running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Error(String),
    Cancelled,
}

/// One record from a host's recent-task list.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Remote task key
    pub key: String,
    /// Descriptor id (e.g., "VirtualMachine.powerOn")
    pub descriptor: String,
    /// Human-readable task name
    pub name: String,
    pub state: TaskState,
    pub progress: Option<i32>,
    /// Entity the task applies to
    pub entity: Option<ManagedRef>,
    pub cancelled: bool,
    pub error: Option<String>,
    /// Remote queue time, used for per-machine de-duplication
    pub queued_at: DateTime<Utc>,
}

/// Console ticket variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketKind {
    WebMks,
    Mks,
}

/// Console connection ticket.
#[derive(Debug, Clone)]
pub struct ConsoleTicket {
    pub ticket: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Guest OS credentials for file-transfer operations.
#[derive(Debug, Clone)]
pub struct GuestAuth {
    pub username: String,
    pub password: String,
}

/// Result of a download handshake: where to GET the file from.
#[derive(Debug, Clone)]
pub struct FileTransferInfo {
    pub url: String,
    pub size: u64,
}

/// A file found while browsing a datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreFile {
    pub path: String,
    pub size: u64,
}

/// Device reconfiguration request, narrowed to the operations this system
/// issues.
#[derive(Debug, Clone)]
pub enum ReconfigureSpec {
    MountIso {
        device_key: i32,
        datastore_path: String,
    },
    EjectIso {
        device_key: i32,
    },
    ConnectNetwork {
        device_key: i32,
        network_name: String,
        distributed: bool,
        switch_id: Option<String>,
    },
    BootDelay {
        millis: i64,
    },
}

/// Client for one hypervisor management endpoint.
///
/// All calls are asynchronous I/O; implementations must be safe to share
/// across the polling loops and the synchronous command surface.
#[async_trait]
pub trait VimClient: Send + Sync {
    // =========================================================================
    // Session
    // =========================================================================

    /// Current state of the communication channel.
    fn channel_state(&self) -> ChannelState;

    /// Retrieve service content. Also used as the cheap liveness probe.
    async fn retrieve_service_content(&self) -> Result<ServiceContent>;

    /// Authenticate and obtain a session handle.
    async fn login(&self, username: &str, password: &str) -> Result<SessionHandle>;

    /// Terminate the session. Best effort; errors are ignored by callers.
    async fn logout(&self) -> Result<()>;

    // =========================================================================
    // Inventory & identity
    // =========================================================================

    /// One recursive property retrieval rooted at the given folder,
    /// returning every machine, network, switch, portgroup and datastore
    /// visible beneath it.
    async fn retrieve_inventory(&self, root: &ManagedRef) -> Result<Vec<InventoryObject>>;

    /// Look up a machine by its stable instance UUID.
    async fn find_by_uuid(&self, instance_uuid: Uuid) -> Result<Option<ManagedRef>>;

    // =========================================================================
    // Tasks & events
    // =========================================================================

    /// The host task manager's recent-task list.
    async fn recent_tasks(&self) -> Result<Vec<TaskRecord>>;

    /// Power events created after `since` (event-collector create/read/destroy).
    async fn power_events_since(&self, since: DateTime<Utc>) -> Result<Vec<PowerEvent>>;

    /// Block until the given task reaches a terminal state.
    async fn wait_for_task(&self, task: &TaskRef) -> Result<TaskOutcome>;

    // =========================================================================
    // Commands
    // =========================================================================

    async fn power_on(&self, vm: &ManagedRef) -> Result<TaskRef>;

    async fn power_off(&self, vm: &ManagedRef) -> Result<TaskRef>;

    /// Graceful guest shutdown; not task-returning.
    async fn shutdown_guest(&self, vm: &ManagedRef) -> Result<()>;

    async fn acquire_console_ticket(
        &self,
        vm: &ManagedRef,
        kind: TicketKind,
    ) -> Result<ConsoleTicket>;

    async fn reconfigure(&self, vm: &ManagedRef, spec: ReconfigureSpec) -> Result<TaskRef>;

    async fn revert_to_current_snapshot(&self, vm: &ManagedRef) -> Result<TaskRef>;

    async fn set_screen_resolution(&self, vm: &ManagedRef, width: u32, height: u32) -> Result<()>;

    // =========================================================================
    // Guest file transfer
    // =========================================================================

    /// Initiate a guest file upload; returns the URL to PUT the content to.
    async fn initiate_file_upload(
        &self,
        vm: &ManagedRef,
        auth: &GuestAuth,
        guest_path: &str,
        size: u64,
    ) -> Result<String>;

    /// Initiate a guest file download; returns the URL to GET the content
    /// from.
    async fn initiate_file_download(
        &self,
        vm: &ManagedRef,
        auth: &GuestAuth,
        guest_path: &str,
    ) -> Result<FileTransferInfo>;

    // =========================================================================
    // Datastore
    // =========================================================================

    /// Browse a datastore folder for files matching a glob pattern.
    async fn browse_datastore(
        &self,
        browser: &ManagedRef,
        datastore_name: &str,
        folder: &str,
        pattern: &str,
    ) -> Result<Vec<DatastoreFile>>;
}

/// Factory constructing clients for configured hosts.
///
/// A fresh client is requested on reconnect and on proactive session
/// renewal, so construction must be cheap and must not perform I/O.
pub trait VimClientFactory: Send + Sync {
    fn create(&self, host: &HostConfig) -> Arc<dyn VimClient>;
}
