//! Type definitions for machines, networks, datastores, tasks and events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// REMOTE REFERENCES
// =============================================================================

/// Opaque handle identifying a remote managed object.
///
/// References are scoped to one connection and are not stable across
/// reconnects, which is why every cache also carries the stable UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedRef {
    /// Remote object type (e.g., "VirtualMachine", "Datastore")
    pub kind: String,
    /// Remote object identifier (e.g., "vm-1042")
    pub value: String,
}

impl ManagedRef {
    /// Create a new managed object reference.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Shorthand for a virtual machine reference.
    pub fn vm(value: impl Into<String>) -> Self {
        Self::new("VirtualMachine", value)
    }
}

impl fmt::Display for ManagedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

// =============================================================================
// MACHINE STATE
// =============================================================================

/// Machine power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    On,
    Off,
    Suspended,
    Unknown,
}

impl PowerState {
    /// Parse the authoritative wire string reported by the endpoint.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "poweredOn" => PowerState::On,
            "poweredOff" => PowerState::Off,
            "suspended" => PowerState::Suspended,
            _ => PowerState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
            PowerState::Suspended => "suspended",
            PowerState::Unknown => "unknown",
        }
    }
}

impl Default for PowerState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Guest tools status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolsStatus {
    NotInstalled,
    NotRunning,
    Ok,
    Old,
}

impl ToolsStatus {
    /// Parse the wire string; an unset status defaults to "not running".
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("toolsOk") => ToolsStatus::Ok,
            Some("toolsOld") => ToolsStatus::Old,
            Some("toolsNotInstalled") => ToolsStatus::NotInstalled,
            _ => ToolsStatus::NotRunning,
        }
    }
}

impl Default for ToolsStatus {
    fn default() -> Self {
        Self::NotRunning
    }
}

/// Virtual device kind, narrowed to the devices this system acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cdrom,
    Ethernet,
    Other,
}

/// A virtual device attached to a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDevice {
    /// Device key, stable within the machine's configuration
    pub key: i32,
    /// Display label
    pub label: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Backing description (e.g., ISO path or network name), if any
    pub backing: Option<String>,
    /// Whether the device is currently connected
    pub connected: bool,
}

/// Cached machine record, keyed by its stable UUID within one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Stable machine identity
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Authoritative power state
    pub power_state: PowerState,
    /// Guest tools status
    pub tools_status: ToolsStatus,
    /// Remote object reference (connection-scoped)
    pub vm_ref: ManagedRef,
    /// Attached virtual devices
    pub devices: Vec<VirtualDevice>,
    /// Guest IP addresses, flattened across all guest networks
    pub ip_addresses: Vec<String>,
    /// Whether the machine currently has a snapshot
    pub has_snapshot: bool,
}

/// Cached network record, grouped per physical host reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Portgroup / network name
    pub name: String,
    /// Remote object reference
    pub net_ref: ManagedRef,
    /// Whether this is a distributed portgroup
    pub distributed: bool,
    /// Owning distributed switch id, for distributed portgroups
    pub switch_id: Option<String>,
}

/// Cached datastore record, keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreRecord {
    /// Datastore name
    pub name: String,
    /// Remote object reference
    pub ds_ref: ManagedRef,
    /// Remote browser reference used for file listing
    pub browser_ref: ManagedRef,
}

// =============================================================================
// TASKS
// =============================================================================

/// Lifecycle state of a hypervisor-tracked asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    /// Whether the task still occupies the "pending work" flag.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Running)
    }
}

/// Task type, narrowed from the endpoint's open string taxonomy to the
/// operations this system acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    PowerOn,
    PowerOff,
    Reconfigure,
    RevertSnapshot,
    Other,
}

impl TaskKind {
    /// Parse a task descriptor id (e.g., "VirtualMachine.powerOn").
    pub fn from_descriptor(descriptor: &str) -> Self {
        match descriptor {
            "VirtualMachine.powerOn" => TaskKind::PowerOn,
            "VirtualMachine.powerOff" => TaskKind::PowerOff,
            "VirtualMachine.reconfigure" => TaskKind::Reconfigure,
            "VirtualMachine.revertToCurrentSnapshot" => TaskKind::RevertSnapshot,
            _ => TaskKind::Other,
        }
    }

    /// Whether this task changes machine power state.
    pub fn is_power(&self) -> bool {
        matches!(self, TaskKind::PowerOn | TaskKind::PowerOff)
    }
}

/// Outbound per-machine task progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct TaskNotification {
    /// Stable machine identity the task applies to
    pub machine_id: Uuid,
    /// Remote task key
    pub task_key: String,
    /// Narrowed task type
    pub kind: TaskKind,
    /// Task lifecycle state
    pub state: TaskState,
    /// Progress percentage, when reported
    pub progress: Option<i32>,
    /// Remote error message for failed tasks
    pub error: Option<String>,
}

// =============================================================================
// POWER EVENTS
// =============================================================================

/// Power event class, narrowed to the events this system reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerEventKind {
    PoweredOn,
    PoweredOff,
    /// DRS-triggered power-on
    DrsPoweredOn,
}

impl PowerEventKind {
    /// The local power state implied by this event.
    pub fn power_state(&self) -> PowerState {
        match self {
            PowerEventKind::PoweredOn | PowerEventKind::DrsPoweredOn => PowerState::On,
            PowerEventKind::PoweredOff => PowerState::Off,
        }
    }
}

/// A power event reported by an endpoint's event collector.
#[derive(Debug, Clone)]
pub struct PowerEvent {
    /// Event class
    pub kind: PowerEventKind,
    /// Machine the event applies to
    pub vm_ref: ManagedRef,
    /// Remote creation time, used for last-write-wins grouping
    pub created_at: DateTime<Utc>,
    /// Remote event key
    pub key: i64,
}

// =============================================================================
// LOCAL PROJECTION
// =============================================================================

/// Backend tag for a locally-projected VM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmBackend {
    Vsphere,
    Proxmox,
}

/// Local VM projection written back by the reconciliation loops.
///
/// The record's full lifecycle (creation/deletion) belongs to the CRUD layer;
/// this subsystem only updates the derived fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmProjection {
    /// Stable machine identity
    pub id: Uuid,
    /// Reconciled power state
    pub power_state: PowerState,
    /// Reconciled guest IP addresses
    pub ip_addresses: Vec<String>,
    /// Whether any remote task is currently queued or running
    pub has_pending_tasks: bool,
    /// Whether the machine currently has a snapshot
    pub has_snapshot: bool,
    /// Owning backend
    pub backend: VmBackend,
}

impl VmProjection {
    /// Create a fresh projection with unknown state.
    pub fn new(id: Uuid, backend: VmBackend) -> Self {
        Self {
            id,
            power_state: PowerState::Unknown,
            ip_addresses: Vec::new(),
            has_pending_tasks: false,
            has_snapshot: false,
            backend,
        }
    }
}
