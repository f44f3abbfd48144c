//! Error types for the vSphere fleet subsystem.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while talking to a hypervisor management endpoint.
#[derive(Error, Debug)]
pub enum VsphereError {
    /// Failed to connect to a management endpoint.
    #[error("Failed to connect to host: {0}")]
    ConnectionFailed(String),

    /// Login was rejected by the endpoint.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No authenticated session is currently established.
    #[error("Session is not established")]
    NoSession,

    /// The communication channel to the endpoint was lost or faulted.
    #[error("Communication channel lost: {0}")]
    ChannelLost(String),

    /// Machine could not be resolved on any connected host.
    #[error("Machine not found: {0}")]
    MachineNotFound(Uuid),

    /// A remote call failed.
    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    /// A long-running remote task finished in an error state.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// An inventory object could not be interpreted.
    #[error("Invalid inventory object: {0}")]
    InvalidInventory(String),

    /// Guest file transfer failed.
    #[error("File transfer failed: {0}")]
    FileTransfer(String),

    /// The persistent store rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// A notification could not be delivered.
    #[error("Notification error: {0}")]
    Notify(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for vSphere fleet operations.
pub type Result<T> = std::result::Result<T, VsphereError>;
