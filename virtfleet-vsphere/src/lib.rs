//! # virtfleet vSphere
//!
//! Connection, cache and reconciliation subsystem for a fleet of vSphere
//! management endpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            ConnectionRegistry                │
//! │  (polling cycle, machine-to-host index)      │
//! └──────┬───────────────┬───────────────┬───────┘
//!        │               │               │
//!        ▼               ▼               ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │ HostConn.  │  │ TaskPoller │  │ PowerEvent │
//! │ (session + │  │ (progress, │  │ Poller     │
//! │  caches)   │  │  flags)    │  │            │
//! └─────┬──────┘  └────────────┘  └────────────┘
//!       │
//!       ▼
//! ┌────────────────────────────────────────┐
//! │            VimClient trait             │
//! │   (SOAP binding or in-tree mock)       │
//! └────────────────────────────────────────┘
//! ```
//!
//! Commands go through [`RemoteOperations`], which routes each machine to
//! its owning host via the registry index. Reconciled state is written to a
//! [`VmStore`] projection; task progress is pushed through a [`Notifier`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//! use virtfleet_vsphere::{
//!     ConnectionRegistry, FleetConfig, MemoryVmStore, MockVimFactory, RemoteOperations,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(RwLock::new(FleetConfig::default()));
//!     let registry = Arc::new(ConnectionRegistry::new(
//!         config,
//!         Arc::new(MockVimFactory::new()),
//!         Arc::new(MemoryVmStore::new()),
//!     ));
//!     let ops = RemoteOperations::new(registry.clone());
//!
//!     let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//!     registry.run(shutdown_tx.subscribe()).await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod health;
pub mod host;
pub mod mock;
pub mod notify;
pub mod registry;
pub mod session;
pub mod store;
pub mod tasks;
pub mod types;

pub use client::{
    ChannelState, ConsoleTicket, DatastoreFile, GuestAuth, ReconfigureSpec, TaskOutcome, TaskRef,
    TicketKind, VimClient, VimClientFactory,
};
pub use config::{FleetConfig, HostConfig};
pub use error::{Result, VsphereError};
pub use events::PowerEventPoller;
pub use facade::{RemoteOperations, SUBMITTED};
pub use health::{HealthState, HostHealth};
pub use host::HostConnection;
pub use mock::{MockVimClient, MockVimFactory};
pub use notify::{BroadcastMessage, ChannelNotifier, LogNotifier, Notifier};
pub use registry::ConnectionRegistry;
pub use store::{MemoryVmStore, VmStore};
pub use tasks::TaskPoller;
pub use types::*;
