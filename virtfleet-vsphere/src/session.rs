//! Authenticated session bookkeeping.

use std::time::{Duration, Instant};

use crate::client::{ServiceContent, SessionHandle};
use crate::types::ManagedRef;

/// An established, authenticated session against one endpoint.
///
/// Tracks local wall-clock age so the connection can renew proactively
/// before the remote side expires it.
#[derive(Debug, Clone)]
pub struct Session {
    handle: SessionHandle,
    content: ServiceContent,
    established: Instant,
    last_active: Instant,
}

impl Session {
    pub fn new(handle: SessionHandle, content: ServiceContent) -> Self {
        let now = Instant::now();
        Self {
            handle,
            content,
            established: now,
            last_active: now,
        }
    }

    /// Time since the session was established.
    pub fn age(&self) -> Duration {
        self.established.elapsed()
    }

    /// Whether the session is old enough to warrant a proactive renewal.
    pub fn needs_refresh(&self, threshold: Duration) -> bool {
        self.age() >= threshold
    }

    /// Record activity on this session.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn root_folder(&self) -> &ManagedRef {
        &self.content.root_folder
    }

    pub fn property_collector(&self) -> &ManagedRef {
        &self.content.property_collector
    }

    pub fn api_version(&self) -> &str {
        &self.content.api_version
    }
}
