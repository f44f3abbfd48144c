//! Liveness and readiness state for the polling loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health snapshot for one configured host.
#[derive(Debug, Clone, Serialize)]
pub struct HostHealth {
    pub address: String,
    pub enabled: bool,
    pub connected: bool,
}

/// Shared health state updated by the registry each cycle.
///
/// Liveness is "a cycle completed recently": the last cycle timestamp must
/// fall within the poll interval plus a configured allowance.
pub struct HealthState {
    startup_complete: AtomicBool,
    last_cycle: RwLock<Option<DateTime<Utc>>>,
    window: RwLock<Duration>,
    connections: RwLock<Vec<HostHealth>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            startup_complete: AtomicBool::new(false),
            last_cycle: RwLock::new(None),
            window: RwLock::new(Duration::from_secs(150)),
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn mark_started(&self) {
        self.startup_complete.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    /// Record a completed cycle and the window within which the next one is
    /// expected (poll interval plus allowance).
    pub fn record_cycle(&self, at: DateTime<Utc>, window: Duration) {
        if let Ok(mut last) = self.last_cycle.write() {
            *last = Some(at);
        }
        if let Ok(mut w) = self.window.write() {
            *w = window;
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let window = self.window.read().map(|w| *w).unwrap_or_default();
        match self.last_cycle.read().ok().and_then(|l| *l) {
            Some(last) => {
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                elapsed <= window
            }
            None => !self.is_started(),
        }
    }

    pub fn set_connections(&self, connections: Vec<HostHealth>) {
        if let Ok(mut c) = self.connections.write() {
            *c = connections;
        }
    }

    pub fn connections(&self) -> Vec<HostHealth> {
        self.connections.read().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
