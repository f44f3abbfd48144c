//! Fleet and per-host configuration.
//!
//! Configuration is hot-reloadable: the registry re-reads the shared config
//! at the start of every polling cycle, so host edits take effect without a
//! restart.

use std::time::Duration;

use serde::Deserialize;

/// Fleet-wide configuration: the host list plus global tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Configured hypervisor management endpoints
    pub hosts: Vec<HostConfig>,
    /// Registry polling interval in seconds
    pub poll_interval_secs: u64,
    /// Per-cycle dispatch timeout in seconds
    pub dispatch_timeout_secs: u64,
    /// Full inventory load every N registry cycles
    pub inventory_every_n_cycles: u32,
    /// Proactive session renewal threshold in minutes
    pub session_refresh_minutes: u64,
    /// Task poll interval while work is pending, in seconds
    pub task_poll_fast_secs: u64,
    /// Task poll interval while idle, in seconds
    pub task_poll_slow_secs: u64,
    /// Power event poll interval in seconds
    pub event_poll_secs: u64,
    /// Liveness allowance window in seconds
    pub health_allowance_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            poll_interval_secs: 30,
            dispatch_timeout_secs: 20,
            inventory_every_n_cycles: 10,
            session_refresh_minutes: 25,
            task_poll_fast_secs: 2,
            task_poll_slow_secs: 15,
            event_poll_secs: 10,
            health_allowance_secs: 120,
        }
    }
}

impl FleetConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn task_poll_fast(&self) -> Duration {
        Duration::from_secs(self.task_poll_fast_secs)
    }

    pub fn task_poll_slow(&self) -> Duration {
        Duration::from_secs(self.task_poll_slow_secs)
    }

    pub fn event_poll(&self) -> Duration {
        Duration::from_secs(self.event_poll_secs)
    }

    pub fn health_allowance(&self) -> Duration {
        Duration::from_secs(self.health_allowance_secs)
    }
}

/// Configuration for one hypervisor management endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Endpoint address (hostname or IP)
    pub address: String,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Datastore holding ISO images for this host
    pub datastore: String,
    /// Inventory root folder
    pub base_folder: String,
    /// Whether this host participates in polling
    pub enabled: bool,
    /// Per-host override of the fleet inventory cadence
    pub inventory_every_n_cycles: Option<u32>,
    /// Per-host override of the session refresh threshold
    pub session_refresh_minutes: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: String::new(),
            password: String::new(),
            datastore: String::new(),
            base_folder: "Datacenters".to_string(),
            enabled: true,
            inventory_every_n_cycles: None,
            session_refresh_minutes: None,
        }
    }
}

impl HostConfig {
    /// Effective inventory cadence for this host.
    pub fn inventory_cadence(&self, fleet: &FleetConfig) -> u32 {
        self.inventory_every_n_cycles
            .unwrap_or(fleet.inventory_every_n_cycles)
            .max(1)
    }

    /// Effective session refresh threshold for this host.
    pub fn session_refresh(&self, fleet: &FleetConfig) -> Duration {
        Duration::from_secs(
            self.session_refresh_minutes
                .unwrap_or(fleet.session_refresh_minutes)
                * 60,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(30));
        assert_eq!(cfg.inventory_every_n_cycles, 10);
        assert!(cfg.hosts.is_empty());
    }

    #[test]
    fn test_host_overrides() {
        let fleet = FleetConfig::default();
        let mut host = HostConfig::default();
        assert_eq!(host.inventory_cadence(&fleet), 10);
        assert_eq!(host.session_refresh(&fleet), Duration::from_secs(25 * 60));

        host.inventory_every_n_cycles = Some(3);
        host.session_refresh_minutes = Some(5);
        assert_eq!(host.inventory_cadence(&fleet), 3);
        assert_eq!(host.session_refresh(&fleet), Duration::from_secs(300));
    }

    #[test]
    fn test_cadence_never_zero() {
        let mut fleet = FleetConfig::default();
        fleet.inventory_every_n_cycles = 0;
        let host = HostConfig::default();
        assert_eq!(host.inventory_cadence(&fleet), 1);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
poll_interval_secs: 5
hosts:
  - address: vcenter-a.example.com
    username: svc-fleet
    password: secret
    datastore: iso-store
    enabled: true
  - address: vcenter-b.example.com
    enabled: false
"#;
        let cfg: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.hosts.len(), 2);
        assert_eq!(cfg.hosts[0].address, "vcenter-a.example.com");
        assert!(!cfg.hosts[1].enabled);
        // Unspecified tunables fall back to defaults
        assert_eq!(cfg.dispatch_timeout_secs, 20);
    }
}
