//! Daemon configuration loading.

use anyhow::{Context, Result};
use serde::Deserialize;
use virtfleet_vsphere::FleetConfig;

use crate::cli::Args;

/// Which VIM client backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientBackend {
    /// In-memory mock backend (development and testing)
    Mock,
    /// SOAP/vim25 binding
    Soap,
}

impl Default for ClientBackend {
    fn default() -> Self {
        Self::Mock
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: ClientBackend,
    pub fleet: FleetConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(config)
    }

    /// Apply CLI overrides on top of loaded configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(interval) = args.poll_interval {
            self.fleet.poll_interval_secs = interval;
        }
        if args.dev {
            self.backend = ClientBackend::Mock;
        }
        self
    }

    /// Build a configuration purely from CLI arguments and defaults.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
backend: soap
fleet:
  poll_interval_secs: 15
  hosts:
    - address: vcenter-a.example.com
      username: svc-fleet
      password: secret
      datastore: iso-store
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend, ClientBackend::Soap);
        assert_eq!(config.fleet.poll_interval_secs, 15);
        assert_eq!(config.fleet.hosts.len(), 1);
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from(["virtfleet-node", "--poll-interval", "5", "--dev"]);
        let mut config = Config::default();
        config.backend = ClientBackend::Soap;
        let config = config.with_cli_overrides(&args);
        assert_eq!(config.fleet.poll_interval_secs, 5);
        assert_eq!(config.backend, ClientBackend::Mock);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, ClientBackend::Mock);
        assert!(config.fleet.hosts.is_empty());
    }
}
