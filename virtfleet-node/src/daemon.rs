//! Daemon wiring: backend selection, polling loops and signal handling.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use virtfleet_vsphere::{
    ConnectionRegistry, LogNotifier, MemoryVmStore, MockVimFactory, PowerEventPoller, TaskPoller,
    VimClientFactory,
};

use crate::config::{ClientBackend, Config};

pub async fn run(config: Config, config_path: Option<String>) -> Result<()> {
    let factory: Arc<dyn VimClientFactory> = match config.backend {
        ClientBackend::Mock => {
            info!("Using mock VIM backend");
            Arc::new(MockVimFactory::new())
        }
        ClientBackend::Soap => {
            warn!("SOAP backend not built into this binary, falling back to mock");
            Arc::new(MockVimFactory::new())
        }
    };

    let store = Arc::new(MemoryVmStore::new());
    let notifier = Arc::new(LogNotifier);
    let fleet = Arc::new(RwLock::new(config.fleet));

    let registry = Arc::new(ConnectionRegistry::new(
        fleet.clone(),
        factory,
        store.clone(),
    ));
    let events = Arc::new(PowerEventPoller::new(
        registry.clone(),
        store.clone(),
        fleet.clone(),
    ));
    let tasks = Arc::new(TaskPoller::new(
        registry.clone(),
        store,
        notifier,
        events.wake_sender(),
        fleet.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(4);

    let mut handles = Vec::new();
    {
        let registry = registry.clone();
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { registry.run(shutdown).await }));
    }
    {
        let events = events.clone();
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { events.run(shutdown).await }));
    }
    {
        let tasks = tasks.clone();
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { tasks.run(shutdown).await }));
    }

    info!("virtfleet node daemon running");
    wait_for_signals(&fleet, &registry, config_path).await;

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Block until SIGINT/ctrl-c. On SIGHUP, reload the fleet section of the
/// config file and trigger an immediate polling cycle.
#[cfg(unix)]
async fn wait_for_signals(
    fleet: &Arc<RwLock<virtfleet_vsphere::FleetConfig>>,
    registry: &Arc<ConnectionRegistry>,
    config_path: Option<String>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = hangup.recv() => {
                let Some(path) = config_path.as_deref() else {
                    warn!("SIGHUP received but no config file to reload");
                    continue;
                };
                match Config::load(path) {
                    Ok(reloaded) => {
                        info!(config_path = %path, "Configuration reloaded");
                        *fleet.write().await = reloaded.fleet;
                        registry.wake();
                    }
                    Err(e) => {
                        error!(error = %e, config_path = %path, "Config reload failed, keeping current configuration");
                    }
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(
    _fleet: &Arc<RwLock<virtfleet_vsphere::FleetConfig>>,
    _registry: &Arc<ConnectionRegistry>,
    _config_path: Option<String>,
) {
    let _ = tokio::signal::ctrl_c().await;
}
