//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, InterfaceConfig};
use crate::debug::Debug;
use crate::device::DeviceWatcher;
use crate::error::Error;
use crate::netlink::NetlinkWatcher;
use crate::network::{SocketProvider, SystemSocketProvider};
use crate::worker::{WorkerHandle, WorkerMsg, WorkerState};

// Aggregated view of all interface workers, ordered by interface name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Status {
    pub interfaces: Vec<InterfaceStatus>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceStatus {
    pub name: String,
    pub state: WorkerState,
    // Populated while the worker is failing.
    pub message: Option<String>,
}

/// The supervisor: owns the desired configuration and reconciles a set of
/// per-interface workers against it.
///
/// Workers communicate with the supervisor only through channels; the
/// worker table lock is held for bookkeeping only, never across I/O.
pub struct Daemon {
    config: Mutex<Config>,
    workers: Mutex<BTreeMap<String, WorkerHandle>>,
    // Serializes reconciliation: one reload at a time.
    reconcile: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    socket_provider: Arc<dyn SocketProvider>,
    device_watcher: Arc<dyn DeviceWatcher>,
}

// ===== impl Daemon =====

impl Daemon {
    /// Creates a daemon for the given configuration.
    ///
    /// Fails if the configuration is invalid. No worker is spawned until
    /// [`Daemon::run`] is called.
    pub fn new(config: Config) -> Result<Daemon, Error> {
        config.validate()?;

        Ok(Daemon {
            config: Mutex::new(config),
            workers: Mutex::new(BTreeMap::new()),
            reconcile: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            socket_provider: Arc::new(SystemSocketProvider::default()),
            device_watcher: Arc::new(NetlinkWatcher::new()),
        })
    }

    /// Replaces the socket factory (used by tests to observe traffic).
    pub fn with_socket_provider(
        mut self,
        provider: Arc<dyn SocketProvider>,
    ) -> Daemon {
        self.socket_provider = provider;
        self
    }

    /// Replaces the device watcher (used by tests to inject link state).
    pub fn with_device_watcher(
        mut self,
        watcher: Arc<dyn DeviceWatcher>,
    ) -> Daemon {
        self.device_watcher = watcher;
        self
    }

    /// Drives the workers until `cancel` fires, then tears everything
    /// down. Returns once every worker has stopped and closed its socket.
    pub async fn run(&self, cancel: CancellationToken) {
        {
            let _serial = self.reconcile.lock().await;
            let interfaces = self.config.lock().unwrap().interfaces.clone();
            for config in interfaces {
                self.spawn_worker(config).await;
            }
        }
        info!("daemon running");

        cancel.cancelled().await;
        info!("shutting down");

        // Serialized with reload so no worker slips past the drain.
        let _serial = self.reconcile.lock().await;
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for (name, handle) in handles {
            let _ = handle.await_stopped(far_future()).await;
            self.device_watcher.unsubscribe(&name).await;
            Debug::WorkerDelete(&name).log();
        }
    }

    /// Atomically swaps in a new configuration, stopping removed workers,
    /// spawning added ones and updating the rest.
    ///
    /// Fails with a validation error if `config` is invalid and with a
    /// deadline error if removed workers do not stop in time; in the
    /// latter case, workers that already received the new configuration
    /// keep it.
    pub async fn reload(
        &self,
        deadline: Instant,
        config: Config,
    ) -> Result<(), Error> {
        config.validate()?;

        let _serial = self.reconcile.lock().await;
        Debug::ConfigReload.log();

        let old =
            std::mem::replace(&mut *self.config.lock().unwrap(), config.clone());
        let old_names: BTreeSet<&String> =
            old.interfaces.iter().map(|iface| &iface.name).collect();
        let new_names: BTreeSet<&String> =
            config.interfaces.iter().map(|iface| &iface.name).collect();

        // Stop workers whose interface was removed.
        for &name in old_names.difference(&new_names) {
            let handle = self.workers.lock().unwrap().remove(name);
            if let Some(mut handle) = handle {
                handle.cancel.cancel();
                if let Err(error) = handle.await_stopped(deadline).await {
                    // The stop stays queued: the worker finishes closing
                    // its socket in the background.
                    handle.detach();
                    error.log();
                    return Err(error);
                }
                self.device_watcher.unsubscribe(name).await;
                Debug::WorkerDelete(name).log();
            }
        }

        for iface in config.interfaces {
            if old_names.contains(&iface.name) {
                // Push the new snapshot to the kept worker.
                let workers = self.workers.lock().unwrap();
                if let Some(handle) = workers.get(&iface.name) {
                    let _ =
                        handle.ctl_tx.send(WorkerMsg::ConfigUpdate(iface));
                }
            } else {
                self.spawn_worker(iface).await;
            }
        }

        Ok(())
    }

    /// Returns a snapshot of all worker states, ordered by interface name.
    ///
    /// The snapshot is eventually consistent and never blocks
    /// reconciliation.
    pub fn status(&self) -> Status {
        let workers = self.workers.lock().unwrap();
        Status {
            interfaces: workers
                .iter()
                .map(|(name, handle)| {
                    let state = handle.state_rx.borrow().clone();
                    let message =
                        state.failing_reason().map(str::to_owned);
                    InterfaceStatus {
                        name: name.clone(),
                        state,
                        message,
                    }
                })
                .collect(),
        }
    }

    async fn spawn_worker(&self, config: InterfaceConfig) {
        let dev_rx = self.device_watcher.subscribe(&config.name).await;
        let handle = WorkerHandle::spawn(
            &config.name,
            config.clone(),
            self.socket_provider.clone(),
            dev_rx,
            self.shutdown.child_token(),
        );
        self.workers.lock().unwrap().insert(config.name, handle);
    }
}

// ===== helper functions =====

fn far_future() -> Instant {
    // Mirrors tokio's internal notion of "never": ~30 years out.
    Instant::now() + std::time::Duration::from_secs(86400 * 365 * 30)
}
