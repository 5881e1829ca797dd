//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! In-memory fakes for the socket and device-watcher seams, compiled only
//! with the `testing` feature.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::device::{DeviceState, DeviceWatcher};
use crate::error::IoError;
use crate::network::{RaSocket, SocketProvider};
use crate::packet::{RouterAdvertisement, RouterSolicitation};

// A multicast Router Advertisement captured from a fake socket.
#[derive(Clone, Debug)]
pub struct FakeAdvert {
    pub msg: RouterAdvertisement,
    pub tstamp: Instant,
}

// A link-local unicast Router Advertisement captured from a fake socket.
#[derive(Clone, Debug)]
pub struct FakeUnicastAdvert {
    pub msg: RouterAdvertisement,
    pub to: Ipv6Addr,
    pub tstamp: Instant,
}

/// In-memory socket with three observable channels: outgoing multicast,
/// outgoing link-local unicast, and incoming solicitations.
pub struct FakeSocket {
    multicast_tx: mpsc::UnboundedSender<FakeAdvert>,
    multicast_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeAdvert>>,
    unicast_tx: mpsc::UnboundedSender<FakeUnicastAdvert>,
    unicast_rx:
        tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeUnicastAdvert>>,
    rs_tx: mpsc::UnboundedSender<(RouterSolicitation, Ipv6Addr)>,
    rs_rx: tokio::sync::Mutex<
        mpsc::UnboundedReceiver<(RouterSolicitation, Ipv6Addr)>,
    >,
    closed: watch::Sender<bool>,
}

/// Socket factory that records every socket it opens, keyed by interface
/// name, so tests can observe them.
#[derive(Default)]
pub struct FakeSocketRegistry {
    sockets: Mutex<BTreeMap<String, Arc<FakeSocket>>>,
    open_errors: Mutex<HashMap<String, String>>,
}

/// Device watcher fake: tests drive it through [`FakeDeviceWatcher::update`].
#[derive(Default)]
pub struct FakeDeviceWatcher {
    devices: Mutex<HashMap<String, watch::Sender<DeviceState>>>,
}

// ===== impl FakeSocket =====

impl FakeSocket {
    fn new() -> FakeSocket {
        let (multicast_tx, multicast_rx) = mpsc::unbounded_channel();
        let (unicast_tx, unicast_rx) = mpsc::unbounded_channel();
        let (rs_tx, rs_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        FakeSocket {
            multicast_tx,
            multicast_rx: tokio::sync::Mutex::new(multicast_rx),
            unicast_tx,
            unicast_rx: tokio::sync::Mutex::new(unicast_rx),
            rs_tx,
            rs_rx: tokio::sync::Mutex::new(rs_rx),
            closed,
        }
    }

    /// Waits for the next multicast advertisement sent on this socket.
    pub async fn recv_multicast(&self) -> Option<FakeAdvert> {
        self.multicast_rx.lock().await.recv().await
    }

    /// Discards every multicast advertisement queued so far.
    pub async fn drain_multicast(&self) {
        let mut rx = self.multicast_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Waits for the next link-local unicast advertisement sent on this
    /// socket.
    pub async fn recv_unicast(&self) -> Option<FakeUnicastAdvert> {
        self.unicast_rx.lock().await.recv().await
    }

    /// Delivers a Router Solicitation to the worker owning this socket.
    pub fn inject_rs(&self, msg: RouterSolicitation, from: Ipv6Addr) {
        let _ = self.rs_tx.send((msg, from));
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl RaSocket for FakeSocket {
    async fn send_multicast(
        &self,
        msg: &RouterAdvertisement,
    ) -> Result<(), IoError> {
        if self.is_closed() {
            return Err(IoError::SocketClosed);
        }
        self.multicast_tx
            .send(FakeAdvert {
                msg: msg.clone(),
                tstamp: Instant::now(),
            })
            .map_err(|_| IoError::SocketClosed)
    }

    async fn send_unicast(
        &self,
        msg: &RouterAdvertisement,
        dst: Ipv6Addr,
    ) -> Result<(), IoError> {
        if self.is_closed() {
            return Err(IoError::SocketClosed);
        }
        self.unicast_tx
            .send(FakeUnicastAdvert {
                msg: msg.clone(),
                to: dst,
                tstamp: Instant::now(),
            })
            .map_err(|_| IoError::SocketClosed)
    }

    async fn recv_rs(&self) -> Result<(RouterSolicitation, Ipv6Addr), IoError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(IoError::SocketClosed);
        }
        let mut rs_rx = self.rs_rx.lock().await;
        tokio::select! {
            _ = closed.changed() => Err(IoError::SocketClosed),
            msg = rs_rx.recv() => msg.ok_or(IoError::SocketClosed),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

// ===== impl FakeSocketRegistry =====

impl FakeSocketRegistry {
    pub fn new() -> Arc<FakeSocketRegistry> {
        Arc::new(FakeSocketRegistry::default())
    }

    /// Returns the socket most recently opened for the named interface.
    pub fn get(&self, ifname: &str) -> Option<Arc<FakeSocket>> {
        self.sockets.lock().unwrap().get(ifname).cloned()
    }

    /// Makes subsequent opens for the named interface fail.
    pub fn set_open_error(&self, ifname: &str, reason: &str) {
        self.open_errors
            .lock()
            .unwrap()
            .insert(ifname.to_owned(), reason.to_owned());
    }

    /// Lets subsequent opens for the named interface succeed again.
    pub fn clear_open_error(&self, ifname: &str) {
        self.open_errors.lock().unwrap().remove(ifname);
    }
}

#[async_trait]
impl SocketProvider for FakeSocketRegistry {
    async fn open(&self, ifname: &str) -> Result<Arc<dyn RaSocket>, IoError> {
        if let Some(reason) = self.open_errors.lock().unwrap().get(ifname) {
            return Err(IoError::SocketError(std::io::Error::other(
                reason.clone(),
            )));
        }
        let socket = Arc::new(FakeSocket::new());
        self.sockets
            .lock()
            .unwrap()
            .insert(ifname.to_owned(), socket.clone());
        Ok(socket)
    }
}

// ===== impl FakeDeviceWatcher =====

impl FakeDeviceWatcher {
    pub fn new() -> Arc<FakeDeviceWatcher> {
        Arc::new(FakeDeviceWatcher::default())
    }

    /// Injects a device-state transition, coalescing with any unread one.
    pub fn update(&self, ifname: &str, state: DeviceState) {
        let mut devices = self.devices.lock().unwrap();
        match devices.entry(ifname.to_owned()) {
            Entry::Occupied(entry) => {
                entry.get().send_replace(state);
            }
            Entry::Vacant(entry) => {
                entry.insert(watch::channel(state).0);
            }
        }
    }
}

#[async_trait]
impl DeviceWatcher for FakeDeviceWatcher {
    async fn subscribe(&self, ifname: &str) -> watch::Receiver<DeviceState> {
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry(ifname.to_owned())
            .or_insert_with(|| watch::channel(DeviceState::default()).0)
            .subscribe()
    }

    async fn unsubscribe(&self, _ifname: &str) {
        // State is kept so a later resubscription picks it up again.
    }
}
