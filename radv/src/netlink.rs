//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::single_match)]

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use futures::TryStreamExt;
use netlink_packet_core::NetlinkPayload;
use netlink_packet_route::LinkMessage;
use netlink_packet_route::constants::{IFF_RUNNING, RTNLGRP_LINK};
use netlink_packet_route::rtnl::RtnlMessage;
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::new_connection;
use tokio::sync::watch;
use tracing::trace;

use crate::device::{DeviceState, DeviceWatcher};
use crate::hw_addr::HwAddr;
use crate::task::Task;

/// Kernel-backed device watcher.
///
/// Mirrors link state (IFF_RUNNING and the hardware address) through an
/// rtnetlink link monitor. The monitor task is started lazily on the
/// first subscription and stops when the watcher is dropped.
#[derive(Default)]
pub struct NetlinkWatcher {
    state: Arc<Mutex<WatcherState>>,
}

#[derive(Default)]
struct WatcherState {
    // Last known state per interface, kept even with no subscriber.
    devices: HashMap<String, DeviceState>,
    by_index: HashMap<u32, String>,
    subscriptions: HashMap<String, watch::Sender<DeviceState>>,
    monitor: Option<Task<()>>,
}

// ===== impl NetlinkWatcher =====

impl NetlinkWatcher {
    pub fn new() -> NetlinkWatcher {
        NetlinkWatcher::default()
    }
}

#[async_trait]
impl DeviceWatcher for NetlinkWatcher {
    async fn subscribe(&self, ifname: &str) -> watch::Receiver<DeviceState> {
        let mut state = self.state.lock().unwrap();
        if state.monitor.is_none() {
            let weak = Arc::downgrade(&self.state);
            state.monitor = Some(Task::spawn(run_monitor(weak)));
        }

        let current = state.devices.get(ifname).cloned().unwrap_or_default();
        let tx = match state.subscriptions.entry(ifname.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(watch::channel(current).0),
        };
        tx.subscribe()
    }

    async fn unsubscribe(&self, ifname: &str) {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.remove(ifname);
    }
}

// ===== helper functions =====

fn process_newlink_msg(state: &Mutex<WatcherState>, msg: LinkMessage) {
    use netlink_packet_route::link::nlas::Nla;

    trace!(?msg, "received RTM_NEWLINK message");

    // Fetch interface attributes.
    let ifindex = msg.header.index;
    let is_up = msg.header.flags & IFF_RUNNING != 0;
    let mut ifname = None;
    let mut addr = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::IfName(nla_ifname) => ifname = Some(nla_ifname),
            Nla::Address(nla_addr) => addr = Some(HwAddr::from(nla_addr)),
            _ => (),
        }
    }
    let Some(ifname) = ifname else {
        return;
    };

    // Update the kernel mirror and notify the subscriber, if any.
    let device = DeviceState { is_up, addr };
    let mut state = state.lock().unwrap();
    state.by_index.insert(ifindex, ifname.clone());
    if state.devices.get(&ifname) != Some(&device) {
        state.devices.insert(ifname.clone(), device.clone());
        if let Some(tx) = state.subscriptions.get(&ifname) {
            tx.send_replace(device);
        }
    }
}

fn process_dellink_msg(state: &Mutex<WatcherState>, msg: LinkMessage) {
    trace!(?msg, "received RTM_DELLINK message");

    // A removed interface reads as down with no address; the worker falls
    // back to Initializing until the link reappears.
    let ifindex = msg.header.index;
    let mut state = state.lock().unwrap();
    if let Some(ifname) = state.by_index.remove(&ifindex) {
        state.devices.insert(ifname.clone(), DeviceState::default());
        if let Some(tx) = state.subscriptions.get(&ifname) {
            tx.send_replace(DeviceState::default());
        }
    }
}

async fn run_monitor(state: Weak<Mutex<WatcherState>>) {
    // Create the netlink socket used for the initial link dump.
    let (conn, handle, _) =
        new_connection().expect("Failed to create netlink socket");
    tokio::spawn(conn);

    // Start the link monitor before dumping so no transition is missed.
    let (mut conn, _, mut monitor) =
        new_connection().expect("Failed to create netlink socket");
    let groups = 1 << (RTNLGRP_LINK - 1);
    let addr = SocketAddr::new(0, groups);
    conn.socket_mut()
        .socket_mut()
        .bind(&addr)
        .expect("Failed to bind netlink socket");
    tokio::spawn(conn);

    // Fetch interface information.
    let mut links = handle.link().get().execute();
    while let Ok(Some(msg)) = links.try_next().await {
        let Some(state) = state.upgrade() else {
            return;
        };
        process_newlink_msg(&state, msg);
    }

    // Process link transitions.
    while let Some((msg, _)) = monitor.next().await {
        let Some(state) = state.upgrade() else {
            return;
        };
        if let NetlinkPayload::InnerMessage(msg) = msg.payload {
            match msg {
                RtnlMessage::NewLink(msg) => {
                    process_newlink_msg(&state, msg);
                }
                RtnlMessage::DelLink(msg) => {
                    process_dellink_msg(&state, msg);
                }
                _ => (),
            }
        }
    }
}
