//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::hw_addr::HwAddr;

// Observed state of a host network interface.
//
// The default value (down, no address) doubles as the "interface not
// present" state: a worker holding it sends nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DeviceState {
    pub is_up: bool,
    pub addr: Option<HwAddr>,
}

/// Source of per-interface device state.
///
/// Subscriptions are watch channels: delivery is coalescing (latest wins)
/// and the current state is readable immediately after subscribing. The
/// production implementation mirrors the kernel via netlink; tests inject
/// a fake with an `update` method.
#[async_trait]
pub trait DeviceWatcher: Send + Sync {
    /// Returns an updates channel for the named interface.
    async fn subscribe(&self, ifname: &str) -> watch::Receiver<DeviceState>;

    /// Drops the updates channel for the named interface.
    async fn unsubscribe(&self, ifname: &str);
}
