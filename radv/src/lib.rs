//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod builder;
pub mod capabilities;
pub mod config;
pub mod daemon;
pub mod debug;
pub mod device;
pub mod error;
pub mod hw_addr;
pub mod netlink;
pub mod network;
pub mod packet;
pub mod task;
pub mod worker;

#[cfg(feature = "testing")]
pub mod testing;
