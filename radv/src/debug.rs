//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use tracing::{debug, debug_span};

use crate::device::DeviceState;
use crate::packet::RouterAdvertisement;
use crate::worker::WorkerState;

// Daemon debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Workers
    WorkerSpawn(&'a str),
    WorkerDelete(&'a str),
    WorkerStateChange(&'a str, &'a WorkerState, &'a WorkerState),
    // Network
    AdvertTx(&'a str, Option<&'a Ipv6Addr>, &'a RouterAdvertisement),
    SolicitRx(&'a str, &'a Ipv6Addr),
    // Device state
    DeviceUpdate(&'a str, &'a DeviceState),
    // Configuration
    ConfigReload,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::WorkerSpawn(ifname) | Debug::WorkerDelete(ifname) => {
                debug!(%ifname, "{}", self);
            }
            Debug::WorkerStateChange(ifname, old_state, new_state) => {
                debug!(%ifname, ?old_state, ?new_state, "{}", self);
            }
            Debug::AdvertTx(ifname, dst, advert) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&advert).unwrap();
                        match dst {
                            Some(dst) => debug!(%ifname, %dst, %data, "{}", self),
                            None => debug!(%ifname, %data, "{}", self),
                        }
                    })
                })
            }
            Debug::SolicitRx(ifname, src) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(%ifname, %src, "{}", self);
                    })
                })
            }
            Debug::DeviceUpdate(ifname, state) => {
                debug!(%ifname, ?state, "{}", self);
            }
            Debug::ConfigReload => {
                debug!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::WorkerSpawn(..) => {
                write!(f, "worker created")
            }
            Debug::WorkerDelete(..) => {
                write!(f, "worker deleted")
            }
            Debug::WorkerStateChange(..) => {
                write!(f, "worker state change")
            }
            Debug::AdvertTx(_, Some(_), _) => {
                write!(f, "solicited router advertisement")
            }
            Debug::AdvertTx(_, None, _) => {
                write!(f, "unsolicited router advertisement")
            }
            Debug::SolicitRx(..) => {
                write!(f, "router solicitation")
            }
            Debug::DeviceUpdate(..) => {
                write!(f, "device state update")
            }
            Debug::ConfigReload => {
                write!(f, "configuration reload")
            }
        }
    }
}
