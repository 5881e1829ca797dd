//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::config::{
    DFLT_PREFERRED_LIFETIME, DFLT_VALID_LIFETIME, InterfaceConfig,
    PREF64_LIFETIME_MAX,
};
use crate::device::DeviceState;
use crate::packet::{
    DnsSearchList, NdOption, Pref64, PrefixInformation, RecursiveDnsServer,
    RouteInformation, RouterAdvertisement,
};

// Builds the Router Advertisement for an interface from its configuration
// and the current device state.
//
// Options are appended in a fixed order: MTU, source link-layer address,
// prefix information, route information, RDNSS, DNSSL, PREF64. The
// configuration is assumed validated; this function does not fail.
pub fn build_advert(
    config: &InterfaceConfig,
    device: &DeviceState,
) -> RouterAdvertisement {
    let mut options = Vec::new();

    if config.mtu > 0 {
        options.push(NdOption::Mtu(config.mtu));
    }

    if let Some(addr) = &device.addr {
        if !addr.is_empty() {
            options.push(NdOption::SourceLinkLayerAddress(addr.clone()));
        }
    }

    for prefix in &config.prefixes {
        options.push(NdOption::PrefixInformation(PrefixInformation {
            prefix: prefix.prefix,
            on_link: prefix.on_link,
            autonomous: prefix.autonomous,
            valid_lifetime: prefix
                .valid_lifetime_seconds
                .unwrap_or(DFLT_VALID_LIFETIME),
            preferred_lifetime: prefix
                .preferred_lifetime_seconds
                .unwrap_or(DFLT_PREFERRED_LIFETIME),
        }));
    }

    for route in &config.routes {
        options.push(NdOption::RouteInformation(RouteInformation {
            prefix: route.prefix,
            preference: route.preference,
            lifetime: route.lifetime_seconds,
        }));
    }

    for rdnss in &config.rdnsses {
        options.push(NdOption::RecursiveDnsServer(RecursiveDnsServer {
            lifetime: rdnss.lifetime_seconds,
            servers: rdnss.addresses.clone(),
        }));
    }

    for dnssl in &config.dnssls {
        options.push(NdOption::DnsSearchList(DnsSearchList {
            lifetime: dnssl.lifetime_seconds,
            domains: dnssl.domain_names.clone(),
        }));
    }

    for nat64 in &config.nat64_prefixes {
        options.push(NdOption::Pref64(Pref64 {
            prefix: nat64.prefix,
            lifetime: nat64.lifetime_seconds.unwrap_or_else(|| {
                default_pref64_lifetime(config.ra_interval_milliseconds)
            }),
        }));
    }

    RouterAdvertisement {
        cur_hop_limit: config.current_hop_limit,
        managed: config.managed,
        other: config.other,
        preference: config.preference,
        router_lifetime: config.router_lifetime_seconds,
        reachable_time: config.reachable_time_milliseconds,
        retrans_timer: config.retransmit_time_milliseconds,
        options,
    }
}

// Three times the unsolicited RA interval, rounded up to the option's
// 8-second unit (RFC 8781, Section 4.1).
fn default_pref64_lifetime(interval_ms: u64) -> u16 {
    let lifetime = (interval_ms * 3).div_ceil(8000) * 8;
    lifetime.min(PREF64_LIFETIME_MAX as u64) as u16
}

// ===== tests =====
