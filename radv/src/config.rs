//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error};
use crate::packet::RouterPreference;

// Bounds for the unsolicited RA interval (RFC 4861 MinRtrAdvInterval of
// 0.07s up to the protocol maximum of 1800s).
pub const RA_INTERVAL_MIN: u64 = 70;
pub const RA_INTERVAL_MAX: u64 = 1_800_000;

// Default prefix lifetimes (RFC 4861, Section 6.2.1).
pub const DFLT_PREFERRED_LIFETIME: u32 = 604_800;
pub const DFLT_VALID_LIFETIME: u32 = 2_592_000;

// Maximum PREF64 lifetime (RFC 8781, Section 4).
pub const PREF64_LIFETIME_MAX: u16 = 65_528;

// Prefix lengths a PREF64 option can express (RFC 8781, Section 4).
const PREF64_PREFIX_LENGTHS: [u8; 6] = [32, 40, 48, 56, 64, 96];

// Daemon configuration: the set of interfaces to advertise on.
//
// The field surface (camelCase) is the external YAML/JSON schema; all
// values are already strongly typed once deserialized. `validate` checks
// the rules the type system cannot express and is invoked again by the
// daemon before any configuration is applied.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    pub interfaces: Vec<InterfaceConfig>,
}

// Per-interface RA parameters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct InterfaceConfig {
    pub name: String,
    pub ra_interval_milliseconds: u64,
    pub current_hop_limit: u8,
    pub managed: bool,
    pub other: bool,
    pub preference: RouterPreference,
    pub router_lifetime_seconds: u16,
    pub reachable_time_milliseconds: u32,
    pub retransmit_time_milliseconds: u32,
    // Zero means the MTU option is not advertised.
    pub mtu: u32,
    pub prefixes: Vec<PrefixConfig>,
    pub routes: Vec<RouteConfig>,
    pub rdnsses: Vec<RdnssConfig>,
    pub dnssls: Vec<DnsslConfig>,
    pub nat64_prefixes: Vec<Nat64PrefixConfig>,
}

// Prefix Information option parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PrefixConfig {
    pub prefix: Ipv6Network,
    #[serde(default)]
    pub on_link: bool,
    #[serde(default)]
    pub autonomous: bool,
    // Unset lifetimes fall back to the RFC 4861 defaults at build time;
    // zero is a valid, distinct value (deprecates the prefix).
    #[serde(default)]
    pub preferred_lifetime_seconds: Option<u32>,
    #[serde(default)]
    pub valid_lifetime_seconds: Option<u32>,
}

// Route Information option parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RouteConfig {
    pub prefix: Ipv6Network,
    #[serde(default)]
    pub preference: RouterPreference,
    pub lifetime_seconds: u32,
}

// Recursive DNS Server option parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RdnssConfig {
    pub lifetime_seconds: u32,
    pub addresses: Vec<Ipv6Addr>,
}

// DNS Search List option parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DnsslConfig {
    pub lifetime_seconds: u32,
    pub domain_names: Vec<String>,
}

// PREF64 option parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Nat64PrefixConfig {
    pub prefix: Ipv6Network,
    // Unset falls back to three times the RA interval, rounded up to the
    // option's 8-second unit.
    #[serde(default)]
    pub lifetime_seconds: Option<u16>,
}

// ===== impl Config =====

impl Config {
    /// Parses a YAML configuration from a string.
    pub fn from_yaml(data: &str) -> Result<Config, Error> {
        serde_yaml::from_str(data)
            .map_err(|error| Error::ParseError(error.to_string()))
    }

    /// Parses a YAML configuration from a file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let data = std::fs::read_to_string(path)
            .map_err(|error| Error::ParseError(error.to_string()))?;
        Config::from_yaml(&data)
    }

    /// Parses a JSON configuration from a reader.
    pub fn from_json<R: std::io::Read>(reader: R) -> Result<Config, Error> {
        serde_json::from_reader(reader)
            .map_err(|error| Error::ParseError(error.to_string()))
    }

    /// Checks the configuration rules that the type system cannot express.
    ///
    /// A configuration that passes this check is safe to hand to the
    /// daemon; the builder assumes validated input.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for iface in &self.interfaces {
            if iface.name.is_empty() {
                return Err(ConfigError::MissingInterfaceName);
            }
            if !names.insert(&iface.name) {
                return Err(ConfigError::DuplicateInterfaceName(
                    iface.name.clone(),
                ));
            }
            iface.validate()?;
        }
        Ok(())
    }
}

// ===== impl InterfaceConfig =====

impl InterfaceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.name;

        if !(RA_INTERVAL_MIN..=RA_INTERVAL_MAX)
            .contains(&self.ra_interval_milliseconds)
        {
            return Err(ConfigError::RaIntervalOutOfRange(
                name.clone(),
                self.ra_interval_milliseconds,
            ));
        }

        // A router that isn't a candidate default router (lifetime zero)
        // must advertise a medium preference (RFC 4191, Section 2.2).
        if self.router_lifetime_seconds == 0
            && self.preference != RouterPreference::Medium
        {
            return Err(ConfigError::PreferenceWithZeroLifetime(name.clone()));
        }

        for (i, prefix) in self.prefixes.iter().enumerate() {
            let preferred = prefix
                .preferred_lifetime_seconds
                .unwrap_or(DFLT_PREFERRED_LIFETIME);
            let valid =
                prefix.valid_lifetime_seconds.unwrap_or(DFLT_VALID_LIFETIME);
            if preferred > valid {
                return Err(ConfigError::PreferredExceedsValid(
                    name.clone(),
                    prefix.prefix,
                ));
            }
            for other in &self.prefixes[i + 1..] {
                if prefix.prefix.contains(other.prefix.network())
                    || other.prefix.contains(prefix.prefix.network())
                {
                    return Err(ConfigError::OverlappingPrefixes(
                        name.clone(),
                        prefix.prefix,
                        other.prefix,
                    ));
                }
            }
        }

        let mut route_prefixes = HashSet::new();
        for route in &self.routes {
            if !route_prefixes.insert(route.prefix) {
                return Err(ConfigError::DuplicateRoutePrefix(
                    name.clone(),
                    route.prefix,
                ));
            }
        }

        for rdnss in &self.rdnsses {
            if rdnss.addresses.is_empty() {
                return Err(ConfigError::EmptyRdnssAddresses(name.clone()));
            }
            let mut addresses = HashSet::new();
            for address in &rdnss.addresses {
                if !addresses.insert(address) {
                    return Err(ConfigError::DuplicateRdnssAddress(
                        name.clone(),
                        *address,
                    ));
                }
            }
        }

        for dnssl in &self.dnssls {
            if dnssl.domain_names.is_empty() {
                return Err(ConfigError::EmptyDnsslDomains(name.clone()));
            }
            let mut domains = HashSet::new();
            for domain in &dnssl.domain_names {
                if !domains.insert(domain) {
                    return Err(ConfigError::DuplicateDnsslDomain(
                        name.clone(),
                        domain.clone(),
                    ));
                }
                if !is_valid_domain(domain) {
                    return Err(ConfigError::InvalidDomainName(
                        name.clone(),
                        domain.clone(),
                    ));
                }
            }
        }

        for nat64 in &self.nat64_prefixes {
            if !PREF64_PREFIX_LENGTHS.contains(&nat64.prefix.prefix()) {
                return Err(ConfigError::InvalidNat64PrefixLength(
                    name.clone(),
                    nat64.prefix.prefix(),
                ));
            }
            if let Some(lifetime) = nat64.lifetime_seconds {
                if lifetime > PREF64_LIFETIME_MAX {
                    return Err(ConfigError::Nat64LifetimeOutOfRange(
                        name.clone(),
                        lifetime,
                    ));
                }
            }
        }

        Ok(())
    }
}

// ===== helper functions =====

// Accepts non-qualified domain names only: no trailing dot, LDH labels of
// at most 63 octets, and nothing that parses as an IP address.
fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty()
        || domain.len() > 253
        || domain.parse::<IpAddr>().is_ok()
    {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
