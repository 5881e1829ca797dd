//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use ipnetwork::Ipv6Network;
use tracing::{error, warn};

// Daemon errors.
#[derive(Debug)]
pub enum Error {
    ParseError(String),
    InvalidConfig(ConfigError),
    ReloadDeadlineExceeded,
    WorkerStartError(String, IoError),
}

// Configuration validation errors.
#[derive(Debug)]
pub enum ConfigError {
    MissingInterfaceName,
    DuplicateInterfaceName(String),
    RaIntervalOutOfRange(String, u64),
    PreferenceWithZeroLifetime(String),
    OverlappingPrefixes(String, Ipv6Network, Ipv6Network),
    PreferredExceedsValid(String, Ipv6Network),
    DuplicateRoutePrefix(String, Ipv6Network),
    EmptyRdnssAddresses(String),
    DuplicateRdnssAddress(String, Ipv6Addr),
    EmptyDnsslDomains(String),
    DuplicateDnsslDomain(String, String),
    InvalidDomainName(String, String),
    InvalidNat64PrefixLength(String, u8),
    Nat64LifetimeOutOfRange(String, u16),
}

// Socket I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    SendError(std::io::Error),
    SocketClosed,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::ParseError(reason) => {
                error!(%reason, "{}", self);
            }
            Error::InvalidConfig(error) => {
                error!(%error, "{}", self);
            }
            Error::ReloadDeadlineExceeded => {
                warn!("{}", self);
            }
            Error::WorkerStartError(ifname, error) => {
                warn!(%ifname, error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ParseError(..) => {
                write!(f, "failed to parse configuration")
            }
            Error::InvalidConfig(error) => std::fmt::Display::fmt(error, f),
            Error::ReloadDeadlineExceeded => {
                write!(f, "reload did not complete before the deadline")
            }
            Error::WorkerStartError(..) => {
                write!(f, "failed to start interface worker")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidConfig(error) => Some(error),
            Error::WorkerStartError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Error {
        Error::InvalidConfig(error)
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingInterfaceName => {
                write!(f, "interface name is required")
            }
            ConfigError::DuplicateInterfaceName(name) => {
                write!(f, "duplicate interface name: {name}")
            }
            ConfigError::RaIntervalOutOfRange(name, interval) => {
                write!(
                    f,
                    "{name}: RA interval out of range: {interval}ms (expected 70..=1800000)"
                )
            }
            ConfigError::PreferenceWithZeroLifetime(name) => {
                write!(
                    f,
                    "{name}: non-medium preference requires a non-zero router lifetime"
                )
            }
            ConfigError::OverlappingPrefixes(name, a, b) => {
                write!(f, "{name}: overlapping prefixes: {a} and {b}")
            }
            ConfigError::PreferredExceedsValid(name, prefix) => {
                write!(
                    f,
                    "{name}: preferred lifetime exceeds valid lifetime for prefix {prefix}"
                )
            }
            ConfigError::DuplicateRoutePrefix(name, prefix) => {
                write!(f, "{name}: duplicate route prefix: {prefix}")
            }
            ConfigError::EmptyRdnssAddresses(name) => {
                write!(f, "{name}: RDNSS requires at least one address")
            }
            ConfigError::DuplicateRdnssAddress(name, address) => {
                write!(f, "{name}: duplicate RDNSS address: {address}")
            }
            ConfigError::EmptyDnsslDomains(name) => {
                write!(f, "{name}: DNSSL requires at least one domain name")
            }
            ConfigError::DuplicateDnsslDomain(name, domain) => {
                write!(f, "{name}: duplicate DNSSL domain name: {domain}")
            }
            ConfigError::InvalidDomainName(name, domain) => {
                write!(f, "{name}: invalid DNSSL domain name: {domain}")
            }
            ConfigError::InvalidNat64PrefixLength(name, length) => {
                write!(
                    f,
                    "{name}: invalid NAT64 prefix length: /{length} (expected 32, 40, 48, 56, 64 or 96)"
                )
            }
            ConfigError::Nat64LifetimeOutOfRange(name, lifetime) => {
                write!(
                    f,
                    "{name}: NAT64 lifetime out of range: {lifetime}s (expected 0..=65528)"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SocketError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::MulticastJoinError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::RecvMissingSourceAddr | IoError::SocketClosed => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create raw ICMPv6 socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive ICMPv6 packet")
            }
            IoError::RecvMissingSourceAddr => {
                write!(
                    f,
                    "failed to retrieve source address from received packet"
                )
            }
            IoError::SendError(..) => {
                write!(f, "failed to send ICMPv6 packet")
            }
            IoError::SocketClosed => {
                write!(f, "socket is closed")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== global functions =====

pub(crate) fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
