//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Link-layer address of variable length.
//
// Ethernet interfaces report 6 octets, but NDP link-layer address options
// are padded TLVs and the kernel may report other lengths (e.g. Infiniband),
// so no fixed size is assumed.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct HwAddr(Vec<u8>);

// ===== impl HwAddr =====

impl HwAddr {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HwAddr {
    fn from(bytes: Vec<u8>) -> Self {
        HwAddr(bytes)
    }
}

impl From<&[u8]> for HwAddr {
    fn from(bytes: &[u8]) -> Self {
        HwAddr(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for HwAddr {
    fn from(bytes: [u8; N]) -> Self {
        HwAddr(bytes.to_vec())
    }
}

impl std::fmt::Display for HwAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(":")?;
            }
            f.write_fmt(format_args!("{octet:02x}"))?;
        }
        Ok(())
    }
}

/// Error type for link-layer address parsing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseHwAddrError;

impl std::fmt::Display for ParseHwAddrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid link-layer address format")
    }
}

impl std::error::Error for ParseHwAddrError {}

impl FromStr for HwAddr {
    type Err = ParseHwAddrError;

    /// Parse a colon- or hyphen-separated link-layer address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else {
            return Err(ParseHwAddrError);
        };

        let mut bytes = Vec::with_capacity(parts.len());
        for part in parts {
            bytes.push(
                u8::from_str_radix(part, 16).map_err(|_| ParseHwAddrError)?,
            );
        }

        Ok(HwAddr(bytes))
    }
}
