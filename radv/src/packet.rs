//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::hw_addr::HwAddr;

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// ICMPv6 message types (RFC 4861).
pub const MSG_TYPE_ROUTER_SOLICIT: u8 = 133;
pub const MSG_TYPE_ROUTER_ADVERT: u8 = 134;

// NDP option types.
const OPT_SOURCE_LINK_LAYER_ADDR: u8 = 1;
const OPT_PREFIX_INFORMATION: u8 = 3;
const OPT_MTU: u8 = 5;
const OPT_ROUTE_INFORMATION: u8 = 24;
const OPT_RECURSIVE_DNS_SERVER: u8 = 25;
const OPT_DNS_SEARCH_LIST: u8 = 31;
const OPT_PREF64: u8 = 38;

//
// Router Advertisement message (RFC 4861, Section 4.2).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |     Code      |          Checksum             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Cur Hop Limit |M|O|H|Prf|Resvd|       Router Lifetime         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Reachable Time                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Retrans Timer                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Options ...
// +-+-+-+-+-+-+-+-+-+-+-+-
//
// The checksum is left as zero: the kernel fills it in on raw ICMPv6
// sockets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouterAdvertisement {
    pub cur_hop_limit: u8,
    pub managed: bool,
    pub other: bool,
    pub preference: RouterPreference,
    // Seconds.
    pub router_lifetime: u16,
    // Milliseconds.
    pub reachable_time: u32,
    // Milliseconds.
    pub retrans_timer: u32,
    pub options: Vec<NdOption>,
}

//
// Router Solicitation message (RFC 4861, Section 4.1).
//
// Options other than the source link-layer address are skipped.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouterSolicitation {
    pub source_lladdr: Option<HwAddr>,
}

// Default Router Preference (RFC 4191, Section 2.1).
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterPreference {
    Low,
    #[default]
    Medium,
    High,
}

// NDP options carried in Router Advertisements.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NdOption {
    SourceLinkLayerAddress(HwAddr),
    Mtu(u32),
    PrefixInformation(PrefixInformation),
    RouteInformation(RouteInformation),
    RecursiveDnsServer(RecursiveDnsServer),
    DnsSearchList(DnsSearchList),
    Pref64(Pref64),
}

// Prefix Information option (RFC 4861, Section 4.6.2).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PrefixInformation {
    pub prefix: Ipv6Network,
    pub on_link: bool,
    pub autonomous: bool,
    // Seconds.
    pub valid_lifetime: u32,
    // Seconds.
    pub preferred_lifetime: u32,
}

// Route Information option (RFC 4191, Section 2.3).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteInformation {
    pub prefix: Ipv6Network,
    pub preference: RouterPreference,
    // Seconds.
    pub lifetime: u32,
}

// Recursive DNS Server option (RFC 8106, Section 5.1).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RecursiveDnsServer {
    // Seconds.
    pub lifetime: u32,
    pub servers: Vec<Ipv6Addr>,
}

// DNS Search List option (RFC 8106, Section 5.2).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DnsSearchList {
    // Seconds.
    pub lifetime: u32,
    pub domains: Vec<String>,
}

// PREF64 option (RFC 8781, Section 4).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Pref64 {
    pub prefix: Ipv6Network,
    // Seconds, a multiple of 8 no greater than 65528.
    pub lifetime: u16,
}

// NDP decode errors.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    TooShort(usize),
    InvalidMessageType(u8),
    InvalidCode(u8),
    InvalidOptionLength(u8),
}

// ===== impl RouterAdvertisement =====

impl RouterAdvertisement {
    // Encodes the Router Advertisement into a bytes buffer, ICMPv6 header
    // included.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1280);
        buf.put_u8(MSG_TYPE_ROUTER_ADVERT);
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u8(self.cur_hop_limit);
        let mut flags = self.preference.bits() << 3;
        if self.managed {
            flags |= 0x80;
        }
        if self.other {
            flags |= 0x40;
        }
        buf.put_u8(flags);
        buf.put_u16(self.router_lifetime);
        buf.put_u32(self.reachable_time);
        buf.put_u32(self.retrans_timer);
        for option in &self.options {
            option.encode(&mut buf);
        }
        buf
    }
}

// ===== impl RouterSolicitation =====

impl RouterSolicitation {
    // Decodes a Router Solicitation from a bytes buffer, ICMPv6 header
    // included. The checksum was already verified by the kernel.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        if data.len() < 8 {
            return Err(DecodeError::TooShort(data.len()));
        }

        let mut buf = Bytes::copy_from_slice(data);
        let msg_type = buf.get_u8();
        if msg_type != MSG_TYPE_ROUTER_SOLICIT {
            return Err(DecodeError::InvalidMessageType(msg_type));
        }
        let code = buf.get_u8();
        if code != 0 {
            return Err(DecodeError::InvalidCode(code));
        }
        let _checksum = buf.get_u16();
        let _reserved = buf.get_u32();

        let mut rs = RouterSolicitation::default();
        while buf.remaining() >= 2 {
            let opt_type = buf.get_u8();
            let opt_len = buf.get_u8();
            if opt_len == 0 {
                return Err(DecodeError::InvalidOptionLength(opt_len));
            }
            let opt_body = opt_len as usize * 8 - 2;
            if buf.remaining() < opt_body {
                return Err(DecodeError::TooShort(data.len()));
            }
            match opt_type {
                OPT_SOURCE_LINK_LAYER_ADDR => {
                    let mut addr = vec![0; opt_body];
                    buf.copy_to_slice(&mut addr);
                    rs.source_lladdr = Some(addr.into());
                }
                _ => buf.advance(opt_body),
            }
        }

        Ok(rs)
    }
}

// ===== impl RouterPreference =====

impl RouterPreference {
    // Two-bit Prf encoding (RFC 4191, Section 2.1).
    pub(crate) fn bits(&self) -> u8 {
        match self {
            RouterPreference::Low => 0b11,
            RouterPreference::Medium => 0b00,
            RouterPreference::High => 0b01,
        }
    }
}

// ===== impl NdOption =====

impl NdOption {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            NdOption::SourceLinkLayerAddress(addr) => {
                // The option is padded to the 8-octet TLV boundary.
                let len = (2 + addr.len()).div_ceil(8);
                buf.put_u8(OPT_SOURCE_LINK_LAYER_ADDR);
                buf.put_u8(len as u8);
                buf.put_slice(addr.as_bytes());
                buf.put_bytes(0, len * 8 - 2 - addr.len());
            }
            NdOption::Mtu(mtu) => {
                buf.put_u8(OPT_MTU);
                buf.put_u8(1);
                buf.put_u16(0);
                buf.put_u32(*mtu);
            }
            NdOption::PrefixInformation(pi) => {
                buf.put_u8(OPT_PREFIX_INFORMATION);
                buf.put_u8(4);
                buf.put_u8(pi.prefix.prefix());
                let mut flags = 0;
                if pi.on_link {
                    flags |= 0x80;
                }
                if pi.autonomous {
                    flags |= 0x40;
                }
                buf.put_u8(flags);
                buf.put_u32(pi.valid_lifetime);
                buf.put_u32(pi.preferred_lifetime);
                buf.put_u32(0);
                buf.put_slice(&pi.prefix.network().octets());
            }
            NdOption::RouteInformation(ri) => {
                // The prefix field is truncated to the fewest 8-octet
                // units that still cover the prefix length.
                let prefix_octets =
                    (ri.prefix.prefix() as usize).div_ceil(64) * 8;
                buf.put_u8(OPT_ROUTE_INFORMATION);
                buf.put_u8(1 + (prefix_octets / 8) as u8);
                buf.put_u8(ri.prefix.prefix());
                buf.put_u8(ri.preference.bits() << 3);
                buf.put_u32(ri.lifetime);
                buf.put_slice(&ri.prefix.network().octets()[..prefix_octets]);
            }
            NdOption::RecursiveDnsServer(rdnss) => {
                buf.put_u8(OPT_RECURSIVE_DNS_SERVER);
                buf.put_u8(1 + 2 * rdnss.servers.len() as u8);
                buf.put_u16(0);
                buf.put_u32(rdnss.lifetime);
                for server in &rdnss.servers {
                    buf.put_slice(&server.octets());
                }
            }
            NdOption::DnsSearchList(dnssl) => {
                // Domain names use the DNS wire format (RFC 1035 label
                // sequences), zero-padded to the TLV boundary.
                let mut names = BytesMut::new();
                for domain in &dnssl.domains {
                    for label in domain.split('.') {
                        names.put_u8(label.len() as u8);
                        names.put_slice(label.as_bytes());
                    }
                    names.put_u8(0);
                }
                let len = (8 + names.len()).div_ceil(8);
                buf.put_u8(OPT_DNS_SEARCH_LIST);
                buf.put_u8(len as u8);
                buf.put_u16(0);
                buf.put_u32(dnssl.lifetime);
                buf.put_slice(&names);
                buf.put_bytes(0, len * 8 - 8 - names.len());
            }
            NdOption::Pref64(pref64) => {
                buf.put_u8(OPT_PREF64);
                buf.put_u8(2);
                let plc = match pref64.prefix.prefix() {
                    96 => 0,
                    64 => 1,
                    56 => 2,
                    48 => 3,
                    40 => 4,
                    _ => 5,
                };
                buf.put_u16((pref64.lifetime / 8) << 3 | plc);
                buf.put_slice(&pref64.prefix.network().octets()[..12]);
            }
        }
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooShort(len) => {
                write!(f, "not enough bytes for NDP message: {len}")
            }
            DecodeError::InvalidMessageType(msg_type) => {
                write!(f, "unexpected ICMPv6 message type: {msg_type}")
            }
            DecodeError::InvalidCode(code) => {
                write!(f, "unexpected ICMPv6 code: {code}")
            }
            DecodeError::InvalidOptionLength(len) => {
                write!(f, "invalid NDP option length: {len}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
